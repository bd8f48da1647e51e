use crate::codec::Convention;
use crate::error::{Error, Result};
use crate::tcp::{EndpointConfig, SessionConfig, MAX_MSS};

use pnet::util::MacAddr;
use serde::Deserialize;
use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

/// One side of the synthesized session, as written in the configuration file
#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
struct Endpoint {
    mac: Option<String>,
    ip: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
struct Tcp {
    window: Option<u16>,
    mss: Option<usize>,
    ttl: Option<u8>,
    segment_delay_ms: Option<u64>,
    record_delay_ms: Option<u64>,
    close_delay_ms: Option<u64>,
    seed: Option<u64>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
struct Trace {
    direction_bits: Option<Convention>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    originator: Endpoint,
    #[serde(default)]
    responder: Endpoint,
    #[serde(default)]
    tcp: Tcp,
    #[serde(default)]
    trace: Trace,
}

/// Everything that can be tuned from a configuration file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub session: SessionConfig,
    /// Pause after each record of a trace
    pub record_delay: Duration,
    /// Pause before the teardown of a synthesized session
    pub close_delay: Duration,
    pub convention: Convention,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            session: SessionConfig::default(),
            record_delay: Duration::from_millis(10),
            close_delay: Duration::from_secs(1),
            convention: Convention::Canonical,
        }
    }
}

impl Config {
    /// Read a TOML configuration file
    pub fn load(path: &Path) -> Result<Config> {
        log::debug!("Loading configuration from {}", path.display());
        let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        import_config(&content)
    }
}

fn parse_endpoint(endpoint: Endpoint, default: EndpointConfig, side: &str) -> Result<EndpointConfig> {
    let mac = match endpoint.mac {
        Some(s) => s
            .parse::<MacAddr>()
            .map_err(|_| Error::Config(format!("cannot parse {s:?} into a MAC address ({side})")))?,
        None => default.mac,
    };
    let ip = match endpoint.ip {
        Some(s) => s
            .parse::<Ipv4Addr>()
            .map_err(|_| Error::Config(format!("cannot parse {s:?} into an IPv4 address ({side})")))?,
        None => default.ip,
    };
    Ok(EndpointConfig { mac, ip })
}

/// Parse a TOML configuration. Missing keys keep their default value.
pub fn import_config(config: &str) -> Result<Config> {
    let file: ConfigFile =
        toml::from_str(config).map_err(|e| Error::Config(format!("ill-formed configuration file: {e}")))?;
    let default = Config::default();
    let originator = parse_endpoint(file.originator, default.session.originator, "originator")?;
    let responder = parse_endpoint(file.responder, default.session.responder, "responder")?;
    if originator.ip == responder.ip {
        return Err(Error::Config(format!(
            "originator and responder share the address {}",
            originator.ip
        )));
    }
    let mss = file.tcp.mss.unwrap_or(default.session.mss);
    if mss == 0 || mss > MAX_MSS {
        return Err(Error::Config(format!(
            "mss must be between 1 and {MAX_MSS}, got {mss}"
        )));
    }
    let ms = |v: Option<u64>, d: Duration| v.map(Duration::from_millis).unwrap_or(d);
    Ok(Config {
        session: SessionConfig {
            originator,
            responder,
            window: file.tcp.window.unwrap_or(default.session.window),
            mss,
            ttl: file.tcp.ttl.unwrap_or(default.session.ttl),
            segment_delay: ms(file.tcp.segment_delay_ms, default.session.segment_delay),
            seed: file.tcp.seed,
        },
        record_delay: ms(file.tcp.record_delay_ms, default.record_delay),
        close_delay: ms(file.tcp.close_delay_ms, default.close_delay),
        convention: file.trace.direction_bits.unwrap_or(default.convention),
    })
}
