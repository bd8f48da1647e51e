use clap::{Parser, Subcommand};
use pkttrace::classify::KeyMode;
use pkttrace::codec::Convention;
use pkttrace::wrap::IpVersion;
use std::path::PathBuf;

#[derive(Debug, Parser, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[clap(subcommand)]
    pub command: Command,
    #[arg(
        short,
        long,
        global = true,
        help = "Path to a TOML file with the addresses and TCP parameters"
    )]
    pub config: Option<PathBuf>,
    #[arg(
        long,
        global = true,
        value_enum,
        help = "Direction byte convention of the traces [default: canonical, or the config file]"
    )]
    pub direction_bits: Option<Convention>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Extract the payloads of the first flow of a pcap file into a trace. The sender of the first
    /// payload is the originator.
    FromPcap {
        #[arg(help = "Input pcap file")]
        infile: PathBuf,
        #[arg(help = "Output trace")]
        outfile: PathBuf,
        #[arg(
            short,
            long,
            value_enum,
            help = "What identifies the flow [default: transport, or network with --headers]"
        )]
        key: Option<KeyMode>,
        #[arg(
            long,
            default_value_t = false,
            help = "Record whole network packets instead of payloads"
        )]
        headers: bool,
        #[arg(
            long,
            default_value_t = false,
            help = "Leave out the packets of other flows instead of recording them as responder"
        )]
        skip_foreign: bool,
    },
    /// Synthesize a TCP session carrying the payloads of a trace. The packets are written to a pcap
    /// file (file://name.pcap) or sent on a network interface.
    ToPcap {
        #[arg(help = "Input trace")]
        infile: PathBuf,
        #[arg(help = "Interface name or file://name.pcap")]
        target: String,
        #[arg(default_value_t = 443, help = "Destination port of the session")]
        port: u16,
        #[arg(
            short,
            long,
            default_value_t = 0,
            help = "Source port of the session, random if 0"
        )]
        src_port: u16,
        #[arg(
            short,
            long,
            default_value_t = false,
            help = "Acknowledge every data segment with an empty ACK"
        )]
        auto_ack: bool,
    },
    /// Write back the network packets of a trace recorded with --headers
    HeadersToPcap {
        #[arg(help = "Input trace")]
        infile: PathBuf,
        #[arg(help = "Interface name or file://name.pcap")]
        target: String,
        #[arg(
            long,
            default_value = "0",
            help = "IP version of the packets (4 or 6), 0 to read it from each packet"
        )]
        ip_version: IpVersion,
        #[arg(
            long,
            default_value_t = false,
            help = "Write the packets without an Ethernet header"
        )]
        raw_link: bool,
    },
    /// Replay a trace over a real TCP connection on the loopback interface, captured by tcpdump
    Replay {
        #[arg(help = "Input trace")]
        infile: PathBuf,
        #[arg(help = "Output pcap file")]
        outfile: PathBuf,
        #[arg(default_value_t = 443, help = "Port of the connection")]
        port: u16,
        #[arg(short, long, default_value = "lo", help = "Interface to capture on")]
        interface: String,
        #[arg(
            long,
            default_value_t = 100,
            help = "Pause after each record, in milliseconds"
        )]
        record_delay_ms: u64,
    },
}
