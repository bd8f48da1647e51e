use pkttrace::classify::{Content, ForeignPolicy, KeyMode};
use pkttrace::codec::TraceFormat;
use pkttrace::config::Config;
use pkttrace::pipeline::{self, CaptureOptions, SynthesisOptions};
use pkttrace::replay::{self, ReplayOptions};
use pkttrace::wrap::HeaderWrapper;
use pkttrace::Result;
mod cmd;

use std::process;
use std::time::Duration;

use clap::Parser;

fn run(args: cmd::Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(convention) = args.direction_bits {
        config.convention = convention;
    }
    log::debug!("Configuration: {:?}", config);
    let format = TraceFormat::new(config.convention.into());

    match args.command {
        cmd::Command::FromPcap {
            infile,
            outfile,
            key,
            headers,
            skip_foreign,
        } => {
            let content = if headers {
                Content::Network
            } else {
                Content::Application
            };
            let options = CaptureOptions {
                key_mode: key.unwrap_or(KeyMode::default_for(content)),
                content,
                foreign: if skip_foreign {
                    ForeignPolicy::Skip
                } else {
                    ForeignPolicy::Responder
                },
                format,
            };
            let done = pipeline::capture_to_trace(&infile, &outfile, &options)?;
            println!("{} frames written out of {} packets", done.frames, done.packets);
        }
        cmd::Command::ToPcap {
            infile,
            target,
            port,
            src_port,
            auto_ack,
        } => {
            let options = SynthesisOptions {
                source_port: src_port,
                dest_port: port,
                auto_ack,
            };
            let done = pipeline::trace_to_capture(&infile, &target, &options, &config)?;
            println!("{} packets written for {} records", done.packets, done.frames);
        }
        cmd::Command::HeadersToPcap {
            infile,
            target,
            ip_version,
            raw_link,
        } => {
            let wrapper = HeaderWrapper::new(
                ip_version,
                raw_link,
                &config.session.originator,
                &config.session.responder,
            );
            let done = pipeline::headers_to_capture(&infile, &target, &wrapper, &config)?;
            println!("{} packets rewritten", done.packets);
        }
        cmd::Command::Replay {
            infile,
            outfile,
            port,
            interface,
            record_delay_ms,
        } => {
            let options = ReplayOptions {
                port,
                interface,
                record_delay: Duration::from_millis(record_delay_ms),
                ..Default::default()
            };
            let report = replay::replay_trace(&infile, &outfile, &options, format)?;
            println!("{} records replayed", report.records);
        }
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = cmd::Args::parse();

    if let Err(e) = run(args) {
        log::error!("{e}");
        process::exit(1);
    }
}
