use crate::classify::{Content, FlowClassifier, ForeignPolicy, KeyMode};
use crate::codec::{TraceFormat, TraceWriter};
use crate::config::Config;
use crate::dissect::dissect;
use crate::error::{Error, Result};
use crate::sink::{self, PacketSink};
use crate::structs::*;
use crate::tcp::TcpSession;
use crate::wrap::HeaderWrapper;

use pcap_file::pcap::PcapReader;
use pcap_file::DataLink;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::time::Duration;

/// Pause between two recorded network packets
pub const HEADER_PACKET_INTERVAL: Duration = Duration::from_millis(200);

/// Outcome of a conversion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Conversion {
    /// Records read or written
    pub frames: usize,
    /// Packets read or written
    pub packets: usize,
}

/// Options of the capture to trace conversion
#[derive(Debug, Clone, Copy, Default)]
pub struct CaptureOptions {
    pub key_mode: KeyMode,
    pub content: Content,
    pub foreign: ForeignPolicy,
    pub format: TraceFormat,
}

/// Options of the trace to capture synthesis
#[derive(Debug, Clone, Copy, Default)]
pub struct SynthesisOptions {
    /// 0 picks an ephemeral port
    pub source_port: u16,
    pub dest_port: u16,
    pub auto_ack: bool,
}

/// Refuse to overwrite the input. `output` may carry the `file://` prefix.
pub fn check_distinct(input: &Path, output: &str) -> Result<()> {
    let output = Path::new(output.strip_prefix(sink::FILE_PREFIX).unwrap_or(output));
    let same = input == output
        || matches!(
            (fs::canonicalize(input), fs::canonicalize(output)),
            (Ok(a), Ok(b)) if a == b
        );
    if same {
        Err(Error::Config(
            "input and output can not be the same file".to_string(),
        ))
    } else {
        Ok(())
    }
}

/// Extract the payloads of the first flow of a capture into a trace
pub fn capture_to_trace(input: &Path, output: &Path, options: &CaptureOptions) -> Result<Conversion> {
    check_distinct(input, &output.to_string_lossy())?;
    let file_in = File::open(input).map_err(|e| Error::io(input, e))?;
    let mut reader = PcapReader::new(BufReader::new(file_in))?;
    let datalink = reader.header().datalink;
    log::debug!("Reading {} ({datalink:?})", input.display());

    let file_out = File::create(output).map_err(|e| Error::io(output, e))?;
    let mut writer = TraceWriter::new(BufWriter::new(file_out), options.format);
    let mut classifier = FlowClassifier::new(options.key_mode, options.content, options.foreign);
    while let Some(packet) = reader.next_packet() {
        let packet = packet?;
        let dissection = dissect(datalink, &packet.data);
        if let Some((direction, content)) = classifier.classify(&dissection) {
            log::trace!("{direction}: {} bytes", content.len());
            writer
                .write_frame(direction, content)
                .map_err(|e| Error::io(output, e))?;
        }
    }
    writer.flush().map_err(|e| Error::io(output, e))?;
    if classifier.skipped_packets() > 0 {
        log::info!(
            "{} packets without a supported flow were ignored",
            classifier.skipped_packets()
        );
    }
    Ok(Conversion {
        frames: writer.frames(),
        packets: classifier.total_packets(),
    })
}

/// Replay the records of a trace through a synthesized TCP session: handshake,
/// one write per record, teardown. Returns the number of records.
pub fn synthesize<S: PacketSink>(
    records: impl IntoIterator<Item = Result<Frame>>,
    session: &mut TcpSession<S>,
    options: &SynthesisOptions,
    config: &Config,
) -> Result<usize> {
    session.connect(options.source_port, options.dest_port)?;
    let mut count = 0;
    for record in records {
        let record = record?;
        session.write(&record.payload, record.direction, options.auto_ack)?;
        session.idle(config.record_delay);
        count += 1;
    }
    session.idle(config.close_delay);
    session.close()?;
    Ok(count)
}

fn read_trace(input: &Path) -> Result<Vec<u8>> {
    let data = fs::read(input).map_err(|e| Error::io(input, e))?;
    log::debug!("{} bytes read from {}", data.len(), input.display());
    Ok(data)
}

/// Synthesize a TCP session from a trace into a pcap file or an interface
pub fn trace_to_capture(
    input: &Path,
    target: &str,
    options: &SynthesisOptions,
    config: &Config,
) -> Result<Conversion> {
    check_distinct(input, target)?;
    let format = TraceFormat::new(config.convention.into());
    let data = read_trace(input)?;
    let records = format.decode(&data)?;
    let sink = sink::open_target(target, DataLink::ETHERNET)?;
    let mut session = TcpSession::new(&config.session, sink);
    let frames = synthesize(records, &mut session, options, config)?;
    let packets = session.emitted();
    session.into_sink().close()?;
    Ok(Conversion { frames, packets })
}

/// Write back the network packets of a trace recorded with headers
pub fn wrap_records<S: PacketSink>(
    records: impl IntoIterator<Item = Result<Frame>>,
    wrapper: &HeaderWrapper,
    sink: &mut S,
) -> Result<usize> {
    let mut count = 0;
    for record in records {
        let record = record?;
        let frame = wrapper.wrap(&record)?;
        sink.idle(HEADER_PACKET_INTERVAL);
        sink.write_frame(&frame)?;
        log::debug!("Wrote packet of length {}", frame.len());
        count += 1;
    }
    Ok(count)
}

/// Turn a trace recorded with headers back into a capture
pub fn headers_to_capture(
    input: &Path,
    target: &str,
    wrapper: &HeaderWrapper,
    config: &Config,
) -> Result<Conversion> {
    check_distinct(input, target)?;
    let format = TraceFormat::new(config.convention.into());
    let data = read_trace(input)?;
    let records = format.decode(&data)?;
    let mut sink = sink::open_target(target, wrapper.datalink())?;
    let count = wrap_records(records, wrapper, &mut sink)?;
    sink.close()?;
    Ok(Conversion {
        frames: count,
        packets: count,
    })
}
