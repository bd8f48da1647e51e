use crate::error::{Error, Result};

use pcap_file::pcap::{PcapHeader, PcapPacket, PcapWriter};
use pcap_file::DataLink;
use pnet::datalink::{self, Channel, DataLinkSender};
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Prefix of the targets that designate a pcap file instead of an interface
pub const FILE_PREFIX: &str = "file://";

const SNAPLEN: u32 = 65536;

/// Where the synthesized frames go. Frames are written one at a time, in order.
pub trait PacketSink {
    /// Persist or transmit one fully serialized link-layer frame
    fn write_frame(&mut self, frame: &[u8]) -> Result<()>;

    /// Let time pass between two frames
    fn idle(&mut self, duration: Duration) {
        thread::sleep(duration);
    }

    /// Flush and release the sink
    fn close(self) -> Result<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

/// Keeps the frames in memory
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    pub frames: Vec<Vec<u8>>,
    /// Sum of the idle periods requested so far
    pub idle_time: Duration,
    /// Reject every frame once this many have been accepted
    pub fail_after: Option<usize>,
}

impl PacketSink for MemorySink {
    fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        if self.fail_after.is_some_and(|n| self.frames.len() >= n) {
            return Err(Error::sink(format!(
                "memory sink full after {} frames",
                self.frames.len()
            )));
        }
        self.frames.push(frame.to_vec());
        Ok(())
    }

    fn idle(&mut self, duration: Duration) {
        self.idle_time += duration;
    }
}

/// Writes the frames into a pcap file.
///
/// Timestamps come from a virtual clock: every frame moves it forward by
/// `step`, and idle periods move it forward instead of sleeping.
pub struct PcapFileSink<W: Write> {
    writer: PcapWriter<W>,
    clock: Duration,
    step: Duration,
    written: usize,
}

impl PcapFileSink<BufWriter<std::fs::File>> {
    pub fn create(path: &Path, datalink: DataLink, start: Duration, step: Duration) -> Result<Self> {
        let file_out = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| Error::io(path, e))?;
        log::trace!("Saving into {}", path.display());
        PcapFileSink::new(BufWriter::new(file_out), datalink, start, step)
    }
}

impl<W: Write> PcapFileSink<W> {
    pub fn new(inner: W, datalink: DataLink, start: Duration, step: Duration) -> Result<Self> {
        let header = PcapHeader {
            datalink,
            snaplen: SNAPLEN,
            ..Default::default()
        };
        let writer = PcapWriter::with_header(inner, header).map_err(Error::sink)?;
        Ok(PcapFileSink {
            writer,
            clock: start,
            step,
            written: 0,
        })
    }

    /// Number of frames written so far
    pub fn written(&self) -> usize {
        self.written
    }

    /// Timestamp of the next frame
    pub fn clock(&self) -> Duration {
        self.clock
    }

    pub fn into_inner(self) -> W {
        self.writer.into_writer()
    }
}

impl<W: Write> PacketSink for PcapFileSink<W> {
    fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        let len = u32::try_from(frame.len()).map_err(Error::sink)?;
        self.writer
            .write_packet(&PcapPacket::new(self.clock, len, frame))
            .map_err(Error::sink)?;
        self.clock += self.step;
        self.written += 1;
        Ok(())
    }

    fn idle(&mut self, duration: Duration) {
        self.clock += duration;
    }

    fn close(self) -> Result<()> {
        log::trace!("{} frames written", self.written);
        self.writer.into_writer().flush().map_err(Error::sink)
    }
}

/// Injects the frames on a live network interface
pub struct InterfaceSink {
    name: String,
    tx: Box<dyn DataLinkSender>,
}

impl InterfaceSink {
    pub fn open(name: &str) -> Result<Self> {
        let interface = datalink::interfaces()
            .into_iter()
            .find(|i| i.name == name)
            .ok_or_else(|| Error::Config(format!("no network interface named {name}")))?;
        log::debug!("Injecting on {} ({:?})", interface.name, interface.mac);
        match datalink::channel(&interface, Default::default()) {
            Ok(Channel::Ethernet(tx, _)) => Ok(InterfaceSink {
                name: name.to_string(),
                tx,
            }),
            Ok(_) => Err(Error::Config(format!(
                "unsupported channel type on interface {name}"
            ))),
            Err(e) => Err(Error::sink(e)),
        }
    }
}

impl PacketSink for InterfaceSink {
    fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        match self.tx.send_to(frame, None) {
            Some(Ok(())) => Ok(()),
            Some(Err(e)) => Err(Error::sink(e)),
            None => Err(Error::sink(format!("cannot send on {}", self.name))),
        }
    }
}

/// Either a pcap file or a live interface, depending on the target string
pub enum TargetSink {
    File(PcapFileSink<BufWriter<std::fs::File>>),
    Interface(InterfaceSink),
}

impl TargetSink {
    /// `file://path` opens a pcap file with the given link type, anything else
    /// is an interface name. Interfaces always get Ethernet frames.
    pub fn open(target: &str, datalink: DataLink) -> Result<Self> {
        if let Some(path) = target.strip_prefix(FILE_PREFIX) {
            log::info!("Writing pcap to {path}");
            let start = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default();
            Ok(TargetSink::File(PcapFileSink::create(
                Path::new(path),
                datalink,
                start,
                Duration::from_micros(100),
            )?))
        } else {
            log::info!("Writing packets to interface {target}");
            Ok(TargetSink::Interface(InterfaceSink::open(target)?))
        }
    }
}

/// Shorthand for [`TargetSink::open`]
pub fn open_target(target: &str, datalink: DataLink) -> Result<TargetSink> {
    TargetSink::open(target, datalink)
}

impl PacketSink for TargetSink {
    fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        match self {
            TargetSink::File(sink) => sink.write_frame(frame),
            TargetSink::Interface(sink) => sink.write_frame(frame),
        }
    }

    fn idle(&mut self, duration: Duration) {
        match self {
            TargetSink::File(sink) => sink.idle(duration),
            TargetSink::Interface(sink) => sink.idle(duration),
        }
    }

    fn close(self) -> Result<()> {
        match self {
            TargetSink::File(sink) => sink.close(),
            TargetSink::Interface(sink) => sink.close(),
        }
    }
}
