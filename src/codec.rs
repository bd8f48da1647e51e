//! Marker-delimited payload traces.
//!
//! A trace is a sequence of records:
//!
//! ```text
//! MARKER     4 bytes  0x01 'P' 'K' 'T'
//! DIRECTION  1 byte   see DirectionBits
//! PAYLOAD    N bytes  up to the next MARKER or the end of the trace
//! ```
//!
//! There is no length field and no escaping. A payload that contains the
//! marker cannot be represented: the decoder splits it at the embedded
//! marker. The encoder warns about such payloads but writes them unchanged.

use crate::error::{Error, Result};
use crate::structs::*;
use serde::Deserialize;
use std::io::Write;

pub const MARKER: [u8; 4] = *b"\x01PKT";

/// Smallest valid trace: one marker and one direction byte
pub const MIN_TRACE_SIZE: usize = MARKER.len() + 1;

/// Which byte value stands for which side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectionBits {
    pub originator: u8,
    pub responder: u8,
}

impl DirectionBits {
    /// 0x01 for the originator, 0x02 for the responder
    pub const CANONICAL: DirectionBits = DirectionBits {
        originator: 0x01,
        responder: 0x02,
    };
    /// Swapped convention, used by the traces that include network headers
    pub const LEGACY: DirectionBits = DirectionBits {
        originator: 0x02,
        responder: 0x01,
    };

    pub fn byte_for(&self, direction: Direction) -> u8 {
        match direction {
            Direction::Originator => self.originator,
            Direction::Responder => self.responder,
        }
    }

    /// Any value other than the originator pattern is read as the responder
    pub fn direction_of(&self, byte: u8) -> Direction {
        if byte == self.originator {
            Direction::Originator
        } else {
            Direction::Responder
        }
    }
}

impl Default for DirectionBits {
    fn default() -> Self {
        DirectionBits::CANONICAL
    }
}

/// Named direction conventions, as found in configuration files and on the command line
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Convention {
    #[default]
    Canonical,
    Legacy,
}

impl From<Convention> for DirectionBits {
    fn from(c: Convention) -> DirectionBits {
        match c {
            Convention::Canonical => DirectionBits::CANONICAL,
            Convention::Legacy => DirectionBits::LEGACY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceFormat {
    pub marker: [u8; 4],
    pub bits: DirectionBits,
}

impl Default for TraceFormat {
    fn default() -> Self {
        TraceFormat::new(DirectionBits::CANONICAL)
    }
}

impl TraceFormat {
    pub fn new(bits: DirectionBits) -> Self {
        TraceFormat {
            marker: MARKER,
            bits,
        }
    }

    /// Whether a payload would be split by the decoder
    pub fn contains_marker(&self, payload: &[u8]) -> bool {
        find(payload, &self.marker).is_some()
    }

    pub fn encode(&self, frames: &[Frame]) -> Vec<u8> {
        let size = frames
            .iter()
            .map(|f| MIN_TRACE_SIZE + f.payload.len())
            .sum();
        let mut writer = TraceWriter::new(Vec::with_capacity(size), *self);
        for frame in frames {
            // writing into a Vec cannot fail
            let _ = writer.write_frame(frame.direction, &frame.payload);
        }
        writer.into_inner()
    }

    /// Check the trace header and return a lazy iterator over its frames
    pub fn decode<'a>(&self, data: &'a [u8]) -> Result<Frames<'a>> {
        if data.len() < MIN_TRACE_SIZE {
            return Err(Error::MalformedInput(format!(
                "trace too small ({} bytes)",
                data.len()
            )));
        }
        if data[..self.marker.len()] != self.marker {
            return Err(Error::MalformedInput(format!(
                "invalid marker {:02x?}",
                &data[..self.marker.len()]
            )));
        }
        Ok(Frames {
            data,
            offset: 0,
            format: *self,
        })
    }

    /// Decode the whole trace at once
    pub fn decode_all(&self, data: &[u8]) -> Result<Vec<Frame>> {
        self.decode(data)?.collect()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Frames of a trace, in order. Created by [`TraceFormat::decode`].
#[derive(Debug, Clone)]
pub struct Frames<'a> {
    data: &'a [u8],
    offset: usize,
    format: TraceFormat,
}

impl Iterator for Frames<'_> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        let rest = &self.data[self.offset..];
        if rest.is_empty() {
            return None;
        }
        // decode() checked the first marker; the next ones are found by the scan below
        let header_len = self.format.marker.len() + 1;
        if rest.len() < header_len {
            let offset = self.offset;
            self.offset = self.data.len();
            return Some(Err(Error::MalformedInput(format!(
                "truncated frame header at offset {offset}"
            ))));
        }
        let direction = self.format.bits.direction_of(rest[header_len - 1]);
        let body = &rest[header_len..];
        // a payload running to the end of the trace is a valid last frame
        let end = find(body, &self.format.marker).unwrap_or(body.len());
        self.offset += header_len + end;
        Some(Ok(Frame::new(direction, &body[..end])))
    }
}

/// Streaming trace encoder
pub struct TraceWriter<W: Write> {
    inner: W,
    format: TraceFormat,
    frames: usize,
}

impl<W: Write> TraceWriter<W> {
    pub fn new(inner: W, format: TraceFormat) -> Self {
        TraceWriter {
            inner,
            format,
            frames: 0,
        }
    }

    pub fn write_frame(&mut self, direction: Direction, payload: &[u8]) -> std::io::Result<()> {
        if self.format.contains_marker(payload) {
            log::warn!(
                "Payload of frame {} contains the trace marker: it will be split when decoded",
                self.frames
            );
        }
        self.inner.write_all(&self.format.marker)?;
        self.inner.write_all(&[self.format.bits.byte_for(direction)])?;
        self.inner.write_all(payload)?;
        self.frames += 1;
        Ok(())
    }

    /// Number of frames written so far
    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}
