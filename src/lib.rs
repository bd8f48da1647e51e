//! Conversions between packet captures and payload-only traces.
//!
//! A trace keeps the application bytes of a single flow and which side sent
//! them. It can be extracted from a pcap file, turned back into a synthetic
//! TCP session, or replayed over a real loopback connection.

pub mod error;
pub mod structs;

/// Marker-delimited trace format
pub mod codec;
/// Flow keys and payloads of captured frames
pub mod dissect;
/// Originator/responder assignment of captured packets
pub mod classify;
/// Synthetic TCP sessions
pub mod tcp;
/// Destinations of the synthesized frames
pub mod sink;
/// Link layer for recorded network packets
pub mod wrap;

pub mod config;
pub mod pipeline;
pub mod replay;
pub mod stats;

pub use error::{Error, Result};
