use crate::tcp::SessionState;
use std::path::PathBuf;
use thiserror::Error;

/// Result type of the library
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Every failure is fatal for the conversion at hand: nothing is retried.
#[derive(Error, Debug)]
pub enum Error {
    /// The trace does not follow the marker-delimited format
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// A synthesized packet could not be written or transmitted
    #[error("cannot emit packet: {source}")]
    SinkWrite {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("cannot lay out the {layer} header")]
    Serialization { layer: &'static str },

    #[error("cannot {operation} a session in state {state:?}")]
    InvalidState {
        state: SessionState,
        operation: &'static str,
    },

    #[error("cannot read capture: {0}")]
    Capture(#[from] pcap_file::PcapError),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("replay failed: {0}")]
    Replay(String),
}

impl Error {
    pub fn sink(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Error::SinkWrite {
            source: source.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
