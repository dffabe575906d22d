//! Error types
//!
//! Every routing operation returns an explicit error value. None of them panic
//! for expected conditions, and none retry internally.

use crate::graph::{DestinationId, SourceId};
use crate::media::{Codec, MediaKind};

/// Error type for delivery graph and routing operations
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The entity was torn down
    #[error("closed")]
    Closed,

    /// Destination and source disagree on the codec of a kind
    #[error("codec mismatch for {kind}: expected {expected:?}, found {found:?}")]
    CodecMismatch {
        kind: MediaKind,
        /// Codec the destination declares
        expected: Option<Codec>,
        /// Codec the source carries
        found: Option<Codec>,
    },

    /// The destination already has a source for this kind
    #[error("{destination} already bound for {kind}")]
    AlreadyBound {
        destination: DestinationId,
        kind: MediaKind,
    },

    /// A source with this id is already registered
    #[error("source already exists: {0}")]
    SourceExists(SourceId),

    /// Requested stream format was never created
    #[error("format not found: {0}")]
    FormatNotFound(String),

    /// The stream closed before any publisher arrived
    #[error("no publisher")]
    NoPublisher,

    /// A caller-supplied wait elapsed
    #[error("timeout")]
    Timeout,

    /// Router refused to create another stream
    #[error("stream limit reached on router {router}: {limit}")]
    StreamLimit { router: String, limit: usize },
}

impl Error {
    /// Whether the error is a lifecycle violation
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::Closed)
    }
}

/// Error type for configuration loading
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
