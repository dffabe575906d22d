//! Statistics snapshots for sources, streams and routers

pub mod metrics;

pub use metrics::{DestinationStats, RouterStats, SourceStats, StreamStats};
