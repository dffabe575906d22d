//! Statistics for delivery graph nodes and routing entities

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::graph::{DestinationId, SourceId};
use crate::media::{MediaKind, PerKind};

/// Aggregate binding record for one destination of a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DestinationStats {
    pub has_audio: bool,
    pub has_video: bool,
    pub has_data: bool,
}

impl DestinationStats {
    /// Whether the destination is bound for a kind
    pub fn has(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Audio => self.has_audio,
            MediaKind::Video => self.has_video,
            MediaKind::Data => self.has_data,
        }
    }

    pub(crate) fn set(&mut self, kind: MediaKind, bound: bool) {
        match kind {
            MediaKind::Audio => self.has_audio = bound,
            MediaKind::Video => self.has_video = bound,
            MediaKind::Data => self.has_data = bound,
        }
    }

    /// No binding left in any kind
    pub fn is_empty(&self) -> bool {
        !(self.has_audio || self.has_video || self.has_data)
    }
}

/// Source-level statistics
#[derive(Debug, Clone)]
pub struct SourceStats {
    pub id: SourceId,
    /// When the source was created
    pub started_at: Instant,
    /// Bound destinations per kind
    pub destinations: PerKind<usize>,
    /// Per-destination binding records
    pub bindings: BTreeMap<DestinationId, DestinationStats>,
    /// Frames fanned out per kind (counted once per frame, not per destination)
    pub frames: PerKind<u64>,
    /// Payload bytes fanned out per kind
    pub bytes: PerKind<u64>,
    /// Destination deliveries that failed
    pub delivery_errors: u64,
    pub key_frame_requests: u64,
    pub loss_reports: u64,
    pub closed: bool,
}

impl SourceStats {
    pub fn new(id: SourceId) -> Self {
        Self {
            id,
            started_at: Instant::now(),
            destinations: PerKind::default(),
            bindings: BTreeMap::new(),
            frames: PerKind::default(),
            bytes: PerKind::default(),
            delivery_errors: 0,
            key_frame_requests: 0,
            loss_reports: 0,
            closed: false,
        }
    }

    /// Get duration since the source started
    pub fn duration(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Calculate input bitrate in bits per second
    pub fn bitrate(&self) -> u64 {
        let total: u64 = self.bytes.iter().map(|(_, b)| *b).sum();
        let secs = self.duration().as_secs();
        if secs > 0 {
            (total * 8) / secs
        } else {
            0
        }
    }

    /// Total bound destinations across kinds
    pub fn destination_count(&self) -> usize {
        self.bindings.len()
    }
}

/// Stream-level statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamStats {
    pub id: String,
    /// Registered sources
    pub source_count: usize,
    /// Current default source
    pub default_source: Option<SourceId>,
    /// Formats created so far
    pub format_count: usize,
    /// Destinations waiting for a publisher
    pub pending_count: usize,
    pub closed: bool,
}

/// Router-level statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterStats {
    pub name: String,
    pub stream_count: usize,
    /// Active sessions summed over all streams
    pub session_count: usize,
}
