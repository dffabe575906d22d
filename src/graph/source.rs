//! Frame sources and fan-out
//!
//! A source keeps, per media kind, the destinations bound to it and fans each
//! frame out to all of them synchronously on the caller's task.
//!
//! # Locking
//!
//! Mutations take the source's write lock, deliveries take its read lock, so
//! delivery and destination-list mutation never interleave while concurrent
//! deliveries do. While holding its lock a source only ever calls *downstream*
//! (into destinations); destinations never call back into a source with their
//! own lock held. This keeps the lock graph acyclic.
//!
//! Destinations may call back into the source from inside `on_frame` (feedback,
//! codec queries) while the delivering thread still holds the read lock.
//! Everything reachable from such a callback is either lock-free or takes the
//! lock with `read_recursive`, which never queues behind a waiting writer.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{RwLock, RwLockWriteGuard};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::graph::destination::FrameDestination;
use crate::graph::id::{DestinationId, SourceId};
use crate::media::{Codec, FeedbackKind, FeedbackMsg, Frame, MediaKind, Metadata, PerKind};
use crate::stats::{DestinationStats, SourceStats};

/// A producer of frames
pub trait FrameSource: Send + Sync + 'static {
    /// Shared source state
    fn source_core(&self) -> &SourceCore;

    fn id(&self) -> SourceId {
        self.source_core().id()
    }

    /// Current metadata of all kinds
    fn metadata(&self) -> Metadata {
        self.source_core().metadata()
    }

    fn source_codec(&self, kind: MediaKind) -> Option<Codec> {
        self.source_core().codec(kind)
    }

    fn source_audio_codec(&self) -> Option<Codec> {
        self.source_codec(MediaKind::Audio)
    }

    fn source_video_codec(&self) -> Option<Codec> {
        self.source_codec(MediaKind::Video)
    }

    fn add_destination(&self, kind: MediaKind, dest: Arc<dyn FrameDestination>) -> Result<()> {
        self.source_core().add_destination(kind, dest)
    }

    fn add_audio_destination(&self, dest: Arc<dyn FrameDestination>) -> Result<()> {
        self.add_destination(MediaKind::Audio, dest)
    }

    fn add_video_destination(&self, dest: Arc<dyn FrameDestination>) -> Result<()> {
        self.add_destination(MediaKind::Video, dest)
    }

    fn add_data_destination(&self, dest: Arc<dyn FrameDestination>) -> Result<()> {
        self.add_destination(MediaKind::Data, dest)
    }

    fn remove_destination(&self, kind: MediaKind, dest: DestinationId) -> Result<()> {
        self.source_core().remove_destination(kind, dest)
    }

    fn remove_audio_destination(&self, dest: DestinationId) -> Result<()> {
        self.remove_destination(MediaKind::Audio, dest)
    }

    fn remove_video_destination(&self, dest: DestinationId) -> Result<()> {
        self.remove_destination(MediaKind::Video, dest)
    }

    fn remove_data_destination(&self, dest: DestinationId) -> Result<()> {
        self.remove_destination(MediaKind::Data, dest)
    }

    /// Fan a frame out to every destination of its kind
    ///
    /// Returns the number of destinations that accepted the frame.
    fn deliver_frame(&self, frame: &Frame) -> Result<usize> {
        self.source_core().deliver_frame(frame)
    }

    /// Update this source's metadata and push it to bound destinations
    fn deliver_metadata(&self, metadata: &Metadata) -> Result<()> {
        self.source_core().deliver_metadata(metadata)
    }

    /// Feedback that bubbled up from a destination
    ///
    /// The default only records it; live sources override this to react.
    fn on_feedback(&self, feedback: &FeedbackMsg) -> Result<()> {
        self.source_core().record_feedback(feedback)
    }

    /// Tear the source down
    fn close(&self) {
        self.source_core().close();
    }
}

type DestinationMap = BTreeMap<DestinationId, Arc<dyn FrameDestination>>;

struct SourceState {
    metadata: Metadata,
    destinations: PerKind<DestinationMap>,
    /// Kept until a destination has no binding left in any kind
    bindings: BTreeMap<DestinationId, DestinationStats>,
    closed: bool,
}

#[derive(Default)]
struct Counters {
    frames: PerKind<AtomicU64>,
    bytes: PerKind<AtomicU64>,
    delivery_errors: AtomicU64,
    key_frame_requests: AtomicU64,
    loss_reports: AtomicU64,
}

/// Shared state and behavior of every source
pub struct SourceCore {
    id: SourceId,
    me: Weak<dyn FrameSource>,
    state: Arc<RwLock<SourceState>>,
    counters: Counters,
    started: SourceStats,
    token: CancellationToken,
    drained: CancellationToken,
}

impl SourceCore {
    /// Create a source core and spawn its teardown watcher
    ///
    /// `me` is a weak handle to the source that owns this core (see
    /// [`Arc::new_cyclic`]); destinations are given it when they bind.
    /// Must be called from within a Tokio runtime.
    pub fn new(
        me: Weak<dyn FrameSource>,
        id: SourceId,
        metadata: Metadata,
        parent: &CancellationToken,
    ) -> Self {
        let state = Arc::new(RwLock::new(SourceState {
            metadata,
            destinations: PerKind::default(),
            bindings: BTreeMap::new(),
            closed: false,
        }));
        let token = parent.child_token();
        let drained = CancellationToken::new();

        tokio::spawn(watch(id, state.clone(), token.clone(), drained.clone()));

        Self {
            id,
            me,
            state,
            counters: Counters::default(),
            started: SourceStats::new(id),
            token,
            drained,
        }
    }

    pub fn id(&self) -> SourceId {
        self.id
    }

    pub fn metadata(&self) -> Metadata {
        let state = self.state.read_recursive();
        if state.closed {
            return Metadata::default();
        }
        state.metadata.clone()
    }

    pub fn codec(&self, kind: MediaKind) -> Option<Codec> {
        let state = self.state.read_recursive();
        if state.closed {
            return None;
        }
        state.metadata.codec(kind)
    }

    /// Lock-free: `closed` is only ever set after the token is cancelled
    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Number of destinations bound for a kind
    pub fn destination_count(&self, kind: MediaKind) -> usize {
        self.state.read_recursive().destinations.get(kind).len()
    }

    /// Ids of destinations bound for a kind, in delivery order
    pub fn destinations(&self, kind: MediaKind) -> Vec<DestinationId> {
        self.state
            .read_recursive()
            .destinations
            .get(kind)
            .keys()
            .copied()
            .collect()
    }

    pub fn has_destination(&self, kind: MediaKind, dest: DestinationId) -> bool {
        self.state
            .read_recursive()
            .destinations
            .get(kind)
            .contains_key(&dest)
    }

    pub fn add_destination(&self, kind: MediaKind, dest: Arc<dyn FrameDestination>) -> Result<()> {
        let mut state = self.state.write();
        if state.closed || self.token.is_cancelled() {
            return Err(Error::Closed);
        }

        let expected = dest.expected_codec(kind);
        let found = state.metadata.codec(kind);
        if found.is_none() || expected != found {
            return Err(Error::CodecMismatch {
                kind,
                expected,
                found,
            });
        }

        let dest_id = dest.id();
        if state.destinations.get(kind).contains_key(&dest_id) {
            return Err(Error::AlreadyBound {
                destination: dest_id,
                kind,
            });
        }

        let me = self.me.upgrade().ok_or(Error::Closed)?;
        dest.set_source(kind, &me)?;

        state.destinations.get_mut(kind).insert(dest_id, dest);
        state.bindings.entry(dest_id).or_default().set(kind, true);

        tracing::debug!(
            source = %self.id,
            destination = %dest_id,
            %kind,
            destinations = state.destinations.get(kind).len(),
            "Destination added"
        );
        Ok(())
    }

    /// Remove a destination from a kind; removing an unknown destination is a no-op
    pub fn remove_destination(&self, kind: MediaKind, dest_id: DestinationId) -> Result<()> {
        let mut state = self.state.write();
        if state.closed {
            return Err(Error::Closed);
        }

        let Some(dest) = state.destinations.get_mut(kind).remove(&dest_id) else {
            return Ok(());
        };
        dest.unset_source(kind, self.id);

        if let Some(record) = state.bindings.get_mut(&dest_id) {
            record.set(kind, false);
            if record.is_empty() {
                state.bindings.remove(&dest_id);
            }
        }

        tracing::debug!(source = %self.id, destination = %dest_id, %kind, "Destination removed");
        Ok(())
    }

    pub fn deliver_frame(&self, frame: &Frame) -> Result<usize> {
        let state = self.state.read();
        if state.closed || self.token.is_cancelled() {
            return Err(Error::Closed);
        }

        let kind = frame.kind();
        let declared = state.metadata.codec(kind);
        if declared != Some(frame.codec) {
            tracing::warn!(source = %self.id, %kind, codec = %frame.codec, "Frame codec does not match source");
            return Err(Error::CodecMismatch {
                kind,
                expected: declared,
                found: Some(frame.codec),
            });
        }

        self.counters.frames.get(kind).fetch_add(1, Ordering::Relaxed);
        self.counters
            .bytes
            .get(kind)
            .fetch_add(frame.payload.len() as u64, Ordering::Relaxed);

        let mut delivered = 0;
        for (dest_id, dest) in state.destinations.get(kind) {
            if dest.destination_core().is_closed() {
                continue;
            }
            match dest.on_frame(frame) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    self.counters.delivery_errors.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(source = %self.id, destination = %dest_id, %kind, error = %e, "Frame delivery failed");
                }
            }
        }

        tracing::trace!(source = %self.id, %kind, timestamp = frame.timestamp, delivered, "Frame delivered");
        Ok(delivered)
    }

    pub fn deliver_metadata(&self, metadata: &Metadata) -> Result<()> {
        let mut state = self.state.write();
        if state.closed || self.token.is_cancelled() {
            return Err(Error::Closed);
        }

        // Bound destinations were admitted against the current codec.
        for kind in MediaKind::ALL {
            let current = state.metadata.codec(kind);
            let next = metadata.codec(kind);
            if current != next && !state.destinations.get(kind).is_empty() {
                return Err(Error::CodecMismatch {
                    kind,
                    expected: current,
                    found: next,
                });
            }
        }
        state.metadata = metadata.clone();

        let state = RwLockWriteGuard::downgrade(state);
        if let Some(audio) = &metadata.audio {
            for dest in state.destinations.audio.values() {
                dest.on_audio_metadata(audio);
            }
        }
        if let Some(video) = &metadata.video {
            for dest in state.destinations.video.values() {
                dest.on_video_metadata(video);
            }
        }
        if let Some(data) = &metadata.data {
            for dest in state.destinations.data.values() {
                dest.on_data_metadata(data);
            }
        }

        tracing::debug!(source = %self.id, "Metadata delivered");
        Ok(())
    }

    pub fn record_feedback(&self, feedback: &FeedbackMsg) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }

        match feedback.feedback {
            FeedbackKind::KeyFrameRequest => {
                self.counters.key_frame_requests.fetch_add(1, Ordering::Relaxed);
            }
            FeedbackKind::LossReport { .. } => {
                self.counters.loss_reports.fetch_add(1, Ordering::Relaxed);
            }
        }
        tracing::trace!(source = %self.id, kind = %feedback.kind, feedback = ?feedback.feedback, "Feedback received");
        Ok(())
    }

    /// Snapshot of destination bindings and counters
    pub fn stats(&self) -> SourceStats {
        let state = self.state.read_recursive();
        let mut stats = self.started.clone();

        for kind in MediaKind::ALL {
            *stats.destinations.get_mut(kind) = state.destinations.get(kind).len();
            *stats.frames.get_mut(kind) = self.counters.frames.get(kind).load(Ordering::Relaxed);
            *stats.bytes.get_mut(kind) = self.counters.bytes.get(kind).load(Ordering::Relaxed);
        }
        stats.bindings = state.bindings.clone();
        stats.delivery_errors = self.counters.delivery_errors.load(Ordering::Relaxed);
        stats.key_frame_requests = self.counters.key_frame_requests.load(Ordering::Relaxed);
        stats.loss_reports = self.counters.loss_reports.load(Ordering::Relaxed);
        stats.closed = state.closed;
        stats
    }

    /// Cancel the source; the watcher performs the teardown
    pub fn close(&self) {
        self.token.cancel();
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    /// Token cancelled once the teardown has completed
    pub(crate) fn drained_token(&self) -> CancellationToken {
        self.drained.clone()
    }

    /// Wait until the watcher has finished the teardown
    pub async fn closed(&self) {
        self.drained.cancelled().await;
    }
}

impl Drop for SourceCore {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl fmt::Debug for SourceCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read_recursive();
        f.debug_struct("SourceCore")
            .field("id", &self.id)
            .field("metadata", &state.metadata)
            .field("bindings", &state.bindings)
            .field("closed", &state.closed)
            .finish()
    }
}

async fn watch(
    id: SourceId,
    state: Arc<RwLock<SourceState>>,
    token: CancellationToken,
    drained: CancellationToken,
) {
    token.cancelled().await;

    {
        let mut state = state.write();
        state.closed = true;

        for kind in MediaKind::ALL {
            let destinations = std::mem::take(state.destinations.get_mut(kind));
            for (dest_id, dest) in destinations {
                if panic::catch_unwind(AssertUnwindSafe(|| dest.unset_source(kind, id))).is_err() {
                    tracing::error!(source = %id, destination = %dest_id, %kind, "Panic while unbinding destination");
                }
            }
        }
        state.bindings.clear();
    }

    drained.cancel();
    tracing::debug!(source = %id, "Source closed");
}
