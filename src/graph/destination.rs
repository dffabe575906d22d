//! Frame destinations
//!
//! A destination accepts frames from at most one source per media kind and can
//! push feedback upstream through that source. Concrete destinations hold a
//! [`DestinationCore`] and forward to it; the provided methods of
//! [`FrameDestination`] are the shared behavior, `on_frame` is the one method
//! every destination must supply.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::graph::id::{DestinationId, SourceId};
use crate::graph::source::FrameSource;
use crate::media::{
    Codec, DataMetadata, FeedbackMsg, Frame, MediaKind, Metadata, PerKind, TrackMetadata,
};

/// Default format requested by destinations that do not ask for one
pub const DEFAULT_FORMAT: &str = "default";

/// A consumer of frames
pub trait FrameDestination: Send + Sync + 'static {
    /// Shared destination state
    fn destination_core(&self) -> &DestinationCore;

    /// Inbound frame from the source bound for the frame's kind
    fn on_frame(&self, frame: &Frame) -> Result<()>;

    fn id(&self) -> DestinationId {
        self.destination_core().id()
    }

    /// Stream format this destination asks for
    fn format(&self) -> &str {
        self.destination_core().format()
    }

    /// Codecs and payload description this destination accepts
    fn declared(&self) -> &Metadata {
        self.destination_core().declared()
    }

    /// Codec this destination accepts for a kind
    fn expected_codec(&self, kind: MediaKind) -> Option<Codec> {
        self.destination_core().declared().codec(kind)
    }

    fn on_audio_metadata(&self, metadata: &TrackMetadata) {
        self.destination_core().record_audio_metadata(metadata);
    }

    fn on_video_metadata(&self, metadata: &TrackMetadata) {
        self.destination_core().record_video_metadata(metadata);
    }

    fn on_data_metadata(&self, metadata: &DataMetadata) {
        self.destination_core().record_data_metadata(metadata);
    }

    /// Bind a source for a kind
    ///
    /// Invoked by a source while it registers this destination.
    fn set_source(&self, kind: MediaKind, source: &Arc<dyn FrameSource>) -> Result<()> {
        self.destination_core().set_source(kind, source)
    }

    fn set_audio_source(&self, source: &Arc<dyn FrameSource>) -> Result<()> {
        self.set_source(MediaKind::Audio, source)
    }

    fn set_video_source(&self, source: &Arc<dyn FrameSource>) -> Result<()> {
        self.set_source(MediaKind::Video, source)
    }

    fn set_data_source(&self, source: &Arc<dyn FrameSource>) -> Result<()> {
        self.set_source(MediaKind::Data, source)
    }

    /// Clear the binding for a kind if it points at `source`
    ///
    /// Source-initiated: this never calls back into the source.
    fn unset_source(&self, kind: MediaKind, source: SourceId) -> bool {
        self.destination_core().unset_source(kind, source)
    }

    /// Forward feedback to the source bound for the message's kind
    fn deliver_feedback(&self, feedback: &FeedbackMsg) -> Result<()> {
        self.destination_core().deliver_feedback(feedback)
    }

    /// Tear the destination down
    fn close(&self) {
        self.destination_core().close();
    }
}

#[derive(Clone)]
struct Binding {
    id: SourceId,
    source: Weak<dyn FrameSource>,
}

impl Binding {
    fn is_live(&self) -> bool {
        self.source.strong_count() > 0
    }
}

#[derive(Default)]
struct DestinationState {
    sources: PerKind<Option<Binding>>,
    /// Last metadata pushed by the bound sources
    received: Metadata,
    closed: bool,
}

/// Shared state and behavior of every destination
///
/// Owns the per-kind source bindings and the teardown watcher. Closing the
/// destination (or cancelling its parent token) makes the watcher remove it
/// from every bound source.
pub struct DestinationCore {
    id: DestinationId,
    format: String,
    declared: Metadata,
    state: Arc<RwLock<DestinationState>>,
    token: CancellationToken,
    drained: CancellationToken,
}

impl DestinationCore {
    /// Create a destination core and spawn its teardown watcher
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(declared: Metadata, format: impl Into<String>, parent: &CancellationToken) -> Self {
        let id = DestinationId::next();
        let state = Arc::new(RwLock::new(DestinationState::default()));
        let token = parent.child_token();
        let drained = CancellationToken::new();

        tokio::spawn(watch(id, state.clone(), token.clone(), drained.clone()));

        Self {
            id,
            format: format.into(),
            declared,
            state,
            token,
            drained,
        }
    }

    pub fn id(&self) -> DestinationId {
        self.id
    }

    pub fn format(&self) -> &str {
        &self.format
    }

    pub fn declared(&self) -> &Metadata {
        &self.declared
    }

    /// Metadata received from bound sources so far
    pub fn received_metadata(&self) -> Metadata {
        self.state.read().received.clone()
    }

    /// Bound source for a kind, if it is still alive
    pub fn source(&self, kind: MediaKind) -> Option<Arc<dyn FrameSource>> {
        let state = self.state.read();
        state.sources.get(kind).as_ref()?.source.upgrade()
    }

    /// Id of the bound source for a kind
    pub fn source_id(&self, kind: MediaKind) -> Option<SourceId> {
        let state = self.state.read();
        state
            .sources
            .get(kind)
            .as_ref()
            .filter(|b| b.is_live())
            .map(|b| b.id)
    }

    pub fn is_bound(&self, kind: MediaKind) -> bool {
        self.source_id(kind).is_some()
    }

    /// Lock-free: the watcher sets `closed` only after the token is cancelled
    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn set_source(&self, kind: MediaKind, source: &Arc<dyn FrameSource>) -> Result<()> {
        let mut state = self.state.write();
        if state.closed || self.token.is_cancelled() {
            return Err(Error::Closed);
        }

        let slot = state.sources.get_mut(kind);
        if slot.as_ref().is_some_and(Binding::is_live) {
            return Err(Error::AlreadyBound {
                destination: self.id,
                kind,
            });
        }

        *slot = Some(Binding {
            id: source.id(),
            source: Arc::downgrade(source),
        });
        Ok(())
    }

    pub fn unset_source(&self, kind: MediaKind, source: SourceId) -> bool {
        let mut state = self.state.write();
        let slot = state.sources.get_mut(kind);
        if slot.as_ref().is_some_and(|b| b.id == source) {
            *slot = None;
            true
        } else {
            false
        }
    }

    pub fn deliver_feedback(&self, feedback: &FeedbackMsg) -> Result<()> {
        // Resolve the source first; the lock is not held across the upstream call.
        let source = {
            let state = self.state.read();
            if state.closed || self.token.is_cancelled() {
                return Err(Error::Closed);
            }
            state
                .sources
                .get(feedback.kind)
                .as_ref()
                .and_then(|b| b.source.upgrade())
        };

        match source {
            Some(source) => source.on_feedback(feedback),
            None => {
                tracing::trace!(destination = %self.id, kind = %feedback.kind, "Feedback dropped, no source bound");
                Ok(())
            }
        }
    }

    pub fn record_audio_metadata(&self, metadata: &TrackMetadata) {
        self.state.write().received.audio = Some(metadata.clone());
    }

    pub fn record_video_metadata(&self, metadata: &TrackMetadata) {
        self.state.write().received.video = Some(metadata.clone());
    }

    pub fn record_data_metadata(&self, metadata: &DataMetadata) {
        self.state.write().received.data = Some(*metadata);
    }

    /// Cancel the destination; the watcher performs the teardown
    pub fn close(&self) {
        self.token.cancel();
    }

    /// Token cancelled when this destination is torn down
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    /// Wait until the watcher has finished the teardown
    pub async fn closed(&self) {
        self.drained.cancelled().await;
    }
}

impl Drop for DestinationCore {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl fmt::Debug for DestinationCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DestinationCore")
            .field("id", &self.id)
            .field("format", &self.format)
            .field("declared", &self.declared)
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn watch(
    id: DestinationId,
    state: Arc<RwLock<DestinationState>>,
    token: CancellationToken,
    drained: CancellationToken,
) {
    token.cancelled().await;

    let bindings: Vec<(MediaKind, Binding)> = {
        let mut state = state.write();
        state.closed = true;
        MediaKind::ALL
            .into_iter()
            .filter_map(|kind| state.sources.get_mut(kind).take().map(|b| (kind, b)))
            .collect()
    };

    for (kind, binding) in bindings {
        let Some(source) = binding.source.upgrade() else {
            continue;
        };

        match panic::catch_unwind(AssertUnwindSafe(|| source.remove_destination(kind, id))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(destination = %id, source = %binding.id, %kind, error = %e, "Unbind skipped");
            }
            Err(_) => {
                tracing::error!(destination = %id, source = %binding.id, %kind, "Panic while unbinding destination");
            }
        }
    }

    drained.cancel();
    tracing::debug!(destination = %id, "Destination closed");
}

#[cfg(test)]
mod tests {
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::graph::{ChannelDestination, LocalSource, SourceCore};
    use crate::media::FeedbackKind;

    fn audio_video() -> Metadata {
        Metadata::new()
            .with_audio(TrackMetadata::new(Codec::Opus, 111))
            .with_video(TrackMetadata::new(Codec::Vp8, 96))
    }

    #[tokio::test]
    async fn test_close_removes_from_every_source() {
        let root = CancellationToken::new();
        let audio = LocalSource::new(audio_video(), &root);
        let video = LocalSource::new(audio_video(), &root);
        let (dest, _rx) = ChannelDestination::new(audio_video(), DEFAULT_FORMAT, 8, &root);

        assert_ok!(audio.add_audio_destination(dest.clone()));
        assert_ok!(video.add_video_destination(dest.clone()));
        assert_eq!(dest.destination_core().source_id(MediaKind::Audio), Some(audio.id()));
        assert_eq!(dest.destination_core().source_id(MediaKind::Video), Some(video.id()));

        dest.close();
        dest.destination_core().closed().await;

        assert_eq!(audio.source_core().destination_count(MediaKind::Audio), 0);
        assert_eq!(video.source_core().destination_count(MediaKind::Video), 0);
        assert!(audio.source_core().stats().bindings.is_empty());
        assert!(!dest.destination_core().is_bound(MediaKind::Audio));

        // Sources are untouched
        assert!(!audio.source_core().is_closed());
    }

    struct PanicOnRemove {
        core: SourceCore,
    }

    impl PanicOnRemove {
        fn new(metadata: Metadata, parent: &CancellationToken) -> Arc<Self> {
            Arc::new_cyclic(|me: &Weak<Self>| {
                let me: Weak<dyn FrameSource> = me.clone();
                Self {
                    core: SourceCore::new(me, SourceId::new(), metadata, parent),
                }
            })
        }
    }

    impl FrameSource for PanicOnRemove {
        fn source_core(&self) -> &SourceCore {
            &self.core
        }

        fn remove_destination(&self, _kind: MediaKind, _dest: DestinationId) -> Result<()> {
            panic!("remove_destination failed");
        }
    }

    #[tokio::test]
    async fn test_panicking_source_does_not_stop_teardown() {
        let root = CancellationToken::new();
        let faulty = PanicOnRemove::new(audio_video(), &root);
        let video = LocalSource::new(audio_video(), &root);
        let (dest, _rx) = ChannelDestination::new(audio_video(), DEFAULT_FORMAT, 8, &root);

        assert_ok!(faulty.add_audio_destination(dest.clone()));
        assert_ok!(video.add_video_destination(dest.clone()));

        dest.close();
        let drained = dest.destination_core().closed();
        assert_ok!(tokio::time::timeout(std::time::Duration::from_secs(2), drained).await);

        assert_eq!(video.source_core().destination_count(MediaKind::Video), 0);
        assert!(!dest.destination_core().is_bound(MediaKind::Video));
        assert!(!dest.destination_core().is_bound(MediaKind::Audio));
    }

    #[tokio::test]
    async fn test_closed_destination_cannot_bind() {
        let root = CancellationToken::new();
        let source = LocalSource::new(audio_video(), &root);
        let (dest, _rx) = ChannelDestination::new(audio_video(), DEFAULT_FORMAT, 8, &root);

        dest.close();
        dest.destination_core().closed().await;

        assert_eq!(assert_err!(source.add_video_destination(dest.clone())), Error::Closed);
        assert_eq!(source.source_core().destination_count(MediaKind::Video), 0);
        assert_eq!(
            assert_err!(dest.deliver_feedback(&FeedbackMsg::key_frame_request())),
            Error::Closed
        );
    }

    #[tokio::test]
    async fn test_feedback_routed_to_bound_source() {
        let root = CancellationToken::new();
        let (source, mut feedback_rx) = LocalSource::with_feedback(audio_video(), &root);
        let (dest, _rx) = ChannelDestination::new(audio_video(), DEFAULT_FORMAT, 8, &root);

        assert_ok!(source.add_video_destination(dest.clone()));

        assert_ok!(dest.deliver_feedback(&FeedbackMsg::key_frame_request()));
        let received = feedback_rx.recv().await;
        assert_eq!(received.map(|fb| fb.feedback), Some(FeedbackKind::KeyFrameRequest));
        assert_eq!(source.source_core().stats().key_frame_requests, 1);

        // Audio is not bound: no-op
        assert_ok!(dest.deliver_feedback(&FeedbackMsg::loss_report(MediaKind::Audio, 12, 3)));
        assert!(feedback_rx.try_recv().is_err());
        assert_eq!(source.source_core().stats().loss_reports, 0);
    }

    #[tokio::test]
    async fn test_unset_source_only_clears_matching_binding() {
        let root = CancellationToken::new();
        let source = LocalSource::new(audio_video(), &root);
        let other = LocalSource::new(audio_video(), &root);
        let (dest, _rx) = ChannelDestination::new(audio_video(), DEFAULT_FORMAT, 8, &root);

        assert_ok!(source.add_video_destination(dest.clone()));
        assert!(!dest.unset_source(MediaKind::Video, other.id()));
        assert!(dest.destination_core().is_bound(MediaKind::Video));
        assert!(dest.unset_source(MediaKind::Video, source.id()));
        assert!(!dest.destination_core().is_bound(MediaKind::Video));
    }

    #[tokio::test]
    async fn test_dropped_source_frees_binding() {
        let root = CancellationToken::new();
        let (dest, _rx) = ChannelDestination::new(audio_video(), DEFAULT_FORMAT, 8, &root);

        {
            let source = LocalSource::new(audio_video(), &root);
            assert_ok!(source.add_video_destination(dest.clone()));
        }

        // The source held the only strong handle to itself
        assert!(!dest.destination_core().is_bound(MediaKind::Video));
        let replacement = LocalSource::new(audio_video(), &root);
        assert_ok!(replacement.add_video_destination(dest.clone()));
    }

    #[tokio::test]
    async fn test_default_format() {
        let root = CancellationToken::new();
        let (dest, _rx) = ChannelDestination::new(audio_video(), DEFAULT_FORMAT, 8, &root);
        assert_eq!(dest.format(), "default");
        assert_eq!(dest.expected_codec(MediaKind::Audio), Some(Codec::Opus));
        assert_eq!(dest.expected_codec(MediaKind::Data), None);
    }
}
