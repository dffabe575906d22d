//! Media frame pipe
//!
//! A pipe is a destination upstream and a source downstream with one shared
//! lifetime. Frames are repeated downstream as they arrive, feedback is
//! repeated upstream. A stream format binds its pipe to the publisher once and
//! every subscriber binds to the pipe, so the publisher's fan-out list stays
//! at one entry per format no matter how many subscribers join.
//!
//! ```text
//!   publisher ──frame──► [ DestinationCore | SourceCore ] ──frame──► subscriber 1..N
//!             ◄─feedback─                               ◄─feedback─
//! ```

use std::fmt;
use std::sync::{Arc, Weak};

use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::graph::destination::{DestinationCore, FrameDestination};
use crate::graph::id::{DestinationId, SourceId};
use crate::graph::source::{FrameSource, SourceCore};
use crate::media::{DataMetadata, FeedbackMsg, Frame, MediaKind, Metadata, TrackMetadata};

/// Pass-through repeater between one upstream source and many destinations
pub struct MediaFramePipe {
    token: CancellationToken,
    destination: DestinationCore,
    source: SourceCore,
}

impl MediaFramePipe {
    /// Create a pipe accepting and re-exposing `metadata`
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        metadata: Metadata,
        format: impl Into<String>,
        parent: &CancellationToken,
    ) -> Arc<Self> {
        let token = parent.child_token();
        let format = format.into();

        Arc::new_cyclic(|me: &Weak<Self>| {
            let me: Weak<dyn FrameSource> = me.clone();
            Self {
                destination: DestinationCore::new(metadata.clone(), format, &token),
                source: SourceCore::new(me, SourceId::new(), metadata, &token),
                token,
            }
        })
    }

    /// Id of the upstream (destination) side
    pub fn destination_id(&self) -> DestinationId {
        self.destination.id()
    }

    /// Id of the downstream (source) side
    pub fn source_id(&self) -> SourceId {
        self.source.id()
    }

    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Close both sides
    pub fn close(&self) {
        self.token.cancel();
    }

    /// Wait until both sides are torn down
    pub async fn closed(&self) {
        self.destination.closed().await;
        self.source.closed().await;
    }

    fn forward_track_metadata(&self, kind: MediaKind, track: &TrackMetadata) {
        let mut metadata = self.source.metadata();
        match kind {
            MediaKind::Audio => metadata.audio = Some(track.clone()),
            MediaKind::Video => metadata.video = Some(track.clone()),
            MediaKind::Data => return,
        }
        if let Err(e) = self.source.deliver_metadata(&metadata) {
            tracing::warn!(pipe = %self.source.id(), %kind, error = %e, "Metadata not forwarded");
        }
    }
}

impl FrameDestination for MediaFramePipe {
    fn destination_core(&self) -> &DestinationCore {
        &self.destination
    }

    fn on_frame(&self, frame: &Frame) -> Result<()> {
        self.source.deliver_frame(frame).map(|_| ())
    }

    fn on_audio_metadata(&self, metadata: &TrackMetadata) {
        self.destination.record_audio_metadata(metadata);
        self.forward_track_metadata(MediaKind::Audio, metadata);
    }

    fn on_video_metadata(&self, metadata: &TrackMetadata) {
        self.destination.record_video_metadata(metadata);
        self.forward_track_metadata(MediaKind::Video, metadata);
    }

    fn on_data_metadata(&self, metadata: &DataMetadata) {
        self.destination.record_data_metadata(metadata);
    }

    fn close(&self) {
        self.token.cancel();
    }
}

impl FrameSource for MediaFramePipe {
    fn source_core(&self) -> &SourceCore {
        &self.source
    }

    fn on_feedback(&self, feedback: &FeedbackMsg) -> Result<()> {
        self.source.record_feedback(feedback)?;
        self.destination.deliver_feedback(feedback)
    }

    fn close(&self) {
        self.token.cancel();
    }
}

impl fmt::Debug for MediaFramePipe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaFramePipe")
            .field("destination", &self.destination)
            .field("source", &self.source)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use tokio_test::assert_ok;

    use super::*;
    use crate::graph::{ChannelDestination, LocalSource, DEFAULT_FORMAT};
    use crate::media::{Codec, FeedbackKind, VideoFrameInfo};

    fn vp8() -> Metadata {
        Metadata::new().with_video(TrackMetadata::new(Codec::Vp8, 96))
    }

    fn frame(timestamp: u32) -> Frame {
        Frame::video(
            Codec::Vp8,
            timestamp,
            Bytes::from_static(&[0x90, 0x01]),
            VideoFrameInfo::default(),
        )
    }

    #[tokio::test]
    async fn test_pipe_repeats_frames_and_feedback() {
        let root = CancellationToken::new();
        let (publisher, mut feedback_rx) = LocalSource::with_feedback(vp8(), &root);
        let pipe = MediaFramePipe::new(vp8(), DEFAULT_FORMAT, &root);
        let (d1, mut rx1) = ChannelDestination::new(vp8(), DEFAULT_FORMAT, 8, &root);
        let (d2, mut rx2) = ChannelDestination::new(vp8(), DEFAULT_FORMAT, 8, &root);

        assert_ok!(publisher.add_video_destination(pipe.clone()));
        assert_ok!(pipe.add_video_destination(d1.clone()));
        assert_ok!(pipe.add_video_destination(d2.clone()));

        // One binding on the publisher, two on the pipe
        assert_eq!(publisher.source_core().destination_count(MediaKind::Video), 1);
        assert_eq!(pipe.source_core().destination_count(MediaKind::Video), 2);

        assert_eq!(assert_ok!(publisher.deliver_frame(&frame(90))), 1);
        assert_eq!(rx1.recv().await.map(|f| f.timestamp), Some(90));
        assert_eq!(rx2.recv().await.map(|f| f.timestamp), Some(90));

        assert_ok!(d2.deliver_feedback(&FeedbackMsg::key_frame_request()));
        assert_eq!(
            feedback_rx.recv().await.map(|fb| fb.feedback),
            Some(FeedbackKind::KeyFrameRequest)
        );
        assert_eq!(pipe.source_core().stats().key_frame_requests, 1);
    }

    #[tokio::test]
    async fn test_pipe_forwards_metadata() {
        let root = CancellationToken::new();
        let publisher = LocalSource::new(vp8(), &root);
        let pipe = MediaFramePipe::new(vp8(), DEFAULT_FORMAT, &root);
        let (dest, _rx) = ChannelDestination::new(vp8(), DEFAULT_FORMAT, 8, &root);

        assert_ok!(publisher.add_video_destination(pipe.clone()));
        assert_ok!(pipe.add_video_destination(dest.clone()));

        let update = Metadata::new().with_video(TrackMetadata::new(Codec::Vp8, 96).ssrc(42));
        assert_ok!(publisher.deliver_metadata(&update));

        let received = dest.destination_core().received_metadata();
        assert_eq!(received.video.and_then(|v| v.ssrc), Some(42));
    }

    #[tokio::test]
    async fn test_pipe_close_unbinds_both_sides() {
        let root = CancellationToken::new();
        let publisher = LocalSource::new(vp8(), &root);
        let pipe = MediaFramePipe::new(vp8(), DEFAULT_FORMAT, &root);
        let (dest, _rx) = ChannelDestination::new(vp8(), DEFAULT_FORMAT, 8, &root);

        assert_ok!(publisher.add_video_destination(pipe.clone()));
        assert_ok!(pipe.add_video_destination(dest.clone()));

        pipe.close();
        pipe.closed().await;

        assert!(pipe.is_closed());
        assert_eq!(publisher.source_core().destination_count(MediaKind::Video), 0);
        assert!(!dest.destination_core().is_bound(MediaKind::Video));
        assert!(!dest.destination_core().is_closed());
    }

    /// Requests a key frame from inside `on_frame` after a delay
    struct KeyFrameOnDelivery {
        core: DestinationCore,
        delay: Duration,
    }

    impl FrameDestination for KeyFrameOnDelivery {
        fn destination_core(&self) -> &DestinationCore {
            &self.core
        }

        fn on_frame(&self, _frame: &Frame) -> Result<()> {
            std::thread::sleep(self.delay);
            self.core.deliver_feedback(&FeedbackMsg::key_frame_request())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_feedback_during_delivery_with_queued_joiners() {
        let root = CancellationToken::new();
        let (publisher, mut feedback_rx) = LocalSource::with_feedback(vp8(), &root);
        let pipe = MediaFramePipe::new(vp8(), DEFAULT_FORMAT, &root);
        let slow = Arc::new(KeyFrameOnDelivery {
            core: DestinationCore::new(vp8(), DEFAULT_FORMAT, &root),
            delay: Duration::from_millis(200),
        });
        assert_ok!(publisher.add_video_destination(pipe.clone()));
        assert_ok!(pipe.add_video_destination(slow.clone()));

        let delivering = tokio::task::spawn_blocking({
            let publisher = publisher.clone();
            move || publisher.deliver_frame(&frame(1))
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Writers queue on both locks held by the delivering thread
        let (late1, _rx1) = ChannelDestination::new(vp8(), DEFAULT_FORMAT, 8, &root);
        let (late2, _rx2) = ChannelDestination::new(vp8(), DEFAULT_FORMAT, 8, &root);
        let join_pipe = tokio::task::spawn_blocking({
            let pipe = pipe.clone();
            move || pipe.add_video_destination(late1)
        });
        let join_publisher = tokio::task::spawn_blocking({
            let publisher = publisher.clone();
            move || publisher.add_video_destination(late2)
        });

        let limit = Duration::from_secs(3);
        let delivered = assert_ok!(assert_ok!(tokio::time::timeout(limit, delivering).await));
        assert_eq!(assert_ok!(delivered), 1);
        assert_ok!(assert_ok!(assert_ok!(tokio::time::timeout(limit, join_pipe).await)));
        assert_ok!(assert_ok!(assert_ok!(tokio::time::timeout(limit, join_publisher).await)));

        assert_eq!(
            feedback_rx.recv().await.map(|fb| fb.feedback),
            Some(FeedbackKind::KeyFrameRequest)
        );
        assert_eq!(pipe.source_core().destination_count(MediaKind::Video), 2);
        assert_eq!(publisher.source_core().destination_count(MediaKind::Video), 2);
    }
}
