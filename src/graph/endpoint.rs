//! Ready-made graph endpoints for transports
//!
//! [`LocalSource`] is a publisher the transport drives by calling
//! `push_frame`; [`ChannelDestination`] is a subscriber that hands frames to
//! the transport's writer task over a bounded channel.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::graph::destination::{DestinationCore, FrameDestination};
use crate::graph::id::SourceId;
use crate::graph::source::{FrameSource, SourceCore};
use crate::media::{FeedbackMsg, Frame, Metadata};

/// A publisher fed directly by its transport
pub struct LocalSource {
    core: SourceCore,
    feedback_tx: Option<mpsc::UnboundedSender<FeedbackMsg>>,
}

impl LocalSource {
    /// Create a source with a random id
    pub fn new(metadata: Metadata, parent: &CancellationToken) -> Arc<Self> {
        Self::build(SourceId::new(), metadata, parent, None)
    }

    /// Create a source with an id assigned by the transport
    pub fn with_id(id: SourceId, metadata: Metadata, parent: &CancellationToken) -> Arc<Self> {
        Self::build(id, metadata, parent, None)
    }

    /// Create a source that forwards received feedback to the transport
    pub fn with_feedback(
        metadata: Metadata,
        parent: &CancellationToken,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<FeedbackMsg>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::build(SourceId::new(), metadata, parent, Some(tx)), rx)
    }

    fn build(
        id: SourceId,
        metadata: Metadata,
        parent: &CancellationToken,
        feedback_tx: Option<mpsc::UnboundedSender<FeedbackMsg>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me: &Weak<Self>| {
            let me: Weak<dyn FrameSource> = me.clone();
            Self {
                core: SourceCore::new(me, id, metadata, parent),
                feedback_tx,
            }
        })
    }

    /// Fan a frame received by the transport out to bound destinations
    ///
    /// Returns how many destinations accepted it.
    pub fn push_frame(&self, frame: Frame) -> Result<usize> {
        self.core.deliver_frame(&frame)
    }
}

impl FrameSource for LocalSource {
    fn source_core(&self) -> &SourceCore {
        &self.core
    }

    fn on_feedback(&self, feedback: &FeedbackMsg) -> Result<()> {
        self.core.record_feedback(feedback)?;
        if let Some(tx) = &self.feedback_tx {
            // Transport stopped listening
            let _ = tx.send(*feedback);
        }
        Ok(())
    }
}

impl fmt::Debug for LocalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalSource").field("core", &self.core).finish()
    }
}

/// A subscriber that forwards frames into a bounded channel
///
/// A full channel drops the frame instead of blocking the fan-out. When the
/// receiver is dropped the destination closes itself.
pub struct ChannelDestination {
    core: DestinationCore,
    tx: mpsc::Sender<Frame>,
    dropped: AtomicU64,
}

impl ChannelDestination {
    pub fn new(
        declared: Metadata,
        format: impl Into<String>,
        capacity: usize,
        parent: &CancellationToken,
    ) -> (Arc<Self>, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity);
        let dest = Arc::new(Self {
            core: DestinationCore::new(declared, format, parent),
            tx,
            dropped: AtomicU64::new(0),
        });
        (dest, rx)
    }

    /// Frames dropped because the channel was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl FrameDestination for ChannelDestination {
    fn destination_core(&self) -> &DestinationCore {
        &self.core
    }

    fn on_frame(&self, frame: &Frame) -> Result<()> {
        match self.tx.try_send(frame.clone()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::trace!(destination = %self.core.id(), dropped, "Channel full, frame dropped");
                Ok(())
            }
            Err(TrySendError::Closed(_)) => {
                self.core.close();
                Err(Error::Closed)
            }
        }
    }
}

impl fmt::Debug for ChannelDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelDestination")
            .field("core", &self.core)
            .field("dropped", &self.dropped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::graph::DEFAULT_FORMAT;
    use crate::media::{Codec, MediaKind, TrackMetadata, VideoFrameInfo};

    fn vp8() -> Metadata {
        Metadata::new().with_video(TrackMetadata::new(Codec::Vp8, 96))
    }

    fn frame(timestamp: u32) -> Frame {
        Frame::video(
            Codec::Vp8,
            timestamp,
            Bytes::from_static(&[0x10]),
            VideoFrameInfo::default(),
        )
    }

    #[tokio::test]
    async fn test_full_channel_drops() {
        let root = CancellationToken::new();
        let publisher = LocalSource::new(vp8(), &root);
        let (dest, mut rx) = ChannelDestination::new(vp8(), DEFAULT_FORMAT, 1, &root);
        assert_ok!(publisher.add_video_destination(dest.clone()));

        assert_eq!(assert_ok!(publisher.push_frame(frame(1))), 1);
        assert_eq!(assert_ok!(publisher.push_frame(frame(2))), 1);
        assert_eq!(dest.dropped(), 1);
        assert_eq!(rx.recv().await.map(|f| f.timestamp), Some(1));
    }

    #[tokio::test]
    async fn test_dropped_receiver_closes_destination() {
        let root = CancellationToken::new();
        let publisher = LocalSource::new(vp8(), &root);
        let (dest, rx) = ChannelDestination::new(vp8(), DEFAULT_FORMAT, 4, &root);
        assert_ok!(publisher.add_video_destination(dest.clone()));
        drop(rx);

        assert_err!(dest.on_frame(&frame(1)));
        dest.destination_core().closed().await;
        assert_eq!(publisher.source_core().destination_count(MediaKind::Video), 0);
    }

    #[tokio::test]
    async fn test_feedback_reaches_transport() {
        let root = CancellationToken::new();
        let (publisher, mut feedback_rx) = LocalSource::with_feedback(vp8(), &root);
        let (dest, _rx) = ChannelDestination::new(vp8(), DEFAULT_FORMAT, 4, &root);
        assert_ok!(publisher.add_video_destination(dest.clone()));

        assert_ok!(dest.deliver_feedback(&FeedbackMsg::loss_report(MediaKind::Video, 12, 3)));
        let received = feedback_rx.recv().await.map(|fb| fb.kind);
        assert_eq!(received, Some(MediaKind::Video));
        assert_eq!(publisher.source_core().stats().loss_reports, 1);
    }
}
