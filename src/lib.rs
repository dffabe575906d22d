//! Media delivery graph and multi-tenant stream routing
//!
//! The crate routes already-parsed media frames from publishers to
//! subscribers. Transports construct [`FrameSource`]s and
//! [`FrameDestination`]s from their negotiated [`Metadata`] and hand them to a
//! [`Stream`] resolved through the tenant hierarchy.
//!
//! # Architecture
//!
//! ```text
//!                       Arc<NamespaceManager>
//!                 ┌──────────────────────────────┐
//!                 │ namespaces: HashMap<name,    │
//!                 │   Namespace { domains,       │
//!                 │     routers: HashMap<name,   │
//!                 │       Router { streams } >   │
//!                 │   } >                        │
//!                 └──────────────┬───────────────┘
//!                                │ get_or_new_stream("room1")
//!                                ▼
//!   [Publisher] ──► Stream { SourceManager, formats } ──► [Subscriber]
//!                        │                          └──► [Subscriber]
//!                        └─ format pipe: one bind to the publisher,
//!                           N binds from subscribers
//! ```
//!
//! # Example
//!
//! ```no_run
//! use media_router::{
//!     Attachment, ChannelDestination, Codec, LocalSource, Metadata, NamespaceConfig,
//!     NamespaceManager, TrackMetadata, DEFAULT_FORMAT,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> media_router::Result<()> {
//! let manager = NamespaceManager::new(NamespaceConfig::default());
//! let stream = manager
//!     .get_or_new_namespace("tenantA")?
//!     .default_router()?
//!     .get_or_new_stream("room1")?;
//!
//! let session = CancellationToken::new();
//! let vp8 = Metadata::new().with_video(TrackMetadata::new(Codec::Vp8, 96));
//! let (subscriber, mut frames) = ChannelDestination::new(vp8.clone(), DEFAULT_FORMAT, 64, &session);
//!
//! if let Attachment::Pending(pending) = stream.add_frame_destination(subscriber)? {
//!     stream.add_frame_source(LocalSource::new(vp8, &session))?;
//!     pending.wait(None).await?;
//! }
//! while let Some(frame) = frames.recv().await {
//!     // hand to the transport writer
//!     let _ = frame;
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod graph;
pub mod media;
pub mod namespace;
pub mod stats;
pub mod stream;

pub use error::{ConfigError, Error, Result};
pub use graph::{
    ChannelDestination, DestinationCore, DestinationId, FrameDestination, FrameSource, LocalSource,
    MediaFramePipe, SourceCore, SourceId, DEFAULT_FORMAT,
};
pub use media::{
    AudioFrameInfo, Codec, DataMetadata, FeedbackKind, FeedbackMsg, Frame, FrameInfo, MediaKind,
    Metadata, PacketType, PerKind, TrackMetadata, VideoFrameInfo,
};
pub use namespace::{Namespace, NamespaceConfig, NamespaceManager, NamespaceParams, Router};
pub use stats::{DestinationStats, RouterStats, SourceStats, StreamStats};
pub use stream::{Attachment, PendingDestination, SourceManager, Stream, StreamFormat};
