//! Media delivery graph
//!
//! Sources fan frames out to destinations per media kind; destinations push
//! feedback back up to the source they are bound to. A [`MediaFramePipe`] is
//! both at once and lets one publisher feed any number of subscribers through
//! a single binding.
//!
//! # Architecture
//!
//! ```text
//!   [LocalSource]──video──►[MediaFramePipe]──video──►[ChannelDestination]
//!        ▲                  (format "default")  └───►[ChannelDestination]
//!        └──────────── feedback ◄────────────────────────────┘
//! ```
//!
//! # Lifetimes
//!
//! Every node owns a child of its parent's `CancellationToken` and one watcher
//! task. Cancelling the token (directly via `close()` or through any ancestor)
//! wakes the watcher, which flips the node's `closed` flag and unbinds it:
//! - a closed source unbinds every destination (destinations stay open)
//! - a closed destination removes itself from every bound source
//!
//! After the flag is set all mutating operations fail with
//! [`Error::Closed`](crate::Error::Closed).

pub mod destination;
pub mod endpoint;
pub mod id;
pub mod pipe;
pub mod source;

pub use destination::{DestinationCore, FrameDestination, DEFAULT_FORMAT};
pub use endpoint::{ChannelDestination, LocalSource};
pub use id::{DestinationId, SourceId};
pub use pipe::MediaFramePipe;
pub use source::{FrameSource, SourceCore};
