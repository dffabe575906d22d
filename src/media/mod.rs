//! Frame contract shared by every node of the delivery graph
//!
//! This module provides:
//! - Media kinds and per-kind storage
//! - Codecs and frames
//! - Per-kind metadata negotiated by the transport
//! - Upstream feedback messages

pub mod feedback;
pub mod frame;
pub mod kind;
pub mod metadata;

pub use feedback::{FeedbackKind, FeedbackMsg};
pub use frame::{AudioFrameInfo, Codec, Frame, FrameInfo, PacketType, VideoFrameInfo};
pub use kind::{MediaKind, PerKind};
pub use metadata::{DataMetadata, Metadata, TrackMetadata};
