//! Upstream feedback messages
//!
//! Feedback travels from a destination back to the source bound for the
//! message's kind (destination -> format pipe -> publisher).

use super::kind::MediaKind;

/// Type of feedback signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackKind {
    /// Ask the publisher for a new key frame
    KeyFrameRequest,
    /// Packet loss observed downstream
    LossReport {
        /// Fraction lost, in 1/256 units
        fraction_lost: u8,
        packets_lost: u32,
    },
}

/// Kind-tagged feedback message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedbackMsg {
    pub kind: MediaKind,
    pub feedback: FeedbackKind,
}

impl FeedbackMsg {
    /// Key frame request (always video)
    pub fn key_frame_request() -> Self {
        Self {
            kind: MediaKind::Video,
            feedback: FeedbackKind::KeyFrameRequest,
        }
    }

    /// Loss report for a kind
    pub fn loss_report(kind: MediaKind, fraction_lost: u8, packets_lost: u32) -> Self {
        Self {
            kind,
            feedback: FeedbackKind::LossReport {
                fraction_lost,
                packets_lost,
            },
        }
    }
}
