//! Frame types routed through the delivery graph
//!
//! A [`Frame`] is an immutable value. The same instance is handed to every
//! destination of a kind, so fan-out never copies the payload.

use std::fmt;

use bytes::Bytes;

use super::kind::MediaKind;

/// Codec carried by a frame or declared by a source/destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    // Audio
    Opus,
    Pcmu,
    Pcma,
    G722,
    Aac,
    // Video
    Vp8,
    Vp9,
    H264,
    H265,
    Av1,
    /// Opaque application data (data channels)
    Data,
}

impl Codec {
    /// Media kind this codec belongs to
    pub fn kind(&self) -> MediaKind {
        match self {
            Codec::Opus | Codec::Pcmu | Codec::Pcma | Codec::G722 | Codec::Aac => {
                MediaKind::Audio
            }
            Codec::Vp8 | Codec::Vp9 | Codec::H264 | Codec::H265 | Codec::Av1 => MediaKind::Video,
            Codec::Data => MediaKind::Data,
        }
    }

    /// MIME type as used in session descriptions (e.g., "video/VP8")
    pub fn mime_type(&self) -> &'static str {
        match self {
            Codec::Opus => "audio/opus",
            Codec::Pcmu => "audio/PCMU",
            Codec::Pcma => "audio/PCMA",
            Codec::G722 => "audio/G722",
            Codec::Aac => "audio/aac",
            Codec::Vp8 => "video/VP8",
            Codec::Vp9 => "video/VP9",
            Codec::H264 => "video/H264",
            Codec::H265 => "video/H265",
            Codec::Av1 => "video/AV1",
            Codec::Data => "application/data",
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime_type())
    }
}

/// How the payload is packaged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PacketType {
    /// Complete encoded access unit / sample
    #[default]
    Raw,
    /// A single RTP packet
    Rtp,
}

/// Video-specific frame information
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VideoFrameInfo {
    pub width: u32,
    pub height: u32,
    pub is_key_frame: bool,
}

/// Audio-specific frame information
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AudioFrameInfo {
    /// Samples per channel in this frame
    pub sample_count: u32,
    pub sample_rate: u32,
    pub channels: u16,
    /// Voice activity flag
    pub is_voice: bool,
    /// Audio level in -dBov (0 = loudest, 127 = silence)
    pub level: u8,
}

/// Kind-specific frame information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameInfo {
    Video(VideoFrameInfo),
    Audio(AudioFrameInfo),
    None,
}

/// A media frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub codec: Codec,
    pub packet_type: PacketType,
    /// Timestamp in the codec clock rate
    pub timestamp: u32,
    /// Frame data (reference counted, never copied during fan-out)
    pub payload: Bytes,
    pub info: FrameInfo,
}

impl Frame {
    /// Create a video frame
    pub fn video(codec: Codec, timestamp: u32, payload: Bytes, info: VideoFrameInfo) -> Self {
        Self {
            codec,
            packet_type: PacketType::Raw,
            timestamp,
            payload,
            info: FrameInfo::Video(info),
        }
    }

    /// Create an audio frame
    pub fn audio(codec: Codec, timestamp: u32, payload: Bytes, info: AudioFrameInfo) -> Self {
        Self {
            codec,
            packet_type: PacketType::Raw,
            timestamp,
            payload,
            info: FrameInfo::Audio(info),
        }
    }

    /// Create a data frame
    pub fn data(timestamp: u32, payload: Bytes) -> Self {
        Self {
            codec: Codec::Data,
            packet_type: PacketType::Raw,
            timestamp,
            payload,
            info: FrameInfo::None,
        }
    }

    /// Set the packet type
    pub fn with_packet_type(mut self, packet_type: PacketType) -> Self {
        self.packet_type = packet_type;
        self
    }

    /// Media kind, derived from the codec
    pub fn kind(&self) -> MediaKind {
        self.codec.kind()
    }

    /// Whether this is a video key frame
    pub fn is_key_frame(&self) -> bool {
        matches!(self.info, FrameInfo::Video(v) if v.is_key_frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_kind() {
        assert_eq!(Codec::Opus.kind(), MediaKind::Audio);
        assert_eq!(Codec::H264.kind(), MediaKind::Video);
        assert_eq!(Codec::Data.kind(), MediaKind::Data);
        assert_eq!(Codec::Vp8.to_string(), "video/VP8");
    }

    #[test]
    fn test_frame_constructors() {
        let key = Frame::video(
            Codec::Vp8,
            3000,
            Bytes::from_static(&[0x10, 0x02]),
            VideoFrameInfo {
                width: 640,
                height: 480,
                is_key_frame: true,
            },
        );
        assert_eq!(key.kind(), MediaKind::Video);
        assert!(key.is_key_frame());

        let audio = Frame::audio(
            Codec::Opus,
            960,
            Bytes::from_static(&[0xfc]),
            AudioFrameInfo::default(),
        )
        .with_packet_type(PacketType::Rtp);
        assert_eq!(audio.kind(), MediaKind::Audio);
        assert_eq!(audio.packet_type, PacketType::Rtp);
        assert!(!audio.is_key_frame());

        assert_eq!(Frame::data(0, Bytes::new()).kind(), MediaKind::Data);
    }
}
