//! Stream metadata
//!
//! Per-kind codec and payload description, as negotiated by the transport.

use super::frame::{Codec, PacketType};
use super::kind::MediaKind;

/// Audio or video track description
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackMetadata {
    pub codec: Codec,
    pub packet_type: PacketType,
    /// RTP payload type
    pub payload_type: u8,
    pub ssrc: Option<u32>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
}

impl TrackMetadata {
    /// Create a track description with no SSRC or sample information
    pub fn new(codec: Codec, payload_type: u8) -> Self {
        Self {
            codec,
            packet_type: PacketType::Raw,
            payload_type,
            ssrc: None,
            sample_rate: None,
            channels: None,
        }
    }

    /// Codec MIME type (e.g., "audio/opus")
    pub fn codec_type(&self) -> &'static str {
        self.codec.mime_type()
    }

    pub fn packet_type(mut self, packet_type: PacketType) -> Self {
        self.packet_type = packet_type;
        self
    }

    pub fn ssrc(mut self, ssrc: u32) -> Self {
        self.ssrc = Some(ssrc);
        self
    }

    pub fn sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = Some(sample_rate);
        self
    }

    pub fn channels(mut self, channels: u16) -> Self {
        self.channels = Some(channels);
        self
    }
}

/// Data kind marker (presence only)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DataMetadata;

/// Metadata for all kinds of a stream
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Metadata {
    pub audio: Option<TrackMetadata>,
    pub video: Option<TrackMetadata>,
    pub data: Option<DataMetadata>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_audio(mut self, audio: TrackMetadata) -> Self {
        self.audio = Some(audio);
        self
    }

    pub fn with_video(mut self, video: TrackMetadata) -> Self {
        self.video = Some(video);
        self
    }

    pub fn with_data(mut self) -> Self {
        self.data = Some(DataMetadata);
        self
    }

    /// Codec for a kind, `Codec::Data` for a present data marker
    pub fn codec(&self, kind: MediaKind) -> Option<Codec> {
        match kind {
            MediaKind::Audio => self.audio.as_ref().map(|a| a.codec),
            MediaKind::Video => self.video.as_ref().map(|v| v.codec),
            MediaKind::Data => self.data.map(|_| Codec::Data),
        }
    }

    /// Whether the kind is present
    pub fn has(&self, kind: MediaKind) -> bool {
        self.codec(kind).is_some()
    }

    /// Kinds present, in `MediaKind::ALL` order
    pub fn kinds(&self) -> impl Iterator<Item = MediaKind> + '_ {
        MediaKind::ALL.into_iter().filter(move |k| self.has(*k))
    }

    /// Union with another metadata set; kinds already present here win
    pub fn union(&self, other: &Metadata) -> Metadata {
        Metadata {
            audio: self.audio.clone().or_else(|| other.audio.clone()),
            video: self.video.clone().or_else(|| other.video.clone()),
            data: self.data.or(other.data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_per_kind() {
        let meta = Metadata::new()
            .with_audio(TrackMetadata::new(Codec::Opus, 111).sample_rate(48000).channels(2))
            .with_data();

        assert_eq!(meta.codec(MediaKind::Audio), Some(Codec::Opus));
        assert_eq!(meta.codec(MediaKind::Video), None);
        assert_eq!(meta.codec(MediaKind::Data), Some(Codec::Data));
        assert_eq!(
            meta.kinds().collect::<Vec<_>>(),
            vec![MediaKind::Audio, MediaKind::Data]
        );
        assert_eq!(meta.audio.as_ref().map(|a| a.codec_type()), Some("audio/opus"));
    }

    #[test]
    fn test_union_prefers_self() {
        let a = Metadata::new().with_video(TrackMetadata::new(Codec::Vp8, 96));
        let b = Metadata::new()
            .with_video(TrackMetadata::new(Codec::H264, 102))
            .with_audio(TrackMetadata::new(Codec::Opus, 111));

        let merged = a.union(&b);
        assert_eq!(merged.codec(MediaKind::Video), Some(Codec::Vp8));
        assert_eq!(merged.codec(MediaKind::Audio), Some(Codec::Opus));
        assert!(!merged.has(MediaKind::Data));
    }
}
