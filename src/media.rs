//! Local media track descriptors.
//!
//! The engine negotiates which tracks a session carries; actual sample
//! capture and rendering live outside this crate. A [`MediaTrack`] is the
//! descriptor the engine attaches to sessions and renegotiates over.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a published media track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Descriptor of a locally published media track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaTrack {
    /// Stable identifier, unique per published track
    pub id: String,
    pub kind: TrackKind,
}

impl MediaTrack {
    /// Create a track descriptor with a generated id
    pub fn new(kind: TrackKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
        }
    }

    /// Create a track descriptor with a caller-supplied id
    pub fn with_id(id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }

    pub fn audio() -> Self {
        Self::new(TrackKind::Audio)
    }

    pub fn video() -> Self {
        Self::new(TrackKind::Video)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique() {
        let a = MediaTrack::audio();
        let b = MediaTrack::audio();
        assert_ne!(a.id, b.id);
        assert_eq!(a.kind, TrackKind::Audio);
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(TrackKind::Audio.to_string(), "audio");
        assert_eq!(TrackKind::Video.to_string(), "video");
    }

    #[test]
    fn test_with_id_round_trip() {
        let track = MediaTrack::with_id("cam-0", TrackKind::Video);
        let json = serde_json::to_string(&track).unwrap();
        let back: MediaTrack = serde_json::from_str(&json).unwrap();
        assert_eq!(back, track);
    }
}
