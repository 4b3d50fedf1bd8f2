//! Relay wire format.
//!
//! Every message exchanged through the relay is a JSON envelope tagged by
//! `type` and attributed to a sender. Negotiation envelopes (`offer`,
//! `answer`, `candidate`) are addressed to one peer via `to`; membership and
//! chat envelopes are broadcast within the room and carry no `to` field.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// SDP payload carried by offer and answer envelopes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdpPayload {
    pub sdp: String,
}

impl SdpPayload {
    pub fn new(sdp: impl Into<String>) -> Self {
        Self { sdp: sdp.into() }
    }
}

/// ICE candidate payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidatePayload {
    pub candidate: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<u16>,
}

impl CandidatePayload {
    pub fn new(
        candidate: impl Into<String>,
        sdp_mid: Option<String>,
        sdp_mline_index: Option<u16>,
    ) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid,
            sdp_mline_index,
        }
    }
}

/// Room membership snapshot payload (relay-originated)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotPayload {
    pub peers: Vec<String>,
}

/// Chat message payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPayload {
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

impl ChatPayload {
    /// Build a chat payload stamped with the current time
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            sent_at: Utc::now(),
        }
    }
}

/// A signaling envelope as carried over the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    Offer {
        from: String,
        to: String,
        payload: SdpPayload,
    },
    Answer {
        from: String,
        to: String,
        payload: SdpPayload,
    },
    Candidate {
        from: String,
        to: String,
        payload: CandidatePayload,
    },
    PeerJoined {
        from: String,
    },
    PeerLeft {
        from: String,
    },
    PresenceSnapshot {
        payload: SnapshotPayload,
    },
    Chat {
        from: String,
        payload: ChatPayload,
    },
}

impl Envelope {
    pub fn offer(from: impl Into<String>, to: impl Into<String>, payload: SdpPayload) -> Self {
        Self::Offer {
            from: from.into(),
            to: to.into(),
            payload,
        }
    }

    pub fn answer(from: impl Into<String>, to: impl Into<String>, payload: SdpPayload) -> Self {
        Self::Answer {
            from: from.into(),
            to: to.into(),
            payload,
        }
    }

    pub fn candidate(
        from: impl Into<String>,
        to: impl Into<String>,
        payload: CandidatePayload,
    ) -> Self {
        Self::Candidate {
            from: from.into(),
            to: to.into(),
            payload,
        }
    }

    pub fn chat(from: impl Into<String>, payload: ChatPayload) -> Self {
        Self::Chat {
            from: from.into(),
            payload,
        }
    }

    /// The wire name of this envelope's type
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::Candidate { .. } => "candidate",
            Self::PeerJoined { .. } => "peer_joined",
            Self::PeerLeft { .. } => "peer_left",
            Self::PresenceSnapshot { .. } => "presence_snapshot",
            Self::Chat { .. } => "chat",
        }
    }

    /// The peer identity that sent this envelope. Presence snapshots are
    /// relay-originated and have no sender.
    pub fn sender(&self) -> Option<&str> {
        match self {
            Self::Offer { from, .. }
            | Self::Answer { from, .. }
            | Self::Candidate { from, .. }
            | Self::PeerJoined { from }
            | Self::PeerLeft { from }
            | Self::Chat { from, .. } => Some(from),
            Self::PresenceSnapshot { .. } => None,
        }
    }

    /// The addressed recipient, for the addressed envelope types
    pub fn recipient(&self) -> Option<&str> {
        match self {
            Self::Offer { to, .. } | Self::Answer { to, .. } | Self::Candidate { to, .. } => {
                Some(to)
            }
            _ => None,
        }
    }

    /// Serialize to a JSON string
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
