//! Application-facing room events.
//!
//! The engine and its coordinators report everything the embedding
//! application needs to render (membership changes, chat, call lifecycle)
//! through a single event stream handed out at construction.

use crate::envelope::ChatPayload;
use crate::media::TrackKind;
use chrono::{DateTime, Utc};

/// Notifications surfaced to the embedding application
#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    /// A peer entered the room
    PeerJoined { peer: String },

    /// A peer left the room
    PeerLeft { peer: String },

    /// A chat message arrived (including the echo of our own messages)
    ChatReceived {
        from: String,
        text: String,
        sent_at: DateTime<Utc>,
    },

    /// A session with this peer reached the connected state
    CallEstablished { peer: String },

    /// Negotiation with this peer failed; the session was closed and will
    /// not be retried
    CallFailed { peer: String, reason: String },

    /// A session was torn down
    CallClosed { peer: String },

    /// The transport under a connected session reported disconnection; the
    /// session is waiting out its recovery grace period
    CallDegraded { peer: String },

    /// A degraded session's transport came back
    CallRecovered { peer: String },

    /// The first remote media track arrived on a session
    RemoteMediaStarted { peer: String, kind: TrackKind },

    /// The relay connection is up
    RelayConnected,

    /// The relay connection is gone; every session was torn down
    RelayDisconnected,
}

impl RoomEvent {
    pub fn peer_joined(peer: impl Into<String>) -> Self {
        Self::PeerJoined { peer: peer.into() }
    }

    pub fn peer_left(peer: impl Into<String>) -> Self {
        Self::PeerLeft { peer: peer.into() }
    }

    pub fn chat_received(from: impl Into<String>, payload: ChatPayload) -> Self {
        Self::ChatReceived {
            from: from.into(),
            text: payload.text,
            sent_at: payload.sent_at,
        }
    }

    pub fn call_established(peer: impl Into<String>) -> Self {
        Self::CallEstablished { peer: peer.into() }
    }

    pub fn call_failed(peer: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CallFailed {
            peer: peer.into(),
            reason: reason.into(),
        }
    }

    pub fn call_closed(peer: impl Into<String>) -> Self {
        Self::CallClosed { peer: peer.into() }
    }

    pub fn call_degraded(peer: impl Into<String>) -> Self {
        Self::CallDegraded { peer: peer.into() }
    }

    pub fn call_recovered(peer: impl Into<String>) -> Self {
        Self::CallRecovered { peer: peer.into() }
    }

    pub fn remote_media_started(peer: impl Into<String>, kind: TrackKind) -> Self {
        Self::RemoteMediaStarted {
            peer: peer.into(),
            kind,
        }
    }

    /// Event name for logging and debugging
    pub fn name(&self) -> &'static str {
        match self {
            Self::PeerJoined { .. } => "peer_joined",
            Self::PeerLeft { .. } => "peer_left",
            Self::ChatReceived { .. } => "chat_received",
            Self::CallEstablished { .. } => "call_established",
            Self::CallFailed { .. } => "call_failed",
            Self::CallClosed { .. } => "call_closed",
            Self::CallDegraded { .. } => "call_degraded",
            Self::CallRecovered { .. } => "call_recovered",
            Self::RemoteMediaStarted { .. } => "remote_media_started",
            Self::RelayConnected => "relay_connected",
            Self::RelayDisconnected => "relay_disconnected",
        }
    }

    /// The peer this event concerns, when it concerns exactly one
    pub fn peer(&self) -> Option<&str> {
        match self {
            Self::PeerJoined { peer }
            | Self::PeerLeft { peer }
            | Self::CallEstablished { peer }
            | Self::CallFailed { peer, .. }
            | Self::CallClosed { peer }
            | Self::CallDegraded { peer }
            | Self::CallRecovered { peer }
            | Self::RemoteMediaStarted { peer, .. } => Some(peer),
            Self::ChatReceived { from, .. } => Some(from),
            Self::RelayConnected | Self::RelayDisconnected => None,
        }
    }
}
