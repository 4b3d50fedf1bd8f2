//! Injected media-transport capability.
//!
//! The negotiation engine never talks to a peer-connection library
//! directly. It drives one [`MediaSession`] per remote peer through this
//! trait and reacts to the session's event stream (gathered candidates,
//! remote tracks, transport health). Production code plugs in the
//! [`webrtc`]-backed implementation; tests plug in a scripted fake.

pub mod webrtc;

use crate::envelope::{CandidatePayload, SdpPayload};
use crate::error::Result;
use crate::media::{MediaTrack, TrackKind};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Transport-level connection health, as reported by the implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportHealth {
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl fmt::Display for TransportHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportHealth::Connecting => "connecting",
            TransportHealth::Connected => "connected",
            TransportHealth::Disconnected => "disconnected",
            TransportHealth::Failed => "failed",
            TransportHealth::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// A remote session description to apply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteDescription {
    Offer(SdpPayload),
    Answer(SdpPayload),
}

/// Events emitted by a media session while it is alive
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    /// A local ICE candidate was gathered and should be signaled to the peer
    CandidateGathered(CandidatePayload),
    /// A remote media track started arriving
    RemoteTrackAdded { kind: TrackKind },
    /// The transport's connection health changed
    HealthChanged(TransportHealth),
}

/// Receiver half of a session's event stream
pub type MediaEvents = mpsc::UnboundedReceiver<MediaEvent>;

/// One peer-to-peer media connection, driven by the negotiation engine
#[async_trait]
pub trait MediaSession: Send + Sync {
    /// Create a local offer and stage it as the local description
    async fn create_offer(&self) -> Result<SdpPayload>;

    /// Create a local answer and stage it as the local description. A
    /// remote offer must have been applied first.
    async fn create_answer(&self) -> Result<SdpPayload>;

    /// Apply a remote offer or answer
    async fn set_remote_description(&self, desc: RemoteDescription) -> Result<()>;

    /// Apply a remote ICE candidate
    async fn add_ice_candidate(&self, candidate: &CandidatePayload) -> Result<()>;

    /// Replace the set of locally published tracks. Tracks absent from
    /// `tracks` are detached; new ones are attached.
    async fn set_tracks(&self, tracks: &[MediaTrack]) -> Result<()>;

    /// Release the underlying connection
    async fn close(&self) -> Result<()>;
}

/// Creates media sessions on demand, one per remote peer
#[async_trait]
pub trait MediaSessionFactory: Send + Sync {
    /// Open a session toward `peer_id`, returning the session handle and
    /// the receiver for its event stream.
    async fn open(&self, peer_id: &str) -> Result<(Arc<dyn MediaSession>, MediaEvents)>;
}
