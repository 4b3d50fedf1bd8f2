//! Peer-session signaling and negotiation engine for room-based
//! audio/video calls.
//!
//! Connects to a signaling relay, tracks who is in the room, and keeps
//! one media session per remote peer negotiated through the usual
//! offer/answer/candidate exchange.
//!
//! # Features
//!
//! - **Mesh calling**: one peer connection per remote peer, opened
//!   automatically while local media is active
//! - **Glare resolution**: simultaneous offers resolve deterministically
//!   by comparing peer identities, no negotiation ever deadlocks
//! - **Candidate buffering**: ICE candidates that outrun their offer are
//!   held and replayed once the remote description lands
//! - **Presence tracking**: join/leave events and wholesale membership
//!   snapshots, with jittered call scheduling to avoid offer storms
//! - **Degraded-call recovery**: a dropped transport gets one grace
//!   window to come back before the session is torn down
//! - **Room chat**: broadcast text messages over the same relay
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  Signaling relay (websocket)                         │
//! │  ↓ envelopes (offer/answer/candidate/presence/chat)  │
//! │  RelayClient                                         │
//! │  └─ RoomClient                                       │
//! │     ├─ PresenceCoordinator (who is here, call timing)│
//! │     └─ NegotiationEngine                             │
//! │        └─ SessionRegistry (one Session per peer)     │
//! │           └─ MediaSession (webrtc peer connection)   │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use roomcast::RoomConfig;
//!
//! let config = RoomConfig::new("ws://localhost:8080/ws", "alice")
//!     .with_room("lobby")
//!     .with_stun_server("stun:stun.l.google.com:19302");
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.room, "lobby");
//! ```
//!
//! ## Async Usage
//!
//! ```no_run
//! use roomcast::{MediaTrack, RelayClient, RoomClient, RoomConfig, RtcSessionFactory};
//! use std::sync::Arc;
//!
//! # async fn example() -> roomcast::Result<()> {
//! let config = RoomConfig::new("ws://localhost:8080/ws", "alice").with_room("lobby");
//! let media = Arc::new(RtcSessionFactory::new(config.clone()));
//!
//! let (room, receivers) = RoomClient::new(config, media)?;
//! let room = Arc::new(room);
//!
//! let mut events = receivers.events;
//! let _relay = RelayClient::connect(Arc::clone(&room), receivers.outbound).await?;
//!
//! // Start broadcasting; present peers get called automatically
//! room.set_local_media(vec![MediaTrack::audio(), MediaTrack::video()]).await;
//!
//! while let Some(event) = events.recv().await {
//!     println!("room event: {}", event.name());
//! }
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

// Public modules
pub mod config;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod events;
pub mod media;
pub mod presence;
pub mod room;
pub mod session;
pub mod signaling;
pub mod transport;

// Re-exports for public API
pub use config::{RoomConfig, TurnServerConfig};
pub use engine::NegotiationEngine;
pub use envelope::{CandidatePayload, ChatPayload, Envelope, SdpPayload, SnapshotPayload};
pub use error::{Error, Result};
pub use events::RoomEvent;
pub use media::{MediaTrack, TrackKind};
pub use presence::PresenceCoordinator;
pub use room::{RoomClient, RoomReceivers};
pub use session::{Session, SessionRegistry, SessionState};
pub use signaling::RelayClient;
pub use transport::webrtc::RtcSessionFactory;
pub use transport::{MediaEvent, MediaSession, MediaSessionFactory, TransportHealth};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let ver = version();
        assert!(!ver.is_empty());
    }
}
