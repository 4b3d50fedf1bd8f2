//! Room client facade.
//!
//! Owns the negotiation engine and presence coordinator for one room
//! membership and dispatches inbound envelopes to them. The relay
//! adapter feeds envelopes in through [`RoomClient::handle_envelope`]
//! and drains outbound envelopes plus user-facing events from the
//! [`RoomReceivers`] returned at construction.

use crate::config::RoomConfig;
use crate::engine::NegotiationEngine;
use crate::envelope::{ChatPayload, Envelope};
use crate::error::{Error, Result};
use crate::events::RoomEvent;
use crate::media::MediaTrack;
use crate::presence::PresenceCoordinator;
use crate::transport::MediaSessionFactory;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Receiving halves of the room's two output streams
#[derive(Debug)]
pub struct RoomReceivers {
    /// Envelopes to forward to the relay
    pub outbound: mpsc::UnboundedReceiver<Envelope>,
    /// Events for the embedding application
    pub events: mpsc::UnboundedReceiver<RoomEvent>,
}

pub struct RoomClient {
    config: RoomConfig,
    engine: Arc<NegotiationEngine>,
    presence: Arc<PresenceCoordinator>,
    outbound: mpsc::UnboundedSender<Envelope>,
    events: mpsc::UnboundedSender<RoomEvent>,
}

impl fmt::Debug for RoomClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RoomClient {
    /// Validate the configuration and wire up the engine and presence
    /// coordinator around a media session factory.
    pub fn new(
        config: RoomConfig,
        media: Arc<dyn MediaSessionFactory>,
    ) -> Result<(Self, RoomReceivers)> {
        config.validate()?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let engine = NegotiationEngine::new(
            config.username.clone(),
            media,
            outbound_tx.clone(),
            events_tx.clone(),
            config.grace_period(),
        );
        let presence = PresenceCoordinator::new(
            Arc::clone(&engine),
            config.call_delay_window(),
            events_tx.clone(),
        );

        let client = Self {
            config,
            engine,
            presence,
            outbound: outbound_tx,
            events: events_tx,
        };
        let receivers = RoomReceivers {
            outbound: outbound_rx,
            events: events_rx,
        };
        Ok((client, receivers))
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    pub fn local_id(&self) -> &str {
        &self.config.username
    }

    pub fn engine(&self) -> &Arc<NegotiationEngine> {
        &self.engine
    }

    pub fn presence(&self) -> &Arc<PresenceCoordinator> {
        &self.presence
    }

    /// Dispatch one inbound envelope. Envelopes addressed to another
    /// peer are dropped, the relay fans broadcast types out to everyone.
    pub async fn handle_envelope(&self, envelope: Envelope) -> Result<()> {
        if let Some(to) = envelope.recipient() {
            if to != self.local_id() {
                debug!("Ignoring envelope addressed to {}", to);
                return Ok(());
            }
        }

        match envelope {
            Envelope::Offer { from, payload, .. } => self.engine.handle_offer(&from, payload).await,
            Envelope::Answer { from, payload, .. } => {
                self.engine.handle_answer(&from, payload).await
            }
            Envelope::Candidate { from, payload, .. } => {
                self.engine.handle_candidate(&from, payload).await
            }
            Envelope::PeerJoined { from } => {
                self.presence.on_peer_joined(&from).await;
                Ok(())
            }
            Envelope::PeerLeft { from } => {
                self.presence.on_peer_left(&from).await;
                Ok(())
            }
            Envelope::PresenceSnapshot { payload } => {
                self.presence.on_membership_snapshot(&payload.peers).await;
                Ok(())
            }
            Envelope::Chat { from, payload } => {
                // our own messages arrive back as the relay echo and are
                // surfaced like any other chat, told apart by `from`
                self.emit(RoomEvent::chat_received(from, payload));
                Ok(())
            }
        }
    }

    /// Publish a new local track set. Live sessions are renegotiated
    /// with it; when media turns active, peers without a session get
    /// called.
    pub async fn set_local_media(&self, tracks: Vec<MediaTrack>) {
        let active = !tracks.is_empty();
        debug!("Local media changed: {} tracks", tracks.len());
        self.engine.set_local_media(tracks).await;
        if active {
            self.presence.call_present_peers().await;
        }
    }

    /// Stop publishing local media. Sessions stay open with the empty
    /// track set renegotiated, they are not torn down.
    pub async fn clear_local_media(&self) {
        self.set_local_media(Vec::new()).await;
    }

    pub fn send_chat(&self, text: impl Into<String>) -> Result<()> {
        let envelope = Envelope::chat(self.local_id(), ChatPayload::new(text));
        self.outbound
            .send(envelope)
            .map_err(|_| Error::ChannelClosed("outbound signaling channel closed".to_string()))
    }

    pub fn on_relay_connected(&self) {
        debug!("Relay connection established");
        self.emit(RoomEvent::RelayConnected);
    }

    /// The relay connection dropped. All sessions and presence state
    /// are discarded; a reconnect starts the room from scratch.
    pub async fn on_relay_disconnected(&self) {
        debug!("Relay connection lost, clearing room state");
        self.presence.reset().await;
        self.engine.teardown_all().await;
        self.emit(RoomEvent::RelayDisconnected);
    }

    fn emit(&self, event: RoomEvent) {
        let _ = self.events.send(event);
    }
}
