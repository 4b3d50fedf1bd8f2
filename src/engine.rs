//! Offer/answer negotiation engine.
//!
//! Drives every per-peer session through the signaling handshake:
//! outbound calls, incoming offers and answers, trickled ICE
//! candidates, renegotiation when the local track set changes, and
//! teardown. Simultaneous offers (glare) are resolved by comparing
//! peer identities: the side whose identity sorts greater abandons its
//! own offer and answers the incoming one.

use crate::envelope::{CandidatePayload, Envelope, SdpPayload};
use crate::error::{Error, Result};
use crate::events::RoomEvent;
use crate::media::MediaTrack;
use crate::session::{Session, SessionEntry, SessionRegistry, SessionState};
use crate::transport::{
    MediaEvent, MediaEvents, MediaSessionFactory, RemoteDescription, TransportHealth,
};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

/// How a session close is reported to the event stream
enum CloseKind {
    /// Deliberate teardown, reported as a closed call
    Notify,
    /// Internal close that the user never sees, e.g. yielding in glare
    Quiet,
    /// Negotiation or transport failure, reported with a reason
    Failed(String),
}

pub struct NegotiationEngine {
    weak: Weak<Self>,
    local_id: String,
    registry: SessionRegistry,
    local_tracks: RwLock<Vec<MediaTrack>>,
    outbound: mpsc::UnboundedSender<Envelope>,
    events: mpsc::UnboundedSender<RoomEvent>,
    grace_period: Duration,
}

impl NegotiationEngine {
    pub fn new(
        local_id: impl Into<String>,
        media: Arc<dyn MediaSessionFactory>,
        outbound: mpsc::UnboundedSender<Envelope>,
        events: mpsc::UnboundedSender<RoomEvent>,
        grace_period: Duration,
    ) -> Arc<Self> {
        let local_id = local_id.into();
        Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            local_id,
            registry: SessionRegistry::new(media),
            local_tracks: RwLock::new(Vec::new()),
            outbound,
            events,
            grace_period,
        })
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Start a call to `peer_id`. No-op when a session for the peer is
    /// already negotiating or established.
    pub async fn initiate_call(&self, peer_id: &str) -> Result<()> {
        if peer_id == self.local_id {
            debug!("Ignoring call to self");
            return Ok(());
        }

        let session = self.ensure_session(peer_id).await?;
        let _gate = session.lock_op().await;
        if session.is_closing() {
            return Ok(());
        }
        if session.state().await != SessionState::New {
            debug!("Already negotiating with {}, skipping call", peer_id);
            return Ok(());
        }

        self.offer_locked(&session).await
    }

    /// Handle a remote offer.
    ///
    /// If our own offer to the same peer is still in flight, both sides
    /// offered at once. The side whose identity sorts greater yields:
    /// it silently drops its own attempt and answers on a fresh
    /// session. The other side ignores the incoming offer and keeps
    /// waiting for its answer.
    pub async fn handle_offer(&self, from: &str, payload: SdpPayload) -> Result<()> {
        if from == self.local_id {
            debug!("Ignoring offer from self");
            return Ok(());
        }

        // Yielding in glare closes our offering session and loops to
        // answer on the fresh one. A local offer racing in between the
        // registry lookup and the gate lands back in the offering arm
        // and is yielded the same way, so an incoming offer we did not
        // ignore is always answered.
        loop {
            let session = self.ensure_session(from).await?;
            let _gate = session.lock_op().await;
            if session.is_closing() {
                debug!("Session with {} is closing, discarding offer", from);
                return Ok(());
            }
            match session.state().await {
                SessionState::Offering => {
                    if self.local_id.as_str() > from {
                        debug!("Offer glare with {}, yielding to their offer", from);
                        if session.begin_close() {
                            self.finish_close(&session, CloseKind::Quiet).await;
                        }
                    } else {
                        debug!("Offer glare with {}, keeping our offer", from);
                        return Ok(());
                    }
                }
                _ => {
                    // Fresh session, or a live one the remote side is
                    // renegotiating: answer in place
                    return self.answer_locked(&session, payload).await;
                }
            }
        }
    }

    /// Handle a remote answer. Only meaningful while our offer is in
    /// flight; anything else is a stale duplicate and is dropped.
    pub async fn handle_answer(&self, from: &str, payload: SdpPayload) -> Result<()> {
        if from == self.local_id {
            return Ok(());
        }

        let Some(session) = self.registry.get(from).await else {
            debug!("Discarding answer from {} with no session", from);
            return Ok(());
        };

        let _gate = session.lock_op().await;
        if session.is_closing() {
            return Ok(());
        }
        let state = session.state().await;
        if state != SessionState::Offering {
            debug!("Discarding stale answer from {} in state {}", from, state);
            return Ok(());
        }

        let applied = session
            .transport()
            .set_remote_description(RemoteDescription::Answer(payload))
            .await;
        if self.abandoned(&session) {
            return Ok(());
        }
        if let Err(e) = applied {
            return self
                .fail_locked(&session, format!("remote answer rejected: {}", e))
                .await;
        }
        session.mark_remote_description();
        self.apply_buffered(&session).await;

        session.set_state(SessionState::Connected).await;
        self.emit(RoomEvent::call_established(from));
        debug!("Negotiation with {} complete", from);

        Ok(())
    }

    /// Handle a trickled ICE candidate, buffering it when no remote
    /// description has been applied yet. A candidate with no session is
    /// expected after teardown and is dropped.
    pub async fn handle_candidate(&self, from: &str, payload: CandidatePayload) -> Result<()> {
        if from == self.local_id {
            return Ok(());
        }

        let Some(session) = self.registry.get(from).await else {
            debug!("Discarding candidate from {} with no session", from);
            return Ok(());
        };

        let _gate = session.lock_op().await;
        if session.is_closing() {
            return Ok(());
        }

        if !session.has_remote_description() {
            session.buffer_candidate(payload).await;
            return Ok(());
        }

        if let Err(e) = session.transport().add_ice_candidate(&payload).await {
            warn!("Failed to apply candidate from {}: {}", from, e);
        }
        Ok(())
    }

    /// Re-offer to every live session with the current local track set.
    /// Per-session failures close that session only and never stop the
    /// sweep.
    pub async fn renegotiate_all(&self) {
        let sessions = self.registry.snapshot().await;
        if sessions.is_empty() {
            return;
        }
        debug!("Renegotiating {} sessions", sessions.len());

        for session in sessions {
            let _gate = session.lock_op().await;
            if session.is_closing() || session.state().await == SessionState::Closed {
                continue;
            }
            if let Err(e) = self.offer_locked(&session).await {
                warn!("Renegotiation with {} failed: {}", session.peer_id(), e);
            }
        }
    }

    /// Replace the local track set and push it to every live session
    pub async fn set_local_media(&self, tracks: Vec<MediaTrack>) {
        {
            let mut local = self.local_tracks.write().await;
            *local = tracks;
        }
        self.renegotiate_all().await;
    }

    pub async fn has_local_media(&self) -> bool {
        !self.local_tracks.read().await.is_empty()
    }

    pub async fn local_tracks(&self) -> Vec<MediaTrack> {
        self.local_tracks.read().await.clone()
    }

    /// Close the session for `peer_id` and drop it from the registry.
    /// Safe to call for peers with no session.
    pub async fn teardown(&self, peer_id: &str) {
        let Some(session) = self.registry.get(peer_id).await else {
            return;
        };
        if !session.begin_close() {
            return;
        }
        let _gate = session.lock_op().await;
        self.finish_close(&session, CloseKind::Notify).await;
    }

    /// Tear down every session, e.g. when the relay connection is lost
    pub async fn teardown_all(&self) {
        let sessions = self.registry.snapshot().await;
        if sessions.is_empty() {
            return;
        }
        debug!("Tearing down {} sessions", sessions.len());
        for session in sessions {
            self.teardown(session.peer_id()).await;
        }
    }

    /// Look up or open the session for a peer, wiring up its transport
    /// event monitor on creation
    async fn ensure_session(&self, peer_id: &str) -> Result<Arc<Session>> {
        match self.registry.get_or_create(peer_id).await {
            Ok(SessionEntry::Existing(session)) => Ok(session),
            Ok(SessionEntry::Created(session, events)) => {
                self.spawn_monitor(&session, events).await;
                Ok(session)
            }
            Err(e) => {
                let reason = format!("could not open media session: {}", e);
                self.emit(RoomEvent::call_failed(peer_id, reason.clone()));
                Err(Error::negotiation(peer_id, reason))
            }
        }
    }

    /// Offer path. Caller holds the session's operation gate. A close
    /// claimed while a transport call was pending abandons the result.
    async fn offer_locked(&self, session: &Arc<Session>) -> Result<()> {
        let tracks = self.local_tracks.read().await.clone();
        let attached = session.transport().set_tracks(&tracks).await;
        if self.abandoned(session) {
            return Ok(());
        }
        if let Err(e) = attached {
            return self
                .fail_locked(session, format!("could not attach local tracks: {}", e))
                .await;
        }

        let created = session.transport().create_offer().await;
        if self.abandoned(session) {
            return Ok(());
        }
        let offer = match created {
            Ok(offer) => offer,
            Err(e) => {
                return self
                    .fail_locked(session, format!("offer creation failed: {}", e))
                    .await;
            }
        };

        session.set_state(SessionState::Offering).await;
        self.send(Envelope::offer(&self.local_id, session.peer_id(), offer))?;
        debug!("Sent offer to {}", session.peer_id());

        Ok(())
    }

    /// Answer path for an incoming offer. Caller holds the session's
    /// operation gate. A close claimed while a transport call was
    /// pending abandons the result; an already-connected session being
    /// renegotiated does not re-announce the call.
    async fn answer_locked(&self, session: &Arc<Session>, payload: SdpPayload) -> Result<()> {
        let was_connected = session.state().await == SessionState::Connected;

        let tracks = self.local_tracks.read().await.clone();
        let attached = session.transport().set_tracks(&tracks).await;
        if self.abandoned(session) {
            return Ok(());
        }
        if let Err(e) = attached {
            return self
                .fail_locked(session, format!("could not attach local tracks: {}", e))
                .await;
        }

        let applied = session
            .transport()
            .set_remote_description(RemoteDescription::Offer(payload))
            .await;
        if self.abandoned(session) {
            return Ok(());
        }
        if let Err(e) = applied {
            return self
                .fail_locked(session, format!("remote offer rejected: {}", e))
                .await;
        }
        session.mark_remote_description();
        self.apply_buffered(session).await;

        session.set_state(SessionState::Answering).await;

        let created = session.transport().create_answer().await;
        if self.abandoned(session) {
            return Ok(());
        }
        let answer = match created {
            Ok(answer) => answer,
            Err(e) => {
                return self
                    .fail_locked(session, format!("answer creation failed: {}", e))
                    .await;
            }
        };

        self.send(Envelope::answer(&self.local_id, session.peer_id(), answer))?;
        session.set_state(SessionState::Connected).await;
        if !was_connected {
            self.emit(RoomEvent::call_established(session.peer_id()));
        }
        debug!("Answered offer from {}", session.peer_id());

        Ok(())
    }

    /// Apply candidates that arrived before the remote description
    async fn apply_buffered(&self, session: &Arc<Session>) {
        let pending = session.drain_candidates().await;
        if pending.is_empty() {
            return;
        }
        debug!(
            "Applying {} buffered candidates for {}",
            pending.len(),
            session.peer_id()
        );
        for candidate in pending {
            if let Err(e) = session.transport().add_ice_candidate(&candidate).await {
                warn!(
                    "Failed to apply buffered candidate for {}: {}",
                    session.peer_id(),
                    e
                );
            }
        }
    }

    /// True when a teardown claimed the session while a transport call
    /// was in flight. Callers drop the pending result instead of
    /// applying it to the closing session.
    fn abandoned(&self, session: &Session) -> bool {
        if session.is_closing() {
            debug!("Session with {} closed mid-operation, dropping result", session.peer_id());
            return true;
        }
        false
    }

    /// Fail the current negotiation. Caller holds the operation gate.
    /// Closes the session unless a concurrent closer already claimed
    /// it, and always reports the failure to the caller.
    async fn fail_locked(&self, session: &Arc<Session>, reason: String) -> Result<()> {
        if session.begin_close() {
            self.finish_close(session, CloseKind::Failed(reason.clone()))
                .await;
        }
        Err(Error::negotiation(session.peer_id(), reason))
    }

    /// Run the close sequence. Caller holds the operation gate and has
    /// claimed the close via `begin_close`. Must never run on the
    /// session's own monitor task, which gets aborted here.
    async fn finish_close(&self, session: &Arc<Session>, kind: CloseKind) {
        session.abort_tasks().await;

        if let Err(e) = session.transport().close().await {
            warn!("Error closing transport for {}: {}", session.peer_id(), e);
        }

        session.set_state(SessionState::Closed).await;
        self.registry.remove(session.peer_id()).await;

        match kind {
            CloseKind::Notify => self.emit(RoomEvent::call_closed(session.peer_id())),
            CloseKind::Quiet => {}
            CloseKind::Failed(reason) => {
                self.emit(RoomEvent::call_failed(session.peer_id(), reason))
            }
        }
    }

    /// Close a session after its transport failed outright. Runs on a
    /// detached task so the monitor task that observed the failure is
    /// free to be aborted.
    async fn close_failed(&self, peer_id: &str, reason: &str) {
        let Some(session) = self.registry.get(peer_id).await else {
            return;
        };
        if !session.begin_close() {
            return;
        }
        let _gate = session.lock_op().await;
        self.finish_close(&session, CloseKind::Failed(reason.to_string()))
            .await;
    }

    /// Consume transport events for one session until it closes
    async fn spawn_monitor(&self, session: &Arc<Session>, mut events: MediaEvents) {
        let weak = self.weak.clone();
        let session_weak = Arc::downgrade(session);
        let handle = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(engine) = weak.upgrade() else { break };
                let Some(session) = session_weak.upgrade() else { break };
                engine.on_media_event(&session, event).await;
            }
        });
        session.set_monitor_task(handle).await;
    }

    async fn on_media_event(&self, session: &Arc<Session>, event: MediaEvent) {
        match event {
            MediaEvent::CandidateGathered(candidate) => {
                let envelope = Envelope::candidate(&self.local_id, session.peer_id(), candidate);
                if let Err(e) = self.send(envelope) {
                    warn!("Failed to forward candidate for {}: {}", session.peer_id(), e);
                }
            }
            MediaEvent::RemoteTrackAdded { kind } => {
                session.mark_remote_track();
                self.emit(RoomEvent::remote_media_started(session.peer_id(), kind));
            }
            MediaEvent::HealthChanged(health) => {
                self.on_health_changed(session, health).await;
            }
        }
    }

    /// React to transport health reports.
    ///
    /// An established call that loses its transport turns degraded and
    /// gets one recovery window; if the transport does not come back
    /// before it elapses, the session is torn down. A transport that
    /// fails before negotiation ever completed is closed right away.
    async fn on_health_changed(&self, session: &Arc<Session>, health: TransportHealth) {
        match health {
            TransportHealth::Connected => {
                let _gate = session.lock_op().await;
                if session.is_closing() {
                    return;
                }
                if session.state().await == SessionState::Degraded {
                    if let Some(grace) = session.take_grace_task().await {
                        grace.abort();
                    }
                    session.set_state(SessionState::Connected).await;
                    self.emit(RoomEvent::call_recovered(session.peer_id()));
                    debug!("Transport for {} recovered", session.peer_id());
                }
            }
            TransportHealth::Disconnected | TransportHealth::Failed => {
                let _gate = session.lock_op().await;
                if session.is_closing() {
                    return;
                }
                match session.state().await {
                    SessionState::Connected => {
                        session.set_state(SessionState::Degraded).await;
                        self.emit(RoomEvent::call_degraded(session.peer_id()));
                        self.spawn_grace(session).await;
                        debug!(
                            "Transport for {} degraded, recovery window {}ms",
                            session.peer_id(),
                            self.grace_period.as_millis()
                        );
                    }
                    SessionState::Degraded => {
                        // recovery window already open
                    }
                    _ => {
                        if health == TransportHealth::Failed {
                            warn!(
                                "Transport for {} failed before negotiation completed",
                                session.peer_id()
                            );
                            let weak = self.weak.clone();
                            let peer = session.peer_id().to_string();
                            tokio::spawn(async move {
                                if let Some(engine) = weak.upgrade() {
                                    engine
                                        .close_failed(&peer, "transport failed during negotiation")
                                        .await;
                                }
                            });
                        }
                    }
                }
            }
            TransportHealth::Connecting | TransportHealth::Closed => {}
        }
    }

    /// Arm the recovery window for a degraded session. Caller holds the
    /// operation gate.
    async fn spawn_grace(&self, session: &Arc<Session>) {
        let weak = self.weak.clone();
        let session_weak = Arc::downgrade(session);
        let grace = self.grace_period;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let Some(engine) = weak.upgrade() else { return };
            let Some(session) = session_weak.upgrade() else { return };
            engine.grace_expired(&session).await;
        });
        session.set_grace_task(handle).await;
    }

    /// The recovery window elapsed. Detaches its own task handle first
    /// so the close sequence does not abort the task running it, then
    /// re-checks under the gate that no recovery slipped in.
    async fn grace_expired(&self, session: &Arc<Session>) {
        session.take_grace_task().await;

        let _gate = session.lock_op().await;
        if session.is_closing() || session.state().await != SessionState::Degraded {
            return;
        }
        if !session.begin_close() {
            return;
        }
        debug!("Recovery window for {} expired, closing", session.peer_id());
        self.finish_close(session, CloseKind::Notify).await;
    }

    fn send(&self, envelope: Envelope) -> Result<()> {
        self.outbound
            .send(envelope)
            .map_err(|_| Error::ChannelClosed("outbound signaling channel closed".to_string()))
    }

    fn emit(&self, event: RoomEvent) {
        // Best effort: a dropped event receiver must not stall signaling
        let _ = self.events.send(event);
    }
}
