//! Test harness for driving the negotiation stack without real
//! transports.
//!
//! `FakeMediaFactory` hands out scripted [`FakeMediaSession`]s that
//! record every call and can be told to fail, or to park a call until
//! the test releases it. [`TestRig`]
//! wires a complete engine plus presence coordinator around one
//! factory, and [`pump`] shuttles envelopes between two rigs the way
//! the relay would, so glare and renegotiation can be exercised end to
//! end in-process.

#![allow(dead_code)]

use async_trait::async_trait;
use roomcast::engine::NegotiationEngine;
use roomcast::envelope::{CandidatePayload, Envelope, SdpPayload};
use roomcast::error::{Error, Result};
use roomcast::events::RoomEvent;
use roomcast::media::MediaTrack;
use roomcast::presence::PresenceCoordinator;
use roomcast::transport::{
    MediaEvent, MediaEvents, MediaSession, MediaSessionFactory, RemoteDescription,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

/// Scripted media session recording everything the engine does to it
pub struct FakeMediaSession {
    peer_id: String,
    offers: AtomicUsize,
    answers: AtomicUsize,
    remote_descriptions: Mutex<Vec<RemoteDescription>>,
    applied_candidates: Mutex<Vec<CandidatePayload>>,
    track_sets: Mutex<Vec<Vec<MediaTrack>>>,
    closed: AtomicBool,
    /// Make the next create_offer calls fail
    pub fail_offers: AtomicBool,
    /// Make the next create_answer calls fail
    pub fail_answers: AtomicBool,
    /// Make the next set_remote_description calls fail
    pub fail_remote_descriptions: AtomicBool,
    /// Park create_offer calls until release_held
    pub hold_offers: AtomicBool,
    /// Park create_answer calls until release_held
    pub hold_answers: AtomicBool,
    /// Park set_remote_description calls until release_held
    pub hold_remote_descriptions: AtomicBool,
    release: Notify,
    events: mpsc::UnboundedSender<MediaEvent>,
}

impl FakeMediaSession {
    fn new(peer_id: &str, fail_offers: bool, events: mpsc::UnboundedSender<MediaEvent>) -> Self {
        Self {
            peer_id: peer_id.to_string(),
            offers: AtomicUsize::new(0),
            answers: AtomicUsize::new(0),
            remote_descriptions: Mutex::new(Vec::new()),
            applied_candidates: Mutex::new(Vec::new()),
            track_sets: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            fail_offers: AtomicBool::new(fail_offers),
            fail_answers: AtomicBool::new(false),
            fail_remote_descriptions: AtomicBool::new(false),
            hold_offers: AtomicBool::new(false),
            hold_answers: AtomicBool::new(false),
            hold_remote_descriptions: AtomicBool::new(false),
            release: Notify::new(),
            events,
        }
    }

    /// Wake every call parked by a hold_* flag and stop holding new ones.
    /// Callers park the operation first (spawn, then settle), so the
    /// wakeup cannot be lost.
    pub fn release_held(&self) {
        self.hold_offers.store(false, Ordering::SeqCst);
        self.hold_answers.store(false, Ordering::SeqCst);
        self.hold_remote_descriptions.store(false, Ordering::SeqCst);
        self.release.notify_waiters();
    }

    async fn held(&self, flag: &AtomicBool) {
        if flag.load(Ordering::SeqCst) {
            self.release.notified().await;
        }
    }

    /// Inject a transport event as if the real peer connection fired it
    pub fn emit(&self, event: MediaEvent) {
        let _ = self.events.send(event);
    }

    pub fn offers(&self) -> usize {
        self.offers.load(Ordering::SeqCst)
    }

    pub fn answers(&self) -> usize {
        self.answers.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn remote_descriptions(&self) -> Vec<RemoteDescription> {
        self.remote_descriptions.lock().unwrap().clone()
    }

    pub fn applied_candidates(&self) -> Vec<CandidatePayload> {
        self.applied_candidates.lock().unwrap().clone()
    }

    pub fn last_tracks(&self) -> Option<Vec<MediaTrack>> {
        self.track_sets.lock().unwrap().last().cloned()
    }

    pub fn track_set_count(&self) -> usize {
        self.track_sets.lock().unwrap().len()
    }
}

#[async_trait]
impl MediaSession for FakeMediaSession {
    async fn create_offer(&self) -> Result<SdpPayload> {
        self.held(&self.hold_offers).await;
        if self.fail_offers.load(Ordering::SeqCst) {
            return Err(Error::Transport("scripted offer failure".to_string()));
        }
        let n = self.offers.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SdpPayload::new(format!("offer-{}-{}", self.peer_id, n)))
    }

    async fn create_answer(&self) -> Result<SdpPayload> {
        self.held(&self.hold_answers).await;
        if self.fail_answers.load(Ordering::SeqCst) {
            return Err(Error::Transport("scripted answer failure".to_string()));
        }
        let n = self.answers.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SdpPayload::new(format!("answer-{}-{}", self.peer_id, n)))
    }

    async fn set_remote_description(&self, desc: RemoteDescription) -> Result<()> {
        self.held(&self.hold_remote_descriptions).await;
        if self.fail_remote_descriptions.load(Ordering::SeqCst) {
            return Err(Error::Transport("scripted description failure".to_string()));
        }
        self.remote_descriptions.lock().unwrap().push(desc);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &CandidatePayload) -> Result<()> {
        self.applied_candidates.lock().unwrap().push(candidate.clone());
        Ok(())
    }

    async fn set_tracks(&self, tracks: &[MediaTrack]) -> Result<()> {
        self.track_sets.lock().unwrap().push(tracks.to_vec());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Factory producing [`FakeMediaSession`]s, keeping every session it
/// ever opened so tests can inspect sessions replaced during glare
pub struct FakeMediaFactory {
    sessions: Mutex<HashMap<String, Vec<Arc<FakeMediaSession>>>>,
    opens: AtomicUsize,
    /// Make open itself fail
    pub fail_opens: AtomicBool,
    /// New sessions come up scripted to fail create_offer
    pub fail_offers_on_open: AtomicBool,
    /// New sessions come up with create_offer parked
    pub hold_offers_on_open: AtomicBool,
    /// New sessions come up with create_answer parked
    pub hold_answers_on_open: AtomicBool,
}

impl FakeMediaFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sessions: Mutex::new(HashMap::new()),
            opens: AtomicUsize::new(0),
            fail_opens: AtomicBool::new(false),
            fail_offers_on_open: AtomicBool::new(false),
            hold_offers_on_open: AtomicBool::new(false),
            hold_answers_on_open: AtomicBool::new(false),
        })
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Latest session opened for a peer; panics if none exists
    pub fn session(&self, peer_id: &str) -> Arc<FakeMediaSession> {
        self.sessions_for(peer_id)
            .last()
            .cloned()
            .unwrap_or_else(|| panic!("no media session was opened for {}", peer_id))
    }

    /// Every session ever opened for a peer, oldest first
    pub fn sessions_for(&self, peer_id: &str) -> Vec<Arc<FakeMediaSession>> {
        self.sessions
            .lock()
            .unwrap()
            .get(peer_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl MediaSessionFactory for FakeMediaFactory {
    async fn open(&self, peer_id: &str) -> Result<(Arc<dyn MediaSession>, MediaEvents)> {
        if self.fail_opens.load(Ordering::SeqCst) {
            return Err(Error::Transport("scripted open failure".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Arc::new(FakeMediaSession::new(
            peer_id,
            self.fail_offers_on_open.load(Ordering::SeqCst),
            tx,
        ));
        session
            .hold_offers
            .store(self.hold_offers_on_open.load(Ordering::SeqCst), Ordering::SeqCst);
        session
            .hold_answers
            .store(self.hold_answers_on_open.load(Ordering::SeqCst), Ordering::SeqCst);
        self.sessions
            .lock()
            .unwrap()
            .entry(peer_id.to_string())
            .or_default()
            .push(Arc::clone(&session));
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok((session as Arc<dyn MediaSession>, rx))
    }
}

/// One participant: engine and presence coordinator over a fake
/// factory, with the receiving halves of the outbound and event streams
pub struct TestRig {
    pub local_id: String,
    pub factory: Arc<FakeMediaFactory>,
    pub engine: Arc<NegotiationEngine>,
    pub presence: Arc<PresenceCoordinator>,
    pub outbound: mpsc::UnboundedReceiver<Envelope>,
    pub events: mpsc::UnboundedReceiver<RoomEvent>,
}

impl TestRig {
    /// Rig with near-zero call jitter and a long recovery grace
    pub fn new(local_id: &str) -> Self {
        Self::with_timing(
            local_id,
            Duration::from_millis(1),
            Duration::from_millis(2),
            Duration::from_secs(10),
        )
    }

    pub fn with_timing(
        local_id: &str,
        delay_min: Duration,
        delay_max: Duration,
        grace: Duration,
    ) -> Self {
        let factory = FakeMediaFactory::new();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let engine = NegotiationEngine::new(
            local_id,
            Arc::clone(&factory) as Arc<dyn MediaSessionFactory>,
            outbound_tx,
            events_tx.clone(),
            grace,
        );
        let presence =
            PresenceCoordinator::new(Arc::clone(&engine), (delay_min, delay_max), events_tx);

        Self {
            local_id: local_id.to_string(),
            factory,
            engine,
            presence,
            outbound: outbound_rx,
            events: events_rx,
        }
    }

    /// Latest fake session opened towards a peer
    pub fn fake(&self, peer_id: &str) -> Arc<FakeMediaSession> {
        self.factory.session(peer_id)
    }

    pub fn try_outbound(&mut self) -> Option<Envelope> {
        self.outbound.try_recv().ok()
    }

    /// Everything currently sitting in the event stream
    pub fn drain_events(&mut self) -> Vec<RoomEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Let spawned monitors and timers make progress
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Deliver one signaling envelope into a rig, as the relay would
pub async fn deliver(rig: &TestRig, envelope: Envelope) {
    match envelope {
        Envelope::Offer { from, to, payload } => {
            assert_eq!(to, rig.local_id, "offer misrouted");
            rig.engine
                .handle_offer(&from, payload)
                .await
                .expect("offer handling failed");
        }
        Envelope::Answer { from, to, payload } => {
            assert_eq!(to, rig.local_id, "answer misrouted");
            rig.engine
                .handle_answer(&from, payload)
                .await
                .expect("answer handling failed");
        }
        Envelope::Candidate { from, to, payload } => {
            assert_eq!(to, rig.local_id, "candidate misrouted");
            rig.engine
                .handle_candidate(&from, payload)
                .await
                .expect("candidate handling failed");
        }
        other => panic!("unexpected {} envelope between rigs", other.kind()),
    }
}

/// Shuttle envelopes between two rigs until both sides go quiet
pub async fn pump(a: &mut TestRig, b: &mut TestRig) {
    for _ in 0..8 {
        let from_a: Vec<Envelope> = std::iter::from_fn(|| a.try_outbound()).collect();
        for envelope in from_a {
            deliver(b, envelope).await;
        }
        let from_b: Vec<Envelope> = std::iter::from_fn(|| b.try_outbound()).collect();
        for envelope in from_b {
            deliver(a, envelope).await;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}
