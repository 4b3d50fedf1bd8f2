//! Per-peer negotiation session state.
//!
//! A [`Session`] pairs one remote peer with one media transport and
//! tracks where the offer/answer exchange currently stands. All
//! signaling operations against a session are serialized through its
//! operation gate so a handled answer can never interleave with an
//! in-flight offer.

use crate::envelope::CandidatePayload;
use crate::transport::MediaSession;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tokio::task::JoinHandle;
use tracing::debug;

/// Where a session stands in the offer/answer exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created but no offer sent or received yet
    New,
    /// Local offer sent, waiting for the remote answer
    Offering,
    /// Remote offer received, local answer sent
    Answering,
    /// Negotiation completed on this session
    Connected,
    /// Transport reported trouble, recovery window open
    Degraded,
    /// Torn down, no further operations accepted
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::New => "new",
            SessionState::Offering => "offering",
            SessionState::Answering => "answering",
            SessionState::Connected => "connected",
            SessionState::Degraded => "degraded",
            SessionState::Closed => "closed",
        };
        write!(f, "{}", s)
    }
}

#[derive(Default)]
struct SessionTasks {
    monitor: Option<JoinHandle<()>>,
    grace: Option<JoinHandle<()>>,
}

/// Negotiation state for a single remote peer
pub struct Session {
    peer_id: String,
    transport: Arc<dyn MediaSession>,
    state: RwLock<SessionState>,
    /// Serializes signaling operations on this session
    op_gate: Mutex<()>,
    /// Set once by the first closer, checked by in-flight operations
    closing: AtomicBool,
    has_remote_description: AtomicBool,
    remote_track_seen: AtomicBool,
    pending_remote_candidates: Mutex<Vec<CandidatePayload>>,
    tasks: Mutex<SessionTasks>,
}

impl Session {
    pub fn new(peer_id: impl Into<String>, transport: Arc<dyn MediaSession>) -> Self {
        Self {
            peer_id: peer_id.into(),
            transport,
            state: RwLock::new(SessionState::New),
            op_gate: Mutex::new(()),
            closing: AtomicBool::new(false),
            has_remote_description: AtomicBool::new(false),
            remote_track_seen: AtomicBool::new(false),
            pending_remote_candidates: Mutex::new(Vec::new()),
            tasks: Mutex::new(SessionTasks::default()),
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn transport(&self) -> &Arc<dyn MediaSession> {
        &self.transport
    }

    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    pub async fn set_state(&self, next: SessionState) {
        let mut state = self.state.write().await;
        if *state != next {
            debug!("Session {} state: {} -> {}", self.peer_id, *state, next);
            *state = next;
        }
    }

    /// Acquire the operation gate. Held across a full signaling
    /// operation, never across session creation or removal.
    pub async fn lock_op(&self) -> MutexGuard<'_, ()> {
        self.op_gate.lock().await
    }

    /// Claim the close. Returns true for the first caller only, so
    /// concurrent teardown and failure paths cannot both run the close
    /// sequence.
    pub fn begin_close(&self) -> bool {
        !self.closing.swap(true, Ordering::SeqCst)
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    pub fn mark_remote_description(&self) {
        self.has_remote_description.store(true, Ordering::SeqCst);
    }

    pub fn has_remote_description(&self) -> bool {
        self.has_remote_description.load(Ordering::SeqCst)
    }

    /// Record arrival of remote media. Returns true on the first call
    /// only.
    pub fn mark_remote_track(&self) -> bool {
        !self.remote_track_seen.swap(true, Ordering::SeqCst)
    }

    pub fn remote_track_seen(&self) -> bool {
        self.remote_track_seen.load(Ordering::SeqCst)
    }

    /// Remote media is flowing and negotiation has settled
    pub async fn is_broadcasting(&self) -> bool {
        self.remote_track_seen() && *self.state.read().await == SessionState::Connected
    }

    /// Hold a candidate that arrived before the remote description
    pub async fn buffer_candidate(&self, candidate: CandidatePayload) {
        let mut pending = self.pending_remote_candidates.lock().await;
        pending.push(candidate);
        debug!(
            "Buffered ICE candidate for {} ({} pending)",
            self.peer_id,
            pending.len()
        );
    }

    /// Take the buffered candidates in arrival order
    pub async fn drain_candidates(&self) -> Vec<CandidatePayload> {
        std::mem::take(&mut *self.pending_remote_candidates.lock().await)
    }

    pub async fn set_monitor_task(&self, handle: JoinHandle<()>) {
        self.tasks.lock().await.monitor = Some(handle);
    }

    pub async fn set_grace_task(&self, handle: JoinHandle<()>) {
        if let Some(old) = self.tasks.lock().await.grace.replace(handle) {
            old.abort();
        }
    }

    /// Detach the grace timer handle, if any. The expiry path calls
    /// this on itself so the close sequence does not abort the task
    /// running it.
    pub async fn take_grace_task(&self) -> Option<JoinHandle<()>> {
        self.tasks.lock().await.grace.take()
    }

    /// Stop the background tasks attached to this session
    pub async fn abort_tasks(&self) {
        let mut tasks = self.tasks.lock().await;
        if let Some(monitor) = tasks.monitor.take() {
            monitor.abort();
        }
        if let Some(grace) = tasks.grace.take() {
            grace.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::SdpPayload;
    use crate::error::Result;
    use crate::media::MediaTrack;
    use crate::transport::RemoteDescription;
    use async_trait::async_trait;

    struct StubMedia;

    #[async_trait]
    impl MediaSession for StubMedia {
        async fn create_offer(&self) -> Result<SdpPayload> {
            Ok(SdpPayload::new("v=0"))
        }
        async fn create_answer(&self) -> Result<SdpPayload> {
            Ok(SdpPayload::new("v=0"))
        }
        async fn set_remote_description(&self, _desc: RemoteDescription) -> Result<()> {
            Ok(())
        }
        async fn add_ice_candidate(&self, _candidate: &CandidatePayload) -> Result<()> {
            Ok(())
        }
        async fn set_tracks(&self, _tracks: &[MediaTrack]) -> Result<()> {
            Ok(())
        }
        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    fn session() -> Session {
        Session::new("bob", Arc::new(StubMedia))
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let session = session();
        assert_eq!(session.state().await, SessionState::New);

        session.set_state(SessionState::Offering).await;
        assert_eq!(session.state().await, SessionState::Offering);

        session.set_state(SessionState::Connected).await;
        assert_eq!(session.state().await, SessionState::Connected);
        assert_eq!(session.state().await.to_string(), "connected");
    }

    #[tokio::test]
    async fn test_first_closer_wins() {
        let session = session();
        assert!(!session.is_closing());
        assert!(session.begin_close());
        assert!(!session.begin_close());
        assert!(session.is_closing());
    }

    #[tokio::test]
    async fn test_candidates_drain_in_arrival_order() {
        let session = session();
        session
            .buffer_candidate(CandidatePayload::new("candidate:1", Some("0".into()), Some(0)))
            .await;
        session
            .buffer_candidate(CandidatePayload::new("candidate:2", Some("1".into()), Some(1)))
            .await;

        let drained = session.drain_candidates().await;
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].candidate, "candidate:1");
        assert_eq!(drained[1].candidate, "candidate:2");
        assert!(session.drain_candidates().await.is_empty());
    }

    #[tokio::test]
    async fn test_remote_track_marked_once() {
        let session = session();
        assert!(!session.remote_track_seen());
        assert!(session.mark_remote_track());
        assert!(!session.mark_remote_track());
        assert!(session.remote_track_seen());
    }

    #[tokio::test]
    async fn test_broadcasting_requires_connected_state() {
        let session = session();
        session.mark_remote_track();
        assert!(!session.is_broadcasting().await);

        session.set_state(SessionState::Connected).await;
        assert!(session.is_broadcasting().await);
    }
}
