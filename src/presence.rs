//! Room membership tracking and automatic call scheduling.
//!
//! Keeps the set of peers currently in the room and, while local media
//! is active, schedules a call to each newcomer after a short random
//! delay. The delay spreads out offers when many peers join at once;
//! simultaneous offers that slip through anyway are resolved by the
//! engine's glare rule.

use crate::engine::NegotiationEngine;
use crate::events::RoomEvent;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub struct PresenceCoordinator {
    weak: Weak<Self>,
    local_id: String,
    engine: Arc<NegotiationEngine>,
    present: Mutex<HashSet<String>>,
    /// Armed call timers per peer, cancelled if the peer leaves first
    pending_calls: Mutex<HashMap<String, JoinHandle<()>>>,
    call_delay: (Duration, Duration),
    events: mpsc::UnboundedSender<RoomEvent>,
}

impl PresenceCoordinator {
    pub fn new(
        engine: Arc<NegotiationEngine>,
        call_delay: (Duration, Duration),
        events: mpsc::UnboundedSender<RoomEvent>,
    ) -> Arc<Self> {
        let local_id = engine.local_id().to_string();
        Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            local_id,
            engine,
            present: Mutex::new(HashSet::new()),
            pending_calls: Mutex::new(HashMap::new()),
            call_delay,
            events,
        })
    }

    /// A peer entered the room. Duplicate joins are ignored.
    pub async fn on_peer_joined(&self, peer_id: &str) {
        if peer_id == self.local_id {
            return;
        }
        if !self.present.lock().await.insert(peer_id.to_string()) {
            debug!("Peer {} already present", peer_id);
            return;
        }

        debug!("Peer {} joined the room", peer_id);
        self.emit(RoomEvent::peer_joined(peer_id));

        if self.engine.has_local_media().await {
            self.schedule_call(peer_id).await;
        }
    }

    /// A peer left the room. Cancels any armed call timer first, then
    /// tears the session down whether or not local media is active.
    pub async fn on_peer_left(&self, peer_id: &str) {
        if peer_id == self.local_id {
            return;
        }
        self.cancel_scheduled(peer_id).await;
        let was_present = self.present.lock().await.remove(peer_id);
        self.engine.teardown(peer_id).await;

        if was_present {
            debug!("Peer {} left the room", peer_id);
            self.emit(RoomEvent::peer_left(peer_id));
        }
    }

    /// Replace the presence set wholesale. Peers missing from the
    /// snapshot are treated as having left, new ones as having joined.
    pub async fn on_membership_snapshot(&self, peers: &[String]) {
        let target: HashSet<&String> =
            peers.iter().filter(|p| p.as_str() != self.local_id).collect();

        let current: Vec<String> = self.present.lock().await.iter().cloned().collect();
        for peer in current {
            if !target.contains(&peer) {
                self.on_peer_left(&peer).await;
            }
        }

        for peer in peers {
            // duplicates and already-known peers fall out in the join path
            self.on_peer_joined(peer).await;
        }
    }

    /// Schedule calls to every present peer that has no session yet.
    /// Used when local media starts; peers already in negotiation get
    /// their tracks through renegotiation instead.
    pub async fn call_present_peers(&self) {
        let peers: Vec<String> = self.present.lock().await.iter().cloned().collect();
        if peers.is_empty() {
            return;
        }
        debug!("Scheduling calls to {} present peers", peers.len());
        for peer in peers {
            if self.engine.registry().contains(&peer).await {
                continue;
            }
            self.schedule_call(&peer).await;
        }
    }

    /// Drop all presence state and armed timers, e.g. when the relay
    /// connection is lost. Emits no per-peer events.
    pub async fn reset(&self) {
        {
            let mut pending = self.pending_calls.lock().await;
            for (_, handle) in pending.drain() {
                handle.abort();
            }
        }
        self.present.lock().await.clear();
        debug!("Cleared room presence");
    }

    pub async fn is_present(&self, peer_id: &str) -> bool {
        self.present.lock().await.contains(peer_id)
    }

    /// Current peers in the room, sorted for stable output
    pub async fn peers(&self) -> Vec<String> {
        let mut peers: Vec<String> = self.present.lock().await.iter().cloned().collect();
        peers.sort();
        peers
    }

    pub async fn has_pending_call(&self, peer_id: &str) -> bool {
        self.pending_calls.lock().await.contains_key(peer_id)
    }

    /// Arm the jittered call timer for a peer, replacing any timer
    /// already armed for it
    async fn schedule_call(&self, peer_id: &str) {
        let (min, max) = self.call_delay;
        // thread_rng is not Send, draw before spawning
        let delay = if max > min {
            rand::thread_rng().gen_range(min..=max)
        } else {
            min
        };
        debug!("Calling {} in {}ms", peer_id, delay.as_millis());

        let weak = self.weak.clone();
        let peer = peer_id.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(presence) = weak.upgrade() else { return };
            presence.fire_scheduled(&peer).await;
        });

        if let Some(old) = self.pending_calls.lock().await.insert(peer_id.to_string(), handle) {
            old.abort();
        }
    }

    /// The call timer elapsed. The premise is re-checked because local
    /// media may have stopped or the peer may have left while the timer
    /// was armed.
    async fn fire_scheduled(&self, peer_id: &str) {
        self.pending_calls.lock().await.remove(peer_id);

        if !self.engine.has_local_media().await {
            debug!("Local media stopped before scheduled call to {}, skipping", peer_id);
            return;
        }
        if !self.present.lock().await.contains(peer_id) {
            debug!("Peer {} gone before scheduled call, skipping", peer_id);
            return;
        }

        if let Err(e) = self.engine.initiate_call(peer_id).await {
            warn!("Scheduled call to {} failed: {}", peer_id, e);
        }
    }

    async fn cancel_scheduled(&self, peer_id: &str) {
        if let Some(handle) = self.pending_calls.lock().await.remove(peer_id) {
            handle.abort();
            debug!("Cancelled scheduled call to {}", peer_id);
        }
    }

    fn emit(&self, event: RoomEvent) {
        let _ = self.events.send(event);
    }
}
