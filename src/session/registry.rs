//! Session registry keyed by peer identity.
//!
//! At most one session exists per remote peer. Creation and removal go
//! through the registry lock, so two concurrent triggers (say a local
//! call initiation racing an incoming offer) converge on a single
//! session instead of opening two transports to the same peer.

use crate::error::Result;
use crate::session::session::Session;
use crate::transport::{MediaEvents, MediaSessionFactory};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Result of a [`SessionRegistry::get_or_create`] lookup
pub enum SessionEntry {
    /// A session for this peer already existed
    Existing(Arc<Session>),
    /// A fresh session was opened; the caller owns its event stream
    Created(Arc<Session>, MediaEvents),
}

impl SessionEntry {
    pub fn session(&self) -> &Arc<Session> {
        match self {
            SessionEntry::Existing(session) => session,
            SessionEntry::Created(session, _) => session,
        }
    }
}

pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    media: Arc<dyn MediaSessionFactory>,
}

impl SessionRegistry {
    pub fn new(media: Arc<dyn MediaSessionFactory>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            media,
        }
    }

    /// Look up the session for `peer_id`, opening one if none exists.
    /// Creation happens under the write lock, so concurrent callers for
    /// the same peer get the same session and only one transport is
    /// opened.
    pub async fn get_or_create(&self, peer_id: &str) -> Result<SessionEntry> {
        if let Some(session) = self.sessions.read().await.get(peer_id) {
            return Ok(SessionEntry::Existing(Arc::clone(session)));
        }

        let mut sessions = self.sessions.write().await;
        // Lost the race to another creator between the locks
        if let Some(session) = sessions.get(peer_id) {
            return Ok(SessionEntry::Existing(Arc::clone(session)));
        }

        let (transport, events) = self.media.open(peer_id).await?;
        let session = Arc::new(Session::new(peer_id, transport));
        sessions.insert(peer_id.to_string(), Arc::clone(&session));
        debug!("Opened session for peer {}", peer_id);

        Ok(SessionEntry::Created(session, events))
    }

    pub async fn get(&self, peer_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(peer_id).cloned()
    }

    /// Drop the registry entry for `peer_id`. The session itself stays
    /// alive through outstanding `Arc`s until its close sequence
    /// finishes.
    pub async fn remove(&self, peer_id: &str) -> Option<Arc<Session>> {
        let removed = self.sessions.write().await.remove(peer_id);
        if removed.is_some() {
            debug!("Removed session for peer {}", peer_id);
        }
        removed
    }

    pub async fn contains(&self, peer_id: &str) -> bool {
        self.sessions.read().await.contains_key(peer_id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Clone out the current sessions for iteration without holding the
    /// registry lock
    pub async fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions.read().await.values().cloned().collect()
    }
}
