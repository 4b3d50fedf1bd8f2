//! Room client configuration.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// TURN server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (e.g. "turn:turn.example.com:3478")
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// Configuration for one room participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomConfig {
    /// Relay endpoint URL (ws:// or wss://)
    pub relay_url: String,

    /// Identity within the room. Uniqueness is enforced by the room.
    pub username: String,

    /// Room to join
    pub room: String,

    /// STUN servers for ICE gathering
    pub stun_servers: Vec<String>,

    /// TURN servers with optional credentials
    pub turn_servers: Vec<TurnServerConfig>,

    /// Lower bound of the jittered delay applied before calling a newly
    /// seen peer, in milliseconds
    pub call_delay_min_ms: u64,

    /// Upper bound of the jittered call delay, in milliseconds
    pub call_delay_max_ms: u64,

    /// How long a degraded session waits for transport recovery before it
    /// is torn down, in milliseconds
    pub grace_period_ms: u64,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://127.0.0.1:8080/ws".to_string(),
            username: "anonymous".to_string(),
            room: "general".to_string(),
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            turn_servers: Vec::new(),
            call_delay_min_ms: 500,
            call_delay_max_ms: 2500,
            grace_period_ms: 10_000,
        }
    }
}

impl RoomConfig {
    /// Create a configuration for the given relay and identity
    pub fn new(relay_url: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            relay_url: relay_url.into(),
            username: username.into(),
            ..Default::default()
        }
    }

    /// Set the room to join
    pub fn with_room(mut self, room: impl Into<String>) -> Self {
        self.room = room.into();
        self
    }

    /// Add a STUN server
    pub fn with_stun_server(mut self, url: impl Into<String>) -> Self {
        self.stun_servers.push(url.into());
        self
    }

    /// Add a TURN server with credentials
    pub fn with_turn_server(
        mut self,
        url: impl Into<String>,
        username: Option<String>,
        credential: Option<String>,
    ) -> Self {
        self.turn_servers.push(TurnServerConfig {
            url: url.into(),
            username,
            credential,
        });
        self
    }

    /// Set the jittered call delay window
    pub fn with_call_delay_window(mut self, min: Duration, max: Duration) -> Self {
        self.call_delay_min_ms = min.as_millis() as u64;
        self.call_delay_max_ms = max.as_millis() as u64;
        self
    }

    /// Set the degraded-session recovery grace period
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period_ms = grace.as_millis() as u64;
        self
    }

    /// The jittered call delay window as durations
    pub fn call_delay_window(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.call_delay_min_ms),
            Duration::from_millis(self.call_delay_max_ms),
        )
    }

    /// The degraded-session recovery grace period as a duration
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !self.relay_url.starts_with("ws://") && !self.relay_url.starts_with("wss://") {
            return Err(Error::InvalidConfig(format!(
                "relay_url must start with ws:// or wss://, got: {}",
                self.relay_url
            )));
        }

        if self.username.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "username must not be empty".to_string(),
            ));
        }

        if self.room.trim().is_empty() {
            return Err(Error::InvalidConfig("room must not be empty".to_string()));
        }

        if self.stun_servers.is_empty() {
            return Err(Error::InvalidConfig(
                "at least one STUN server is required".to_string(),
            ));
        }

        for url in &self.stun_servers {
            if !url.starts_with("stun:") {
                return Err(Error::InvalidConfig(format!(
                    "STUN server URL must start with stun:, got: {}",
                    url
                )));
            }
        }

        for turn in &self.turn_servers {
            if !turn.url.starts_with("turn:") && !turn.url.starts_with("turns:") {
                return Err(Error::InvalidConfig(format!(
                    "TURN server URL must start with turn: or turns:, got: {}",
                    turn.url
                )));
            }
        }

        if self.call_delay_min_ms > self.call_delay_max_ms {
            return Err(Error::InvalidConfig(format!(
                "call delay window is inverted: {} > {}",
                self.call_delay_min_ms, self.call_delay_max_ms
            )));
        }

        Ok(())
    }
}
