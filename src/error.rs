//! Error types for the roomcast negotiation engine and its adapters.

use thiserror::Error;

/// Result type alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the negotiation engine, the media transport and the
/// relay adapter.
///
/// Stale signaling messages (an answer with no matching offering session, a
/// candidate for a session that was already torn down) are deliberately not
/// represented here: they are expected race outcomes and are logged and
/// discarded instead of being returned as errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration was rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Offer/answer construction failed or a remote description was rejected.
    /// The affected session is closed and not retried.
    #[error("Negotiation with {peer} failed: {reason}")]
    Negotiation { peer: String, reason: String },

    /// The injected media transport reported a failure
    #[error("Media transport error: {0}")]
    Transport(String),

    /// Relay adapter failure (connect, read, write)
    #[error("Relay error: {0}")]
    Relay(String),

    /// Envelope encode/decode failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The consumer side of an internal queue has gone away
    #[error("Channel closed: {0}")]
    ChannelClosed(String),
}

impl Error {
    /// Build a negotiation error naming the affected peer
    pub fn negotiation(peer: impl Into<String>, reason: impl ToString) -> Self {
        Self::Negotiation {
            peer: peer.into(),
            reason: reason.to_string(),
        }
    }

    /// True when the error came out of an offer/answer exchange
    pub fn is_negotiation(&self) -> bool {
        matches!(self, Error::Negotiation { .. })
    }

    /// True when the error is a configuration problem the caller must fix
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }

    /// The peer identity this error concerns, when it concerns exactly one
    pub fn peer(&self) -> Option<&str> {
        match self {
            Error::Negotiation { peer, .. } => Some(peer),
            _ => None,
        }
    }
}
