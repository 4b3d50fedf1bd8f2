//! Relay connection adapters.
//!
//! The engine itself is transport-agnostic; this module carries the
//! websocket adapter that moves envelopes between a [`crate::room::RoomClient`]
//! and the signaling relay.

pub mod ws;

pub use ws::RelayClient;
