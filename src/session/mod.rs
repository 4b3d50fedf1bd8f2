//! Per-peer sessions and the registry that owns them.
//!
//! One [`Session`] exists per remote peer; the [`SessionRegistry`]
//! enforces that uniqueness and hands out shared references.

pub mod registry;
#[allow(clippy::module_inception)]
pub mod session;

pub use registry::{SessionEntry, SessionRegistry};
pub use session::{Session, SessionState};
