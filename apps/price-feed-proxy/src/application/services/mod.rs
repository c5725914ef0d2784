//! Application Services
//!
//! - [`broadcast`]: per-session fan-out point with drop-oldest semantics
//! - [`session`]: one poll loop over one upstream page
//! - [`registry`]: reference-counted map from feed key to session

/// Per-session sample fan-out.
pub mod broadcast;

/// Registry of live sessions keyed by feed.
pub mod registry;

/// Single-feed poll session.
pub mod session;

pub use broadcast::{BroadcastPoint, BroadcastStats};
pub use registry::{RegistryConfig, RegistryError, SessionRegistry, SubscriberHandle};
pub use session::Session;
