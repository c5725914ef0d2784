//! Domain Layer - Feed identity, price samples and session lifecycle types.
//!
//! Pure data types with no runtime dependencies. Everything that moves
//! (tasks, channels, locks) lives in the application layer.

/// Feed keys and price samples.
pub mod feed;

/// Session identity, lifecycle states and status snapshots.
pub mod session;
