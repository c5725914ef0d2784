//! Application Layer - Price source ports and the session multiplexer.
//!
//! This layer owns every moving part: session poll tasks, the fan-out
//! point, and the registry that reference-counts sessions per feed key.

/// Port interfaces for upstream price sources.
pub mod ports;

/// Session, registry and broadcast services.
pub mod services;
