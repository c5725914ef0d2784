#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Price Feed Proxy - Quote Session Multiplexer
//!
//! A gRPC service that keeps at most one polling session per
//! `(exchange, ticker)` pair and fans its price samples out to every
//! client subscribed to that pair.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Feed identity and session data types
//!   - `feed`: Key normalization and price samples
//!   - `session`: Session ids, lifecycle states and snapshots
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Interfaces for upstream price sources
//!   - `services`: Sessions, the session registry and the fan-out point
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `tradingview`: Symbol page source and price extraction
//!   - `grpc`: Server-streaming subscription adapter
//!   - `config`: Environment configuration
//!   - `health`: Health, readiness and metrics HTTP endpoints
//!   - `metrics`, `telemetry`: Prometheus metrics and tracing setup
//!
//! # Data Flow
//!
//! ```text
//!                 ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! Symbol page ◄───│   Session   │────►│  Broadcast  │────►│    gRPC     │──► Client 1
//!   (poll)        │ (one / key) │     │    Point    │     │   Stream    │──► Client 2
//!                 └─────────────┘     └─────────────┘     └─────────────┘──► Client N
//!                        ▲
//!                        │ acquire / release
//!                 ┌─────────────┐
//!                 │  Registry   │
//!                 └─────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Feed and session types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::feed::{DEFAULT_EXCHANGE, FeedKey, KeyError, PriceSample};
pub use domain::session::{SessionId, SessionSnapshot, SessionState};

// Ports
pub use application::ports::{PricePage, PriceSource, SourceError};

// Services
pub use application::services::{
    BroadcastPoint, BroadcastStats, RegistryConfig, RegistryError, Session, SessionRegistry,
    SubscriberHandle,
};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, FeedConfig, ServerSettings, SessionSettings, SourceSettings,
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// gRPC server (for integration tests)
pub use infrastructure::grpc::{
    PriceFeedServer, PriceFeedServerConfig, proto::pricefeed::v1 as proto,
};

// Price source adapter
pub use infrastructure::tradingview::{TradingViewPage, TradingViewSource};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
