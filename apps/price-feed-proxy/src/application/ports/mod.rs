//! Port Interfaces
//!
//! Contracts that upstream price-source adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - [`PriceSource`]: acquires a per-feed resource (a "page")
//! - [`PricePage`]: reads one price from an acquired resource
//!
//! A session opens exactly one page, owns it exclusively, polls it from a
//! single task and closes it on stop.

use async_trait::async_trait;

use crate::domain::feed::FeedKey;

// =============================================================================
// Errors
// =============================================================================

/// Errors reported by a price source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// The per-feed resource could not be acquired at all.
    #[error("source unavailable: {0}")]
    Unavailable(String),

    /// A single read failed; the next one may succeed.
    #[error("transient source error: {0}")]
    Transient(String),

    /// A value was read but is not a usable price.
    #[error("malformed sample: {0:?}")]
    MalformedSample(String),
}

impl SourceError {
    /// Whether this error ends a session start attempt.
    ///
    /// Only [`SourceError::Unavailable`] is fatal. Read failures of either
    /// other kind are counted and the poll loop carries on.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    /// Short label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "unavailable",
            Self::Transient(_) => "transient",
            Self::MalformedSample(_) => "malformed",
        }
    }
}

// =============================================================================
// Ports
// =============================================================================

/// Factory for per-feed upstream resources.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Acquire the upstream resource for `key`. May take seconds.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Unavailable`] if the resource cannot be
    /// created, e.g. navigation failed outright.
    async fn open(&self, key: &FeedKey) -> Result<Box<dyn PricePage>, SourceError>;
}

/// An acquired upstream resource for one feed.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PricePage: Send {
    /// Read the current price once.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Transient`] or [`SourceError::MalformedSample`]
    /// when this read produced no price.
    async fn read_price(&mut self) -> Result<f64, SourceError>;

    /// Release the resource. Called once, after the last read.
    ///
    /// # Errors
    ///
    /// Any error is logged by the caller and otherwise ignored.
    async fn close(&mut self) -> Result<(), SourceError>;
}
