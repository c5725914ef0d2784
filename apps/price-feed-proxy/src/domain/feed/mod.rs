//! Feed Identity and Price Samples
//!
//! A feed is identified by a normalized `(exchange, ticker)` pair. Two
//! requests that differ only in case or surrounding whitespace resolve to
//! the same [`FeedKey`] and therefore to the same session.

use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};

// =============================================================================
// Constants
// =============================================================================

/// Exchange used when a subscribe request leaves it blank.
pub const DEFAULT_EXCHANGE: &str = "BINANCE";

// =============================================================================
// Errors
// =============================================================================

/// Reasons a subscribe request cannot be turned into a [`FeedKey`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    /// Ticker was empty after trimming.
    #[error("ticker must not be empty")]
    EmptyTicker,

    /// Exchange and the configured default were both empty.
    #[error("exchange must not be empty")]
    EmptyExchange,

    /// A character outside `[A-Z0-9._!-]` was supplied.
    #[error("invalid character {ch:?} in {field}")]
    InvalidCharacter {
        /// Which part of the key was rejected.
        field: &'static str,
        /// The offending character.
        ch: char,
    },
}

// =============================================================================
// Feed Key
// =============================================================================

/// Normalized identity of a price feed.
///
/// Both parts are trimmed and uppercased on construction, so the derived
/// `Eq` and `Hash` are case- and whitespace-insensitive with respect to the
/// raw request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeedKey {
    exchange: String,
    ticker: String,
}

impl FeedKey {
    /// Normalize a raw `(exchange, ticker)` pair.
    ///
    /// A blank `exchange` falls back to `default_exchange`.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError`] if the ticker is blank, no exchange can be
    /// resolved, or either part contains characters that cannot appear in
    /// a symbol.
    pub fn normalize(exchange: &str, ticker: &str, default_exchange: &str) -> Result<Self, KeyError> {
        let ticker = ticker.trim().to_uppercase();
        if ticker.is_empty() {
            return Err(KeyError::EmptyTicker);
        }

        let exchange = match exchange.trim() {
            "" => default_exchange.trim().to_uppercase(),
            raw => raw.to_uppercase(),
        };
        if exchange.is_empty() {
            return Err(KeyError::EmptyExchange);
        }

        check_symbol_chars("exchange", &exchange)?;
        check_symbol_chars("ticker", &ticker)?;

        Ok(Self { exchange, ticker })
    }

    /// Normalized exchange, e.g. `BINANCE`.
    #[must_use]
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Normalized ticker, e.g. `BTCUSD`.
    #[must_use]
    pub fn ticker(&self) -> &str {
        &self.ticker
    }
}

impl fmt::Display for FeedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.exchange, self.ticker)
    }
}

fn check_symbol_chars(field: &'static str, value: &str) -> Result<(), KeyError> {
    match value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '!')))
    {
        Some(ch) => Err(KeyError::InvalidCharacter { field, ch }),
        None => Ok(()),
    }
}

// =============================================================================
// Price Sample
// =============================================================================

/// One price observation. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSample {
    /// Normalized ticker.
    pub ticker: String,
    /// Normalized exchange.
    pub exchange: String,
    /// Observed last price.
    pub price: f64,
    /// Unix epoch milliseconds at which the price was read.
    pub observed_at_ms: i64,
}

impl PriceSample {
    /// Create a sample for `key` with an explicit timestamp.
    #[must_use]
    pub fn new(key: &FeedKey, price: f64, observed_at_ms: i64) -> Self {
        Self {
            ticker: key.ticker.clone(),
            exchange: key.exchange.clone(),
            price,
            observed_at_ms,
        }
    }

    /// Create a sample for `key` stamped with the current wall clock.
    #[must_use]
    pub fn observed_now(key: &FeedKey, price: f64) -> Self {
        Self::new(key, price, Utc::now().timestamp_millis())
    }
}

// =============================================================================
// Tests
// =============================================================================
