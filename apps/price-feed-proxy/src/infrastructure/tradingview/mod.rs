//! TradingView Symbol Page Source
//!
//! [`PriceSource`](crate::application::ports::PriceSource) adapter that
//! reads the last price from public symbol pages at
//! `{base_url}/symbols/{TICKER}/?exchange={EXCHANGE}`.

mod client;
pub mod parser;

pub use client::{TradingViewPage, TradingViewSource};
