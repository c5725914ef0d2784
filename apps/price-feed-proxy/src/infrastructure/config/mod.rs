//! Configuration Module
//!
//! Environment-driven configuration for the price feed proxy.

mod settings;

pub use settings::{
    ConfigError, FeedConfig, ServerSettings, SessionSettings, SourceSettings,
};
