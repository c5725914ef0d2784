//! gRPC Subscription Adapter
//!
//! Implements the `PriceFeedService` gRPC service. Each `Subscribe` call:
//!
//! 1. Normalizes the requested `(exchange, ticker)` into a feed key
//! 2. Acquires a subscriber handle from the session registry
//! 3. Forwards samples to the client from a dedicated task
//! 4. Releases the handle when the client goes away or the session ends

pub mod server;

// Allow clippy warnings and missing docs in generated code
#[allow(
    missing_docs,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::unwrap_used,
    clippy::expect_used
)]
pub mod proto {
    pub mod pricefeed {
        pub mod v1 {
            include!(concat!(env!("OUT_DIR"), "/pricefeed.v1.rs"));
        }
    }
}

pub use server::{PriceFeedServer, PriceFeedServerConfig};
