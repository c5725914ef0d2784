//! Price Feed Proxy Binary
//!
//! Starts the price feed proxy.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin price-feed-proxy
//! ```
//!
//! # Environment Variables
//!
//! - `PRICE_FEED_GRPC_PORT`: gRPC server port (default: 4000)
//! - `PRICE_FEED_HEALTH_PORT`: Health check HTTP port (default: 8083)
//! - `PRICE_FEED_POLL_INTERVAL_MS`: Pause between reads of one feed (default: 5000)
//! - `PRICE_FEED_DEFAULT_EXCHANGE`: Exchange for requests that omit it (default: BINANCE)
//! - `PRICE_FEED_BROADCAST_CAPACITY`: Samples retained per session (default: 64)
//! - `PRICE_FEED_CLIENT_BUFFER`: Messages buffered per gRPC stream (default: 32)
//! - `PRICE_FEED_SOURCE_BASE_URL`: Symbol page origin (default: <https://www.tradingview.com>)
//! - `PRICE_FEED_SOURCE_TIMEOUT_SECS`: Page request timeout (default: 15)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: price-feed-proxy)
//! - `RUST_LOG`: Log filter (default: info)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use price_feed_proxy::infrastructure::grpc::proto::pricefeed::v1::price_feed_service_server::PriceFeedServiceServer;
use price_feed_proxy::infrastructure::health::{HealthServer, HealthServerState};
use price_feed_proxy::infrastructure::telemetry;
use price_feed_proxy::{
    FeedConfig, PriceFeedServer, PriceFeedServerConfig, SessionRegistry, TradingViewSource,
    init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;

/// Upper bound on waiting for sessions and servers to wind down.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| "failed to install rustls crypto provider")?;

    load_dotenv();

    let _telemetry_guard = telemetry::init()?;

    tracing::info!("Starting Price Feed Proxy");

    let _metrics_handle = init_metrics()?;

    let config = FeedConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let source = Arc::new(TradingViewSource::new(&config.source)?);
    let registry = SessionRegistry::new(source, config.session.registry_config());

    let grpc_server = PriceFeedServer::new(
        PriceFeedServerConfig {
            version: env!("CARGO_PKG_VERSION").to_string(),
            default_exchange: config.session.default_exchange.clone(),
            client_buffer: config.session.client_buffer,
        },
        registry.clone(),
    );

    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        registry.clone(),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );

    let health_task = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    let grpc_addr = SocketAddr::from(([0, 0, 0, 0], config.server.grpc_port));
    let grpc_shutdown = shutdown_token.clone();
    let grpc_task = tokio::spawn(async move {
        tracing::info!(addr = %grpc_addr, "gRPC server listening");
        if let Err(e) = Server::builder()
            .add_service(PriceFeedServiceServer::new(grpc_server))
            .serve_with_shutdown(grpc_addr, grpc_shutdown.cancelled())
            .await
        {
            tracing::error!(error = %e, "gRPC server error");
        }
        tracing::info!("gRPC server stopped");
    });

    tracing::info!("Price feed proxy ready");

    let signal = await_shutdown_signal().await?;
    tracing::info!(
        signal,
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );

    shutdown_token.cancel();

    let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
        registry.shutdown().await;
        let _ = tokio::join!(grpc_task, health_task);
    })
    .await;
    if drained.is_err() {
        tracing::warn!("Shutdown timed out with sessions still closing");
    }

    tracing::info!("Price feed proxy stopped");
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        for dir in cwd.ancestors().skip(1) {
            let env_path = dir.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &FeedConfig) {
    tracing::info!(
        grpc_port = config.server.grpc_port,
        health_port = config.server.health_port,
        poll_interval_ms = u64::try_from(config.session.poll_interval.as_millis()).unwrap_or(u64::MAX),
        default_exchange = %config.session.default_exchange,
        broadcast_capacity = config.session.broadcast_capacity,
        client_buffer = config.session.client_buffer,
        "Configuration loaded"
    );
    tracing::debug!(
        base_url = %config.source.base_url,
        timeout_secs = config.source.request_timeout.as_secs(),
        "Price source"
    );
}

/// Wait for SIGINT or SIGTERM and return its name.
async fn await_shutdown_signal() -> std::io::Result<&'static str> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = signal::ctrl_c() => result.map(|()| "SIGINT"),
            _ = terminate.recv() => Ok("SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await.map(|()| "Ctrl+C")
    }
}
