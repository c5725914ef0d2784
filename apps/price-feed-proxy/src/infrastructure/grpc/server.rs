//! gRPC Streaming Server Implementation
//!
//! Bridges registry subscriptions to server-streaming `Subscribe` calls.
//! Per-subscriber forwarding runs in its own task so a slow client only
//! ever lags itself; the session keeps publishing regardless.

use std::pin::Pin;

use chrono::{DateTime, Utc};
use prost_types::Timestamp;
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::proto::pricefeed::v1::{
    self as proto, GetStatusRequest, GetStatusResponse, PriceUpdate, ProxyStatus,
    SubscribeRequest, price_feed_service_server::PriceFeedService,
};
use crate::application::services::{RegistryError, SessionRegistry, SubscriberHandle};
use crate::domain::feed::{DEFAULT_EXCHANGE, FeedKey, PriceSample};
use crate::domain::session::{SessionSnapshot, SessionState};

// =============================================================================
// Type Aliases
// =============================================================================

type StreamResult<T> = Result<Response<T>, Status>;
type BoxedStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send>>;

// =============================================================================
// Server Configuration
// =============================================================================

/// Configuration for the gRPC server.
#[derive(Debug, Clone)]
pub struct PriceFeedServerConfig {
    /// Proxy version string.
    pub version: String,
    /// Exchange used when a request leaves it blank.
    pub default_exchange: String,
    /// Outbound messages buffered per stream.
    pub client_buffer: usize,
}

impl Default for PriceFeedServerConfig {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            default_exchange: DEFAULT_EXCHANGE.to_string(),
            client_buffer: 32,
        }
    }
}

// =============================================================================
// gRPC Server
// =============================================================================

/// gRPC front end over a [`SessionRegistry`].
#[derive(Debug, Clone)]
pub struct PriceFeedServer {
    config: PriceFeedServerConfig,
    registry: SessionRegistry,
    started_at: DateTime<Utc>,
}

impl PriceFeedServer {
    /// Create a new server.
    #[must_use]
    pub fn new(config: PriceFeedServerConfig, registry: SessionRegistry) -> Self {
        Self {
            config,
            registry,
            started_at: Utc::now(),
        }
    }

    /// The registry backing this server.
    #[must_use]
    pub const fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    fn build_status(&self) -> ProxyStatus {
        let sessions: Vec<_> = self.registry.snapshot().iter().map(session_to_proto).collect();
        let subscribers: usize = self.registry.total_subscribers();

        ProxyStatus {
            version: self.config.version.clone(),
            started_at: Some(datetime_to_timestamp(self.started_at)),
            current_time: Some(datetime_to_timestamp(Utc::now())),
            subscriber_count: i32::try_from(subscribers).unwrap_or(i32::MAX),
            sessions,
        }
    }
}

#[tonic::async_trait]
impl PriceFeedService for PriceFeedServer {
    type SubscribeStream = BoxedStream<PriceUpdate>;

    async fn subscribe(
        &self,
        request: Request<SubscribeRequest>,
    ) -> StreamResult<Self::SubscribeStream> {
        let req = request.into_inner();
        let key = FeedKey::normalize(&req.exchange, &req.ticker, &self.config.default_exchange)
            .map_err(|e| Status::invalid_argument(e.to_string()))?;

        let stream_id = Uuid::new_v4();
        info!(stream = %stream_id, feed = %key, "Subscribe requested");

        let handle = self.registry.acquire(key).await.map_err(|e| {
            warn!(stream = %stream_id, error = %e, "Subscribe rejected");
            registry_error_to_status(&e)
        })?;

        let (tx, rx) = mpsc::channel(self.config.client_buffer.max(1));
        tokio::spawn(forward_samples(handle, tx, stream_id));

        Ok(Response::new(
            Box::pin(ReceiverStream::new(rx)) as Self::SubscribeStream
        ))
    }

    async fn get_status(
        &self,
        _request: Request<GetStatusRequest>,
    ) -> StreamResult<GetStatusResponse> {
        Ok(Response::new(GetStatusResponse {
            status: Some(self.build_status()),
        }))
    }
}

/// Forward samples from `handle` to one client until either side ends.
///
/// The handle is released exactly once on every exit path.
async fn forward_samples(
    mut handle: SubscriberHandle,
    tx: mpsc::Sender<Result<PriceUpdate, Status>>,
    stream_id: Uuid,
) {
    let mut forwarded: u64 = 0;

    loop {
        tokio::select! {
            () = tx.closed() => {
                debug!(stream = %stream_id, "Client disconnected");
                break;
            }
            sample = handle.recv() => {
                let Some(sample) = sample else {
                    let _ = tx
                        .send(Err(Status::unavailable("price feed session ended")))
                        .await;
                    break;
                };
                if tx.send(Ok(sample_to_proto(sample))).await.is_err() {
                    break;
                }
                forwarded += 1;
            }
        }
    }

    handle.release();
    info!(stream = %stream_id, feed = %handle.key(), forwarded, "Subscription stream closed");
}

// =============================================================================
// Conversions
// =============================================================================

fn registry_error_to_status(err: &RegistryError) -> Status {
    match err {
        RegistryError::SourceUnavailable { .. } => Status::unavailable(err.to_string()),
        RegistryError::ShuttingDown => Status::unavailable("server is shutting down"),
    }
}

fn sample_to_proto(sample: PriceSample) -> PriceUpdate {
    PriceUpdate {
        ticker: sample.ticker,
        exchange: sample.exchange,
        price: sample.price,
        observed_at_ms: sample.observed_at_ms,
    }
}

fn session_to_proto(snapshot: &SessionSnapshot) -> proto::SessionStatus {
    proto::SessionStatus {
        exchange: snapshot.key.exchange().to_string(),
        ticker: snapshot.key.ticker().to_string(),
        state: state_to_proto(snapshot.state) as i32,
        subscriber_count: i32::try_from(snapshot.subscriber_count).unwrap_or(i32::MAX),
        samples_published: i64::try_from(snapshot.samples_published).unwrap_or(i64::MAX),
        poll_failures: i64::try_from(snapshot.poll_failures).unwrap_or(i64::MAX),
        last_price: snapshot.last_sample.as_ref().map(|s| s.price),
        last_observed_at_ms: snapshot.last_sample.as_ref().map(|s| s.observed_at_ms),
        started_at: Some(datetime_to_timestamp(snapshot.started_at)),
    }
}

const fn state_to_proto(state: SessionState) -> proto::SessionState {
    match state {
        SessionState::Starting => proto::SessionState::Starting,
        SessionState::Running => proto::SessionState::Running,
        SessionState::Stopping => proto::SessionState::Stopping,
        SessionState::Stopped => proto::SessionState::Stopped,
    }
}

fn datetime_to_timestamp(dt: DateTime<Utc>) -> Timestamp {
    Timestamp {
        seconds: dt.timestamp(),
        nanos: i32::try_from(dt.timestamp_subsec_nanos()).unwrap_or(i32::MAX),
    }
}

// =============================================================================
// Tests
// =============================================================================
