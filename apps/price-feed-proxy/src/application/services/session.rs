//! Single-Feed Poll Session
//!
//! A [`Session`] owns one upstream page for one [`FeedKey`], polls it from a
//! dedicated task and publishes every successful read to its
//! [`BroadcastPoint`].
//!
//! # Lifecycle
//!
//! 1. [`Session::new`] creates the session in `Starting`
//! 2. [`Session::start`] opens the page and spawns the poll loop (`Running`)
//! 3. [`Session::stop`] moves it to `Stopping` and signals the loop
//! 4. The loop finishes its current read, closes the page and ends in
//!    `Stopped`
//!
//! Reads are never interrupted. Cancellation is observed between reads and
//! during the inter-poll sleep.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::broadcast::BroadcastPoint;
use crate::application::ports::{PricePage, PriceSource, SourceError};
use crate::domain::feed::{FeedKey, PriceSample};
use crate::domain::session::{SessionId, SessionSnapshot, SessionState};
use crate::infrastructure::metrics;

/// Live poll process for a single feed key.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    key: FeedKey,
    poll_interval: Duration,
    state: RwLock<SessionState>,
    broadcast: BroadcastPoint,
    cancel: CancellationToken,
    finished: CancellationToken,
    poll_failures: AtomicU64,
    last_sample: RwLock<Option<PriceSample>>,
    started_at: DateTime<Utc>,
}

impl Session {
    /// Create a session in `Starting`.
    #[must_use]
    pub fn new(
        id: SessionId,
        key: FeedKey,
        poll_interval: Duration,
        broadcast_capacity: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            key,
            poll_interval,
            state: RwLock::new(SessionState::Starting),
            broadcast: BroadcastPoint::new(broadcast_capacity),
            cancel: CancellationToken::new(),
            finished: CancellationToken::new(),
            poll_failures: AtomicU64::new(0),
            last_sample: RwLock::new(None),
            started_at: Utc::now(),
        })
    }

    /// Session identifier.
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// Feed this session polls.
    #[must_use]
    pub const fn key(&self) -> &FeedKey {
        &self.key
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Get a receiver for samples published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PriceSample> {
        self.broadcast.subscribe()
    }

    /// Open the upstream page and spawn the poll loop.
    ///
    /// Suspends until the page is open or the attempt fails. If
    /// [`stop`](Self::stop) was called while the page was opening, the page
    /// is closed straight away and the session ends without polling.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Unavailable`] if the page cannot be opened.
    /// The session is `Stopped` afterwards.
    pub async fn start(self: &Arc<Self>, source: &dyn PriceSource) -> Result<(), SourceError> {
        debug!(session = %self.id, feed = %self.key, "Opening upstream page");

        let mut page = match source.open(&self.key).await {
            Ok(page) => page,
            Err(err) => {
                let err = if err.is_fatal() {
                    err
                } else {
                    SourceError::Unavailable(err.to_string())
                };
                warn!(session = %self.id, feed = %self.key, error = %err, "Session failed to start");
                self.finish();
                return Err(err);
            }
        };

        if self.transition(SessionState::Starting, SessionState::Running) {
            info!(
                session = %self.id,
                feed = %self.key,
                interval = ?self.poll_interval,
                "Session running"
            );
            tokio::spawn(Arc::clone(self).run(page));
        } else {
            debug!(session = %self.id, feed = %self.key, "Stopped while starting");
            self.close_page(page.as_mut()).await;
            self.finish();
        }

        Ok(())
    }

    /// Request the poll loop to stop. Idempotent and non-blocking.
    ///
    /// Returns `true` if this call initiated the stop.
    pub fn stop(&self) -> bool {
        {
            let mut state = self.state.write();
            if !state.is_live() {
                return false;
            }
            *state = SessionState::Stopping;
        }
        self.cancel.cancel();
        debug!(session = %self.id, feed = %self.key, "Session stopping");
        true
    }

    /// Wait until the session reaches `Stopped`.
    pub async fn stopped(&self) {
        self.finished.cancelled().await;
    }

    /// Whether the session has reached `Stopped`.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.finished.is_cancelled()
    }

    /// Number of failed reads since start.
    #[must_use]
    pub fn poll_failures(&self) -> u64 {
        self.poll_failures.load(Ordering::Relaxed)
    }

    /// Point-in-time view, with the registry-owned subscriber count.
    #[must_use]
    pub fn snapshot(&self, subscriber_count: usize) -> SessionSnapshot {
        let stats = self.broadcast.stats();
        SessionSnapshot {
            id: self.id,
            key: self.key.clone(),
            state: self.state(),
            subscriber_count,
            samples_published: stats.published,
            samples_unobserved: stats.unobserved,
            receivers: stats.receivers,
            poll_failures: self.poll_failures(),
            last_sample: self.last_sample.read().clone(),
            started_at: self.started_at,
        }
    }

    // =========================================================================
    // Poll Loop
    // =========================================================================

    async fn run(self: Arc<Self>, mut page: Box<dyn PricePage>) {
        while !self.cancel.is_cancelled() {
            self.poll_once(page.as_mut()).await;

            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        self.close_page(page.as_mut()).await;
        self.finish();
    }

    async fn poll_once(&self, page: &mut dyn PricePage) {
        let started = Instant::now();
        let result = page.read_price().await;
        metrics::record_poll_duration(started.elapsed());

        match result {
            Ok(price) if price.is_finite() => self.publish(price),
            Ok(price) => self.record_failure(&SourceError::MalformedSample(price.to_string())),
            Err(err) => self.record_failure(&err),
        }
    }

    fn publish(&self, price: f64) {
        let sample = PriceSample::observed_now(&self.key, price);
        *self.last_sample.write() = Some(sample.clone());
        metrics::record_sample_published(&self.key.to_string());

        let receivers = self.broadcast.publish(sample).unwrap_or(0);
        debug!(session = %self.id, feed = %self.key, price, receivers, "Published sample");
    }

    fn record_failure(&self, err: &SourceError) {
        let failures = self.poll_failures.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::record_poll_failure(err.kind());
        warn!(
            session = %self.id,
            feed = %self.key,
            error = %err,
            failures,
            "Price read failed, retrying after interval"
        );
    }

    async fn close_page(&self, page: &mut dyn PricePage) {
        if let Err(err) = page.close().await {
            warn!(session = %self.id, feed = %self.key, error = %err, "Failed to close upstream page");
        }
    }

    fn transition(&self, from: SessionState, to: SessionState) -> bool {
        let mut state = self.state.write();
        if *state == from {
            *state = to;
            true
        } else {
            false
        }
    }

    fn finish(&self) {
        *self.state.write() = SessionState::Stopped;
        self.finished.cancel();
        info!(session = %self.id, feed = %self.key, "Session stopped");
    }
}

// =============================================================================
// Tests
// =============================================================================
