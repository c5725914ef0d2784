//! Session Registry (Multiplexer)
//!
//! Maps each [`FeedKey`] to at most one [`Session`] and reference-counts
//! the subscribers sharing it.
//!
//! # Rules
//!
//! - The first [`acquire`](SessionRegistry::acquire) for a key creates a
//!   session and starts it; concurrent callers for the same key join that
//!   session and wait for the same start outcome.
//! - A failed start removes the entry before any waiter is woken, so every
//!   waiter sees the failure and a retry creates a fresh session.
//! - Releasing the last handle removes the entry under the lock, then
//!   signals the old session to stop. A later acquire never joins a dying
//!   session.
//!
//! All map mutation happens under one `parking_lot::Mutex`. The lock is
//! never held across an await.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use super::broadcast::DEFAULT_CAPACITY;
use super::session::Session;
use crate::application::ports::{PriceSource, SourceError};
use crate::domain::feed::{FeedKey, PriceSample};
use crate::domain::session::{SessionId, SessionSnapshot};
use crate::infrastructure::metrics::{self, StartOutcome};

// =============================================================================
// Configuration and Errors
// =============================================================================

/// Settings applied to every session the registry creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Pause between the end of one read and the start of the next.
    pub poll_interval: Duration,
    /// Samples retained per session for slow subscribers.
    pub broadcast_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(5000),
            broadcast_capacity: DEFAULT_CAPACITY,
        }
    }
}

/// Errors returned by [`SessionRegistry::acquire`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    /// The upstream page for a new session could not be opened.
    #[error("price source unavailable for {key}: {source}")]
    SourceUnavailable {
        /// Feed that failed to start.
        key: FeedKey,
        /// Underlying source failure.
        source: SourceError,
    },

    /// The registry no longer accepts subscribers.
    #[error("registry is shutting down")]
    ShuttingDown,
}

// =============================================================================
// Registry
// =============================================================================

type StartOutcomeRx = watch::Receiver<Option<Result<(), SourceError>>>;

struct Slot {
    session: Arc<Session>,
    subscribers: usize,
    ready: StartOutcomeRx,
}

struct RegistryInner {
    source: Arc<dyn PriceSource>,
    config: RegistryConfig,
    slots: Mutex<HashMap<FeedKey, Slot>>,
    next_id: AtomicU64,
    shutting_down: AtomicBool,
}

/// Reference-counted map from feed key to live session.
///
/// Cheap to clone; clones share the same map.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("config", &self.inner.config)
            .field("sessions", &self.session_count())
            .finish_non_exhaustive()
    }
}

impl SessionRegistry {
    /// Create an empty registry backed by `source`.
    #[must_use]
    pub fn new(source: Arc<dyn PriceSource>, config: RegistryConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                source,
                config,
                slots: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    /// Subscribe to `key`, creating and starting a session if none exists.
    ///
    /// Suspends while a new session opens its upstream page. Dropping the
    /// returned future before it resolves releases the claim it took.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::SourceUnavailable`] if the session could not start;
    ///   no entry is left behind
    /// - [`RegistryError::ShuttingDown`] after [`shutdown`](Self::shutdown)
    pub async fn acquire(&self, key: FeedKey) -> Result<SubscriberHandle, RegistryError> {
        let (handle, mut ready) = {
            let mut slots = self.inner.slots.lock();
            if self.inner.shutting_down.load(Ordering::Acquire) {
                return Err(RegistryError::ShuttingDown);
            }

            let slot = match slots.entry(key.clone()) {
                Entry::Occupied(entry) => {
                    debug!(feed = %key, session = %entry.get().session.id(), "Joining session");
                    entry.into_mut()
                }
                Entry::Vacant(entry) => entry.insert(self.spawn_session(key.clone())),
            };
            slot.subscribers += 1;

            let handle = SubscriberHandle {
                registry: self.clone(),
                receiver: slot.session.subscribe(),
                session: Arc::clone(&slot.session),
                released: false,
            };
            let ready = slot.ready.clone();
            publish_gauges(&slots);
            (handle, ready)
        };

        let outcome = match ready.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => Some(Err(SourceError::Unavailable("session start aborted".into()))),
        };

        match outcome {
            Some(Err(source)) => Err(RegistryError::SourceUnavailable { key, source }),
            _ => {
                debug!(feed = %key, session = %handle.session_id(), "Subscriber attached");
                Ok(handle)
            }
        }
    }

    /// Release `handle`. Idempotent.
    ///
    /// Returns `true` if this call released the claim.
    pub fn release(&self, handle: &mut SubscriberHandle) -> bool {
        handle.release()
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.inner.slots.lock().len()
    }

    /// Unreleased handles for `key`, or 0 if no session is registered.
    #[must_use]
    pub fn subscriber_count(&self, key: &FeedKey) -> usize {
        self.inner
            .slots
            .lock()
            .get(key)
            .map_or(0, |slot| slot.subscribers)
    }

    /// Unreleased handles across all sessions.
    #[must_use]
    pub fn total_subscribers(&self) -> usize {
        self.inner.slots.lock().values().map(|slot| slot.subscribers).sum()
    }

    /// Whether a session is registered for `key`.
    #[must_use]
    pub fn contains(&self, key: &FeedKey) -> bool {
        self.inner.slots.lock().contains_key(key)
    }

    /// Snapshot every registered session, ordered by key.
    #[must_use]
    pub fn snapshot(&self) -> Vec<SessionSnapshot> {
        let mut snapshots: Vec<_> = self
            .inner
            .slots
            .lock()
            .values()
            .map(|slot| slot.session.snapshot(slot.subscribers))
            .collect();
        snapshots.sort_by(|a, b| a.key.cmp(&b.key));
        snapshots
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::Acquire)
    }

    /// Stop accepting subscribers, stop every session and wait for all of
    /// them to close their pages.
    ///
    /// Outstanding handles stay valid; their `recv` returns `None` and their
    /// release becomes a no-op.
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<Session>> = {
            let mut slots = self.inner.slots.lock();
            self.inner.shutting_down.store(true, Ordering::Release);
            let drained: Vec<_> = slots.drain().map(|(_, slot)| slot.session).collect();
            publish_gauges(&slots);
            drained
        };

        info!(sessions = sessions.len(), "Stopping all sessions");
        for session in &sessions {
            session.stop();
        }
        join_all(sessions.iter().map(|session| session.stopped())).await;
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn spawn_session(&self, key: FeedKey) -> Slot {
        let id = SessionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let session = Session::new(
            id,
            key,
            self.inner.config.poll_interval,
            self.inner.config.broadcast_capacity,
        );
        let (outcome_tx, ready) = watch::channel(None);

        info!(feed = %session.key(), session = %id, "Creating session");

        let registry = self.clone();
        let starting = Arc::clone(&session);
        tokio::spawn(async move {
            let result = starting.start(registry.inner.source.as_ref()).await;
            match &result {
                Ok(()) => metrics::record_session_start(StartOutcome::Started),
                Err(_) => {
                    metrics::record_session_start(StartOutcome::Unavailable);
                    registry.remove_failed(starting.key(), starting.id());
                }
            }
            outcome_tx.send_replace(Some(result));
        });

        Slot {
            session,
            subscribers: 0,
            ready,
        }
    }

    fn remove_failed(&self, key: &FeedKey, id: SessionId) {
        let mut slots = self.inner.slots.lock();
        if slots.get(key).is_some_and(|slot| slot.session.id() == id) {
            slots.remove(key);
            publish_gauges(&slots);
        }
    }

    fn release_slot(&self, key: &FeedKey, id: SessionId) {
        let retired = {
            let mut slots = self.inner.slots.lock();
            let Some(slot) = slots.get_mut(key) else {
                return;
            };
            if slot.session.id() != id {
                return;
            }

            slot.subscribers = slot.subscribers.saturating_sub(1);
            let retired = if slot.subscribers == 0 {
                slots.remove(key).map(|slot| slot.session)
            } else {
                None
            };
            publish_gauges(&slots);
            retired
        };

        if let Some(session) = retired {
            info!(feed = %key, session = %id, "Last subscriber left, stopping session");
            session.stop();
        }
    }
}

fn publish_gauges(slots: &HashMap<FeedKey, Slot>) {
    let subscribers = slots.values().map(|slot| slot.subscribers).sum();
    metrics::set_registry_gauges(slots.len(), subscribers);
}

// =============================================================================
// Subscriber Handle
// =============================================================================

/// One subscriber's claim on a session.
///
/// Yields the session's samples in publish order. Released exactly once,
/// either explicitly or on drop.
pub struct SubscriberHandle {
    registry: SessionRegistry,
    session: Arc<Session>,
    receiver: broadcast::Receiver<PriceSample>,
    released: bool,
}

impl fmt::Debug for SubscriberHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberHandle")
            .field("feed", self.session.key())
            .field("session", &self.session.id())
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl SubscriberHandle {
    /// Feed this handle is subscribed to.
    #[must_use]
    pub fn key(&self) -> &FeedKey {
        self.session.key()
    }

    /// Session backing this handle.
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session.id()
    }

    /// Whether the claim has been released.
    #[must_use]
    pub const fn is_released(&self) -> bool {
        self.released
    }

    /// Wait for the next sample.
    ///
    /// Skips over samples lost to buffer wrap-around. Returns `None` once
    /// the handle is released or the session has stopped, even if samples
    /// are still buffered.
    pub async fn recv(&mut self) -> Option<PriceSample> {
        if self.released || self.session.is_stopped() {
            return None;
        }

        loop {
            tokio::select! {
                biased;
                () = self.session.stopped() => return None,
                result = self.receiver.recv() => match result {
                    Ok(sample) => return Some(sample),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(feed = %self.session.key(), skipped, "Subscriber lagged, dropped oldest samples");
                        metrics::record_samples_lagged(skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                },
            }
        }
    }

    /// Release the claim. Idempotent.
    ///
    /// Returns `true` if this call released it.
    pub fn release(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        self.registry
            .release_slot(self.session.key(), self.session.id());
        true
    }
}

impl Drop for SubscriberHandle {
    fn drop(&mut self) {
        self.release();
    }
}

// =============================================================================
// Tests
// =============================================================================
