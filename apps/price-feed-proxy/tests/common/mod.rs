//! Shared test doubles for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use price_feed_proxy::{FeedKey, PricePage, PriceSource, RegistryConfig, SourceError};

/// Registry settings fast enough for tests.
pub fn fast_config() -> RegistryConfig {
    RegistryConfig {
        poll_interval: Duration::from_millis(10),
        broadcast_capacity: 16,
    }
}

/// Upstream calls observed by a [`ScriptedSource`].
#[derive(Debug, Default)]
pub struct Calls {
    opens: AtomicUsize,
    reads: AtomicUsize,
    closes: AtomicUsize,
}

impl Calls {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// Price source whose behaviour is fixed up front.
///
/// Every page replays the same script of read results; the final entry
/// repeats forever.
pub struct ScriptedSource {
    calls: Arc<Calls>,
    open_delay: Duration,
    open_failures: Mutex<usize>,
    script: Vec<Result<f64, SourceError>>,
}

impl ScriptedSource {
    /// Source whose pages always read `price`.
    pub fn steady(price: f64) -> Self {
        Self::scripted(vec![Ok(price)])
    }

    /// Source whose pages replay `script`.
    pub fn scripted(script: Vec<Result<f64, SourceError>>) -> Self {
        Self {
            calls: Arc::new(Calls::default()),
            open_delay: Duration::ZERO,
            open_failures: Mutex::new(0),
            script,
        }
    }

    /// Source whose pages open but never yield a price.
    pub fn always_failing_reads() -> Self {
        Self::scripted(vec![Err(SourceError::Transient("price element missing".into()))])
    }

    /// Delay every `open` by `delay`.
    #[must_use]
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    /// Fail the next `count` opens with [`SourceError::Unavailable`].
    #[must_use]
    pub fn failing_opens(self, count: usize) -> Self {
        *self.open_failures.lock() = count;
        self
    }

    /// Shared call counters.
    pub fn calls(&self) -> Arc<Calls> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl PriceSource for ScriptedSource {
    async fn open(&self, key: &FeedKey) -> Result<Box<dyn PricePage>, SourceError> {
        self.calls.opens.fetch_add(1, Ordering::SeqCst);
        if !self.open_delay.is_zero() {
            tokio::time::sleep(self.open_delay).await;
        }

        {
            let mut failures = self.open_failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(SourceError::Unavailable(format!("no symbol page for {key}")));
            }
        }

        Ok(Box::new(ScriptedPage {
            calls: Arc::clone(&self.calls),
            script: self.script.iter().cloned().collect(),
        }))
    }
}

struct ScriptedPage {
    calls: Arc<Calls>,
    script: VecDeque<Result<f64, SourceError>>,
}

#[async_trait]
impl PricePage for ScriptedPage {
    async fn read_price(&mut self) -> Result<f64, SourceError> {
        self.calls.reads.fetch_add(1, Ordering::SeqCst);
        if self.script.len() > 1 {
            return self.script.pop_front().unwrap();
        }
        self.script
            .front()
            .cloned()
            .unwrap_or_else(|| Err(SourceError::Transient("empty script".into())))
    }

    async fn close(&mut self) -> Result<(), SourceError> {
        self.calls.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
