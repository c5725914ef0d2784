//! HTTP client for TradingView symbol pages.

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::parser;
use crate::application::ports::{PricePage, PriceSource, SourceError};
use crate::domain::feed::FeedKey;
use crate::infrastructure::config::SourceSettings;

const USER_AGENT: &str = concat!("price-feed-proxy/", env!("CARGO_PKG_VERSION"));

/// Opens one [`TradingViewPage`] per feed.
#[derive(Debug, Clone)]
pub struct TradingViewSource {
    client: reqwest::Client,
    base_url: String,
}

impl TradingViewSource {
    /// Create a source from settings.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Unavailable`] if the HTTP client cannot be
    /// built (e.g. no TLS backend).
    pub fn new(settings: &SourceSettings) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Symbol page URL for `key`.
    #[must_use]
    pub fn page_url(&self, key: &FeedKey) -> String {
        format!(
            "{}/symbols/{}/?exchange={}",
            self.base_url,
            key.ticker(),
            key.exchange()
        )
    }
}

#[async_trait]
impl PriceSource for TradingViewSource {
    #[instrument(skip(self, key), fields(feed = %key))]
    async fn open(&self, key: &FeedKey) -> Result<Box<dyn PricePage>, SourceError> {
        let url = self.page_url(key);
        let body = fetch(&self.client, &url)
            .await
            .map_err(SourceError::Unavailable)?;

        debug!(url = %url, bytes = body.len(), "Symbol page opened");

        Ok(Box::new(TradingViewPage {
            client: self.client.clone(),
            url,
            prefetched: Some(body),
            closed: false,
        }))
    }
}

/// A symbol page for one feed. Each read re-fetches the page, except the
/// first, which reuses the body fetched on open.
#[derive(Debug)]
pub struct TradingViewPage {
    client: reqwest::Client,
    url: String,
    prefetched: Option<String>,
    closed: bool,
}

#[async_trait]
impl PricePage for TradingViewPage {
    async fn read_price(&mut self) -> Result<f64, SourceError> {
        if self.closed {
            return Err(SourceError::Transient("page closed".to_string()));
        }

        let body = match self.prefetched.take() {
            Some(body) => body,
            None => fetch(&self.client, &self.url)
                .await
                .map_err(SourceError::Transient)?,
        };

        parser::extract_last_price(&body)
    }

    async fn close(&mut self) -> Result<(), SourceError> {
        self.closed = true;
        self.prefetched = None;
        debug!(url = %self.url, "Symbol page closed");
        Ok(())
    }
}

async fn fetch(client: &reqwest::Client, url: &str) -> Result<String, String> {
    let response = client.get(url).send().await.map_err(|e| e.to_string())?;

    let status = response.status();
    if !status.is_success() {
        return Err(format!("HTTP {} from {url}", status.as_u16()));
    }

    response.text().await.map_err(|e| e.to_string())
}
