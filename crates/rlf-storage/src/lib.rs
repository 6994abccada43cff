//! HTTP fetch utilities and the row insert boundary for RLF.

pub mod sink;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use rlf_core::{FetchTarget, FetchedPage};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

pub use sink::{DryRunSink, InsertError, RestConfig, RestInserter, RowSink};

pub const CRATE_NAME: &str = "rlf-storage";

pub const DEFAULT_PROXY_ENDPOINT: &str = "http://api.scraperapi.com";
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Rendering proxy that takes the real target as a query parameter.
#[derive(Debug, Clone)]
pub struct ProxyFetchConfig {
    pub endpoint: String,
    pub api_key: String,
    pub render: bool,
}

impl ProxyFetchConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            endpoint: DEFAULT_PROXY_ENDPOINT.to_string(),
            api_key: api_key.into(),
            render: true,
        }
    }

    /// `endpoint?api_key=..&url=<target>&render=true`
    pub fn wrap(&self, target_url: &str) -> Result<reqwest::Url, FetchError> {
        let mut params = vec![("api_key", self.api_key.as_str()), ("url", target_url)];
        if self.render {
            params.push(("render", "true"));
        }
        reqwest::Url::parse_with_params(&self.endpoint, &params).map_err(|err| FetchError::InvalidUrl {
            url: self.endpoint.clone(),
            reason: err.to_string(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub max_body_bytes: usize,
    pub proxy: Option<ProxyFetchConfig>,
    pub token_bucket: Option<TokenBucketConfig>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            user_agent: None,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            proxy: None,
            token_bucket: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TokenBucketConfig {
    pub capacity: u32,
    pub refill_every: Duration,
}

impl TokenBucketConfig {
    /// Bucket that admits roughly `rate` requests per second with a burst of one second.
    pub fn per_second(rate: f64) -> Option<Self> {
        if !rate.is_finite() || rate <= 0.0 {
            return None;
        }
        Some(Self {
            capacity: rate.ceil().max(1.0) as u32,
            refill_every: Duration::from_secs_f64(1.0 / rate),
        })
    }
}

/// Async rate limiter shared by every fetch worker: holds up to `capacity`
/// tokens and adds one per `refill_every`.
#[derive(Debug)]
pub struct SimpleTokenBucket {
    capacity: u32,
    refill_every: Duration,
    state: Mutex<TokenBucketState>,
}

#[derive(Debug, Clone, Copy)]
struct TokenBucketState {
    tokens: u32,
    last_refill: Instant,
}

impl SimpleTokenBucket {
    pub fn new(capacity: u32, refill_every: Duration) -> Self {
        Self {
            capacity,
            refill_every,
            state: Mutex::new(TokenBucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Waits until a token is free and consumes it. Elapsed whole refill
    /// periods are credited first, capped at capacity; when the bucket is empty
    /// the lock is released and the caller sleeps one period before retrying.
    pub async fn take(&self) {
        loop {
            let mut state = self.state.lock().await;
            let elapsed = state.last_refill.elapsed();
            if elapsed >= self.refill_every && !self.refill_every.is_zero() {
                let refills = (elapsed.as_nanos() / self.refill_every.as_nanos()) as u32;
                state.tokens = state.tokens.saturating_add(refills).min(self.capacity);
                state.last_refill = Instant::now();
            }

            if state.tokens > 0 {
                state.tokens -= 1;
                return;
            }

            let sleep_for = self.refill_every;
            drop(state);
            tokio::time::sleep(sleep_for).await;
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("timed out fetching {url}")]
    Timeout { url: String },
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("response from {url} exceeded {limit} bytes")]
    BodyTooLarge { url: String, limit: usize },
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl FetchError {
    fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout { url: url.to_string() }
        } else {
            FetchError::Request {
                url: url.to_string(),
                source: err,
            }
        }
    }
}

/// Anything that can turn a target into a page body. The pipeline only sees this trait.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(&self, run_id: Uuid, target: &FetchTarget) -> Result<FetchedPage, FetchError>;
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    max_body_bytes: usize,
    proxy: Option<ProxyFetchConfig>,
    token_bucket: Option<Arc<SimpleTokenBucket>>,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        let token_bucket = config
            .token_bucket
            .map(|c| Arc::new(SimpleTokenBucket::new(c.capacity, c.refill_every)));

        Ok(Self {
            client,
            max_body_bytes: config.max_body_bytes.max(1),
            proxy: config.proxy,
            token_bucket,
        })
    }

    pub fn uses_proxy(&self) -> bool {
        self.proxy.is_some()
    }

    fn request_url(&self, target_url: &str) -> Result<reqwest::Url, FetchError> {
        match &self.proxy {
            Some(proxy) => proxy.wrap(target_url),
            None => reqwest::Url::parse(target_url).map_err(|err| FetchError::InvalidUrl {
                url: target_url.to_string(),
                reason: err.to_string(),
            }),
        }
    }

    async fn fetch_inner(&self, target: &FetchTarget) -> Result<FetchedPage, FetchError> {
        let request_url = self.request_url(&target.url)?;

        if let Some(bucket) = &self.token_bucket {
            bucket.take().await;
        }

        let mut resp = self
            .client
            .get(request_url)
            .send()
            .await
            .map_err(|err| FetchError::from_reqwest(&target.url, err))?;

        let status = resp.status();
        // Through the proxy the response url is the proxy's, not the listing page.
        let final_url = if self.proxy.is_some() {
            target.url.clone()
        } else {
            resp.url().to_string()
        };

        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: target.url.clone(),
            });
        }

        if resp
            .content_length()
            .is_some_and(|len| len > self.max_body_bytes as u64)
        {
            return Err(FetchError::BodyTooLarge {
                url: target.url.clone(),
                limit: self.max_body_bytes,
            });
        }

        let mut body = Vec::new();
        while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|err| FetchError::from_reqwest(&target.url, err))?
        {
            if body.len() + chunk.len() > self.max_body_bytes {
                return Err(FetchError::BodyTooLarge {
                    url: target.url.clone(),
                    limit: self.max_body_bytes,
                });
            }
            body.extend_from_slice(&chunk);
        }

        debug!(status = status.as_u16(), bytes = body.len(), "fetched page");

        Ok(FetchedPage {
            source: target.source,
            url: target.url.clone(),
            final_url,
            status: status.as_u16(),
            body: String::from_utf8_lossy(&body).into_owned(),
            fetched_at: Utc::now(),
        })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch_page(&self, run_id: Uuid, target: &FetchTarget) -> Result<FetchedPage, FetchError> {
        let span = info_span!("http_fetch", %run_id, source = %target.source, url = %target.url);
        self.fetch_inner(target).instrument(span).await
    }
}
