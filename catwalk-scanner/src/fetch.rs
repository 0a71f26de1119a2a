use crate::error::{FetchError, Result, ScanError};
use reqwest::Client;
use std::borrow::Cow;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

pub const DEFAULT_USER_AGENT: &str = "Catwalk/0.1 (+https://github.com/bonkbusiness/catwalk)";

/// A successfully fetched page.
#[derive(Debug, Clone)]
pub struct Page {
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl Page {
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Exponential backoff: `base_delay * 2^attempt`, capped at `max_delay`, plus up to
/// `jitter` of random slack.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            ..Self::default()
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry number `attempt + 1` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        let delay = self.base_delay.saturating_mul(factor).min(self.max_delay);
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            delay
        } else {
            delay + Duration::from_millis(fastrand::u64(0..=jitter_ms))
        }
    }
}

/// Enforces a minimum gap between consecutive requests from one caller.
#[derive(Debug)]
pub struct Politeness {
    min_delay: Duration,
    last_request: Option<Instant>,
}

impl Politeness {
    pub fn new(min_delay: Duration) -> Self {
        Self {
            min_delay,
            last_request: None,
        }
    }

    pub async fn wait(&mut self) {
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.min_delay {
                tokio::time::sleep(self.min_delay - elapsed).await;
            }
        }
        self.last_request = Some(Instant::now());
    }
}

#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        Self::with_options(Duration::from_secs(20), DEFAULT_USER_AGENT)
    }

    pub fn with_options(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .connect_timeout(timeout / 2)
            .pool_max_idle_per_host(50)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| ScanError::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// One GET, no retries. Any non-2xx status is an error.
    pub async fn fetch_once(&self, url: &str) -> std::result::Result<Page, FetchError> {
        debug!("Fetching {}", url);

        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        if !response.status().is_success() {
            return Err(FetchError::Status(status));
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Body(e.to_string()))?;

        Ok(Page {
            url: url.to_string(),
            status,
            content_type,
            body: body.to_vec(),
        })
    }

    /// GET with retries on transient failures. Returns the outcome together with the
    /// number of attempts made, which is at most `policy.max_retries + 1`.
    pub async fn fetch_with_retry(&self, url: &str, policy: &RetryPolicy) -> (Result<Page>, u32) {
        let mut attempt = 0;
        loop {
            match self.fetch_once(url).await {
                Ok(page) => return (Ok(page), attempt + 1),
                Err(err) if err.is_transient() && attempt < policy.max_retries => {
                    let delay = policy.backoff(attempt);
                    warn!(
                        "Fetch failed ({}), attempt {}/{}: {}; retrying in {:?}",
                        url,
                        attempt + 1,
                        policy.max_retries + 1,
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return (Err(ScanError::fetch(url, err)), attempt + 1),
            }
        }
    }
}
