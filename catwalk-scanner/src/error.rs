use thiserror::Error;

/// Why a single HTTP fetch did not produce a usable page.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("failed to read body: {0}")]
    Body(String),
}

impl FetchError {
    /// Transient failures are worth retrying; everything else is final.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout | FetchError::Connect(_) | FetchError::Body(_) => true,
            FetchError::Status(code) => *code >= 500 || *code == 408 || *code == 429,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if let Some(status) = err.status() {
            FetchError::Status(status.as_u16())
        } else if err.is_body() || err.is_decode() {
            FetchError::Body(err.to_string())
        } else {
            FetchError::Connect(err.to_string())
        }
    }
}

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Fetch failed for {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Task join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),

    #[error("Other error: {0}")]
    Other(String),
}

impl ScanError {
    pub fn fetch(url: impl Into<String>, source: FetchError) -> Self {
        ScanError::Fetch {
            url: url.into(),
            source,
        }
    }

    /// Only fetch errors can be transient; parse and cache problems never clear up on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, ScanError::Fetch { source, .. } if source.is_transient())
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;
