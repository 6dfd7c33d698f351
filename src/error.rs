//! Typed errors for metric calls.
//!
//! Every failure in fetching, flattening or aggregating propagates to the caller of the
//! metric as a `MetricsError`; nothing is recovered inside a metric.

use thiserror::Error;

pub type Result<T, E = MetricsError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum MetricsError {
    /// The request never produced a response (DNS, TLS, connection reset, timeout).
    #[error("transport failure for {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The API answered with a non-success status.
    #[error("GitHub returned HTTP {status} for {url}")]
    Status { status: u16, url: String },

    /// The API is rate limiting us and kept doing so after all retries.
    #[error("rate limited by GitHub on {url} after {retries} retries")]
    RateLimited { url: String, retries: u32 },

    /// GitHub answered 202 (statistics still being computed) after all retries.
    #[error("statistics for {url} are still being computed")]
    StatsPending { url: String },

    /// The body did not match the schema expected for the endpoint.
    #[error("unexpected response shape from {url}: {source}")]
    Schema {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    /// The body parsed but a required part of the shape was absent or inconsistent.
    #[error("unexpected response shape from {url}: {detail}")]
    Shape { url: String, detail: String },

    #[error("GraphQL query failed: {}", messages.join("; "))]
    GraphQl { messages: Vec<String> },

    #[error("repository {repo} has no branch {branch}")]
    RefNotFound { repo: String, branch: String },

    #[error("insufficient data: {0}")]
    InsufficientData(&'static str),

    #[error("threshold must be a percentage in (0, 100], got {0}")]
    InvalidThreshold(f64),

    #[error("configuration error: {0}")]
    Config(String),
}

impl MetricsError {
    /// HTTP status code reported by GitHub, if this error came from one.
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            MetricsError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}
