//! Application configuration and environment variable parsing.
//!
//! This module handles loading configuration settings from the environment (e.g., .env file).
//! It defines the `AppConfig` struct which governs how the GitHub API is reached (credentials,
//! timeouts, retries, page caps) and how individual metrics are computed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration as StdDuration;

/// A unique identifier for a GitHub repository.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoId {
    /// The owner of the repository (e.g., "facebook").
    pub owner: String,
    /// The name of the repository (e.g., "react").
    pub repo: String,
}

impl RepoId {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
        }
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

/// Application configuration loaded from environment variables.
#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    /// GitHub API key, sent as the basic-auth password on every request.
    pub github_api_key: Option<String>,

    /// Base URL of the GitHub REST API. The GraphQL endpoint is `{base}/graphql`.
    #[serde(default = "default_api_url")]
    pub github_api_url: String,

    /// Hard limit on the number of pages fetched by any single paginated request.
    #[serde(default = "default_max_api_pages")]
    pub max_api_pages: u32,

    /// Page size requested from REST listings.
    #[serde(default = "default_per_page")]
    pub per_page: u32,

    /// Page number the commit history walk starts from.
    #[serde(default)]
    pub offset_first_page: u32,

    /// Connect and read timeout applied to every request, in seconds.
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,

    /// How many times a rate-limited (or still-computing) request is retried.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay of the exponential backoff between retries, in milliseconds.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Branch whose history feeds the bus factor.
    /// When unset the repository's default branch is used.
    pub bus_factor_branch: Option<String>,

    /// Maximum number of concurrent per-item lookups (pull request reviews, user profiles).
    #[serde(default = "default_review_concurrency")]
    pub review_concurrency: usize,

    /// CSV file with `name,gender` rows used by the contributors-gender metric.
    pub name_gender_csv: Option<PathBuf>,

    /// Port the HTTP service listens on.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_max_api_pages() -> u32 {
    1000
}

fn default_per_page() -> u32 {
    100
}

fn default_request_timeout_seconds() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

fn default_review_concurrency() -> usize {
    4
}

fn default_port() -> u16 {
    3000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            github_api_key: None,
            github_api_url: default_api_url(),
            max_api_pages: default_max_api_pages(),
            per_page: default_per_page(),
            offset_first_page: 0,
            request_timeout_seconds: default_request_timeout_seconds(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            bus_factor_branch: None,
            review_concurrency: default_review_concurrency(),
            name_gender_csv: None,
            port: default_port(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::from_env()
    }

    pub fn request_timeout(&self) -> StdDuration {
        StdDuration::from_secs(self.request_timeout_seconds)
    }

    pub fn retry_base_delay(&self) -> StdDuration {
        StdDuration::from_millis(self.retry_base_delay_ms)
    }
}
