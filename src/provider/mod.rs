//! External providers - repository metrics and LLM analysis
//!
//! This module provides:
//! - MetricsProvider / AnalysisProvider traits
//! - ProviderError with retry classification
//! - GithubClient and AnthropicAnalyzer implementations
//! - Scripted mocks for tests and dry runs
//!
//! Callers always go through the RateLimiter and BackoffExecutor; providers
//! themselves never wait or retry.

pub mod analysis;
pub mod github;
pub mod mock;

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{AnalysisResult, RepoMetrics, RepoRef, Repository};
use crate::error::RepowatchError;
use crate::scheduler::backoff::Retryable;

pub use analysis::{AnalysisConfig, AnthropicAnalyzer};
pub use github::{GithubClient, GithubConfig};
pub use mock::{MockAnalysisProvider, MockMetricsProvider};

/// Source of repository metrics (stars, forks, trending search)
#[async_trait]
pub trait MetricsProvider: Send + Sync {
    async fn fetch_metrics(&self, repo: &RepoRef) -> Result<RepoMetrics, ProviderError>;

    /// README excerpt, or None when the repository has none
    async fn fetch_readme(&self, repo: &RepoRef) -> Result<Option<String>, ProviderError>;

    /// Recently created, fast-growing repositories with metrics filled in
    async fn search_trending(&self, limit: usize) -> Result<Vec<Repository>, ProviderError>;
}

/// LLM-backed repository analysis
#[async_trait]
pub trait AnalysisProvider: Send + Sync {
    async fn analyze(&self, repo: &RepoRef, content: &str) -> Result<AnalysisResult, ProviderError>;

    fn model(&self) -> &str;
}

/// Errors returned by provider calls
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Missing API key: environment variable {env_var} not set")]
    MissingApiKey { env_var: String },
}

impl ProviderError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        ProviderError::Api {
            status,
            message: message.into(),
        }
    }
}

impl Retryable for ProviderError {
    fn is_retryable(&self) -> bool {
        match self {
            ProviderError::RateLimited { .. } => true,
            ProviderError::Api { status, .. } => *status == 429 || *status >= 500,
            ProviderError::Network(_) => true,
            ProviderError::Timeout(_) => true,
            ProviderError::InvalidResponse(_) => false,
            ProviderError::MissingApiKey { .. } => false,
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            ProviderError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout(err.to_string())
        } else if err.is_decode() {
            ProviderError::InvalidResponse(err.to_string())
        } else if let Some(status) = err.status() {
            ProviderError::api(status.as_u16(), err.to_string())
        } else {
            ProviderError::Network(err.to_string())
        }
    }
}

impl From<ProviderError> for RepowatchError {
    fn from(err: ProviderError) -> Self {
        if err.is_retryable() {
            RepowatchError::TransientProvider(err.to_string())
        } else {
            RepowatchError::FatalProvider(err.to_string())
        }
    }
}

/// Parse a `retry-after` header value given in seconds
pub(crate) fn parse_retry_after(value: Option<&reqwest::header::HeaderValue>) -> Option<Duration> {
    value
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
