//! GitHub REST API metrics provider
//!
//! Fetches repository metrics, a README excerpt and trending search results.
//! Rate-limit responses (429, or 403 with an exhausted quota) become
//! `ProviderError::RateLimited` so the backoff executor can honour them.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};

use super::{MetricsProvider, ProviderError, parse_retry_after};
use crate::domain::{RepoMetrics, RepoRef, RepoSource, Repository};

/// GitHub API base URL
const GITHUB_API_URL: &str = "https://api.github.com";

/// README excerpt length passed on to analysis
const README_EXCERPT_CHARS: usize = 4_000;

/// Search API page size ceiling
const MAX_PER_PAGE: usize = 100;

/// Configuration for the GitHub client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GithubConfig {
    pub base_url: String,
    /// Environment variable holding an access token (optional)
    pub token_env: String,
    pub timeout_secs: u64,
    /// Trending search looks at repositories created within this window
    pub trending_window_days: i64,
    pub trending_min_stars: u64,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            base_url: GITHUB_API_URL.to_string(),
            token_env: "GITHUB_TOKEN".to_string(),
            timeout_secs: 30,
            trending_window_days: 7,
            trending_min_stars: 50,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GhOwner {
    login: String,
}

#[derive(Debug, Deserialize)]
struct GhRepo {
    id: i64,
    name: String,
    owner: GhOwner,
    #[serde(default)]
    stargazers_count: u64,
    #[serde(default)]
    forks_count: u64,
    #[serde(default)]
    open_issues_count: u64,
    #[serde(default)]
    archived: bool,
    #[serde(default)]
    fork: bool,
    description: Option<String>,
}

impl GhRepo {
    fn metrics(&self) -> RepoMetrics {
        RepoMetrics {
            stars: self.stargazers_count,
            forks: self.forks_count,
            open_issues: self.open_issues_count,
            stars_gained_7d: None,
            archived: self.archived,
            fork: self.fork,
            description: self.description.clone(),
            readme: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GhSearch {
    items: Vec<GhRepo>,
}

/// GitHub metrics client
pub struct GithubClient {
    client: Client,
    token: Option<String>,
    config: GithubConfig,
}

impl GithubClient {
    /// Create a client, reading the token from `config.token_env` if set
    pub fn new(config: GithubConfig) -> Result<Self, ProviderError> {
        let token = std::env::var(&config.token_env).ok().filter(|t| !t.is_empty());
        Self::with_token(token, config)
    }

    pub fn with_token(token: Option<String>, config: GithubConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("repowatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, token, config })
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self
            .client
            .get(url)
            .header("accept", "application/vnd.github+json")
            .header("x-github-api-version", "2022-11-28");
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Map non-success responses to provider errors
    async fn check(response: Response) -> Result<Response, ProviderError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let headers = response.headers();
        let quota_exhausted = headers
            .get("x-ratelimit-remaining")
            .and_then(|h| h.to_str().ok())
            .is_some_and(|v| v.trim() == "0");

        if status == StatusCode::TOO_MANY_REQUESTS || (status == StatusCode::FORBIDDEN && quota_exhausted) {
            let retry_after = parse_retry_after(headers.get("retry-after")).or_else(|| {
                headers
                    .get("x-ratelimit-reset")
                    .and_then(|h| h.to_str().ok())
                    .and_then(|s| s.trim().parse::<i64>().ok())
                    .map(|reset| Duration::from_secs((reset - Utc::now().timestamp()).max(0) as u64))
            });
            return Err(ProviderError::RateLimited { retry_after });
        }

        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(ProviderError::api(status.as_u16(), message))
    }
}

fn excerpt(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[async_trait]
impl MetricsProvider for GithubClient {
    async fn fetch_metrics(&self, repo: &RepoRef) -> Result<RepoMetrics, ProviderError> {
        let url = self.url(&format!("/repos/{}/{}", repo.owner, repo.name));
        let response = Self::check(self.get(&url).send().await?).await?;
        let body: GhRepo = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        let metrics = body.metrics();
        tracing::debug!(repo = %repo.full_name(), stars = metrics.stars, "Fetched metrics");
        Ok(metrics)
    }

    async fn fetch_readme(&self, repo: &RepoRef) -> Result<Option<String>, ProviderError> {
        let url = self.url(&format!("/repos/{}/{}/readme", repo.owner, repo.name));
        let response = self
            .get(&url)
            .header("accept", "application/vnd.github.raw")
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let text = Self::check(response).await?.text().await?;
        Ok(Some(excerpt(&text, README_EXCERPT_CHARS)))
    }

    async fn search_trending(&self, limit: usize) -> Result<Vec<Repository>, ProviderError> {
        let since = (Utc::now() - chrono::Duration::days(self.config.trending_window_days)).format("%Y-%m-%d");
        let query = format!("created:>{} stars:>={}", since, self.config.trending_min_stars);
        let per_page = limit.clamp(1, MAX_PER_PAGE).to_string();

        let response = self
            .get(&self.url("/search/repositories"))
            .query(&[
                ("q", query.as_str()),
                ("sort", "stars"),
                ("order", "desc"),
                ("per_page", per_page.as_str()),
            ])
            .send()
            .await?;
        let body: GhSearch = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        let now = Utc::now();
        let repos = body
            .items
            .into_iter()
            .take(limit)
            .map(|item| {
                let mut repo =
                    Repository::new(item.id, item.owner.login.clone(), item.name.clone()).with_source(RepoSource::Trending);
                repo.apply_metrics(&item.metrics(), now);
                repo
            })
            .collect();
        Ok(repos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = GithubConfig::default();
        assert_eq!(config.base_url, GITHUB_API_URL);
        assert_eq!(config.token_env, "GITHUB_TOKEN");
    }

    #[test]
    fn test_url_joins_without_double_slash() {
        let config = GithubConfig {
            base_url: "http://localhost:9000/".to_string(),
            ..Default::default()
        };
        let client = GithubClient::with_token(None, config).unwrap();
        assert_eq!(client.url("/repos/a/b"), "http://localhost:9000/repos/a/b");
        assert!(!client.has_token());
    }

    #[test]
    fn test_repo_payload_to_metrics() {
        let body: GhRepo = serde_json::from_str(
            r#"{
                "id": 7,
                "name": "tokio",
                "owner": {"login": "tokio-rs"},
                "stargazers_count": 25000,
                "forks_count": 2300,
                "open_issues_count": 250,
                "archived": false,
                "fork": false,
                "description": "async runtime"
            }"#,
        )
        .unwrap();

        let metrics = body.metrics();
        assert_eq!(metrics.stars, 25_000);
        assert_eq!(metrics.forks, 2_300);
        assert_eq!(metrics.description.as_deref(), Some("async runtime"));
        assert_eq!(metrics.stars_gained_7d, None);
    }

    #[test]
    fn test_excerpt_respects_char_boundaries() {
        assert_eq!(excerpt("héllo", 2), "hé");
        assert_eq!(excerpt("short", 100), "short");
    }
}
