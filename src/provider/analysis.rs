//! Anthropic-backed analysis provider
//!
//! Sends repository content to the Messages API and parses a JSON verdict
//! (`{"summary", "score", "tags"}`) out of the first text block.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{AnalysisProvider, ProviderError, parse_retry_after};
use crate::domain::{AnalysisResult, RepoRef};

/// Anthropic API URL
const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";

/// Anthropic API version
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Default model to use
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

const SYSTEM_PROMPT: &str = "You review open source repositories. Reply with a single JSON object \
with the keys \"summary\" (two sentences), \"score\" (0-10, overall quality and momentum) and \
\"tags\" (up to five lowercase topic strings). No other text.";

/// Configuration for the analysis provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub endpoint: String,
    pub model: String,
    pub max_tokens: u32,
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            endpoint: ANTHROPIC_API_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 1024,
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Verdict {
    summary: String,
    score: f64,
    #[serde(default)]
    tags: Vec<String>,
}

/// Anthropic analysis client
pub struct AnthropicAnalyzer {
    client: Client,
    api_key: String,
    config: AnalysisConfig,
}

impl AnthropicAnalyzer {
    /// Create a client, reading the key from `config.api_key_env`
    pub fn new(config: AnalysisConfig) -> Result<Self, ProviderError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| ProviderError::MissingApiKey {
            env_var: config.api_key_env.clone(),
        })?;
        Self::with_api_key(api_key, config)
    }

    pub fn with_api_key(api_key: String, config: AnalysisConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ProviderError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            config,
        })
    }

    fn build_request(&self, repo: &RepoRef, content: &str) -> Value {
        json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "system": SYSTEM_PROMPT,
            "messages": [{
                "role": "user",
                "content": format!("Repository: {}\n\n{}", repo.full_name(), content)
            }]
        })
    }

    fn parse_response(&self, body: &Value) -> Result<AnalysisResult, ProviderError> {
        let text = body["content"]
            .as_array()
            .and_then(|blocks| blocks.iter().find_map(|b| b["text"].as_str()))
            .ok_or_else(|| ProviderError::InvalidResponse("no text block in response".to_string()))?;

        let verdict = parse_verdict(text)?;
        Ok(AnalysisResult {
            summary: verdict.summary,
            score: verdict.score.clamp(0.0, 10.0),
            tags: verdict.tags,
            model: body["model"].as_str().unwrap_or(&self.config.model).to_string(),
        })
    }

    async fn send_request(&self, body: Value) -> Result<Value, ProviderError> {
        let response = self
            .client
            .post(&self.config.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();

        if status.as_u16() == 429 {
            return Err(ProviderError::RateLimited {
                retry_after: parse_retry_after(response.headers().get("retry-after")),
            });
        }

        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ProviderError::api(status.as_u16(), error_body));
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("Failed to parse response: {}", e)))
    }
}

/// Pull the JSON object out of a model reply that may carry surrounding text
fn parse_verdict(text: &str) -> Result<Verdict, ProviderError> {
    let start = text.find('{');
    let end = text.rfind('}');
    let json = match (start, end) {
        (Some(s), Some(e)) if s < e => &text[s..=e],
        _ => return Err(ProviderError::InvalidResponse("no JSON object in reply".to_string())),
    };
    serde_json::from_str(json).map_err(|e| ProviderError::InvalidResponse(format!("Bad verdict: {}", e)))
}

#[async_trait]
impl AnalysisProvider for AnthropicAnalyzer {
    async fn analyze(&self, repo: &RepoRef, content: &str) -> Result<AnalysisResult, ProviderError> {
        let body = self.build_request(repo, content);
        let response = self.send_request(body).await?;
        let result = self.parse_response(&response)?;
        tracing::debug!(repo = %repo.full_name(), score = result.score, "Analysis complete");
        Ok(result)
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

impl std::fmt::Debug for AnthropicAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicAnalyzer")
            .field("model", &self.config.model)
            .field("endpoint", &self.config.endpoint)
            .finish()
    }
}
