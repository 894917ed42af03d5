//! Analysis results produced by the LLM provider

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Verdict returned by the analysis provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub summary: String,
    /// 0.0 - 10.0
    pub score: f64,
    #[serde(default)]
    pub tags: Vec<String>,
    pub model: String,
}

/// Stored analysis for one repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub repo_id: i64,
    pub result: AnalysisResult,
    pub analyzed_at: DateTime<Utc>,
}

impl AnalysisRecord {
    pub fn new(repo_id: i64, result: AnalysisResult, analyzed_at: DateTime<Utc>) -> Self {
        Self {
            repo_id,
            result,
            analyzed_at,
        }
    }
}
