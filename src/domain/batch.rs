//! Batch job types
//!
//! A batch job is one bounded, resumable pass of deep analysis over an ordered
//! list of repositories. The cursor and counters are persisted after every item
//! so a job survives a process restart.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::repo::{RepoRef, RepoSource};
use super::tier::Tier;
use crate::error::{RepowatchError, Result};
use crate::id::now;

/// Status of a batch job. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Pending,
    Running,
    /// Stop requested; completes at the next item boundary
    Stopping,
    Completed,
    Failed,
}

impl BatchStatus {
    /// Returns true if the job will never change again
    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Failed)
    }

    /// Forward-only transition table
    pub fn can_transition_to(&self, next: BatchStatus) -> bool {
        use BatchStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Failed)
                | (Running, Stopping)
                | (Running, Completed)
                | (Running, Failed)
                | (Stopping, Completed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Running => "running",
            BatchStatus::Stopping => "stopping",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a job reached a terminal state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum CompletionReason {
    /// Every queued repository was processed
    Exhausted,
    /// A stop was requested
    Cancelled,
    /// No repository was due when the job was built
    NothingDue,
    /// A step aborted on a propagated error
    Error(String),
}

impl fmt::Display for CompletionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionReason::Exhausted => f.write_str("all queued repositories processed"),
            CompletionReason::Cancelled => f.write_str("stopped on request"),
            CompletionReason::NothingDue => f.write_str("no repositories need analysis"),
            CompletionReason::Error(msg) => write!(f, "aborted: {}", msg),
        }
    }
}

/// What a batch start request should cover
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchTarget {
    Tier1,
    Tier2,
    Tier3,
    /// Every tiered, eligible repository
    Visible,
    /// Visible plus trending discoveries
    All,
}

impl BatchTarget {
    /// Tiers covered by this target, highest first
    pub fn tiers(&self) -> Vec<Tier> {
        match self {
            BatchTarget::Tier1 => vec![Tier::One],
            BatchTarget::Tier2 => vec![Tier::Two],
            BatchTarget::Tier3 => vec![Tier::Three],
            BatchTarget::Visible | BatchTarget::All => Tier::ALL.to_vec(),
        }
    }

    pub fn includes_trending(&self) -> bool {
        matches!(self, BatchTarget::All)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BatchTarget::Tier1 => "tier1",
            BatchTarget::Tier2 => "tier2",
            BatchTarget::Tier3 => "tier3",
            BatchTarget::Visible => "visible",
            BatchTarget::All => "all",
        }
    }
}

impl fmt::Display for BatchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchTarget {
    type Err = RepowatchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tier1" | "1" => Ok(BatchTarget::Tier1),
            "tier2" | "2" => Ok(BatchTarget::Tier2),
            "tier3" | "3" => Ok(BatchTarget::Tier3),
            "visible" => Ok(BatchTarget::Visible),
            "all" => Ok(BatchTarget::All),
            other => Err(RepowatchError::InvalidTarget(other.to_string())),
        }
    }
}

/// One queued repository in a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItem {
    pub repo: RepoRef,
    /// None for untiered trending discoveries
    pub tier: Option<Tier>,
    pub priority: f64,
    pub source: RepoSource,
}

/// Persisted batch job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchJob {
    pub id: String,
    pub target: BatchTarget,
    pub force: bool,
    pub items: Vec<BatchItem>,
    pub cursor: usize,
    pub status: BatchStatus,
    pub success_count: u32,
    pub failed_count: u32,
    pub reason: Option<CompletionReason>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BatchJob {
    /// Create a pending job over an already ordered item list
    pub fn new(id: impl Into<String>, target: BatchTarget, force: bool, items: Vec<BatchItem>) -> Self {
        Self {
            id: id.into(),
            target,
            force,
            items,
            cursor: 0,
            status: BatchStatus::Pending,
            success_count: 0,
            failed_count: 0,
            reason: None,
            created_at: now(),
            completed_at: None,
        }
    }

    pub fn total(&self) -> usize {
        self.items.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.items.len()
    }

    /// Apply a status transition, rejecting anything backwards
    pub fn transition(&mut self, next: BatchStatus) -> Result<()> {
        if self.status == next {
            return Ok(());
        }
        if !self.status.can_transition_to(next) {
            return Err(RepowatchError::InvalidState(format!(
                "batch {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }

    /// Move the job to `completed` with the given reason
    pub fn complete(&mut self, reason: CompletionReason) -> Result<()> {
        self.transition(BatchStatus::Completed)?;
        self.reason = Some(reason);
        self.completed_at = Some(now());
        Ok(())
    }

    /// Move the job to `failed` with the given reason
    pub fn fail(&mut self, message: impl Into<String>) -> Result<()> {
        self.transition(BatchStatus::Failed)?;
        self.reason = Some(CompletionReason::Error(message.into()));
        self.completed_at = Some(now());
        Ok(())
    }

    /// Record the outcome of the item under the cursor and advance past it
    pub fn record_item(&mut self, success: bool) {
        if self.is_exhausted() {
            return;
        }
        if success {
            self.success_count += 1;
        } else {
            self.failed_count += 1;
        }
        self.cursor += 1;
    }

    /// Snapshot for status queries
    pub fn progress(&self, current_chunk: &[RepoRef]) -> BatchProgress {
        BatchProgress {
            batch_id: self.id.clone(),
            status: self.status,
            processed: self.cursor,
            total: self.total(),
            success_count: self.success_count,
            failed_count: self.failed_count,
            current_chunk: current_chunk.iter().map(|r| r.full_name()).collect(),
            reason: self.reason.clone(),
        }
    }
}

/// Status response for a batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgress {
    pub batch_id: String,
    pub status: BatchStatus,
    pub processed: usize,
    pub total: usize,
    pub success_count: u32,
    pub failed_count: u32,
    pub current_chunk: Vec<String>,
    pub reason: Option<CompletionReason>,
}

/// Summary row in a start response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedRepo {
    pub name: String,
    pub priority: f64,
    pub tier: Option<Tier>,
}

/// Response to a batch start request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStartResponse {
    /// None when nothing was queued
    pub batch_id: Option<String>,
    /// Candidates found before the freshness filter
    pub total_repos: usize,
    /// Candidates left after the freshness filter
    pub needing_analysis: usize,
    /// Candidates actually queued after truncation
    pub queued: usize,
    pub repositories: Vec<QueuedRepo>,
    pub reason: Option<String>,
}
