//! Storage layer for Repowatch.
//!
//! The store is the system of record for repositories, tier records,
//! analyses and batch jobs. Two implementations are provided:
//! - **SqliteStore**: rusqlite database with JSON payload columns
//! - **MemoryStore**: in-process maps, for tests and dry runs
//!
//! Absence is reported as `Ok(None)`, an empty list or `false`, never as an
//! error. Every repository query applies [`Repository::is_eligible`].
//!
//! # Example
//!
//! ```ignore
//! use repowatch::store::{RepoStore, SqliteStore};
//!
//! let store = SqliteStore::open_at(Path::new("/tmp/repowatch.db"))?;
//! store.upsert_repository(&Repository::new(1, "tokio-rs", "tokio")).await?;
//! let tier1 = store.get_repos_by_tier(Tier::One).await?;
//! ```

mod memory;
mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{AnalysisRecord, BatchJob, RepoMetrics, Repository, ScanType, Tier, TierRecord, TrackedRepo};
use crate::error::Result;
use crate::scheduler::cadence::CadenceTable;
use crate::scheduler::select::select_due_from;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Eligible repository count per tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierCounts {
    pub tier1: u64,
    pub tier2: u64,
    pub tier3: u64,
}

impl TierCounts {
    pub fn add(&mut self, tier: Tier) {
        match tier {
            Tier::One => self.tier1 += 1,
            Tier::Two => self.tier2 += 1,
            Tier::Three => self.tier3 += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.tier1 + self.tier2 + self.tier3
    }
}

/// Persistence contract used by the scheduler and batch orchestrator.
#[async_trait]
pub trait RepoStore: Send + Sync {
    /// Insert or replace a repository row
    async fn upsert_repository(&self, repo: &Repository) -> Result<()>;

    async fn get_repository(&self, id: i64) -> Result<Option<Repository>>;

    /// Apply a metrics snapshot. Returns the updated row, or None if the repo is unknown.
    async fn update_metrics(&self, id: i64, metrics: &RepoMetrics, at: DateTime<Utc>) -> Result<Option<Repository>>;

    async fn get_tier_record(&self, id: i64) -> Result<Option<TierRecord>>;

    async fn save_tier_record(&self, record: &TierRecord) -> Result<()>;

    /// Eligible members of a tier joined with their tier records
    async fn get_repos_by_tier(&self, tier: Tier) -> Result<Vec<TrackedRepo>>;

    /// Members of `tier` due for `scan_type` under `table`, in scan order
    async fn get_repos_needing_scan(
        &self,
        tier: Tier,
        scan_type: ScanType,
        table: &CadenceTable,
        now: DateTime<Utc>,
    ) -> Result<Vec<TrackedRepo>> {
        let members = self.get_repos_by_tier(tier).await?;
        Ok(select_due_from(members, tier, scan_type, table, now))
    }

    /// Set the scan timestamp. Repos without a tier record are left alone.
    async fn mark_repo_scanned(&self, id: i64, scan_type: ScanType, at: DateTime<Utc>) -> Result<()>;

    /// Eligible repos with no tier record, or with metrics newer than their record
    async fn get_repos_needing_classification(&self) -> Result<Vec<Repository>>;

    /// Eligible trending-sourced repos, most stars first
    async fn get_trending_repos(&self, limit: usize) -> Result<Vec<Repository>>;

    async fn save_analysis(&self, record: &AnalysisRecord) -> Result<()>;

    async fn latest_analysis(&self, repo_id: i64) -> Result<Option<AnalysisRecord>>;

    /// Whether an analysis was stored at or after `since`
    async fn has_recent_analysis(&self, repo_id: i64, since: DateTime<Utc>) -> Result<bool>;

    async fn save_batch_job(&self, job: &BatchJob) -> Result<()>;

    async fn get_batch_job(&self, id: &str) -> Result<Option<BatchJob>>;

    /// Most recently created non-terminal job
    async fn get_active_batch_job(&self) -> Result<Option<BatchJob>>;

    async fn tier_counts(&self) -> Result<TierCounts>;
}
