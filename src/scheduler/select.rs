//! Selection of repositories whose scans are due.
//!
//! The ScanDueSelector orders the members of one tier by:
//! - Never scanned first, then stale but scanned
//! - Within each group, scan priority descending (ties by repo id)
//!
//! Ineligible repositories (archived or forks) are never selected.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::domain::{ScanType, Tier, TrackedRepo};
use crate::error::Result;
use crate::id::now;
use crate::scheduler::cadence::{CadenceConfig, CadenceTable};
use crate::store::RepoStore;

/// Filter `repos` down to members of `tier` that are due for `scan_type`, in scan order.
pub fn select_due_from(
    repos: Vec<TrackedRepo>,
    tier: Tier,
    scan_type: ScanType,
    table: &CadenceTable,
    now: DateTime<Utc>,
) -> Vec<TrackedRepo> {
    let mut due: Vec<TrackedRepo> = repos
        .into_iter()
        .filter(|t| t.repo.is_eligible())
        .filter(|t| t.record.tier == tier)
        .filter(|t| table.is_due(&t.record, scan_type, now))
        .collect();

    due.sort_by(|a, b| scan_order(a, b, scan_type));
    due
}

fn scan_order(a: &TrackedRepo, b: &TrackedRepo, scan_type: ScanType) -> Ordering {
    // false sorts before true, so never-scanned repos come first
    a.record
        .last_scan(scan_type)
        .is_some()
        .cmp(&b.record.last_scan(scan_type).is_some())
        .then_with(|| b.record.scan_priority.total_cmp(&a.record.scan_priority))
        .then_with(|| a.repo.id.cmp(&b.repo.id))
}

/// Store-backed selector.
#[derive(Clone)]
pub struct ScanDueSelector {
    store: Arc<dyn RepoStore>,
    cadence: CadenceConfig,
}

impl ScanDueSelector {
    pub fn new(store: Arc<dyn RepoStore>, cadence: CadenceConfig) -> Self {
        Self { store, cadence }
    }

    pub fn cadence(&self) -> &CadenceConfig {
        &self.cadence
    }

    /// Ordered ids of repos in `tier` due for `scan_type`.
    ///
    /// `force` applies the forced cadence table for this call only.
    pub async fn select_due(&self, tier: Tier, scan_type: ScanType, force: bool) -> Result<Vec<i64>> {
        let repos = self.select_due_repos(tier, scan_type, force).await?;
        Ok(repos.into_iter().map(|t| t.repo.id).collect())
    }

    /// Like [`select_due`](Self::select_due) but returns the joined rows.
    pub async fn select_due_repos(&self, tier: Tier, scan_type: ScanType, force: bool) -> Result<Vec<TrackedRepo>> {
        let table = self.cadence.table(force);
        let due = self.store.get_repos_needing_scan(tier, scan_type, table, now()).await?;
        tracing::debug!(
            tier = %tier,
            scan_type = scan_type.as_str(),
            force,
            due = due.len(),
            "Selected repos due for scan"
        );
        Ok(due)
    }
}
