//! Candidate list construction for batch jobs.
//!
//! Candidates are gathered tier by tier (1, 2, 3) from the due selector,
//! then trending-sourced repositories are appended. The list is
//! deduplicated, stripped of recently analyzed repositories and truncated to
//! the job size bound.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{BatchItem, BatchTarget, ScanType};
use crate::error::Result;
use crate::scheduler::cadence::CadenceConfig;
use crate::store::RepoStore;

/// Batch execution settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Items processed per step
    pub chunk_size: usize,
    /// Pause between steps (milliseconds)
    pub inter_chunk_delay_ms: u64,
    /// Upper bound on queued items per job
    pub max_job_size: usize,
    /// Skip repos analyzed within this many hours
    pub freshness_hours: u32,
    /// Freshness window for forced jobs
    pub forced_freshness_hours: u32,
    /// Trending repos considered for `all` targets
    pub trending_limit: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            chunk_size: 5,
            inter_chunk_delay_ms: 2_000,
            max_job_size: 200,
            freshness_hours: 24,
            forced_freshness_hours: 1,
            trending_limit: 50,
        }
    }
}

impl BatchConfig {
    pub fn inter_chunk_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.inter_chunk_delay_ms)
    }

    pub fn freshness_window(&self, force: bool) -> Duration {
        let hours = if force {
            self.forced_freshness_hours
        } else {
            self.freshness_hours
        };
        Duration::hours(hours as i64)
    }
}

/// Result of candidate construction
#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    pub items: Vec<BatchItem>,
    /// Distinct due repositories before the freshness filter
    pub total_repos: usize,
    /// Repositories left after the freshness filter, before truncation
    pub needing_analysis: usize,
}

/// Resolves a batch target into ordered candidates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidateBuilder {
    target: BatchTarget,
    force: bool,
}

impl CandidateBuilder {
    pub fn new(target: BatchTarget, force: bool) -> Self {
        Self { target, force }
    }

    pub fn target(&self) -> BatchTarget {
        self.target
    }

    pub fn force(&self) -> bool {
        self.force
    }

    pub async fn build(
        &self,
        store: &dyn RepoStore,
        cadence: &CadenceConfig,
        config: &BatchConfig,
        now: DateTime<Utc>,
    ) -> Result<CandidateSet> {
        let table = cadence.table(self.force);
        let mut seen = HashSet::new();
        let mut items = Vec::new();

        for tier in self.target.tiers() {
            for tracked in store.get_repos_needing_scan(tier, ScanType::Deep, table, now).await? {
                if seen.insert(tracked.repo.id) {
                    items.push(BatchItem {
                        repo: tracked.repo.repo_ref(),
                        tier: Some(tracked.record.tier),
                        priority: tracked.record.scan_priority,
                        source: tracked.repo.source,
                    });
                }
            }
        }

        if self.target.includes_trending() {
            for repo in store.get_trending_repos(config.trending_limit).await? {
                if seen.contains(&repo.id) {
                    continue;
                }
                let record = store.get_tier_record(repo.id).await?;
                if let Some(record) = &record
                    && !table.is_due(record, ScanType::Deep, now)
                {
                    continue;
                }
                seen.insert(repo.id);
                items.push(BatchItem {
                    repo: repo.repo_ref(),
                    tier: record.as_ref().map(|r| r.tier),
                    priority: record.map_or_else(|| ((repo.stars as f64) + 1.0).log10(), |r| r.scan_priority),
                    source: repo.source,
                });
            }
        }

        let total_repos = items.len();

        let window = config.freshness_window(self.force);
        if window > Duration::zero() {
            let since = now - window;
            let mut fresh = Vec::with_capacity(items.len());
            for item in items {
                if !store.has_recent_analysis(item.repo.id, since).await? {
                    fresh.push(item);
                }
            }
            items = fresh;
        }

        let needing_analysis = items.len();
        items.truncate(config.max_job_size);

        tracing::debug!(
            batch_target = %self.target,
            force = self.force,
            total_repos,
            needing_analysis,
            queued = items.len(),
            "Built batch candidates"
        );

        Ok(CandidateSet {
            items,
            total_repos,
            needing_analysis,
        })
    }
}
