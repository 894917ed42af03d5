//! In-memory RepoStore.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{RepoStore, TierCounts};
use crate::domain::{
    AnalysisRecord, BatchJob, RepoMetrics, RepoSource, Repository, ScanType, Tier, TierRecord, TrackedRepo,
};
use crate::error::{RepowatchError, Result};

#[derive(Default)]
struct Tables {
    repos: HashMap<i64, Repository>,
    tiers: HashMap<i64, TierRecord>,
    analyses: HashMap<i64, Vec<AnalysisRecord>>,
    jobs: HashMap<String, BatchJob>,
}

/// Store backed by process memory. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    reject_analyses: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `save_analysis` fail, as a store that has gone away would
    pub fn reject_analyses(&self, reject: bool) {
        self.reject_analyses.store(reject, Ordering::SeqCst);
    }

    /// Number of stored analyses for a repository
    pub async fn analysis_count(&self, repo_id: i64) -> usize {
        self.tables.read().await.analyses.get(&repo_id).map_or(0, Vec::len)
    }
}

#[async_trait]
impl RepoStore for MemoryStore {
    async fn upsert_repository(&self, repo: &Repository) -> Result<()> {
        self.tables.write().await.repos.insert(repo.id, repo.clone());
        Ok(())
    }

    async fn get_repository(&self, id: i64) -> Result<Option<Repository>> {
        Ok(self.tables.read().await.repos.get(&id).cloned())
    }

    async fn update_metrics(&self, id: i64, metrics: &RepoMetrics, at: DateTime<Utc>) -> Result<Option<Repository>> {
        let mut tables = self.tables.write().await;
        Ok(tables.repos.get_mut(&id).map(|repo| {
            repo.apply_metrics(metrics, at);
            repo.clone()
        }))
    }

    async fn get_tier_record(&self, id: i64) -> Result<Option<TierRecord>> {
        Ok(self.tables.read().await.tiers.get(&id).cloned())
    }

    async fn save_tier_record(&self, record: &TierRecord) -> Result<()> {
        self.tables.write().await.tiers.insert(record.repo_id, record.clone());
        Ok(())
    }

    async fn get_repos_by_tier(&self, tier: Tier) -> Result<Vec<TrackedRepo>> {
        let tables = self.tables.read().await;
        let mut members: Vec<TrackedRepo> = tables
            .tiers
            .values()
            .filter(|record| record.tier == tier)
            .filter_map(|record| {
                tables
                    .repos
                    .get(&record.repo_id)
                    .filter(|repo| repo.is_eligible())
                    .map(|repo| TrackedRepo {
                        repo: repo.clone(),
                        record: record.clone(),
                    })
            })
            .collect();
        members.sort_by_key(|t| t.repo.id);
        Ok(members)
    }

    async fn mark_repo_scanned(&self, id: i64, scan_type: ScanType, at: DateTime<Utc>) -> Result<()> {
        if let Some(record) = self.tables.write().await.tiers.get_mut(&id) {
            record.mark_scanned(scan_type, at);
        }
        Ok(())
    }

    async fn get_repos_needing_classification(&self) -> Result<Vec<Repository>> {
        let tables = self.tables.read().await;
        let mut repos: Vec<Repository> = tables
            .repos
            .values()
            .filter(|repo| repo.is_eligible())
            .filter(|repo| match tables.tiers.get(&repo.id) {
                None => true,
                Some(record) => repo.metrics_updated_at.is_some_and(|at| at > record.updated_at),
            })
            .cloned()
            .collect();
        repos.sort_by_key(|r| r.id);
        Ok(repos)
    }

    async fn get_trending_repos(&self, limit: usize) -> Result<Vec<Repository>> {
        let tables = self.tables.read().await;
        let mut repos: Vec<Repository> = tables
            .repos
            .values()
            .filter(|repo| repo.is_eligible() && repo.source == RepoSource::Trending)
            .cloned()
            .collect();
        repos.sort_by(|a, b| b.stars.cmp(&a.stars).then_with(|| a.id.cmp(&b.id)));
        repos.truncate(limit);
        Ok(repos)
    }

    async fn save_analysis(&self, record: &AnalysisRecord) -> Result<()> {
        if self.reject_analyses.load(Ordering::SeqCst) {
            return Err(RepowatchError::Persistence("analysis table unavailable".to_string()));
        }
        self.tables
            .write()
            .await
            .analyses
            .entry(record.repo_id)
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn latest_analysis(&self, repo_id: i64) -> Result<Option<AnalysisRecord>> {
        let tables = self.tables.read().await;
        Ok(tables
            .analyses
            .get(&repo_id)
            .and_then(|records| records.iter().max_by_key(|r| r.analyzed_at))
            .cloned())
    }

    async fn has_recent_analysis(&self, repo_id: i64, since: DateTime<Utc>) -> Result<bool> {
        let tables = self.tables.read().await;
        Ok(tables
            .analyses
            .get(&repo_id)
            .is_some_and(|records| records.iter().any(|r| r.analyzed_at >= since)))
    }

    async fn save_batch_job(&self, job: &BatchJob) -> Result<()> {
        self.tables.write().await.jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get_batch_job(&self, id: &str) -> Result<Option<BatchJob>> {
        Ok(self.tables.read().await.jobs.get(id).cloned())
    }

    async fn get_active_batch_job(&self) -> Result<Option<BatchJob>> {
        let tables = self.tables.read().await;
        Ok(tables
            .jobs
            .values()
            .filter(|job| !job.status.is_terminal())
            .max_by_key(|job| job.created_at)
            .cloned())
    }

    async fn tier_counts(&self) -> Result<TierCounts> {
        let tables = self.tables.read().await;
        let mut counts = TierCounts::default();
        for record in tables.tiers.values() {
            if tables.repos.get(&record.repo_id).is_some_and(|r| r.is_eligible()) {
                counts.add(record.tier);
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AnalysisResult, BatchStatus, BatchTarget};
    use crate::scheduler::cadence::CadenceTable;
    use chrono::Duration;

    fn record(repo_id: i64, tier: Tier, priority: f64) -> TierRecord {
        TierRecord {
            repo_id,
            tier,
            stars_snapshot: 0,
            growth_velocity: 0.0,
            engagement_score: 0.0,
            scan_priority: priority,
            last_deep_scan: None,
            last_basic_scan: None,
            next_scan_due: None,
            updated_at: Utc::now(),
        }
    }

    fn analysis(repo_id: i64, at: DateTime<Utc>) -> AnalysisRecord {
        AnalysisRecord::new(
            repo_id,
            AnalysisResult {
                summary: "ok".to_string(),
                score: 5.0,
                tags: vec![],
                model: "mock".to_string(),
            },
            at,
        )
    }

    #[tokio::test]
    async fn test_get_repos_by_tier_excludes_ineligible() {
        let store = MemoryStore::new();
        let mut archived = Repository::new(2, "a", "archived");
        archived.archived = true;
        store.upsert_repository(&Repository::new(1, "a", "live")).await.unwrap();
        store.upsert_repository(&archived).await.unwrap();
        store.save_tier_record(&record(1, Tier::One, 1.0)).await.unwrap();
        store.save_tier_record(&record(2, Tier::One, 1.0)).await.unwrap();

        let members = store.get_repos_by_tier(Tier::One).await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].repo.id, 1);
        assert_eq!(store.tier_counts().await.unwrap().tier1, 1);
    }

    #[tokio::test]
    async fn test_default_needing_scan_uses_selector_order() {
        let store = MemoryStore::new();
        for (id, priority) in [(1, 1.0), (2, 9.0), (3, 5.0)] {
            store.upsert_repository(&Repository::new(id, "a", format!("r{}", id))).await.unwrap();
            store.save_tier_record(&record(id, Tier::One, priority)).await.unwrap();
        }

        let due = store
            .get_repos_needing_scan(Tier::One, ScanType::Deep, &CadenceTable::normal(), Utc::now())
            .await
            .unwrap();
        let ids: Vec<i64> = due.iter().map(|t| t.repo.id).collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }

    #[tokio::test]
    async fn test_mark_scanned_without_record_is_noop() {
        let store = MemoryStore::new();
        store.mark_repo_scanned(42, ScanType::Deep, Utc::now()).await.unwrap();
        assert!(store.get_tier_record(42).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_needing_classification() {
        let store = MemoryStore::new();
        store.upsert_repository(&Repository::new(1, "a", "new")).await.unwrap();
        store.upsert_repository(&Repository::new(2, "a", "classified")).await.unwrap();
        store.save_tier_record(&record(2, Tier::Three, 0.0)).await.unwrap();

        let ids: Vec<i64> = store
            .get_repos_needing_classification()
            .await
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![1]);

        store
            .update_metrics(2, &RepoMetrics::default(), Utc::now() + Duration::seconds(5))
            .await
            .unwrap();
        assert_eq!(store.get_repos_needing_classification().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_recent_analysis_window() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.save_analysis(&analysis(1, now - Duration::hours(30))).await.unwrap();

        assert!(!store.has_recent_analysis(1, now - Duration::hours(24)).await.unwrap());
        assert!(store.has_recent_analysis(1, now - Duration::hours(48)).await.unwrap());
        assert!(!store.has_recent_analysis(2, now - Duration::hours(48)).await.unwrap());
    }

    #[tokio::test]
    async fn test_active_batch_job() {
        let store = MemoryStore::new();
        let mut done = BatchJob::new("done", BatchTarget::All, false, vec![]);
        done.transition(BatchStatus::Running).unwrap();
        done.complete(crate::domain::CompletionReason::Exhausted).unwrap();
        let mut running = BatchJob::new("running", BatchTarget::All, false, vec![]);
        running.transition(BatchStatus::Running).unwrap();

        store.save_batch_job(&done).await.unwrap();
        assert!(store.get_active_batch_job().await.unwrap().is_none());

        store.save_batch_job(&running).await.unwrap();
        let active = store.get_active_batch_job().await.unwrap().unwrap();
        assert_eq!(active.id, "running");
        assert!(store.get_batch_job("missing").await.unwrap().is_none());
    }
}
