//! Per-repository work: every external call goes through the rate limiter
//! and the backoff executor before its result is persisted.

use std::sync::Arc;

use crate::domain::{AnalysisRecord, BatchItem, RepoMetrics, RepoRef, Repository, ScanType};
use crate::error::Result;
use crate::id::now;
use crate::provider::{AnalysisProvider, MetricsProvider};
use crate::scheduler::backoff::BackoffExecutor;
use crate::scheduler::rate_limit::{CHANNEL_LLM_ANALYSIS, CHANNEL_METRICS_CORE, CHANNEL_METRICS_SEARCH, RateLimiter};
use crate::store::RepoStore;

/// Shared collaborators for metrics refresh and analysis
#[derive(Clone)]
pub struct ItemProcessor {
    store: Arc<dyn RepoStore>,
    metrics: Arc<dyn MetricsProvider>,
    analysis: Arc<dyn AnalysisProvider>,
    limiter: Arc<RateLimiter>,
    backoff: BackoffExecutor,
}

impl ItemProcessor {
    pub fn new(
        store: Arc<dyn RepoStore>,
        metrics: Arc<dyn MetricsProvider>,
        analysis: Arc<dyn AnalysisProvider>,
        limiter: Arc<RateLimiter>,
        backoff: BackoffExecutor,
    ) -> Self {
        Self {
            store,
            metrics,
            analysis,
            limiter,
            backoff,
        }
    }

    pub fn store(&self) -> &Arc<dyn RepoStore> {
        &self.store
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Fetch fresh metrics on the core channel and store them.
    ///
    /// Returns the updated row, or None when the repo is not in the store.
    pub async fn refresh_metrics(&self, repo: &RepoRef) -> Result<(Option<Repository>, RepoMetrics)> {
        self.limiter.acquire(CHANNEL_METRICS_CORE).await;
        let provider = self.metrics.as_ref();
        // GET is idempotent
        let metrics = self.backoff.execute(move || provider.fetch_metrics(repo)).await?;
        let updated = self.store.update_metrics(repo.id, &metrics, now()).await?;
        Ok((updated, metrics))
    }

    /// Search for trending repositories on the search channel and store them.
    ///
    /// Already known repositories keep their source; only metrics are refreshed.
    pub async fn discover_trending(&self, limit: usize) -> Result<Vec<Repository>> {
        self.limiter.acquire(CHANNEL_METRICS_SEARCH).await;
        let provider = self.metrics.as_ref();
        let found = self.backoff.execute(move || provider.search_trending(limit)).await?;

        let mut stored = Vec::with_capacity(found.len());
        for repo in found {
            let merged = match self.store.get_repository(repo.id).await? {
                Some(mut existing) => {
                    let metrics = RepoMetrics {
                        stars: repo.stars,
                        forks: repo.forks,
                        open_issues: repo.open_issues,
                        stars_gained_7d: repo.stars_gained_7d,
                        archived: repo.archived,
                        fork: repo.fork,
                        description: repo.description.clone(),
                        readme: None,
                    };
                    existing.apply_metrics(&metrics, repo.metrics_updated_at.unwrap_or_else(now));
                    existing
                }
                None => repo,
            };
            self.store.upsert_repository(&merged).await?;
            stored.push(merged);
        }
        Ok(stored)
    }

    /// README excerpt on the core channel. Only deep scans need it.
    pub async fn fetch_readme(&self, repo: &RepoRef) -> Result<Option<String>> {
        self.limiter.acquire(CHANNEL_METRICS_CORE).await;
        let provider = self.metrics.as_ref();
        Ok(self.backoff.execute(move || provider.fetch_readme(repo)).await?)
    }

    /// Deep scan of one batch item: metrics, README, analysis, persistence.
    pub async fn process(&self, item: &BatchItem) -> Result<()> {
        let repo = &item.repo;
        let (_, mut metrics) = self.refresh_metrics(repo).await?;
        metrics.readme = self.fetch_readme(repo).await?;

        self.limiter.acquire(CHANNEL_LLM_ANALYSIS).await;
        let content = analysis_input(repo, &metrics);
        let provider = self.analysis.as_ref();
        let input = content.as_str();
        // Analysis has no side effects on the provider, so retrying is safe
        let result = self.backoff.execute(move || provider.analyze(repo, input)).await?;

        let at = now();
        self.store.save_analysis(&AnalysisRecord::new(repo.id, result, at)).await?;
        self.store.mark_repo_scanned(repo.id, ScanType::Deep, at).await?;
        Ok(())
    }
}

/// Text handed to the analysis provider
pub fn analysis_input(repo: &RepoRef, metrics: &RepoMetrics) -> String {
    let mut out = format!(
        "Name: {}\nStars: {}\nForks: {}\nOpen issues: {}\n",
        repo.full_name(),
        metrics.stars,
        metrics.forks,
        metrics.open_issues
    );
    if let Some(gained) = metrics.stars_gained_7d {
        out.push_str(&format!("Stars gained (7d): {}\n", gained));
    }
    if let Some(description) = &metrics.description {
        out.push_str(&format!("Description: {}\n", description));
    }
    if let Some(readme) = &metrics.readme {
        out.push_str("\nREADME:\n");
        out.push_str(readme);
    }
    out
}
