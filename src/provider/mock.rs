//! Scripted providers for tests and dry runs.
//!
//! Both mocks count calls and can be told to fail specific repositories,
//! either once per queued error or on every call.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{AnalysisProvider, MetricsProvider, ProviderError};
use crate::domain::{AnalysisResult, RepoMetrics, RepoRef, Repository};

#[derive(Default)]
struct FailurePlan {
    queued: HashMap<i64, VecDeque<ProviderError>>,
    always: HashMap<i64, ProviderError>,
}

impl FailurePlan {
    fn next(&mut self, id: i64) -> Option<ProviderError> {
        if let Some(err) = self.always.get(&id) {
            return Some(err.clone());
        }
        self.queued.get_mut(&id).and_then(VecDeque::pop_front)
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Metrics provider returning canned snapshots
#[derive(Default)]
pub struct MockMetricsProvider {
    metrics: Mutex<HashMap<i64, RepoMetrics>>,
    trending: Mutex<Vec<Repository>>,
    readmes: Mutex<HashMap<i64, String>>,
    failures: Mutex<FailurePlan>,
    delay: Option<Duration>,
    calls: AtomicU32,
    readme_calls: AtomicU32,
    search_calls: AtomicU32,
}

impl MockMetricsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metrics(self, id: i64, metrics: RepoMetrics) -> Self {
        lock(&self.metrics).insert(id, metrics);
        self
    }

    pub fn with_trending(self, repos: Vec<Repository>) -> Self {
        *lock(&self.trending) = repos;
        self
    }

    pub fn with_readme(self, id: i64, readme: impl Into<String>) -> Self {
        lock(&self.readmes).insert(id, readme.into());
        self
    }

    /// Simulated latency per call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail the next call for `id` with `err`
    pub fn fail_next(&self, id: i64, err: ProviderError) {
        lock(&self.failures).queued.entry(id).or_default().push_back(err);
    }

    /// Fail every call for `id` with `err`
    pub fn fail_always(&self, id: i64, err: ProviderError) {
        lock(&self.failures).always.insert(id, err);
    }

    pub fn set_metrics(&self, id: i64, metrics: RepoMetrics) {
        lock(&self.metrics).insert(id, metrics);
    }

    /// Total fetch_metrics calls
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn readme_calls(&self) -> u32 {
        self.readme_calls.load(Ordering::SeqCst)
    }

    pub fn search_calls(&self) -> u32 {
        self.search_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricsProvider for MockMetricsProvider {
    async fn fetch_metrics(&self, repo: &RepoRef) -> Result<RepoMetrics, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = lock(&self.failures).next(repo.id) {
            return Err(err);
        }
        Ok(lock(&self.metrics).get(&repo.id).cloned().unwrap_or_default())
    }

    async fn fetch_readme(&self, repo: &RepoRef) -> Result<Option<String>, ProviderError> {
        self.readme_calls.fetch_add(1, Ordering::SeqCst);
        Ok(lock(&self.readmes).get(&repo.id).cloned())
    }

    async fn search_trending(&self, limit: usize) -> Result<Vec<Repository>, ProviderError> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        Ok(lock(&self.trending).iter().take(limit).cloned().collect())
    }
}

/// Analysis provider returning a fixed verdict
#[derive(Default)]
pub struct MockAnalysisProvider {
    failures: Mutex<FailurePlan>,
    analyzed: Mutex<Vec<i64>>,
    delay: Option<Duration>,
    calls: AtomicU32,
}

impl MockAnalysisProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fail_next(&self, id: i64, err: ProviderError) {
        lock(&self.failures).queued.entry(id).or_default().push_back(err);
    }

    pub fn fail_always(&self, id: i64, err: ProviderError) {
        lock(&self.failures).always.insert(id, err);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Repo ids successfully analyzed, in call order
    pub fn analyzed(&self) -> Vec<i64> {
        lock(&self.analyzed).clone()
    }
}

#[async_trait]
impl AnalysisProvider for MockAnalysisProvider {
    async fn analyze(&self, repo: &RepoRef, content: &str) -> Result<AnalysisResult, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = lock(&self.failures).next(repo.id) {
            return Err(err);
        }
        lock(&self.analyzed).push(repo.id);
        Ok(AnalysisResult {
            summary: format!("{} ({} bytes reviewed)", repo.full_name(), content.len()),
            score: 5.0,
            tags: Vec::new(),
            model: self.model().to_string(),
        })
    }

    fn model(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_metrics_failures_then_success() {
        let provider = MockMetricsProvider::new().with_metrics(
            1,
            RepoMetrics {
                stars: 10,
                ..Default::default()
            },
        );
        provider.fail_next(1, ProviderError::api(503, "down"));
        let repo = RepoRef::new(1, "a", "b");

        assert!(provider.fetch_metrics(&repo).await.is_err());
        assert_eq!(provider.fetch_metrics(&repo).await.unwrap().stars, 10);
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_analysis_fail_always() {
        let provider = MockAnalysisProvider::new();
        provider.fail_always(2, ProviderError::api(404, "gone"));

        assert!(provider.analyze(&RepoRef::new(2, "a", "b"), "").await.is_err());
        assert!(provider.analyze(&RepoRef::new(2, "a", "b"), "").await.is_err());
        assert!(provider.analyze(&RepoRef::new(3, "a", "c"), "").await.is_ok());
        assert_eq!(provider.analyzed(), vec![3]);
        assert_eq!(provider.calls(), 3);
    }
}
