//! Batch orchestrator - owns the single in-flight batch job.
//!
//! A job is executed in chunks. Each call to [`BatchOrchestrator::step`]
//! processes at most `chunk_size` items and persists the cursor after every
//! item, so a crash loses at most the item in flight. The caller schedules
//! the next step after the inter-chunk delay.
//!
//! Stop requests are observed between items only.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::candidates::{BatchConfig, CandidateBuilder};
use super::processor::ItemProcessor;
use crate::domain::{
    BatchJob, BatchProgress, BatchStartResponse, BatchStatus, CompletionReason, QueuedRepo, RepoRef,
};
use crate::error::{RepowatchError, Result};
use crate::id::{generate_batch_id, now};
use crate::scheduler::cadence::CadenceConfig;
use crate::store::RepoStore;

/// What the caller should do after a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Job still running; step again after `delay`
    Continue { delay: Duration },
    /// No running job (finished, failed, or never started)
    Finished,
}

/// Cancellation handle for the running job, usable while a step is in progress.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    armed: Arc<Mutex<Option<(String, CancellationToken)>>>,
}

impl StopSignal {
    fn arm(&self, batch_id: &str, token: CancellationToken) {
        *self.armed.lock().unwrap_or_else(|e| e.into_inner()) = Some((batch_id.to_string(), token));
    }

    fn disarm(&self) {
        *self.armed.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Cancel the running job if it has `batch_id`. Returns whether it matched.
    pub fn cancel(&self, batch_id: &str) -> bool {
        let armed = self.armed.lock().unwrap_or_else(|e| e.into_inner());
        match armed.as_ref() {
            Some((id, token)) if id == batch_id => {
                token.cancel();
                true
            }
            _ => false,
        }
    }
}

struct ActiveBatch {
    job: BatchJob,
    cancel: CancellationToken,
    current_chunk: Vec<RepoRef>,
}

/// Chunked, resumable, cancellable batch executor
pub struct BatchOrchestrator {
    store: Arc<dyn RepoStore>,
    processor: ItemProcessor,
    config: BatchConfig,
    cadence: CadenceConfig,
    active: Option<ActiveBatch>,
    stop: StopSignal,
}

impl BatchOrchestrator {
    pub fn new(processor: ItemProcessor, config: BatchConfig, cadence: CadenceConfig) -> Self {
        Self {
            store: processor.store().clone(),
            processor,
            config,
            cadence,
            active: None,
            stop: StopSignal::default(),
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Id of the current job if it is not terminal
    pub fn active_batch_id(&self) -> Option<&str> {
        self.active
            .as_ref()
            .filter(|a| !a.job.status.is_terminal())
            .map(|a| a.job.id.as_str())
    }

    pub fn is_active(&self) -> bool {
        self.active_batch_id().is_some()
    }

    /// Build candidates and create a running job.
    ///
    /// Fails with `BatchAlreadyActive` while a non-terminal job exists. With
    /// nothing to do the job is created already completed (`nothing_due`) and
    /// the response carries no batch id.
    pub async fn start(&mut self, builder: &CandidateBuilder, chunk_size: usize) -> Result<BatchStartResponse> {
        if let Some(id) = self.active_batch_id() {
            return Err(RepowatchError::BatchAlreadyActive(id.to_string()));
        }
        if let Some(job) = self.store.get_active_batch_job().await? {
            return Err(RepowatchError::BatchAlreadyActive(job.id));
        }
        if chunk_size == 0 {
            return Err(RepowatchError::InvalidState("chunk size must be at least 1".to_string()));
        }
        self.config.chunk_size = chunk_size;

        let candidates = builder
            .build(self.store.as_ref(), &self.cadence, &self.config, now())
            .await?;

        let mut job = BatchJob::new(generate_batch_id(), builder.target(), builder.force(), candidates.items);
        job.transition(BatchStatus::Running)?;

        let repositories: Vec<QueuedRepo> = job
            .items
            .iter()
            .map(|item| QueuedRepo {
                name: item.repo.full_name(),
                priority: item.priority,
                tier: item.tier,
            })
            .collect();

        if job.items.is_empty() {
            job.complete(CompletionReason::NothingDue)?;
            self.store.save_batch_job(&job).await?;
            tracing::info!(batch_id = %job.id, batch_target = %job.target, "Nothing due, batch completed immediately");

            let reason = CompletionReason::NothingDue.to_string();
            self.active = Some(ActiveBatch {
                job,
                cancel: CancellationToken::new(),
                current_chunk: Vec::new(),
            });
            return Ok(BatchStartResponse {
                batch_id: None,
                total_repos: candidates.total_repos,
                needing_analysis: candidates.needing_analysis,
                queued: 0,
                repositories,
                reason: Some(reason),
            });
        }

        self.store.save_batch_job(&job).await?;
        tracing::info!(
            batch_id = %job.id,
            batch_target = %job.target,
            force = job.force,
            queued = job.total(),
            "Batch started"
        );

        let response = BatchStartResponse {
            batch_id: Some(job.id.clone()),
            total_repos: candidates.total_repos,
            needing_analysis: candidates.needing_analysis,
            queued: job.total(),
            repositories,
            reason: None,
        };
        self.activate(job);
        Ok(response)
    }

    /// Whether `builder` would queue at least one item right now
    pub async fn has_due_work(&self, builder: &CandidateBuilder) -> Result<bool> {
        let candidates = builder
            .build(self.store.as_ref(), &self.cadence, &self.config, now())
            .await?;
        Ok(!candidates.items.is_empty())
    }

    fn activate(&mut self, job: BatchJob) {
        let cancel = CancellationToken::new();
        if job.status == BatchStatus::Stopping {
            cancel.cancel();
        }
        self.stop.arm(&job.id, cancel.clone());
        self.active = Some(ActiveBatch {
            job,
            cancel,
            current_chunk: Vec::new(),
        });
    }

    /// Process the next chunk.
    ///
    /// Per-item provider failures are counted as failed items. Any other
    /// error, including store failures, is returned with the cursor left on
    /// the item; the caller should then call [`mark_failed`](Self::mark_failed).
    pub async fn step(&mut self) -> Result<StepOutcome> {
        let chunk_size = self.config.chunk_size.max(1);
        let delay = self.config.inter_chunk_delay();

        let Some(active) = self.active.as_mut() else {
            return Ok(StepOutcome::Finished);
        };
        if active.job.status.is_terminal() {
            return Ok(StepOutcome::Finished);
        }
        if active.job.status == BatchStatus::Pending {
            active.job.transition(BatchStatus::Running)?;
        }

        let end = (active.job.cursor + chunk_size).min(active.job.total());
        active.current_chunk = active.job.items[active.job.cursor..end]
            .iter()
            .map(|item| item.repo.clone())
            .collect();

        while active.job.cursor < end {
            if active.cancel.is_cancelled() || active.job.status == BatchStatus::Stopping {
                active.job.transition(BatchStatus::Stopping)?;
                break;
            }

            let item = active.job.items[active.job.cursor].clone();
            let success = match self.processor.process(&item).await {
                Ok(()) => true,
                Err(e) if e.is_provider_failure() => {
                    tracing::warn!(
                        batch_id = %active.job.id,
                        repo = %item.repo.full_name(),
                        error = %e,
                        "Batch item failed"
                    );
                    false
                }
                Err(e) => return Err(e),
            };
            active.job.record_item(success);
            self.store.save_batch_job(&active.job).await?;
        }

        if active.cancel.is_cancelled() && active.job.status == BatchStatus::Running {
            active.job.transition(BatchStatus::Stopping)?;
        }

        if active.job.status == BatchStatus::Stopping {
            active.job.complete(CompletionReason::Cancelled)?;
        } else if active.job.is_exhausted() {
            active.job.complete(CompletionReason::Exhausted)?;
        }

        if active.job.status.is_terminal() {
            active.current_chunk.clear();
            self.store.save_batch_job(&active.job).await?;
            self.stop.disarm();
            tracing::info!(
                batch_id = %active.job.id,
                processed = active.job.cursor,
                total = active.job.total(),
                success = active.job.success_count,
                failed = active.job.failed_count,
                reason = ?active.job.reason,
                "Batch finished"
            );
            return Ok(StepOutcome::Finished);
        }

        tracing::debug!(
            batch_id = %active.job.id,
            processed = active.job.cursor,
            total = active.job.total(),
            "Chunk complete"
        );
        Ok(StepOutcome::Continue { delay })
    }

    /// Ask the job to stop. Takes effect at the next item boundary.
    pub async fn request_stop(&mut self, batch_id: &str) -> Result<BatchProgress> {
        if let Some(active) = self.active.as_mut()
            && active.job.id == batch_id
        {
            if !active.job.status.is_terminal() {
                if active.job.status == BatchStatus::Pending {
                    active.job.transition(BatchStatus::Running)?;
                }
                active.job.transition(BatchStatus::Stopping)?;
                active.cancel.cancel();
                self.store.save_batch_job(&active.job).await?;
                tracing::info!(batch_id, "Batch stop requested");
            }
            return Ok(active.job.progress(&active.current_chunk));
        }

        match self.store.get_batch_job(batch_id).await? {
            Some(job) if job.status.is_terminal() => Ok(job.progress(&[])),
            _ => Err(RepowatchError::BatchNotFound(batch_id.to_string())),
        }
    }

    /// Progress of the current (or last) job
    pub fn status(&self) -> Option<BatchProgress> {
        self.active.as_ref().map(|a| a.job.progress(&a.current_chunk))
    }

    /// Progress of the current job if it has `batch_id`
    pub fn status_of(&self, batch_id: &str) -> Option<BatchProgress> {
        self.active
            .as_ref()
            .filter(|a| a.job.id == batch_id)
            .map(|a| a.job.progress(&a.current_chunk))
    }

    /// Reload a persisted non-terminal job. Returns its id if one was found.
    pub async fn resume(&mut self) -> Result<Option<String>> {
        if let Some(id) = self.active_batch_id() {
            return Ok(Some(id.to_string()));
        }
        let Some(job) = self.store.get_active_batch_job().await? else {
            return Ok(None);
        };

        tracing::info!(
            batch_id = %job.id,
            status = %job.status,
            processed = job.cursor,
            total = job.total(),
            "Resuming batch"
        );
        let id = job.id.clone();
        self.activate(job);
        Ok(Some(id))
    }

    /// Abort the current job after a propagated error.
    pub async fn mark_failed(&mut self, error: &RepowatchError) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if active.job.status.is_terminal() {
            return;
        }

        let outcome = match active.job.status {
            BatchStatus::Stopping => active.job.complete(CompletionReason::Cancelled),
            _ => active.job.fail(error.to_string()),
        };
        if let Err(e) = outcome {
            tracing::error!(batch_id = %active.job.id, error = %e, "Could not close batch");
        }
        active.current_chunk.clear();
        self.stop.disarm();

        tracing::error!(batch_id = %active.job.id, error = %error, "Batch failed");
        if let Err(e) = self.store.save_batch_job(&active.job).await {
            tracing::error!(batch_id = %active.job.id, error = %e, "Failed to persist failed batch");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{BatchTarget, Repository, Tier, TierRecord};
    use crate::provider::{MockAnalysisProvider, MockMetricsProvider, ProviderError};
    use crate::scheduler::backoff::{BackoffConfig, BackoffExecutor};
    use crate::scheduler::rate_limit::{RateLimitConfig, RateLimiter};
    use crate::store::MemoryStore;

    struct Fixture {
        store: Arc<MemoryStore>,
        analysis: Arc<MockAnalysisProvider>,
        orchestrator: BatchOrchestrator,
    }

    async fn fixture(priorities: &[(i64, f64)]) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        for (id, priority) in priorities {
            store
                .upsert_repository(&Repository::new(*id, "o", format!("r{}", id)))
                .await
                .unwrap();
            store
                .save_tier_record(&TierRecord {
                    repo_id: *id,
                    tier: Tier::One,
                    stars_snapshot: 0,
                    growth_velocity: 0.0,
                    engagement_score: 0.0,
                    scan_priority: *priority,
                    last_deep_scan: None,
                    last_basic_scan: None,
                    next_scan_due: None,
                    updated_at: now(),
                })
                .await
                .unwrap();
        }

        let analysis = Arc::new(MockAnalysisProvider::new());
        let processor = ItemProcessor::new(
            store.clone(),
            Arc::new(MockMetricsProvider::new()),
            analysis.clone(),
            Arc::new(RateLimiter::new(&RateLimitConfig::default())),
            BackoffExecutor::new(BackoffConfig::new(10, 100, 0, 1)),
        );
        let config = BatchConfig {
            inter_chunk_delay_ms: 500,
            ..Default::default()
        };
        Fixture {
            store,
            analysis,
            orchestrator: BatchOrchestrator::new(processor, config, CadenceConfig::default()),
        }
    }

    fn builder() -> CandidateBuilder {
        CandidateBuilder::new(BatchTarget::Tier1, false)
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunked_execution_in_priority_order() {
        let mut f = fixture(&[(1, 9.0), (2, 5.0), (3, 1.0)]).await;

        let response = f.orchestrator.start(&builder(), 2).await.unwrap();
        assert_eq!(response.queued, 3);
        let names: Vec<&str> = response.repositories.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["o/r1", "o/r2", "o/r3"]);

        let outcome = f.orchestrator.step().await.unwrap();
        assert_eq!(
            outcome,
            StepOutcome::Continue {
                delay: Duration::from_millis(500)
            }
        );
        let progress = f.orchestrator.status().unwrap();
        assert_eq!(progress.processed, 2);
        assert_eq!(progress.status, BatchStatus::Running);

        assert_eq!(f.orchestrator.step().await.unwrap(), StepOutcome::Finished);
        let progress = f.orchestrator.status().unwrap();
        assert_eq!(progress.processed, 3);
        assert_eq!(progress.success_count, 3);
        assert_eq!(progress.status, BatchStatus::Completed);
        assert_eq!(progress.reason, Some(CompletionReason::Exhausted));
        assert_eq!(f.analysis.analyzed(), vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_rejected_while_active() {
        let mut f = fixture(&[(1, 1.0)]).await;
        let first = f.orchestrator.start(&builder(), 2).await.unwrap();

        let err = f.orchestrator.start(&builder(), 2).await.unwrap_err();
        match err {
            RepowatchError::BatchAlreadyActive(id) => assert_eq!(Some(id), first.batch_id),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_nothing_due_completes_immediately() {
        let mut f = fixture(&[]).await;
        let response = f.orchestrator.start(&builder(), 2).await.unwrap();

        assert_eq!(response.batch_id, None);
        assert_eq!(response.queued, 0);
        assert!(response.reason.is_some());

        let progress = f.orchestrator.status().unwrap();
        assert_eq!(progress.status, BatchStatus::Completed);
        assert_eq!(progress.processed, 0);
        assert_eq!(progress.total, 0);
        assert_eq!(progress.reason, Some(CompletionReason::NothingDue));
        assert!(!f.orchestrator.is_active());
        assert_eq!(f.orchestrator.step().await.unwrap(), StepOutcome::Finished);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_completes_at_item_boundary() {
        let mut f = fixture(&[(1, 3.0), (2, 2.0), (3, 1.0)]).await;
        let id = f.orchestrator.start(&builder(), 2).await.unwrap().batch_id.unwrap();
        f.orchestrator.step().await.unwrap();

        let progress = f.orchestrator.request_stop(&id).await.unwrap();
        assert_eq!(progress.status, BatchStatus::Stopping);

        assert_eq!(f.orchestrator.step().await.unwrap(), StepOutcome::Finished);
        let progress = f.orchestrator.status().unwrap();
        assert_eq!(progress.status, BatchStatus::Completed);
        assert_eq!(progress.reason, Some(CompletionReason::Cancelled));
        assert_eq!(progress.processed, 2);

        let stored = f.store.get_batch_job(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, BatchStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_signal_cancels_running_chunk() {
        let mut f = fixture(&[(1, 3.0), (2, 2.0)]).await;
        let id = f.orchestrator.start(&builder(), 2).await.unwrap().batch_id.unwrap();

        assert!(f.orchestrator.stop_signal().cancel(&id));
        assert!(!f.orchestrator.stop_signal().cancel("other"));

        assert_eq!(f.orchestrator.step().await.unwrap(), StepOutcome::Finished);
        let progress = f.orchestrator.status().unwrap();
        assert_eq!(progress.processed, 0);
        assert_eq!(progress.reason, Some(CompletionReason::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_item_failures_are_counted() {
        let mut f = fixture(&[(1, 2.0), (2, 1.0)]).await;
        f.analysis.fail_always(1, ProviderError::api(404, "gone"));
        f.orchestrator.start(&builder(), 5).await.unwrap();

        assert_eq!(f.orchestrator.step().await.unwrap(), StepOutcome::Finished);
        let progress = f.orchestrator.status().unwrap();
        assert_eq!(progress.success_count, 1);
        assert_eq!(progress.failed_count, 1);
        assert_eq!(progress.status, BatchStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_failure_fails_job_without_advancing() {
        let mut f = fixture(&[(1, 2.0), (2, 1.0)]).await;
        let id = f.orchestrator.start(&builder(), 5).await.unwrap().batch_id.unwrap();
        f.store.reject_analyses(true);

        let err = f.orchestrator.step().await.unwrap_err();
        assert!(matches!(err, RepowatchError::Persistence(_)));
        let progress = f.orchestrator.status().unwrap();
        assert_eq!(progress.processed, 0);
        assert_eq!(progress.failed_count, 0);

        f.orchestrator.mark_failed(&err).await;
        let stored = f.store.get_batch_job(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, BatchStatus::Failed);
        assert_eq!(stored.cursor, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_persisted_job() {
        let mut f = fixture(&[(1, 2.0), (2, 1.0)]).await;
        let id = f.orchestrator.start(&builder(), 1).await.unwrap().batch_id.unwrap();
        f.orchestrator.step().await.unwrap();

        // Fresh orchestrator over the same store, as after a restart
        let processor = f.orchestrator.processor.clone();
        let mut restarted = BatchOrchestrator::new(processor, f.orchestrator.config.clone(), CadenceConfig::default());
        assert_eq!(restarted.resume().await.unwrap(), Some(id.clone()));
        assert_eq!(restarted.status_of(&id).unwrap().processed, 1);

        assert_eq!(restarted.step().await.unwrap(), StepOutcome::Finished);
        let stored = f.store.get_batch_job(&id).await.unwrap().unwrap();
        assert_eq!(stored.cursor, 2);
        assert_eq!(stored.status, BatchStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mark_failed() {
        let mut f = fixture(&[(1, 1.0)]).await;
        let id = f.orchestrator.start(&builder(), 1).await.unwrap().batch_id.unwrap();

        f.orchestrator
            .mark_failed(&RepowatchError::Persistence("disk full".to_string()))
            .await;

        let progress = f.orchestrator.status().unwrap();
        assert_eq!(progress.status, BatchStatus::Failed);
        assert!(matches!(progress.reason, Some(CompletionReason::Error(_))));
        assert_eq!(f.store.get_batch_job(&id).await.unwrap().unwrap().status, BatchStatus::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_has_due_work() {
        let f = fixture(&[(1, 1.0)]).await;
        assert!(f.orchestrator.has_due_work(&builder()).await.unwrap());
        assert!(
            !f.orchestrator
                .has_due_work(&CandidateBuilder::new(BatchTarget::Tier2, false))
                .await
                .unwrap()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_unknown_batch() {
        let mut f = fixture(&[]).await;
        let err = f.orchestrator.request_stop("batch-missing").await.unwrap_err();
        assert!(matches!(err, RepowatchError::BatchNotFound(_)));
    }
}
