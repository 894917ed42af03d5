//! Scheduler actor - the single serializing coordinator
//!
//! One tokio task per logical name drains a command channel in arrival
//! order, so the active batch job and the rate budgets have exactly one
//! writer. [`SchedulerHandle`] is the cloneable front door.
//!
//! Batch jobs advance by continuation: after a step that leaves the job
//! running, a timer task posts a `Step` command back after the inter-chunk
//! delay. Other commands interleave between steps.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::tick::{TickConfig, TickReport, TickState};
use crate::batch::{BatchOrchestrator, CandidateBuilder, ItemProcessor, StepOutcome, StopSignal};
use crate::config::Config;
use crate::domain::{BatchProgress, BatchStartResponse, BatchTarget, RepoRef, ScanType, Tier};
use crate::error::{RepowatchError, Result};
use crate::id::now;
use crate::provider::{AnalysisProvider, MetricsProvider};
use crate::scheduler::{BackoffExecutor, ChannelStatus, RateLimiter, ScanDueSelector, TierClassifier};
use crate::store::{RepoStore, TierCounts};

const COMMAND_BUFFER: usize = 64;

/// External collaborators handed to the actor at construction
#[derive(Clone)]
pub struct SchedulerDeps {
    pub store: Arc<dyn RepoStore>,
    pub metrics: Arc<dyn MetricsProvider>,
    pub analysis: Arc<dyn AnalysisProvider>,
}

/// Snapshot returned by [`SchedulerHandle::stats`]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStats {
    pub actor: String,
    pub tiers: TierCounts,
    pub channels: Vec<ChannelStatus>,
    /// Current or most recent batch of this actor
    pub batch: Option<BatchProgress>,
    pub ticks: TickState,
}

enum Command {
    Init {
        reply: oneshot::Sender<Result<DateTime<Utc>>>,
    },
    Tick {
        reply: oneshot::Sender<Result<TickReport>>,
    },
    BatchStart {
        target: BatchTarget,
        force: bool,
        reply: oneshot::Sender<Result<BatchStartResponse>>,
    },
    BatchStatus {
        batch_id: String,
        reply: oneshot::Sender<Result<BatchProgress>>,
    },
    BatchStop {
        batch_id: String,
        reply: oneshot::Sender<Result<BatchProgress>>,
    },
    Stats {
        reply: oneshot::Sender<Result<SchedulerStats>>,
    },
    Step,
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

struct Registered {
    tx: mpsc::WeakSender<Command>,
    stop: StopSignal,
}

impl Registered {
    fn handle(&self, name: &str) -> Option<SchedulerHandle> {
        let tx = self.tx.upgrade().filter(|tx| !tx.is_closed())?;
        Some(SchedulerHandle {
            name: name.to_string(),
            tx,
            stop: self.stop.clone(),
        })
    }

    fn is_live(&self) -> bool {
        self.tx.upgrade().is_some_and(|tx| !tx.is_closed())
    }
}

static REGISTRY: LazyLock<Mutex<HashMap<String, Registered>>> = LazyLock::new(|| Mutex::new(HashMap::new()));

fn registry() -> MutexGuard<'static, HashMap<String, Registered>> {
    REGISTRY.lock().unwrap_or_else(|e| e.into_inner())
}

/// Cloneable handle to a running scheduler actor
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    name: String,
    tx: mpsc::Sender<Command>,
    stop: StopSignal,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Command::Init { .. } => "Init",
            Command::Tick { .. } => "Tick",
            Command::BatchStart { .. } => "BatchStart",
            Command::BatchStatus { .. } => "BatchStatus",
            Command::BatchStop { .. } => "BatchStop",
            Command::Stats { .. } => "Stats",
            Command::Step => "Step",
            Command::Shutdown { .. } => "Shutdown",
        };
        f.write_str(name)
    }
}

impl SchedulerHandle {
    /// Handle to the live actor registered under `name`, if any
    pub fn lookup(name: &str) -> Option<Self> {
        registry().get(name).and_then(|r| r.handle(name))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn closed(&self) -> RepowatchError {
        RepowatchError::ActorClosed(self.name.clone())
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(command(reply)).await.map_err(|_| self.closed())?;
        rx.await.map_err(|_| self.closed())
    }

    /// Resume any persisted job and return the next tick time
    pub async fn init(&self) -> Result<DateTime<Utc>> {
        self.request(|reply| Command::Init { reply }).await?
    }

    pub async fn tick(&self) -> Result<TickReport> {
        self.request(|reply| Command::Tick { reply }).await?
    }

    pub async fn batch_start(&self, target: BatchTarget, force: bool) -> Result<BatchStartResponse> {
        self.request(|reply| Command::BatchStart { target, force, reply })
            .await?
    }

    /// Progress of `batch_id`.
    ///
    /// Ids this actor is not tracking still resolve when the store holds them
    /// as finished jobs, so older completed ids keep answering. Unknown ids and
    /// unfinished jobs owned elsewhere return `BatchNotFound`.
    pub async fn batch_status(&self, batch_id: &str) -> Result<BatchProgress> {
        let batch_id = batch_id.to_string();
        self.request(|reply| Command::BatchStatus { batch_id, reply }).await?
    }

    /// Stop a batch. A chunk already in progress sees the request at its
    /// next item boundary.
    pub async fn batch_stop(&self, batch_id: &str) -> Result<BatchProgress> {
        self.stop.cancel(batch_id);
        let batch_id = batch_id.to_string();
        self.request(|reply| Command::BatchStop { batch_id, reply }).await?
    }

    pub async fn stats(&self) -> Result<SchedulerStats> {
        self.request(|reply| Command::Stats { reply }).await?
    }

    /// Stop the actor. A running job stays persisted and resumes on the next init.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    /// Init, then tick every `interval` until `shutdown` fires.
    pub async fn run_until_cancelled(&self, interval: Duration, shutdown: CancellationToken) -> Result<()> {
        let next_tick_at = self.init().await?;
        tracing::info!(actor = %self.name, %next_tick_at, "Scheduler initialized");

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(report) => tracing::debug!(actor = %self.name, ?report, "Tick complete"),
                        Err(e @ RepowatchError::ActorClosed(_)) => return Err(e),
                        Err(e) => tracing::warn!(actor = %self.name, error = %e, "Tick failed"),
                    }
                }
            }
        }

        self.shutdown().await
    }
}

/// The actor state. Constructed and driven only through [`SchedulerActor::spawn`].
pub struct SchedulerActor {
    name: String,
    config: TickConfig,
    store: Arc<dyn RepoStore>,
    processor: ItemProcessor,
    orchestrator: BatchOrchestrator,
    classifier: TierClassifier,
    selector: ScanDueSelector,
    rx: mpsc::Receiver<Command>,
    tx: mpsc::WeakSender<Command>,
    step_pending: bool,
    state: TickState,
}

impl SchedulerActor {
    /// Start the actor for `config.scheduler.actor_name`.
    ///
    /// If a live actor already has that name its handle is returned and
    /// `deps` are dropped.
    pub fn spawn(config: &Config, deps: SchedulerDeps) -> SchedulerHandle {
        let name = config.scheduler.actor_name.clone();
        let mut registry = registry();
        registry.retain(|_, r| r.is_live());
        if let Some(handle) = registry.get(&name).and_then(|r| r.handle(&name)) {
            tracing::debug!(actor = %name, "Scheduler actor already running");
            return handle;
        }

        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let limiter = Arc::new(RateLimiter::new(&config.rate_limits));
        let processor = ItemProcessor::new(
            deps.store.clone(),
            deps.metrics,
            deps.analysis,
            limiter,
            BackoffExecutor::new(config.backoff.clone()),
        );
        let orchestrator = BatchOrchestrator::new(processor.clone(), config.batch.clone(), config.cadence.clone());
        let stop = orchestrator.stop_signal();
        let selector = ScanDueSelector::new(deps.store.clone(), config.cadence.clone());

        let actor = SchedulerActor {
            name: name.clone(),
            config: config.scheduler.clone(),
            store: deps.store,
            processor,
            orchestrator,
            classifier: TierClassifier::new(config.tiers.clone(), config.cadence.normal.clone()),
            selector,
            rx,
            tx: tx.downgrade(),
            step_pending: false,
            state: TickState::new(),
        };

        registry.insert(
            name.clone(),
            Registered {
                tx: tx.downgrade(),
                stop: stop.clone(),
            },
        );
        drop(registry);

        tokio::spawn(actor.run());
        tracing::info!(actor = %name, "Scheduler actor started");

        SchedulerHandle { name, tx, stop }
    }

    async fn run(mut self) {
        while let Some(command) = self.rx.recv().await {
            tracing::trace!(actor = %self.name, ?command, "Command received");
            if !self.handle(command).await {
                break;
            }
        }
        self.close();
        tracing::info!(actor = %self.name, "Scheduler actor stopped");
    }

    fn close(&mut self) {
        self.rx.close();
        registry().retain(|_, r| r.is_live());
    }

    /// Returns false when the actor should exit
    async fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Init { reply } => {
                let _ = reply.send(self.init().await);
            }
            Command::Tick { reply } => {
                let _ = reply.send(self.tick().await);
            }
            Command::BatchStart { target, force, reply } => {
                let result = self.start(&CandidateBuilder::new(target, force)).await;
                if let Ok(response) = &result
                    && response.batch_id.is_some()
                {
                    self.state.batch_started();
                }
                let _ = reply.send(result);
            }
            Command::BatchStatus { batch_id, reply } => {
                let _ = reply.send(self.batch_status(&batch_id).await);
            }
            Command::BatchStop { batch_id, reply } => {
                let _ = reply.send(self.orchestrator.request_stop(&batch_id).await);
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.stats().await);
            }
            Command::Step => self.step().await,
            Command::Shutdown { reply } => {
                tracing::info!(actor = %self.name, "Shutdown requested");
                self.close();
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn next_tick_at(&self) -> DateTime<Utc> {
        now() + chrono::Duration::seconds(self.config.tick_interval_secs as i64)
    }

    async fn init(&mut self) -> Result<DateTime<Utc>> {
        if let Some(batch_id) = self.orchestrator.resume().await? {
            tracing::info!(actor = %self.name, batch_id = %batch_id, "Continuing persisted batch");
            self.schedule_step(Duration::ZERO);
        }
        Ok(self.next_tick_at())
    }

    async fn tick(&mut self) -> Result<TickReport> {
        let mut report = TickReport::default();

        if !self.orchestrator.is_active() {
            report.resumed = self.orchestrator.resume().await?;
        }
        if self.orchestrator.is_active() {
            self.schedule_step(Duration::ZERO);
        }

        if self.config.discovery {
            match self.processor.discover_trending(self.config.discovery_limit).await {
                Ok(found) => report.discovered = found.len(),
                Err(e) => tracing::warn!(actor = %self.name, error = %e, "Trending discovery failed"),
            }
        }

        let mut budget = self.config.basic_scan_limit;

        // Never-fetched repos need a snapshot before they can be tiered
        let unfetched: Vec<RepoRef> = self
            .store
            .get_repos_needing_classification()
            .await?
            .into_iter()
            .filter(|repo| repo.metrics_updated_at.is_none())
            .map(|repo| repo.repo_ref())
            .collect();
        for repo in unfetched {
            if budget == 0 {
                break;
            }
            budget -= 1;
            self.refresh(&repo, &mut report).await?;
        }

        'tiers: for tier in Tier::ALL {
            let due = self.selector.select_due_repos(tier, ScanType::Basic, false).await?;
            for tracked in due {
                if budget == 0 {
                    break 'tiers;
                }
                budget -= 1;
                if self.refresh(&tracked.repo.repo_ref(), &mut report).await? {
                    self.store
                        .mark_repo_scanned(tracked.repo.id, ScanType::Basic, now())
                        .await?;
                }
            }
        }

        let at = now();
        for repo in self.store.get_repos_needing_classification().await? {
            let previous = self.store.get_tier_record(repo.id).await?;
            let record = self.classifier.refresh_record(&repo, previous.as_ref(), at);
            if let Some(previous) = &previous
                && previous.tier != record.tier
            {
                tracing::info!(
                    repo = %repo.full_name(),
                    from = %previous.tier,
                    to = %record.tier,
                    "Tier changed"
                );
            }
            self.store.save_tier_record(&record).await?;
            report.classified += 1;
        }

        if self.config.auto_batch && !self.orchestrator.is_active() {
            let builder = CandidateBuilder::new(self.config.auto_batch_target, false);
            if self.orchestrator.has_due_work(&builder).await? {
                report.batch_started = self.start(&builder).await?.batch_id;
            }
        }

        report.next_tick_at = Some(self.next_tick_at());
        self.state.record(&report, now());
        tracing::info!(
            actor = %self.name,
            discovered = report.discovered,
            refreshed = report.refreshed,
            refresh_failures = report.refresh_failures,
            classified = report.classified,
            batch_started = ?report.batch_started,
            "Tick finished"
        );
        Ok(report)
    }

    /// Metrics refresh for one repo. Provider failures are counted, not returned.
    async fn refresh(&self, repo: &RepoRef, report: &mut TickReport) -> Result<bool> {
        match self.processor.refresh_metrics(repo).await {
            Ok(_) => {
                report.refreshed += 1;
                Ok(true)
            }
            Err(e) if e.is_provider_failure() => {
                tracing::warn!(repo = %repo.full_name(), error = %e, "Metrics refresh failed");
                report.refresh_failures += 1;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn start(&mut self, builder: &CandidateBuilder) -> Result<BatchStartResponse> {
        let chunk_size = self.orchestrator.config().chunk_size;
        let response = self.orchestrator.start(builder, chunk_size).await?;
        if response.batch_id.is_some() {
            self.schedule_step(Duration::ZERO);
        }
        Ok(response)
    }

    /// Tracked job first, then a finished job from the store.
    async fn batch_status(&self, batch_id: &str) -> Result<BatchProgress> {
        if let Some(progress) = self.orchestrator.status_of(batch_id) {
            return Ok(progress);
        }
        match self.store.get_batch_job(batch_id).await? {
            Some(job) if job.status.is_terminal() => Ok(job.progress(&[])),
            _ => Err(RepowatchError::BatchNotFound(batch_id.to_string())),
        }
    }

    async fn stats(&self) -> Result<SchedulerStats> {
        Ok(SchedulerStats {
            actor: self.name.clone(),
            tiers: self.store.tier_counts().await?,
            channels: self.processor.limiter().statuses(),
            batch: self.orchestrator.status(),
            ticks: self.state.clone(),
        })
    }

    async fn step(&mut self) {
        self.step_pending = false;
        match self.orchestrator.step().await {
            Ok(StepOutcome::Continue { delay }) => self.schedule_step(delay),
            Ok(StepOutcome::Finished) => {}
            Err(e) => self.orchestrator.mark_failed(&e).await,
        }
    }

    /// Post a `Step` back to this actor after `delay`. At most one is in flight.
    fn schedule_step(&mut self, delay: Duration) {
        if self.step_pending {
            return;
        }
        self.step_pending = true;
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(Command::Step).await;
            }
        });
    }
}
