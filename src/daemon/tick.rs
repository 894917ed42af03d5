//! Tick - periodic scheduler work
//!
//! Each tick:
//! - Discovers trending repositories (when enabled)
//! - Refreshes metrics for unclassified and basic-scan-due repositories
//! - Reclassifies repositories with new metrics
//! - Starts a batch when due work exists and none is running

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::BatchTarget;

/// Configuration for the scheduler actor and its tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TickConfig {
    /// Logical actor name; one actor per name per process
    pub actor_name: String,
    /// Seconds between ticks
    pub tick_interval_secs: u64,
    /// Start a batch automatically when due work exists
    pub auto_batch: bool,
    pub auto_batch_target: BatchTarget,
    /// Metrics refreshes per tick
    pub basic_scan_limit: usize,
    /// Run trending discovery each tick
    pub discovery: bool,
    pub discovery_limit: usize,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            actor_name: "repowatch-scheduler".to_string(),
            tick_interval_secs: 900,
            auto_batch: true,
            auto_batch_target: BatchTarget::Visible,
            basic_scan_limit: 25,
            discovery: false,
            discovery_limit: 30,
        }
    }
}

impl TickConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    /// Set the actor name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.actor_name = name.into();
        self
    }
}

/// What happened during one tick
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    pub discovered: usize,
    pub refreshed: usize,
    pub refresh_failures: usize,
    pub classified: usize,
    /// Job picked back up from the store
    pub resumed: Option<String>,
    pub batch_started: Option<String>,
    pub next_tick_at: Option<DateTime<Utc>>,
}

/// Counters across ticks
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickState {
    pub tick_count: u64,
    pub total_refreshed: u64,
    pub total_classified: u64,
    pub total_discovered: u64,
    pub batches_started: u64,
    pub last_tick_at: Option<DateTime<Utc>>,
}

impl TickState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a finished tick into the totals
    pub fn record(&mut self, report: &TickReport, at: DateTime<Utc>) {
        self.tick_count += 1;
        self.total_refreshed += report.refreshed as u64;
        self.total_classified += report.classified as u64;
        self.total_discovered += report.discovered as u64;
        if report.batch_started.is_some() {
            self.batches_started += 1;
        }
        self.last_tick_at = Some(at);
    }

    pub fn batch_started(&mut self) {
        self.batches_started += 1;
    }
}
