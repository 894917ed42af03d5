//! Domain types for Repowatch
//!
//! This module contains all core domain types:
//! - Repository / RepoRef / RepoMetrics: what is watched and its latest snapshot
//! - Tier / TierRecord: classification state driving scan frequency
//! - BatchJob: one resumable analysis pass
//! - AnalysisRecord: stored provider verdicts

pub mod analysis;
pub mod batch;
pub mod repo;
pub mod tier;

pub use analysis::{AnalysisRecord, AnalysisResult};
pub use batch::{
    BatchItem, BatchJob, BatchProgress, BatchStartResponse, BatchStatus, BatchTarget, CompletionReason, QueuedRepo,
};
pub use repo::{RepoMetrics, RepoRef, RepoSource, Repository, TrackedRepo};
pub use tier::{Classification, ScanType, Tier, TierRecord};
