//! Quota-aware scheduling primitives.
//!
//! This module provides:
//! - **Rate limiting**: per-channel token buckets with exact waits.
//! - **Backoff**: classification-aware retry around single external calls.
//! - **Cadence**: per-tier scan intervals (normal and forced).
//! - **Classification**: stars/velocity/engagement to tier and scan priority.
//! - **Selection**: which repositories in a tier are due for a scan.

pub mod backoff;
pub mod cadence;
pub mod classify;
pub mod rate_limit;
pub mod select;

pub use backoff::{BackoffConfig, BackoffExecutor, Retryable};
pub use cadence::{CadenceConfig, CadenceEntry, CadenceTable};
pub use classify::{
    ENGAGEMENT_MAX, ENGAGEMENT_WEIGHT, PriorityWeights, STARS_WEIGHT, Signals, TierClassifier, TierConfig, TierRule,
    VELOCITY_WEIGHT,
};
pub use rate_limit::{
    CHANNEL_LLM_ANALYSIS, CHANNEL_METRICS_CORE, CHANNEL_METRICS_SEARCH, ChannelConfig, ChannelStatus, RateLimitConfig,
    RateLimiter, TokenBucket,
};
pub use select::{ScanDueSelector, select_due_from};
