//! Per-channel token buckets for external API quotas.
//!
//! Each external quota (core metrics API, search API, LLM analysis) gets its own
//! bucket with an independent capacity and refill rate. Refill is lazy: tokens
//! are recomputed from elapsed time whenever a bucket is touched, there is no
//! background timer. Running out of tokens is a wait, never an error.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Repository metrics API (core quota).
pub const CHANNEL_METRICS_CORE: &str = "metrics-core";
/// Repository search API (separate, smaller quota).
pub const CHANNEL_METRICS_SEARCH: &str = "metrics-search";
/// LLM analysis API.
pub const CHANNEL_LLM_ANALYSIS: &str = "llm-analysis";

/// Budget for one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Maximum tokens the bucket holds.
    pub capacity: u32,
    /// Time to regenerate one token (milliseconds).
    pub refill_interval_ms: u64,
}

impl ChannelConfig {
    pub fn new(capacity: u32, refill_interval_ms: u64) -> Self {
        Self {
            capacity,
            refill_interval_ms,
        }
    }

    /// `n` calls per minute, starting with a full minute of burst.
    pub fn per_minute(n: u32) -> Self {
        let n = n.max(1);
        Self::new(n, 60_000 / n as u64)
    }
}

/// Rate limit configuration keyed by channel name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RateLimitConfig {
    pub channels: HashMap<String, ChannelConfig>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let mut channels = HashMap::new();
        // 5000/hour core quota
        channels.insert(CHANNEL_METRICS_CORE.to_string(), ChannelConfig::new(80, 720));
        channels.insert(CHANNEL_METRICS_SEARCH.to_string(), ChannelConfig::per_minute(30));
        channels.insert(CHANNEL_LLM_ANALYSIS.to_string(), ChannelConfig::per_minute(50));
        Self { channels }
    }
}

impl RateLimitConfig {
    /// Empty configuration (every channel unlimited).
    pub fn empty() -> Self {
        Self {
            channels: HashMap::new(),
        }
    }

    /// Add or replace a channel budget.
    pub fn with_channel(mut self, channel: impl Into<String>, config: ChannelConfig) -> Self {
        self.channels.insert(channel.into(), config);
        self
    }
}

/// Observability snapshot for a channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelStatus {
    pub channel: String,
    /// Whole tokens available right now.
    pub available: u32,
    pub max: u32,
    /// Milliseconds until the bucket is full again (0 if full).
    pub next_reset_eta_ms: u64,
}

/// Token bucket state for one channel.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: u32,
    tokens: f64,
    refill_interval: Duration,
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(config: &ChannelConfig, now: Instant) -> Self {
        Self {
            capacity: config.capacity,
            tokens: config.capacity as f64,
            refill_interval: Duration::from_millis(config.refill_interval_ms),
            last_refill: now,
        }
    }

    /// Add tokens for the time elapsed since the last refill, capped at capacity.
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        if self.refill_interval.is_zero() {
            self.tokens = self.capacity as f64;
        } else {
            let gained = elapsed.as_secs_f64() / self.refill_interval.as_secs_f64();
            self.tokens = (self.tokens + gained).min(self.capacity as f64);
        }
        self.last_refill = now;
    }

    /// Refill then take one token if available.
    fn try_take(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Time until one whole token is available.
    fn wait_time(&mut self, now: Instant) -> Duration {
        self.refill(now);
        if self.tokens >= 1.0 {
            Duration::ZERO
        } else {
            self.refill_interval.mul_f64(1.0 - self.tokens)
        }
    }

    fn status(&mut self, channel: &str, now: Instant) -> ChannelStatus {
        self.refill(now);
        let missing = self.capacity as f64 - self.tokens;
        ChannelStatus {
            channel: channel.to_string(),
            available: self.tokens.floor() as u32,
            max: self.capacity,
            next_reset_eta_ms: ceil_millis(self.refill_interval.mul_f64(missing.max(0.0))),
        }
    }

    /// Current token count (fractional).
    pub fn tokens(&self) -> f64 {
        self.tokens
    }
}

fn ceil_millis(d: Duration) -> u64 {
    (d.as_secs_f64() * 1000.0).ceil() as u64
}

/// Multi-channel rate limiter.
///
/// The bucket map sits behind a synchronous mutex that is never held across an
/// await point, so refill-then-decrement for a channel is atomic with respect
/// to every other caller.
#[derive(Debug)]
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, TokenBucket>>,
}

impl RateLimiter {
    /// Create a limiter with every configured bucket full.
    pub fn new(config: &RateLimitConfig) -> Self {
        let now = Instant::now();
        let buckets = config
            .channels
            .iter()
            .map(|(name, channel)| (name.clone(), TokenBucket::new(channel, now)))
            .collect();
        Self {
            buckets: Mutex::new(buckets),
        }
    }

    fn buckets(&self) -> MutexGuard<'_, HashMap<String, TokenBucket>> {
        self.buckets.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Take a token, suspending until one is available.
    ///
    /// Unknown channels are treated as unlimited.
    pub async fn acquire(&self, channel: &str) {
        loop {
            let wait = {
                let mut buckets = self.buckets();
                let Some(bucket) = buckets.get_mut(channel) else {
                    tracing::warn!(channel, "No rate budget configured for channel, not limiting");
                    return;
                };
                let now = Instant::now();
                if bucket.try_take(now) {
                    return;
                }
                bucket.wait_time(now)
            };

            tracing::debug!(
                channel,
                wait_ms = ceil_millis(wait),
                "Rate budget exhausted, waiting for refill"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Whether a token is available right now. Does not consume it.
    pub fn check_limit(&self, channel: &str) -> bool {
        let mut buckets = self.buckets();
        match buckets.get_mut(channel) {
            Some(bucket) => bucket.wait_time(Instant::now()).is_zero(),
            None => true,
        }
    }

    /// Milliseconds until a token is available (0 if available now).
    pub fn get_wait_time(&self, channel: &str) -> u64 {
        let mut buckets = self.buckets();
        match buckets.get_mut(channel) {
            Some(bucket) => ceil_millis(bucket.wait_time(Instant::now())),
            None => 0,
        }
    }

    /// Snapshot of a channel, None if the channel is not configured.
    pub fn get_status(&self, channel: &str) -> Option<ChannelStatus> {
        let mut buckets = self.buckets();
        buckets
            .get_mut(channel)
            .map(|bucket| bucket.status(channel, Instant::now()))
    }

    /// Snapshot of every configured channel, sorted by name.
    pub fn statuses(&self) -> Vec<ChannelStatus> {
        let now = Instant::now();
        let mut buckets = self.buckets();
        let mut statuses: Vec<ChannelStatus> = buckets
            .iter_mut()
            .map(|(name, bucket)| bucket.status(name, now))
            .collect();
        statuses.sort_by(|a, b| a.channel.cmp(&b.channel));
        statuses
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter_5_per_minute() -> RateLimiter {
        RateLimiter::new(&RateLimitConfig::empty().with_channel("test", ChannelConfig::per_minute(5)))
    }

    #[test]
    fn test_channel_config_per_minute() {
        let config = ChannelConfig::per_minute(5);
        assert_eq!(config.capacity, 5);
        assert_eq!(config.refill_interval_ms, 12_000);
    }

    #[test]
    fn test_default_config_has_all_channels() {
        let config = RateLimitConfig::default();
        assert!(config.channels.contains_key(CHANNEL_METRICS_CORE));
        assert!(config.channels.contains_key(CHANNEL_METRICS_SEARCH));
        assert!(config.channels.contains_key(CHANNEL_LLM_ANALYSIS));
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_acquires_without_waiting() {
        let limiter = limiter_5_per_minute();
        let start = Instant::now();

        for _ in 0..5 {
            limiter.acquire("test").await;
        }

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(!limiter.check_limit("test"));
        assert!(limiter.get_wait_time("test") > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sixth_acquire_suspends_until_refill() {
        let limiter = limiter_5_per_minute();
        for _ in 0..5 {
            limiter.acquire("test").await;
        }

        assert_eq!(limiter.get_wait_time("test"), 12_000);

        let start = Instant::now();
        limiter.acquire("test").await;
        assert!(start.elapsed() >= Duration::from_millis(12_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_time_decreases_with_elapsed_time() {
        let limiter = limiter_5_per_minute();
        for _ in 0..5 {
            limiter.acquire("test").await;
        }

        let first = limiter.get_wait_time("test");
        tokio::time::advance(Duration::from_millis(1_000)).await;
        let second = limiter.get_wait_time("test");
        tokio::time::advance(Duration::from_millis(1_000)).await;
        let third = limiter.get_wait_time("test");

        assert!(first > second);
        assert!(second > third);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokens_never_exceed_capacity() {
        let limiter = limiter_5_per_minute();
        limiter.acquire("test").await;

        tokio::time::advance(Duration::from_secs(3_600)).await;

        let status = limiter.get_status("test").unwrap();
        assert_eq!(status.available, 5);
        assert_eq!(status.max, 5);
        assert_eq!(status.next_reset_eta_ms, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_limit_does_not_consume() {
        let limiter = limiter_5_per_minute();
        for _ in 0..10 {
            assert!(limiter.check_limit("test"));
        }
        assert_eq!(limiter.get_status("test").unwrap().available, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_channels_are_independent() {
        let limiter = RateLimiter::new(
            &RateLimitConfig::empty()
                .with_channel("a", ChannelConfig::per_minute(1))
                .with_channel("b", ChannelConfig::per_minute(1)),
        );

        limiter.acquire("a").await;
        assert!(!limiter.check_limit("a"));
        assert!(limiter.check_limit("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_channel_is_unlimited() {
        let limiter = limiter_5_per_minute();
        for _ in 0..100 {
            limiter.acquire("unknown").await;
        }
        assert!(limiter.check_limit("unknown"));
        assert_eq!(limiter.get_wait_time("unknown"), 0);
        assert!(limiter.get_status("unknown").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_reports_reset_eta() {
        let limiter = limiter_5_per_minute();
        limiter.acquire("test").await;
        limiter.acquire("test").await;

        let status = limiter.get_status("test").unwrap();
        assert_eq!(status.available, 3);
        assert_eq!(status.next_reset_eta_ms, 24_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_statuses_sorted() {
        let limiter = RateLimiter::new(&RateLimitConfig::default());
        let names: Vec<String> = limiter.statuses().into_iter().map(|s| s.channel).collect();
        assert_eq!(
            names,
            vec![
                CHANNEL_LLM_ANALYSIS.to_string(),
                CHANNEL_METRICS_CORE.to_string(),
                CHANNEL_METRICS_SEARCH.to_string()
            ]
        );
    }
}
