//! Tier classification and scan priority.
//!
//! Repositories are classified by:
//! - Ordered tier rules (tier 1 rules first, then tier 2, else tier 3)
//! - A weighted scan priority used only to order repositories within a tier
//!
//! Both are pure functions of (stars, growth velocity, engagement score).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Classification, Repository, Tier, TierRecord};
use crate::scheduler::cadence::CadenceTable;

/// Weight of growth velocity (stars/day) in the scan priority.
pub const VELOCITY_WEIGHT: f64 = 0.5;
/// Weight of the engagement score in the scan priority.
pub const ENGAGEMENT_WEIGHT: f64 = 0.3;
/// Weight of log10(stars + 1) in the scan priority.
pub const STARS_WEIGHT: f64 = 0.2;
/// Engagement score ceiling.
pub const ENGAGEMENT_MAX: f64 = 100.0;

/// One threshold rule. Matches when stars reach `min_stars` and, if set,
/// velocity is strictly above `min_velocity`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierRule {
    pub min_stars: u64,
    #[serde(default)]
    pub min_velocity: Option<f64>,
}

impl TierRule {
    pub fn stars(min_stars: u64) -> Self {
        Self {
            min_stars,
            min_velocity: None,
        }
    }

    pub fn stars_and_velocity(min_stars: u64, min_velocity: f64) -> Self {
        Self {
            min_stars,
            min_velocity: Some(min_velocity),
        }
    }

    pub fn matches(&self, stars: u64, velocity: f64) -> bool {
        stars >= self.min_stars && self.min_velocity.is_none_or(|min| velocity > min)
    }
}

/// Scan priority weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorityWeights {
    pub velocity: f64,
    pub engagement: f64,
    pub stars: f64,
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            velocity: VELOCITY_WEIGHT,
            engagement: ENGAGEMENT_WEIGHT,
            stars: STARS_WEIGHT,
        }
    }
}

/// Tier thresholds. Any matching rule in a list assigns that tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierConfig {
    pub tier1: Vec<TierRule>,
    pub tier2: Vec<TierRule>,
    pub weights: PriorityWeights,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            tier1: vec![TierRule::stars(50_000), TierRule::stars_and_velocity(20_000, 10.0)],
            tier2: vec![TierRule::stars(5_000), TierRule::stars_and_velocity(100, 10.0)],
            weights: PriorityWeights::default(),
        }
    }
}

/// Growth and engagement derived from a metrics snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Signals {
    /// Stars per day.
    pub growth_velocity: f64,
    pub engagement_score: f64,
}

/// Deterministic tier classifier.
#[derive(Debug, Clone)]
pub struct TierClassifier {
    config: TierConfig,
    cadence: CadenceTable,
}

impl Default for TierClassifier {
    fn default() -> Self {
        Self::new(TierConfig::default(), CadenceTable::normal())
    }
}

impl TierClassifier {
    /// `cadence` is used to fill in `next_scan_due` on refreshed records.
    pub fn new(config: TierConfig, cadence: CadenceTable) -> Self {
        Self { config, cadence }
    }

    pub fn config(&self) -> &TierConfig {
        &self.config
    }

    /// Assign a tier and scan priority.
    pub fn classify(&self, stars: u64, growth_velocity: f64, engagement_score: f64) -> Classification {
        let velocity = finite_or_zero(growth_velocity);
        let engagement = finite_or_zero(engagement_score);

        let tier = if self.config.tier1.iter().any(|r| r.matches(stars, velocity)) {
            Tier::One
        } else if self.config.tier2.iter().any(|r| r.matches(stars, velocity)) {
            Tier::Two
        } else {
            Tier::Three
        };

        Classification {
            tier,
            scan_priority: self.scan_priority(stars, velocity, engagement),
        }
    }

    /// Weighted ordering key within a tier.
    pub fn scan_priority(&self, stars: u64, growth_velocity: f64, engagement_score: f64) -> f64 {
        let w = &self.config.weights;
        w.velocity * finite_or_zero(growth_velocity)
            + w.engagement * finite_or_zero(engagement_score)
            + w.stars * ((stars as f64) + 1.0).log10()
    }

    /// Compute growth velocity and engagement for a repository.
    ///
    /// Velocity uses the provider's 7-day star delta when present, otherwise
    /// the change since the previous snapshot (over at least one day).
    pub fn derive_signals(&self, repo: &Repository, previous: Option<&TierRecord>, now: DateTime<Utc>) -> Signals {
        let growth_velocity = match (repo.stars_gained_7d, previous) {
            (Some(gained), _) => gained as f64 / 7.0,
            (None, Some(prev)) => {
                let days = ((now - prev.updated_at).num_seconds() as f64 / 86_400.0).max(1.0);
                repo.stars.saturating_sub(prev.stars_snapshot) as f64 / days
            }
            (None, None) => 0.0,
        };

        let engagement_score =
            ((repo.forks + repo.open_issues) as f64 / repo.stars.max(1) as f64 * 100.0).min(ENGAGEMENT_MAX);

        Signals {
            growth_velocity,
            engagement_score,
        }
    }

    /// Build the updated tier record for a repository with fresh metrics.
    ///
    /// Scan timestamps carry over from the previous record.
    pub fn refresh_record(&self, repo: &Repository, previous: Option<&TierRecord>, now: DateTime<Utc>) -> TierRecord {
        let signals = self.derive_signals(repo, previous, now);
        let classification = self.classify(repo.stars, signals.growth_velocity, signals.engagement_score);

        let mut record = TierRecord {
            repo_id: repo.id,
            tier: classification.tier,
            stars_snapshot: repo.stars,
            growth_velocity: signals.growth_velocity,
            engagement_score: signals.engagement_score,
            scan_priority: classification.scan_priority,
            last_deep_scan: previous.and_then(|p| p.last_deep_scan),
            last_basic_scan: previous.and_then(|p| p.last_basic_scan),
            next_scan_due: None,
            updated_at: now,
        };
        record.next_scan_due = self.cadence.next_due(&record);
        record
    }
}

fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() { v.max(0.0) } else { 0.0 }
}
