//! Tier and tier-record types
//!
//! A tier is a priority class assigned to a repository. Tier 1 is scanned most
//! often, tier 3 least often.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Priority class for a repository (1 = highest)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Tier {
    One,
    Two,
    Three,
}

impl Tier {
    /// All tiers, highest priority first
    pub const ALL: [Tier; 3] = [Tier::One, Tier::Two, Tier::Three];

    pub fn as_u8(&self) -> u8 {
        match self {
            Tier::One => 1,
            Tier::Two => 2,
            Tier::Three => 3,
        }
    }

    pub fn from_u8(n: u8) -> Option<Self> {
        match n {
            1 => Some(Tier::One),
            2 => Some(Tier::Two),
            3 => Some(Tier::Three),
            _ => None,
        }
    }
}

impl From<Tier> for u8 {
    fn from(tier: Tier) -> Self {
        tier.as_u8()
    }
}

impl TryFrom<u8> for Tier {
    type Error = String;

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        Tier::from_u8(n).ok_or_else(|| format!("invalid tier: {}", n))
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tier{}", self.as_u8())
    }
}

/// Kind of scan tracked per repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanType {
    /// Full analysis through the LLM provider
    Deep,
    /// Metrics refresh only
    Basic,
}

impl ScanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanType::Deep => "deep",
            ScanType::Basic => "basic",
        }
    }
}

/// Output of the tier classifier
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub tier: Tier,
    pub scan_priority: f64,
}

/// Persisted classification state for one repository.
///
/// Records are created on first classification, updated on every metrics
/// refresh and never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierRecord {
    pub repo_id: i64,
    pub tier: Tier,
    pub stars_snapshot: u64,
    pub growth_velocity: f64,
    pub engagement_score: f64,
    pub scan_priority: f64,
    pub last_deep_scan: Option<DateTime<Utc>>,
    pub last_basic_scan: Option<DateTime<Utc>>,
    pub next_scan_due: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl TierRecord {
    /// Timestamp of the last scan of the given type
    pub fn last_scan(&self, scan_type: ScanType) -> Option<DateTime<Utc>> {
        match scan_type {
            ScanType::Deep => self.last_deep_scan,
            ScanType::Basic => self.last_basic_scan,
        }
    }

    /// Record a completed scan
    pub fn mark_scanned(&mut self, scan_type: ScanType, at: DateTime<Utc>) {
        match scan_type {
            ScanType::Deep => self.last_deep_scan = Some(at),
            ScanType::Basic => self.last_basic_scan = Some(at),
        }
    }
}
