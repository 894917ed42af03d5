//! Scan cadence tables.
//!
//! Each tier has a minimum interval between deep scans and between basic
//! scans. Forced selection uses its own, shorter table; the normal table is
//! never modified.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ScanType, Tier, TierRecord};

/// Intervals for one tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CadenceEntry {
    pub deep_scan_interval_hours: u32,
    pub basic_scan_interval_hours: u32,
}

impl CadenceEntry {
    pub fn new(deep_scan_interval_hours: u32, basic_scan_interval_hours: u32) -> Self {
        Self {
            deep_scan_interval_hours,
            basic_scan_interval_hours,
        }
    }
}

/// Tier → intervals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CadenceTable {
    pub tier1: CadenceEntry,
    pub tier2: CadenceEntry,
    pub tier3: CadenceEntry,
}

impl CadenceTable {
    /// Default table for regular scheduling.
    pub fn normal() -> Self {
        Self {
            tier1: CadenceEntry::new(24, 6),
            tier2: CadenceEntry::new(72, 24),
            tier3: CadenceEntry::new(168, 72),
        }
    }

    /// Default table for forced selection.
    pub fn forced() -> Self {
        Self {
            tier1: CadenceEntry::new(1, 1),
            tier2: CadenceEntry::new(6, 3),
            tier3: CadenceEntry::new(24, 12),
        }
    }

    pub fn entry(&self, tier: Tier) -> &CadenceEntry {
        match tier {
            Tier::One => &self.tier1,
            Tier::Two => &self.tier2,
            Tier::Three => &self.tier3,
        }
    }

    /// Minimum age before a scan of `scan_type` is due again.
    pub fn interval(&self, tier: Tier, scan_type: ScanType) -> Duration {
        let entry = self.entry(tier);
        let hours = match scan_type {
            ScanType::Deep => entry.deep_scan_interval_hours,
            ScanType::Basic => entry.basic_scan_interval_hours,
        };
        Duration::hours(hours as i64)
    }

    /// Whether a scan is due: never scanned, or last scan at least one interval old.
    pub fn is_due(&self, record: &TierRecord, scan_type: ScanType, now: DateTime<Utc>) -> bool {
        match record.last_scan(scan_type) {
            None => true,
            Some(last) => now - last >= self.interval(record.tier, scan_type),
        }
    }

    /// Earliest time either scan type comes due. None means due now.
    pub fn next_due(&self, record: &TierRecord) -> Option<DateTime<Utc>> {
        let deep = record
            .last_deep_scan
            .map(|t| t + self.interval(record.tier, ScanType::Deep));
        let basic = record
            .last_basic_scan
            .map(|t| t + self.interval(record.tier, ScanType::Basic));
        match (deep, basic) {
            (Some(d), Some(b)) => Some(d.min(b)),
            _ => None,
        }
    }

    /// Lower tiers must not be scanned less often than higher ones.
    pub fn is_monotonic(&self) -> bool {
        let ordered = |a: &CadenceEntry, b: &CadenceEntry| {
            a.deep_scan_interval_hours <= b.deep_scan_interval_hours
                && a.basic_scan_interval_hours <= b.basic_scan_interval_hours
        };
        ordered(&self.tier1, &self.tier2) && ordered(&self.tier2, &self.tier3)
    }
}

/// Normal and forced cadence tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CadenceConfig {
    pub normal: CadenceTable,
    pub forced: CadenceTable,
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            normal: CadenceTable::normal(),
            forced: CadenceTable::forced(),
        }
    }
}

impl CadenceConfig {
    /// Table to use for a selection.
    pub fn table(&self, force: bool) -> &CadenceTable {
        if force { &self.forced } else { &self.normal }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(tier: Tier, deep: Option<DateTime<Utc>>, basic: Option<DateTime<Utc>>) -> TierRecord {
        TierRecord {
            repo_id: 1,
            tier,
            stars_snapshot: 0,
            growth_velocity: 0.0,
            engagement_score: 0.0,
            scan_priority: 0.0,
            last_deep_scan: deep,
            last_basic_scan: basic,
            next_scan_due: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_defaults_are_monotonic() {
        assert!(CadenceTable::normal().is_monotonic());
        assert!(CadenceTable::forced().is_monotonic());
    }

    #[test]
    fn test_interval_lookup() {
        let table = CadenceTable::normal();
        assert_eq!(table.interval(Tier::One, ScanType::Deep), Duration::hours(24));
        assert_eq!(table.interval(Tier::Three, ScanType::Basic), Duration::hours(72));
    }

    #[test]
    fn test_never_scanned_is_due() {
        let table = CadenceTable::normal();
        assert!(table.is_due(&record(Tier::Three, None, None), ScanType::Deep, Utc::now()));
    }

    #[test]
    fn test_recent_scan_not_due_unless_forced() {
        let now = Utc::now();
        let rec = record(Tier::One, Some(now - Duration::hours(2)), None);
        let config = CadenceConfig::default();

        assert!(!config.table(false).is_due(&rec, ScanType::Deep, now));
        assert!(config.table(true).is_due(&rec, ScanType::Deep, now));
    }

    #[test]
    fn test_forced_table_does_not_mutate_normal() {
        let config = CadenceConfig::default();
        let _ = config.table(true);
        assert_eq!(config.normal, CadenceTable::normal());
    }

    #[test]
    fn test_next_due_is_earliest() {
        let now = Utc::now();
        let rec = record(Tier::One, Some(now), Some(now));
        assert_eq!(CadenceTable::normal().next_due(&rec), Some(now + Duration::hours(6)));
        assert_eq!(CadenceTable::normal().next_due(&record(Tier::One, None, Some(now))), None);
    }
}
