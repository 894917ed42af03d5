//! Repository records and metrics snapshots

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::tier::TierRecord;

/// Minimal reference to a repository, enough to call a provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    pub id: i64,
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn new(id: i64, owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id,
            owner: owner.into(),
            name: name.into(),
        }
    }

    /// `owner/name`
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// How a repository entered the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoSource {
    /// Explicitly tracked
    Tracked,
    /// Found by trending discovery
    Trending,
}

impl RepoSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepoSource::Tracked => "tracked",
            RepoSource::Trending => "trending",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "tracked" => Some(RepoSource::Tracked),
            "trending" => Some(RepoSource::Trending),
            _ => None,
        }
    }
}

/// A repository row with its latest metrics snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub id: i64,
    pub owner: String,
    pub name: String,
    pub source: RepoSource,
    pub archived: bool,
    pub fork: bool,
    pub stars: u64,
    pub forks: u64,
    pub open_issues: u64,
    /// Stars gained over the last seven days, when the provider reports it
    pub stars_gained_7d: Option<u64>,
    pub description: Option<String>,
    /// When the snapshot above was last refreshed
    pub metrics_updated_at: Option<DateTime<Utc>>,
}

impl Repository {
    /// Create a tracked repository with an empty metrics snapshot
    pub fn new(id: i64, owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id,
            owner: owner.into(),
            name: name.into(),
            source: RepoSource::Tracked,
            archived: false,
            fork: false,
            stars: 0,
            forks: 0,
            open_issues: 0,
            stars_gained_7d: None,
            description: None,
            metrics_updated_at: None,
        }
    }

    pub fn with_source(mut self, source: RepoSource) -> Self {
        self.source = source;
        self
    }

    pub fn with_stars(mut self, stars: u64) -> Self {
        self.stars = stars;
        self
    }

    pub fn repo_ref(&self) -> RepoRef {
        RepoRef::new(self.id, self.owner.clone(), self.name.clone())
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// Archived and forked repositories never count toward tier membership,
    /// scan selection, batch candidates or statistics.
    pub fn is_eligible(&self) -> bool {
        !self.archived && !self.fork
    }

    /// Overwrite the snapshot with freshly fetched metrics
    pub fn apply_metrics(&mut self, metrics: &RepoMetrics, at: DateTime<Utc>) {
        self.stars = metrics.stars;
        self.forks = metrics.forks;
        self.open_issues = metrics.open_issues;
        self.stars_gained_7d = metrics.stars_gained_7d;
        self.archived = metrics.archived;
        self.fork = metrics.fork;
        if metrics.description.is_some() {
            self.description = metrics.description.clone();
        }
        self.metrics_updated_at = Some(at);
    }
}

/// Metrics as returned by the metrics provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepoMetrics {
    pub stars: u64,
    pub forks: u64,
    pub open_issues: u64,
    pub stars_gained_7d: Option<u64>,
    pub archived: bool,
    pub fork: bool,
    pub description: Option<String>,
    /// README excerpt used as analysis input
    pub readme: Option<String>,
}

/// A repository joined with its tier record
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedRepo {
    pub repo: Repository,
    pub record: TierRecord,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_name() {
        let repo = Repository::new(1, "tokio-rs", "tokio");
        assert_eq!(repo.full_name(), "tokio-rs/tokio");
        assert_eq!(repo.repo_ref().full_name(), "tokio-rs/tokio");
    }

    #[test]
    fn test_is_eligible_excludes_archived_and_forks() {
        let mut repo = Repository::new(1, "a", "b");
        assert!(repo.is_eligible());

        repo.archived = true;
        assert!(!repo.is_eligible());

        repo.archived = false;
        repo.fork = true;
        assert!(!repo.is_eligible());
    }

    #[test]
    fn test_apply_metrics_keeps_description_when_missing() {
        let mut repo = Repository::new(1, "a", "b");
        repo.description = Some("original".to_string());

        let metrics = RepoMetrics {
            stars: 42,
            forks: 3,
            open_issues: 7,
            stars_gained_7d: Some(5),
            ..Default::default()
        };
        let at = Utc::now();
        repo.apply_metrics(&metrics, at);

        assert_eq!(repo.stars, 42);
        assert_eq!(repo.stars_gained_7d, Some(5));
        assert_eq!(repo.description.as_deref(), Some("original"));
        assert_eq!(repo.metrics_updated_at, Some(at));
    }

    #[test]
    fn test_repo_source_round_trip_str() {
        assert_eq!(RepoSource::parse(RepoSource::Trending.as_str()), Some(RepoSource::Trending));
        assert_eq!(RepoSource::parse("other"), None);
    }
}
