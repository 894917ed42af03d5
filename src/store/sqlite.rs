//! SQLite-backed RepoStore.
//!
//! Each table keeps the full record as a JSON payload plus the handful of
//! columns needed for filtering and ordering. Timestamps are stored as
//! microseconds since the Unix epoch.

use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::de::DeserializeOwned;

use super::{RepoStore, TierCounts};
use crate::domain::{
    AnalysisRecord, BatchJob, RepoMetrics, RepoSource, Repository, ScanType, Tier, TierRecord, TrackedRepo,
};
use crate::error::{RepowatchError, Result};

/// Shared eligibility predicate over the `repositories` alias `r`
const ELIGIBLE: &str = "r.archived = 0 AND r.fork = 0";

/// SQLite store behind a mutex. The lock is only held for synchronous
/// statement execution.
pub struct SqliteStore {
    db: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a database file, creating parent directories as needed.
    pub fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let db = Connection::open(path)?;
        Self::from_connection(db)
    }

    /// Fresh database that lives as long as the store.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(db: Connection) -> Result<Self> {
        Self::init_schema(&db)?;
        Ok(Self { db: Mutex::new(db) })
    }

    fn init_schema(db: &Connection) -> Result<()> {
        db.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS repositories (
                id INTEGER PRIMARY KEY,
                source TEXT NOT NULL,
                archived INTEGER NOT NULL,
                fork INTEGER NOT NULL,
                stars INTEGER NOT NULL,
                metrics_updated_at INTEGER,
                json_data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tier_records (
                repo_id INTEGER PRIMARY KEY,
                tier INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                json_data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS analyses (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                repo_id INTEGER NOT NULL,
                analyzed_at INTEGER NOT NULL,
                json_data TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS batch_jobs (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                json_data TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_repos_source ON repositories(source);
            CREATE INDEX IF NOT EXISTS idx_tiers_tier ON tier_records(tier);
            CREATE INDEX IF NOT EXISTS idx_analyses_repo ON analyses(repo_id, analyzed_at);
            CREATE INDEX IF NOT EXISTS idx_jobs_status ON batch_jobs(status);
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|e| RepowatchError::Persistence(format!("database lock poisoned: {}", e)))
    }

    fn write_repository(db: &Connection, repo: &Repository) -> Result<()> {
        db.execute(
            r#"
            INSERT OR REPLACE INTO repositories
            (id, source, archived, fork, stars, metrics_updated_at, json_data)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                repo.id,
                repo.source.as_str(),
                repo.archived,
                repo.fork,
                repo.stars as i64,
                repo.metrics_updated_at.map(|t| t.timestamp_micros()),
                serde_json::to_string(repo)?,
            ],
        )?;
        Ok(())
    }

    fn read_repository(db: &Connection, id: i64) -> Result<Option<Repository>> {
        let json: Option<String> = db
            .query_row("SELECT json_data FROM repositories WHERE id = ?1", [id], |row| row.get(0))
            .optional()?;
        json.map(|j| decode(&j)).transpose()
    }

    fn query_json<P: rusqlite::Params>(db: &Connection, sql: &str, params: P) -> Result<Vec<String>> {
        let mut stmt = db.prepare(sql)?;
        let rows = stmt.query_map(params, |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

fn decode<T: DeserializeOwned>(json: &str) -> Result<T> {
    Ok(serde_json::from_str(json)?)
}

#[async_trait]
impl RepoStore for SqliteStore {
    async fn upsert_repository(&self, repo: &Repository) -> Result<()> {
        let db = self.conn()?;
        Self::write_repository(&db, repo)
    }

    async fn get_repository(&self, id: i64) -> Result<Option<Repository>> {
        let db = self.conn()?;
        Self::read_repository(&db, id)
    }

    async fn update_metrics(&self, id: i64, metrics: &RepoMetrics, at: DateTime<Utc>) -> Result<Option<Repository>> {
        let db = self.conn()?;
        let Some(mut repo) = Self::read_repository(&db, id)? else {
            return Ok(None);
        };
        repo.apply_metrics(metrics, at);
        Self::write_repository(&db, &repo)?;
        Ok(Some(repo))
    }

    async fn get_tier_record(&self, id: i64) -> Result<Option<TierRecord>> {
        let db = self.conn()?;
        let json: Option<String> = db
            .query_row("SELECT json_data FROM tier_records WHERE repo_id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()?;
        json.map(|j| decode(&j)).transpose()
    }

    async fn save_tier_record(&self, record: &TierRecord) -> Result<()> {
        let db = self.conn()?;
        db.execute(
            "INSERT OR REPLACE INTO tier_records (repo_id, tier, updated_at, json_data) VALUES (?1, ?2, ?3, ?4)",
            params![
                record.repo_id,
                record.tier.as_u8(),
                record.updated_at.timestamp_micros(),
                serde_json::to_string(record)?,
            ],
        )?;
        Ok(())
    }

    async fn get_repos_by_tier(&self, tier: Tier) -> Result<Vec<TrackedRepo>> {
        let db = self.conn()?;
        let sql = format!(
            "SELECT r.json_data, t.json_data FROM tier_records t \
             JOIN repositories r ON r.id = t.repo_id \
             WHERE t.tier = ?1 AND {} ORDER BY r.id",
            ELIGIBLE
        );
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map([tier.as_u8()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut members = Vec::new();
        for row in rows {
            let (repo_json, record_json) = row?;
            members.push(TrackedRepo {
                repo: decode(&repo_json)?,
                record: decode(&record_json)?,
            });
        }
        Ok(members)
    }

    async fn mark_repo_scanned(&self, id: i64, scan_type: ScanType, at: DateTime<Utc>) -> Result<()> {
        let db = self.conn()?;
        let json: Option<String> = db
            .query_row("SELECT json_data FROM tier_records WHERE repo_id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()?;
        let Some(json) = json else {
            return Ok(());
        };

        let mut record: TierRecord = decode(&json)?;
        record.mark_scanned(scan_type, at);
        db.execute(
            "UPDATE tier_records SET json_data = ?1 WHERE repo_id = ?2",
            params![serde_json::to_string(&record)?, id],
        )?;
        Ok(())
    }

    async fn get_repos_needing_classification(&self) -> Result<Vec<Repository>> {
        let db = self.conn()?;
        let sql = format!(
            "SELECT r.json_data FROM repositories r \
             LEFT JOIN tier_records t ON t.repo_id = r.id \
             WHERE {} AND (t.repo_id IS NULL \
                OR (r.metrics_updated_at IS NOT NULL AND r.metrics_updated_at > t.updated_at)) \
             ORDER BY r.id",
            ELIGIBLE
        );
        Self::query_json(&db, &sql, params![])?.iter().map(|j| decode(j)).collect()
    }

    async fn get_trending_repos(&self, limit: usize) -> Result<Vec<Repository>> {
        let db = self.conn()?;
        let sql = format!(
            "SELECT r.json_data FROM repositories r WHERE r.source = ?1 AND {} \
             ORDER BY r.stars DESC, r.id LIMIT ?2",
            ELIGIBLE
        );
        Self::query_json(&db, &sql, params![RepoSource::Trending.as_str(), limit as i64])?
            .iter()
            .map(|j| decode(j))
            .collect()
    }

    async fn save_analysis(&self, record: &AnalysisRecord) -> Result<()> {
        let db = self.conn()?;
        db.execute(
            "INSERT INTO analyses (repo_id, analyzed_at, json_data) VALUES (?1, ?2, ?3)",
            params![
                record.repo_id,
                record.analyzed_at.timestamp_micros(),
                serde_json::to_string(record)?,
            ],
        )?;
        Ok(())
    }

    async fn latest_analysis(&self, repo_id: i64) -> Result<Option<AnalysisRecord>> {
        let db = self.conn()?;
        let json: Option<String> = db
            .query_row(
                "SELECT json_data FROM analyses WHERE repo_id = ?1 ORDER BY analyzed_at DESC, id DESC LIMIT 1",
                [repo_id],
                |row| row.get(0),
            )
            .optional()?;
        json.map(|j| decode(&j)).transpose()
    }

    async fn has_recent_analysis(&self, repo_id: i64, since: DateTime<Utc>) -> Result<bool> {
        let db = self.conn()?;
        let exists: bool = db.query_row(
            "SELECT EXISTS(SELECT 1 FROM analyses WHERE repo_id = ?1 AND analyzed_at >= ?2)",
            params![repo_id, since.timestamp_micros()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    async fn save_batch_job(&self, job: &BatchJob) -> Result<()> {
        let db = self.conn()?;
        db.execute(
            "INSERT OR REPLACE INTO batch_jobs (id, status, created_at, json_data) VALUES (?1, ?2, ?3, ?4)",
            params![
                job.id,
                job.status.as_str(),
                job.created_at.timestamp_micros(),
                serde_json::to_string(job)?,
            ],
        )?;
        Ok(())
    }

    async fn get_batch_job(&self, id: &str) -> Result<Option<BatchJob>> {
        let db = self.conn()?;
        let json: Option<String> = db
            .query_row("SELECT json_data FROM batch_jobs WHERE id = ?1", [id], |row| row.get(0))
            .optional()?;
        json.map(|j| decode(&j)).transpose()
    }

    async fn get_active_batch_job(&self) -> Result<Option<BatchJob>> {
        let db = self.conn()?;
        let json: Option<String> = db
            .query_row(
                "SELECT json_data FROM batch_jobs WHERE status IN ('pending', 'running', 'stopping') \
                 ORDER BY created_at DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        json.map(|j| decode(&j)).transpose()
    }

    async fn tier_counts(&self) -> Result<TierCounts> {
        let db = self.conn()?;
        let sql = format!(
            "SELECT t.tier, COUNT(*) FROM tier_records t \
             JOIN repositories r ON r.id = t.repo_id WHERE {} GROUP BY t.tier",
            ELIGIBLE
        );
        let mut stmt = db.prepare(&sql)?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, u8>(0)?, row.get::<_, i64>(1)?)))?;

        let mut counts = TierCounts::default();
        for row in rows {
            let (tier, count) = row?;
            let count = count.max(0) as u64;
            match Tier::from_u8(tier) {
                Some(Tier::One) => counts.tier1 = count,
                Some(Tier::Two) => counts.tier2 = count,
                Some(Tier::Three) => counts.tier3 = count,
                None => tracing::warn!(tier, "Ignoring tier record with unknown tier"),
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AnalysisResult, BatchStatus, BatchTarget};
    use chrono::Duration;
    use tempfile::TempDir;

    fn record(repo_id: i64, tier: Tier) -> TierRecord {
        TierRecord {
            repo_id,
            tier,
            stars_snapshot: 0,
            growth_velocity: 0.0,
            engagement_score: 0.0,
            scan_priority: 1.0,
            last_deep_scan: None,
            last_basic_scan: None,
            next_scan_due: None,
            updated_at: Utc::now(),
        }
    }

    fn open_temp() -> (TempDir, SqliteStore) {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open_at(&dir.path().join("db").join("repowatch.db")).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_repository_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("repowatch.db");
        {
            let store = SqliteStore::open_at(&path).unwrap();
            store
                .upsert_repository(&Repository::new(1, "tokio-rs", "tokio").with_stars(25_000))
                .await
                .unwrap();
        }

        let store = SqliteStore::open_at(&path).unwrap();
        let repo = store.get_repository(1).await.unwrap().unwrap();
        assert_eq!(repo.full_name(), "tokio-rs/tokio");
        assert_eq!(repo.stars, 25_000);
        assert!(store.get_repository(2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eligibility_filter_applies_to_queries() {
        let (_dir, store) = open_temp();
        let mut fork = Repository::new(2, "a", "fork").with_source(RepoSource::Trending);
        fork.fork = true;
        store.upsert_repository(&Repository::new(1, "a", "live")).await.unwrap();
        store.upsert_repository(&fork).await.unwrap();
        store.save_tier_record(&record(1, Tier::Two)).await.unwrap();
        store.save_tier_record(&record(2, Tier::Two)).await.unwrap();

        let members = store.get_repos_by_tier(Tier::Two).await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(store.tier_counts().await.unwrap(), TierCounts { tier1: 0, tier2: 1, tier3: 0 });
        assert!(store.get_trending_repos(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_metrics_and_mark_scanned() {
        let (_dir, store) = open_temp();
        store.upsert_repository(&Repository::new(1, "a", "b")).await.unwrap();
        store.save_tier_record(&record(1, Tier::One)).await.unwrap();

        let metrics = RepoMetrics {
            stars: 300,
            ..Default::default()
        };
        let updated = store.update_metrics(1, &metrics, Utc::now()).await.unwrap().unwrap();
        assert_eq!(updated.stars, 300);
        assert!(store.update_metrics(99, &metrics, Utc::now()).await.unwrap().is_none());

        let at = Utc::now();
        store.mark_repo_scanned(1, ScanType::Deep, at).await.unwrap();
        let record = store.get_tier_record(1).await.unwrap().unwrap();
        assert_eq!(record.last_deep_scan, Some(at));
    }

    #[tokio::test]
    async fn test_trending_ordered_by_stars() {
        let (_dir, store) = open_temp();
        for (id, stars) in [(1, 10), (2, 500), (3, 50)] {
            let repo = Repository::new(id, "a", format!("r{}", id))
                .with_source(RepoSource::Trending)
                .with_stars(stars);
            store.upsert_repository(&repo).await.unwrap();
        }

        let ids: Vec<i64> = store.get_trending_repos(2).await.unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_analysis_queries() {
        let (_dir, store) = open_temp();
        let now = Utc::now();
        let result = AnalysisResult {
            summary: "solid".to_string(),
            score: 8.0,
            tags: vec!["async".to_string()],
            model: "mock".to_string(),
        };
        store
            .save_analysis(&AnalysisRecord::new(1, result.clone(), now - Duration::hours(2)))
            .await
            .unwrap();

        assert!(store.has_recent_analysis(1, now - Duration::hours(24)).await.unwrap());
        assert!(!store.has_recent_analysis(1, now - Duration::hours(1)).await.unwrap());
        assert_eq!(store.latest_analysis(1).await.unwrap().unwrap().result, result);
        assert!(store.latest_analysis(2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_batch_job_round_trip_and_active_lookup() {
        let (_dir, store) = open_temp();
        let mut job = BatchJob::new("batch-1", BatchTarget::Tier1, true, vec![]);
        job.transition(BatchStatus::Running).unwrap();
        store.save_batch_job(&job).await.unwrap();

        assert_eq!(store.get_active_batch_job().await.unwrap().unwrap().id, "batch-1");

        job.complete(crate::domain::CompletionReason::NothingDue).unwrap();
        store.save_batch_job(&job).await.unwrap();

        assert!(store.get_active_batch_job().await.unwrap().is_none());
        let loaded = store.get_batch_job("batch-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, BatchStatus::Completed);
        assert!(loaded.force);
    }
}
