use eyre::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::batch::BatchConfig;
use crate::daemon::TickConfig;
use crate::provider::{AnalysisConfig, GithubConfig};
use crate::scheduler::{BackoffConfig, CadenceConfig, RateLimitConfig, TierConfig};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub rate_limits: RateLimitConfig,
    pub backoff: BackoffConfig,
    pub tiers: TierConfig,
    pub cadence: CadenceConfig,
    pub batch: BatchConfig,
    pub scheduler: TickConfig,
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("repowatch")
                .join("repowatch.db"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub github: GithubConfig,
    pub analysis: AnalysisConfig,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let project_name = env!("CARGO_PKG_NAME");
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let project_name = env!("CARGO_PKG_NAME");
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config = Self::from_yaml(&content)?;
        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Parse and validate a YAML document
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the scheduler cannot run with
    pub fn validate(&self) -> Result<()> {
        for (name, channel) in &self.rate_limits.channels {
            if channel.capacity == 0 {
                bail!("rate_limits.{}: capacity must be at least 1", name);
            }
            if channel.refill_interval_ms == 0 {
                bail!("rate_limits.{}: refill_interval_ms must be positive", name);
            }
        }

        if self.backoff.base_delay_ms > self.backoff.max_delay_ms {
            bail!(
                "backoff: base_delay_ms ({}) exceeds max_delay_ms ({})",
                self.backoff.base_delay_ms,
                self.backoff.max_delay_ms
            );
        }

        if !self.cadence.normal.is_monotonic() {
            bail!("cadence.normal: lower tiers must not be scanned more often than higher tiers");
        }
        if !self.cadence.forced.is_monotonic() {
            bail!("cadence.forced: lower tiers must not be scanned more often than higher tiers");
        }

        let weights = &self.tiers.weights;
        if ![weights.velocity, weights.engagement, weights.stars]
            .iter()
            .all(|w| w.is_finite() && *w >= 0.0)
        {
            bail!("tiers.weights: weights must be finite and non-negative");
        }

        if self.batch.chunk_size == 0 {
            bail!("batch.chunk_size must be at least 1");
        }
        if self.batch.max_job_size == 0 {
            bail!("batch.max_job_size must be at least 1");
        }

        if self.scheduler.actor_name.trim().is_empty() {
            bail!("scheduler.actor_name must not be empty");
        }
        if self.scheduler.tick_interval_secs == 0 {
            bail!("scheduler.tick_interval_secs must be positive");
        }

        Ok(())
    }
}
