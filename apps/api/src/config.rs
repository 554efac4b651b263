use anyhow::{Context, Result};

use crate::streaks::milestones::MilestoneCatalog;

const DEFAULT_MILESTONES: &str = "3,7,14,30,60,100,180,365";

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub rust_log: String,
    /// Global switch for claims fired from metric entry. Explicit check-ins
    /// and the validation job ignore it.
    pub auto_claim_enabled: bool,
    pub milestones: MilestoneCatalog,
    /// Users processed in parallel by the weekly reset and daily validation jobs.
    pub job_concurrency: usize,
    pub scheduler_enabled: bool,
    pub job_interval_secs: u64,
    pub default_lookback_days: u32,
    pub max_lookback_days: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let thresholds = optional_env("MILESTONE_THRESHOLDS", DEFAULT_MILESTONES.to_string());
        let milestones = MilestoneCatalog::parse(&thresholds)
            .context("MILESTONE_THRESHOLDS is not a valid milestone catalog")?;

        let config = Config {
            database_url: require_env("DATABASE_URL")?,
            port: parse_env("PORT", 8080)?,
            rust_log: optional_env("RUST_LOG", "info".to_string()),
            auto_claim_enabled: parse_env("AUTO_CLAIM_ENABLED", true)?,
            milestones,
            job_concurrency: parse_env("JOB_CONCURRENCY", 16)?,
            scheduler_enabled: parse_env("SCHEDULER_ENABLED", true)?,
            job_interval_secs: parse_env("JOB_INTERVAL_SECS", 3600)?,
            default_lookback_days: parse_env("DEFAULT_LOOKBACK_DAYS", 7)?,
            max_lookback_days: parse_env("MAX_LOOKBACK_DAYS", 30)?,
        };

        if config.job_concurrency == 0 {
            anyhow::bail!("JOB_CONCURRENCY must be at least 1");
        }
        if config.default_lookback_days == 0
            || config.default_lookback_days > config.max_lookback_days
        {
            anyhow::bail!("DEFAULT_LOOKBACK_DAYS must be between 1 and MAX_LOOKBACK_DAYS");
        }

        Ok(config)
    }

    /// Configuration used by unit and router tests; never touches the environment.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Config {
            database_url: "postgres://localhost/streaks_test".to_string(),
            port: 0,
            rust_log: "debug".to_string(),
            auto_claim_enabled: true,
            milestones: MilestoneCatalog::new(&[3, 7, 14]).expect("valid test catalog"),
            job_concurrency: 4,
            scheduler_enabled: false,
            job_interval_secs: 3600,
            default_lookback_days: 7,
            max_lookback_days: 30,
        }
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{key} has an invalid value '{raw}': {e}")),
        Err(_) => Ok(default),
    }
}
