use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

use crate::ingest::ItemErrorPolicy;
use crate::scheduler::SchedulerSettings;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Seconds between scheduler ticks
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// Maximum number of feeds processed per tick
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Deadline for a single feed fetch, in seconds
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_max_document_bytes")]
    pub max_document_bytes: u64,
    #[serde(default)]
    pub item_error_policy: ItemErrorPolicy,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default)]
    pub feeds: Vec<FeedConfig>,
}

fn default_tick_interval_secs() -> u64 {
    6
}

fn default_batch_size() -> u32 {
    60
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_max_document_bytes() -> u64 {
    5 * 1024 * 1024
}

fn default_database_url() -> String {
    "sqlite:blog_aggregator.db?mode=rwc".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeedConfig {
    pub name: String,
    pub url: String,
    /// Owning user; feeds registered from the config file are unowned by default
    #[serde(default)]
    pub owner: Option<Uuid>,
}

impl FeedConfig {
    pub fn owner_id(&self) -> Uuid {
        self.owner.unwrap_or_else(Uuid::nil)
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.tick_interval_secs == 0 {
            anyhow::bail!("tick_interval_secs must be positive");
        }
        if self.batch_size == 0 {
            anyhow::bail!("batch_size must be positive");
        }
        if self.fetch_timeout_secs == 0 {
            anyhow::bail!("fetch_timeout_secs must be positive");
        }
        Ok(())
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            tick_interval: Duration::from_secs(self.tick_interval_secs),
            batch_size: self.batch_size,
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            item_error_policy: self.item_error_policy,
        }
    }
}
