use serde::Deserialize;
use std::fs;

use crate::{
    reconcile::{ExclusionRule, LossThresholds},
    report::ReportSettings,
};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Csv,
    Pgwire,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub kind: SourceKind,
    pub csv_path: Option<String>,
    /// Reporting year the rows are normalized for.
    pub year: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub uri: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    4
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileConfig {
    #[serde(default)]
    pub thresholds: LossThresholds,
    #[serde(default)]
    pub exclusions: Vec<ExclusionRule>,
    #[serde(default = "default_top_zones")]
    pub top_zones: usize,
}

fn default_top_zones() -> usize {
    5
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            thresholds: LossThresholds::default(),
            exclusions: Vec::new(),
            top_zones: default_top_zones(),
        }
    }
}

impl ReconcileConfig {
    pub fn report_settings(&self) -> ReportSettings {
        ReportSettings {
            exclusions: self.exclusions.clone(),
            thresholds: self.thresholds,
            top_zones: self.top_zones,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: String,
    #[serde(default = "default_cache_entries")]
    pub cache_entries: usize,
}

fn default_cache_entries() -> usize {
    256
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub source: SourceConfig,
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    pub server: Option<ServerConfig>,
    pub metrics: Option<MetricsConfig>,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        let path = env::var("WATER_BALANCE_CONFIG").unwrap_or_else(|_| "water-balance.toml".to_string());
        let contents = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let cfg = Self::from_toml_str(&contents)?;
        tracing::info!(path = %path, "configuration loaded");
        Ok(cfg)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let cfg: AppConfig = toml::from_str(contents)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.reconcile.thresholds;
        if t.medium_loss_pct > t.high_loss_pct {
            return Err(ConfigError::Invalid(format!(
                "medium_loss_pct ({}) exceeds high_loss_pct ({})",
                t.medium_loss_pct, t.high_loss_pct
            )));
        }

        match self.source.kind {
            SourceKind::Csv if self.source.csv_path.is_none() => {
                Err(ConfigError::Invalid("csv source requires source.csv_path".to_string()))
            }
            SourceKind::Pgwire if self.database.is_none() => {
                Err(ConfigError::Invalid("pgwire source requires a [database] section".to_string()))
            }
            _ => Ok(()),
        }
    }
}
