//! ---
//! iot_section: "01-core-functionality"
//! iot_subsection: "module"
//! iot_type: "source"
//! iot_scope: "code"
//! iot_description: "Shared primitives and utilities for the simulation runtime."
//! iot_version: "v0.0.0-prealpha"
//! iot_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;

use crate::identity::EntityIdentity;
use crate::logging::LogFormat;

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_level() -> String {
    "debug".to_owned()
}

fn default_true() -> bool {
    true
}

fn default_quiesce_window() -> Duration {
    Duration::from_secs(10)
}

fn default_callback_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_batch_size() -> usize {
    32
}

fn default_telemetry() -> StreamSettings {
    StreamSettings::every(10)
}

fn default_error() -> StreamSettings {
    StreamSettings::every(60)
}

fn default_commissioning() -> StreamSettings {
    StreamSettings::every(60)
}

fn default_latency() -> StreamSettings {
    StreamSettings::every(30)
}

/// Root configuration for a simulator process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub reboot: RebootConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    /// Directory holding replacement message templates; embedded ones otherwise.
    #[serde(default)]
    pub templates_dir: Option<PathBuf>,
    #[serde(default)]
    pub entities: IndexMap<String, EntityConfig>,
}

/// An [`AppConfig`] together with the file it was read from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "R_IOT_CONFIG";

    /// Load the first existing candidate, or the `R_IOT_CONFIG` path when set.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let source = PathBuf::from(env_path);
                let config = Self::from_path(&source)?;
                return Ok(LoadedAppConfig { config, source });
            }
        }

        let found = candidates.iter().map(AsRef::as_ref).find(|p| p.exists());
        match found {
            Some(path) => Ok(LoadedAppConfig {
                config: Self::from_path(path)?,
                source: path.to_path_buf(),
            }),
            None => Err(anyhow!(
                "no configuration files found. inspected: {}",
                candidates
                    .iter()
                    .map(|p| p.as_ref().display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse::<AppConfig>()
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn entity(&self, name: &str) -> Option<&EntityConfig> {
        self.entities.get(name)
    }

    /// Check structural invariants, including that every connection string
    /// resolves to an identity and that artifact ids are unique.
    pub fn validate(&self) -> Result<()> {
        if self.entities.is_empty() {
            return Err(anyhow!("configuration must declare at least one entity"));
        }
        let mut seen = std::collections::HashSet::new();
        for (name, entity) in &self.entities {
            let identity = entity
                .identity()
                .with_context(|| format!("entity '{}' has an invalid connection string", name))?;
            entity.simulation.validate(name)?;
            if !seen.insert(identity.artifact_id()) {
                return Err(anyhow!(
                    "entity '{}' duplicates artifact id {}",
                    name,
                    identity.artifact_id()
                ));
            }
        }
        if let Some(dir) = &self.templates_dir {
            if !dir.is_dir() {
                return Err(anyhow!("templates_dir {} is not a directory", dir.display()));
            }
        }
        if self.ingestion.batch_size == 0 {
            return Err(anyhow!("ingestion.batch_size must be greater than zero"));
        }
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityConfig {
    pub connection_string: String,
    #[serde(default)]
    pub simulation: SimulationProfile,
}

impl EntityConfig {
    pub fn identity(&self) -> Result<EntityIdentity> {
        Ok(EntityIdentity::from_connection_string(
            &self.connection_string,
        )?)
    }
}

/// Cadence for one message stream. An interval of zero or less on the latency
/// stream means "send once".
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamSettings {
    #[serde(default)]
    pub enabled: bool,
    pub interval_secs: i64,
}

impl StreamSettings {
    pub fn every(interval_secs: i64) -> Self {
        Self {
            enabled: false,
            interval_secs,
        }
    }

    pub fn enabled(mut self) -> Self {
        self.enabled = true;
        self
    }
}

/// Per-entity behaviour switches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SimulationProfile {
    #[serde(default = "default_telemetry")]
    pub telemetry: StreamSettings,
    #[serde(default = "default_error")]
    pub error: StreamSettings,
    #[serde(default = "default_commissioning")]
    pub commissioning: StreamSettings,
    #[serde(default = "default_latency")]
    pub latency: StreamSettings,
    #[serde(default = "default_true")]
    pub enable_commands: bool,
    #[serde(default)]
    pub enable_c2d_messages: bool,
    #[serde(default)]
    pub enable_desired_notifications: bool,
    #[serde(default)]
    pub enable_twin_reads: bool,
}

impl Default for SimulationProfile {
    fn default() -> Self {
        Self {
            telemetry: default_telemetry(),
            error: default_error(),
            commissioning: default_commissioning(),
            latency: default_latency(),
            enable_commands: true,
            enable_c2d_messages: false,
            enable_desired_notifications: false,
            enable_twin_reads: false,
        }
    }
}

impl SimulationProfile {
    pub fn validate(&self, entity: &str) -> Result<()> {
        for (label, stream) in [
            ("telemetry", &self.telemetry),
            ("error", &self.error),
            ("commissioning", &self.commissioning),
        ] {
            if stream.enabled && stream.interval_secs <= 0 {
                return Err(anyhow!(
                    "entity '{}' {} interval must be positive, got {}",
                    entity,
                    label,
                    stream.interval_secs
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
    #[serde(default = "default_true")]
    pub file_enabled: bool,
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: LogFormat::default(),
            file_prefix: None,
            file_enabled: true,
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebootConfig {
    #[serde(default = "default_quiesce_window")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub quiesce_window: Duration,
}

impl Default for RebootConfig {
    fn default() -> Self {
        Self {
            quiesce_window: default_quiesce_window(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    #[serde(default = "default_callback_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub callback_timeout: Duration,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_poll_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub poll_interval: Duration,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            callback_timeout: default_callback_timeout(),
            batch_size: default_batch_size(),
            poll_interval: default_poll_interval(),
        }
    }
}
