//! Configuration read from `.stageboard/stageboard.toml`.
//!
//! Settings are layered: file, then environment, then CLI flags.
//!
//! ```toml
//! [server]
//! port = 3142
//! host = "127.0.0.1"
//!
//! [storage]
//! backend = "sqlite"
//! db_path = ".stageboard/stageboard.db"
//!
//! [logging]
//! level = "info"
//! json = false
//!
//! [engine]
//! persist_timeout_ms = 10000
//!
//! [pipelines.sales]
//! stage_field = "sales_stage"
//! value_field = "amount"
//! default_stages = [
//!   { display_name = "New", color = "blue" },
//!   { display_name = "Won", color = "green" },
//! ]
//! ```
//!
//! Without a `[pipelines]` table the six built-in domains are configured.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use stageboard_common::{PipelineBinding, PipelineType};

use crate::pipeline::presets::{PRESETS, StageSeed};
use crate::pipeline::registry::normalize_key;

pub const CONFIG_DIR: &str = ".stageboard";
pub const CONFIG_FILE: &str = "stageboard.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    /// Allow any origin (for a frontend dev server on another port).
    #[serde(default)]
    pub dev_mode: bool,
}

fn default_port() -> u16 {
    3142
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            dev_mode: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Sqlite,
    Memory,
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackend::Sqlite => write!(f, "sqlite"),
            StorageBackend::Memory => write!(f, "memory"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSection {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Relative paths resolve against the project directory.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from(CONFIG_DIR).join("stageboard.db")
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            db_path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSection {
    /// Upper bound on one persistence round trip; expiry counts as failure.
    #[serde(default = "default_persist_timeout_ms")]
    pub persist_timeout_ms: u64,
}

fn default_persist_timeout_ms() -> u64 {
    10_000
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            persist_timeout_ms: default_persist_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSection {
    pub stage_field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_field: Option<String>,
    /// Stages created the first time the pipeline is initialized.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub default_stages: Vec<StageSeed>,
}

/// The complete stageboard.toml structure.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StageboardToml {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub pipelines: BTreeMap<String, PipelineSection>,
}

impl StageboardToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse stageboard.toml")
    }

    /// Load `.stageboard/stageboard.toml`, or defaults when it does not exist.
    pub fn load_or_default(config_dir: &Path) -> Result<Self> {
        let config_path = config_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize stageboard.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// A file with every built-in pipeline spelled out, for `config init`.
    pub fn with_presets() -> Self {
        let pipelines = PRESETS
            .iter()
            .map(|preset| {
                (
                    preset.pipeline.to_string(),
                    PipelineSection {
                        stage_field: preset.stage_field.to_string(),
                        value_field: preset.value_field.map(str::to_string),
                        default_stages: preset.seeds(),
                    },
                )
            })
            .collect();
        Self {
            pipelines,
            ..Self::default()
        }
    }

    pub fn port(&self) -> u16 {
        std::env::var("STAGEBOARD_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(self.server.port)
    }

    pub fn log_level(&self) -> String {
        std::env::var("STAGEBOARD_LOG_LEVEL").unwrap_or_else(|_| self.logging.level.clone())
    }

    pub fn log_json(&self) -> bool {
        match std::env::var("STAGEBOARD_LOG_JSON") {
            Ok(value) => matches!(value.as_str(), "1" | "true" | "yes"),
            Err(_) => self.logging.json,
        }
    }

    pub fn db_path(&self) -> PathBuf {
        std::env::var("STAGEBOARD_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| self.storage.db_path.clone())
    }

    pub fn persist_timeout(&self) -> Duration {
        Duration::from_millis(self.engine.persist_timeout_ms)
    }

    /// Configured pipelines, or the built-in presets when none are.
    pub fn pipelines(&self) -> Result<Vec<(PipelineBinding, Vec<StageSeed>)>> {
        if self.pipelines.is_empty() {
            return Ok(PRESETS
                .iter()
                .filter_map(|preset| preset.binding().map(|b| (b, preset.seeds())))
                .collect());
        }
        self.pipelines
            .iter()
            .map(|(name, section)| {
                let pipeline: PipelineType = name
                    .parse()
                    .with_context(|| format!("Invalid pipeline name '{}'", name))?;
                let mut binding = PipelineBinding::new(pipeline, section.stage_field.clone());
                if let Some(value_field) = &section.value_field {
                    binding = binding.with_value_field(value_field.clone());
                }
                Ok((binding, section.default_stages.clone()))
            })
            .collect()
    }

    /// Problems that make the configuration unusable.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.engine.persist_timeout_ms == 0 {
            problems.push("engine.persist_timeout_ms must be greater than zero".to_string());
        }

        for (name, section) in &self.pipelines {
            if let Err(e) = name.parse::<PipelineType>() {
                problems.push(e.to_string());
            }
            if section.stage_field.trim().is_empty() {
                problems.push(format!("pipelines.{}: stage_field must not be empty", name));
            }
            if section.value_field.as_deref() == Some(section.stage_field.as_str()) {
                problems.push(format!(
                    "pipelines.{}: stage_field and value_field must differ",
                    name
                ));
            }
            let mut seen = HashSet::new();
            for seed in &section.default_stages {
                let key = normalize_key(&seed.display_name);
                if key.is_empty() {
                    problems.push(format!("pipelines.{}: default stage with empty name", name));
                } else if !seen.insert(key.clone()) {
                    problems.push(format!(
                        "pipelines.{}: default stages collide on key '{}'",
                        name, key
                    ));
                }
            }
        }

        problems
    }
}

/// Resolved configuration for one project directory.
#[derive(Debug, Clone)]
pub struct StageboardConfig {
    pub project_dir: PathBuf,
    /// The `.stageboard` directory.
    pub config_dir: PathBuf,
    pub toml: StageboardToml,
    pub verbose: bool,
}

impl StageboardConfig {
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let config_dir = project_dir.join(CONFIG_DIR);
        let toml = StageboardToml::load_or_default(&config_dir)?;

        let problems = toml.validate();
        if !problems.is_empty() {
            anyhow::bail!("Invalid configuration:\n  - {}", problems.join("\n  - "));
        }

        Ok(Self {
            project_dir,
            config_dir,
            toml,
            verbose: false,
        })
    }

    pub fn with_cli_args(project_dir: PathBuf, verbose: bool) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        config.verbose = verbose;
        Ok(config)
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    /// Database location with relative paths anchored at the project.
    pub fn db_path(&self) -> PathBuf {
        let path = self.toml.db_path();
        if path.is_absolute() {
            path
        } else {
            self.project_dir.join(path)
        }
    }

    pub fn log_level(&self) -> String {
        if self.verbose {
            "debug".to_string()
        } else {
            self.toml.log_level()
        }
    }
}
