//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module          | Commands handled                 |
//! |-----------------|----------------------------------|
//! | `project`       | `Init`, `Import`, `Move`         |
//! | `board`         | `Board`                          |
//! | `stages`        | `Stages`                         |
//! | `config`        | `Config`                         |
//! | `serve`         | `Serve`                          |

pub mod board;
pub mod config;
pub mod project;
pub mod serve;
pub mod stages;

pub use board::cmd_board;
pub use config::cmd_config;
pub use project::{cmd_import, cmd_init, cmd_move};
pub use serve::cmd_serve;
pub use stages::cmd_stages;

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use stageboard::config::{StageboardConfig, StorageBackend};
use stageboard::pipeline::{PipelineEngine, PipelineHub, StageSeed};
use stageboard::store::{BoardDb, DbHandle, MemoryStore};

/// An opened project: the configured pipelines over the configured backend.
pub struct Project {
    pub config: StageboardConfig,
    pub hub: PipelineHub,
    /// Set when the backend is SQLite; entity import writes through it.
    pub db: Option<DbHandle>,
    seeds: BTreeMap<String, Vec<StageSeed>>,
}

impl Project {
    pub fn open(config: StageboardConfig) -> Result<Self> {
        let pipelines = config.toml.pipelines()?;
        let seeds = pipelines
            .iter()
            .map(|(binding, seeds)| (binding.pipeline.to_string(), seeds.clone()))
            .collect();
        let bindings = pipelines.into_iter().map(|(binding, _)| binding);
        let timeout = config.toml.persist_timeout();

        let (hub, db) = match config.toml.storage.backend {
            StorageBackend::Sqlite => {
                let db_path = config.db_path();
                if let Some(parent) = db_path.parent() {
                    std::fs::create_dir_all(parent).with_context(|| {
                        format!("Failed to create database directory {}", parent.display())
                    })?;
                }
                let handle = DbHandle::new(BoardDb::new(&db_path)?);
                let hub = PipelineHub::with_store(bindings, Arc::new(handle.clone()), timeout)?;
                (hub, Some(handle))
            }
            StorageBackend::Memory => {
                let hub = PipelineHub::with_store(bindings, Arc::new(MemoryStore::new()), timeout)?;
                (hub, None)
            }
        };

        Ok(Self {
            config,
            hub,
            db,
            seeds,
        })
    }

    /// Load every pipeline and seed default stages where a pipeline has none.
    pub async fn load(&self) -> Result<()> {
        for (pipeline, report) in self.hub.refresh_all().await {
            report.with_context(|| format!("Failed to load pipeline '{}'", pipeline))?;
        }
        for engine in self.hub.engines() {
            self.seed(engine).await?;
        }
        Ok(())
    }

    /// The engine for `pipeline`, loaded and seeded.
    pub async fn engine(&self, pipeline: &str) -> Result<&PipelineEngine> {
        let engine = self.hub.get(pipeline)?;
        engine
            .refresh()
            .await
            .with_context(|| format!("Failed to load pipeline '{}'", pipeline))?;
        self.seed(engine).await?;
        Ok(engine)
    }

    async fn seed(&self, engine: &PipelineEngine) -> Result<usize> {
        // A banner means the registry could not be read; seeding would duplicate.
        if engine.banner().is_some() {
            return Ok(0);
        }
        let seeds = self
            .seeds
            .get(engine.pipeline().as_str())
            .map(Vec::as_slice)
            .unwrap_or_default();
        let created = engine.ensure_stages(seeds).await?;
        if created > 0 {
            tracing::info!(pipeline = %engine.pipeline(), created, "seeded default stages");
        }
        Ok(created)
    }
}
