use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::{Map, Value};
use stageboard_common::{
    ConfigStore, Entity, EntityFilter, EntityStore, NewStage, PipelineBinding, PipelineType,
    StageDefinition, StageId, StagePatch,
};

/// Async-safe handle to the board database.
///
/// Wraps `BoardDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, keeping synchronous SQLite I/O
/// off the async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<BoardDb>>,
}

impl DbHandle {
    pub fn new(db: BoardDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&BoardDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously. Only for startup, CLI
    /// one-shots and tests; never from a hot async path.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, BoardDb>> {
        self.inner
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))
    }
}

pub struct BoardDb {
    conn: Connection,
}

impl BoardDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS stages (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    pipeline TEXT NOT NULL,
                    key TEXT NOT NULL,
                    display_name TEXT NOT NULL,
                    color TEXT NOT NULL DEFAULT 'gray',
                    order_index INTEGER NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    UNIQUE(pipeline, key)
                );

                CREATE TABLE IF NOT EXISTS entities (
                    pipeline TEXT NOT NULL,
                    id TEXT NOT NULL,
                    data TEXT NOT NULL DEFAULT '{}',
                    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                    PRIMARY KEY (pipeline, id)
                );

                CREATE INDEX IF NOT EXISTS idx_stages_pipeline ON stages(pipeline, order_index);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Stage definitions ─────────────────────────────────────────────

    pub fn list_stages(&self, pipeline: &PipelineType) -> Result<Vec<StageDefinition>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, pipeline, key, display_name, color, order_index, created_at
                 FROM stages WHERE pipeline = ?1 ORDER BY order_index, id",
            )
            .context("Failed to prepare list_stages")?;
        let rows = stmt
            .query_map(params![pipeline.as_str()], StageRow::from_row)
            .context("Failed to query stages")?;
        let mut stages = Vec::new();
        for row in rows {
            let r = row.context("Failed to read stage row")?;
            stages.push(r.into_stage()?);
        }
        Ok(stages)
    }

    pub fn get_stage(&self, id: StageId) -> Result<Option<StageDefinition>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, pipeline, key, display_name, color, order_index, created_at
                 FROM stages WHERE id = ?1",
                params![id],
                StageRow::from_row,
            )
            .optional()
            .context("Failed to query stage")?;
        row.map(StageRow::into_stage).transpose()
    }

    pub fn create_stage(&self, pipeline: &PipelineType, stage: &NewStage) -> Result<StageDefinition> {
        self.conn
            .execute(
                "INSERT INTO stages (pipeline, key, display_name, color, order_index)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    pipeline.as_str(),
                    stage.key,
                    stage.display_name,
                    stage.color,
                    stage.order_index
                ],
            )
            .with_context(|| format!("Failed to insert stage '{}'", stage.key))?;
        let id = self.conn.last_insert_rowid();
        self.get_stage(id)?.context("Stage not found after insert")
    }

    pub fn update_stage(&self, id: StageId, patch: &StagePatch) -> Result<StageDefinition> {
        // Use unchecked_transaction so both columns change together.
        // Safety: DbHandle's Mutex already guarantees single-threaded access.
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        if let Some(name) = &patch.display_name {
            tx.execute(
                "UPDATE stages SET display_name = ?1 WHERE id = ?2",
                params![name.trim(), id],
            )
            .context("Failed to update stage name")?;
        }
        if let Some(color) = &patch.color {
            tx.execute("UPDATE stages SET color = ?1 WHERE id = ?2", params![color, id])
                .context("Failed to update stage color")?;
        }
        tx.commit().context("Failed to commit stage update")?;
        self.get_stage(id)?
            .with_context(|| format!("Stage {} not found", id))
    }

    /// Delete a stage and shift every later stage of its pipeline down by one.
    pub fn delete_stage(&self, id: StageId) -> Result<bool> {
        let Some(stage) = self.get_stage(id)? else {
            return Ok(false);
        };
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        tx.execute("DELETE FROM stages WHERE id = ?1", params![id])
            .context("Failed to delete stage")?;
        tx.execute(
            "UPDATE stages SET order_index = order_index - 1
             WHERE pipeline = ?1 AND order_index > ?2",
            params![stage.pipeline.as_str(), stage.order_index],
        )
        .context("Failed to re-densify stage order")?;
        tx.commit().context("Failed to commit stage delete")?;
        Ok(true)
    }

    pub fn reorder_stages(&self, pipeline: &PipelineType, order: &[StageId]) -> Result<()> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        for (index, id) in order.iter().enumerate() {
            let updated = tx
                .execute(
                    "UPDATE stages SET order_index = ?1 WHERE id = ?2 AND pipeline = ?3",
                    params![index as i64, id, pipeline.as_str()],
                )
                .context("Failed to update stage order")?;
            if updated == 0 {
                // Dropping the transaction rolls back the partial reorder.
                anyhow::bail!("Stage {} does not belong to pipeline '{}'", id, pipeline);
            }
        }
        tx.commit().context("Failed to commit stage reorder")?;
        Ok(())
    }

    // ── Entities ──────────────────────────────────────────────────────

    /// Insert an entity, replacing the stored fields of an existing id.
    pub fn upsert_entity(&self, pipeline: &PipelineType, entity: &Entity) -> Result<()> {
        let data = serde_json::to_string(&entity.fields).context("Failed to encode entity")?;
        self.conn
            .execute(
                "INSERT INTO entities (pipeline, id, data) VALUES (?1, ?2, ?3)
                 ON CONFLICT(pipeline, id) DO UPDATE SET data = excluded.data, updated_at = datetime('now')",
                params![pipeline.as_str(), entity.id, data],
            )
            .with_context(|| format!("Failed to upsert entity '{}'", entity.id))?;
        Ok(())
    }

    pub fn list_entities(&self, pipeline: &PipelineType) -> Result<Vec<Entity>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, data FROM entities WHERE pipeline = ?1 ORDER BY rowid")
            .context("Failed to prepare list_entities")?;
        let rows = stmt
            .query_map(params![pipeline.as_str()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .context("Failed to query entities")?;
        let mut entities = Vec::new();
        for row in rows {
            let (id, data) = row.context("Failed to read entity row")?;
            entities.push(decode_entity(id, &data)?);
        }
        Ok(entities)
    }

    pub fn get_entity(&self, pipeline: &PipelineType, id: &str) -> Result<Option<Entity>> {
        let data: Option<String> = self
            .conn
            .query_row(
                "SELECT data FROM entities WHERE pipeline = ?1 AND id = ?2",
                params![pipeline.as_str(), id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query entity")?;
        data.map(|d| decode_entity(id.to_string(), &d)).transpose()
    }

    /// Rewrite one field of an entity's stored JSON in a single transaction.
    pub fn set_entity_field(
        &self,
        pipeline: &PipelineType,
        id: &str,
        field: &str,
        value: Value,
    ) -> Result<()> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin transaction")?;
        let data: String = tx
            .query_row(
                "SELECT data FROM entities WHERE pipeline = ?1 AND id = ?2",
                params![pipeline.as_str(), id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query entity")?
            .with_context(|| format!("Entity '{}' not found in pipeline '{}'", id, pipeline))?;
        let mut fields: Map<String, Value> =
            serde_json::from_str(&data).context("Failed to parse entity JSON")?;
        fields.insert(field.to_string(), value);
        let data = serde_json::to_string(&fields).context("Failed to encode entity")?;
        tx.execute(
            "UPDATE entities SET data = ?1, updated_at = datetime('now') WHERE pipeline = ?2 AND id = ?3",
            params![data, pipeline.as_str(), id],
        )
        .context("Failed to update entity")?;
        tx.commit().context("Failed to commit entity update")?;
        Ok(())
    }

    pub fn delete_entity(&self, pipeline: &PipelineType, id: &str) -> Result<bool> {
        let count = self
            .conn
            .execute(
                "DELETE FROM entities WHERE pipeline = ?1 AND id = ?2",
                params![pipeline.as_str(), id],
            )
            .context("Failed to delete entity")?;
        Ok(count > 0)
    }
}

fn decode_entity(id: String, data: &str) -> Result<Entity> {
    let fields: Map<String, Value> = serde_json::from_str(data)
        .with_context(|| format!("Failed to parse JSON of entity '{}'", id))?;
    Ok(Entity { id, fields })
}

/// Intermediate row struct for stages.
struct StageRow {
    id: i64,
    pipeline: String,
    key: String,
    display_name: String,
    color: String,
    order_index: i64,
    created_at: String,
}

impl StageRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            pipeline: row.get(1)?,
            key: row.get(2)?,
            display_name: row.get(3)?,
            color: row.get(4)?,
            order_index: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    fn into_stage(self) -> Result<StageDefinition> {
        let pipeline = self
            .pipeline
            .parse::<PipelineType>()
            .context("Failed to parse stage pipeline")?;
        let order_index =
            u32::try_from(self.order_index).context("Stage order_index out of range")?;
        Ok(StageDefinition {
            id: self.id,
            pipeline,
            key: self.key,
            display_name: self.display_name,
            color: self.color,
            order_index,
            created_at: self.created_at,
        })
    }
}

// ── Collaborator contracts ───────────────────────────────────────────

#[async_trait]
impl EntityStore for DbHandle {
    async fn list_entities(
        &self,
        binding: &PipelineBinding,
        filter: &EntityFilter,
    ) -> Result<Vec<Entity>> {
        let pipeline = binding.pipeline.clone();
        let filter = filter.clone();
        self.call(move |db| {
            let matching = db
                .list_entities(&pipeline)?
                .into_iter()
                .filter(|e| filter.matches(e));
            Ok(match filter.limit {
                Some(limit) => matching.take(limit).collect(),
                None => matching.collect(),
            })
        })
        .await
    }

    async fn update_entity_stage(
        &self,
        binding: &PipelineBinding,
        entity_id: &str,
        stage_key: &str,
    ) -> Result<()> {
        let pipeline = binding.pipeline.clone();
        let field = binding.stage_field.clone();
        let id = entity_id.to_string();
        let value = Value::String(stage_key.to_string());
        self.call(move |db| db.set_entity_field(&pipeline, &id, &field, value))
            .await
    }
}

#[async_trait]
impl ConfigStore for DbHandle {
    async fn list_stages(&self, pipeline: &PipelineType) -> Result<Vec<StageDefinition>> {
        let pipeline = pipeline.clone();
        self.call(move |db| db.list_stages(&pipeline)).await
    }

    async fn create_stage(
        &self,
        pipeline: &PipelineType,
        stage: &NewStage,
    ) -> Result<StageDefinition> {
        let pipeline = pipeline.clone();
        let stage = stage.clone();
        self.call(move |db| db.create_stage(&pipeline, &stage)).await
    }

    async fn update_stage(&self, id: StageId, patch: &StagePatch) -> Result<StageDefinition> {
        let patch = patch.clone();
        self.call(move |db| db.update_stage(id, &patch)).await
    }

    async fn delete_stage(&self, id: StageId) -> Result<()> {
        let deleted = self.call(move |db| db.delete_stage(id)).await?;
        if !deleted {
            anyhow::bail!("Stage {} not found", id);
        }
        Ok(())
    }

    async fn reorder_stages(&self, pipeline: &PipelineType, order: &[StageId]) -> Result<()> {
        let pipeline = pipeline.clone();
        let order = order.to_vec();
        self.call(move |db| db.reorder_stages(&pipeline, &order)).await
    }
}

// ── Tests ─────────────────────────────────────────────────────────────
