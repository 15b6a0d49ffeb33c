//! Project lifecycle commands: `stageboard init`, `import` and `move`.

use std::path::Path;

use anyhow::{Context, Result, bail};
use serde_json::Value;
use stageboard::config::{CONFIG_DIR, CONFIG_FILE, StageboardConfig, StageboardToml};
use stageboard_common::Entity;

use super::Project;

pub async fn cmd_init(project_dir: &Path, verbose: bool) -> Result<()> {
    let config_dir = project_dir.join(CONFIG_DIR);
    let config_path = config_dir.join(CONFIG_FILE);

    std::fs::create_dir_all(&config_dir)
        .with_context(|| format!("Failed to create {}", config_dir.display()))?;

    if config_path.exists() {
        println!("Using existing {}", config_path.display());
    } else {
        StageboardToml::with_presets().save(&config_path)?;
        println!("Created {}", config_path.display());
    }

    let config = StageboardConfig::with_cli_args(project_dir.to_path_buf(), verbose)?;
    let project = Project::open(config)?;
    project.load().await?;

    for engine in project.hub.engines() {
        println!(
            "  {:<12} {} stage(s)",
            engine.pipeline().as_str(),
            engine.stages().len()
        );
    }
    println!();
    println!("Initialized stageboard project in {}", project_dir.display());
    Ok(())
}

/// Upsert the entities in a JSON array file into one pipeline.
pub async fn cmd_import(project: &Project, pipeline: &str, file: &Path) -> Result<()> {
    let engine = project.hub.get(pipeline)?;
    let Some(db) = project.db.clone() else {
        bail!("Import needs the sqlite storage backend; the memory backend does not persist");
    };

    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let value: Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", file.display()))?;
    let entities = entities_from_json(value)?;
    let count = entities.len();

    let pipeline_type = engine.pipeline().clone();
    db.call(move |db| {
        for entity in &entities {
            db.upsert_entity(&pipeline_type, entity)?;
        }
        Ok(())
    })
    .await?;

    tracing::info!(pipeline, count, "imported entities");
    println!("Imported {} entities into '{}'", count, pipeline);
    Ok(())
}

pub async fn cmd_move(project: &Project, pipeline: &str, entity_id: &str, stage: &str) -> Result<()> {
    let engine = project.engine(pipeline).await?;
    let from = engine
        .entities()
        .iter()
        .find(|e| e.id == entity_id)
        .and_then(|e| e.stage_key(&engine.binding().stage_field).map(str::to_string));

    engine.move_entity(entity_id, stage).await?;

    println!(
        "Moved '{}' from {} to {}",
        entity_id,
        console::style(from.as_deref().unwrap_or("(none)")).dim(),
        console::style(stage).green().bold()
    );
    Ok(())
}

/// Accepts a JSON array of objects. Objects without a string `id` get a
/// generated one.
pub fn entities_from_json(value: Value) -> Result<Vec<Entity>> {
    let Value::Array(items) = value else {
        bail!("Expected a JSON array of entity objects");
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            let Value::Object(mut fields) = item else {
                bail!("Entry {} is not a JSON object", index);
            };
            let id = match fields.remove("id") {
                Some(Value::String(id)) if !id.trim().is_empty() => id,
                Some(Value::Number(n)) => n.to_string(),
                _ => uuid::Uuid::new_v4().to_string(),
            };
            Ok(Entity { id, fields })
        })
        .collect()
}
