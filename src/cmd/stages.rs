//! Stage configuration commands: `stageboard stages`.

use anyhow::{Result, bail};
use stageboard::pipeline::{EditOutcome, PipelineEngine};
use stageboard_common::{StageDefinition, StageId};

use super::super::StagesCommands;
use super::Project;

pub async fn cmd_stages(project: &Project, command: StagesCommands) -> Result<()> {
    match command {
        StagesCommands::List { pipeline } => {
            let engine = project.engine(&pipeline).await?;
            print_stages(engine);
        }
        StagesCommands::Add {
            pipeline,
            name,
            color,
        } => {
            let engine = project.engine(&pipeline).await?;
            let stage = applied(engine.editor().add_stage(&name, color.as_deref()).await?)?;
            println!(
                "Added stage '{}' ({}) at position {}",
                stage.display_name, stage.key, stage.order_index
            );
        }
        StagesCommands::Rename {
            pipeline,
            key,
            name,
        } => {
            let engine = project.engine(&pipeline).await?;
            let id = stage_id(engine, &key)?;
            let stage = applied(engine.editor().rename(id, &name).await?)?;
            println!("Renamed '{}' to '{}'", stage.key, stage.display_name);
        }
        StagesCommands::Recolor {
            pipeline,
            key,
            color,
        } => {
            let engine = project.engine(&pipeline).await?;
            let id = stage_id(engine, &key)?;
            let stage = applied(engine.editor().recolor(id, &color).await?)?;
            println!("Stage '{}' is now {}", stage.key, stage.color);
        }
        StagesCommands::Remove { pipeline, key } => {
            let engine = project.engine(&pipeline).await?;
            let id = stage_id(engine, &key)?;
            let stage = applied(engine.editor().remove(id).await?)?;
            println!("Removed stage '{}'", stage.key);
            let orphans = engine
                .entities()
                .iter()
                .filter(|e| e.stage_key(&engine.binding().stage_field) == Some(stage.key.as_str()))
                .count();
            if orphans > 0 {
                println!(
                    "{} {} entities keep '{}' and now show in the first column",
                    console::style("!").yellow().bold(),
                    orphans,
                    stage.key
                );
            }
        }
        StagesCommands::Reorder { pipeline, keys } => {
            let engine = project.engine(&pipeline).await?;
            applied(engine.editor().reorder(&keys).await?)?;
            print_stages(engine);
        }
        StagesCommands::Move {
            pipeline,
            key,
            position,
        } => {
            let engine = project.engine(&pipeline).await?;
            applied(engine.editor().move_stage(&key, position).await?)?;
            print_stages(engine);
        }
    }
    Ok(())
}

fn applied<T>(outcome: EditOutcome<T>) -> Result<T> {
    match outcome {
        EditOutcome::Applied(value) => Ok(value),
        EditOutcome::Rejected { message } => bail!("{}", message),
    }
}

fn stage_id(engine: &PipelineEngine, key: &str) -> Result<StageId> {
    match engine.registry().get_by_key(key) {
        Some(stage) => Ok(stage.id),
        None => bail!("Pipeline '{}' has no stage '{}'", engine.pipeline(), key),
    }
}

fn print_stages(engine: &PipelineEngine) {
    let stages: Vec<StageDefinition> = engine.stages();
    println!();
    println!(
        "{}",
        console::style(format!("Stages for {}", engine.pipeline())).bold().cyan()
    );
    println!();
    if stages.is_empty() {
        println!("  (no stages)");
    }
    for stage in &stages {
        println!(
            "  {:>2}. {:<20} {:<24} {}",
            stage.order_index,
            stage.key,
            stage.display_name,
            console::style(&stage.color).dim()
        );
    }
    println!();
}
