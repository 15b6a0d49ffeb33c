use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use stageboard::config::StageboardConfig;
use stageboard::logging;

mod cmd;

#[derive(Parser)]
#[command(name = "stageboard")]
#[command(version, about = "Configurable pipeline stage boards")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create .stageboard/stageboard.toml and seed default stages
    Init,
    /// Serve boards over HTTP and WebSocket
    Serve {
        /// Port to listen on (overrides stageboard.toml)
        #[arg(long)]
        port: Option<u16>,

        /// Development mode: permissive CORS
        #[arg(long)]
        dev: bool,
    },
    /// Print a pipeline's columns and aggregates
    Board {
        pipeline: String,

        /// List the cards in each column
        #[arg(long)]
        cards: bool,
    },
    /// Inspect and edit a pipeline's stages
    Stages {
        #[command(subcommand)]
        command: StagesCommands,
    },
    /// Load entities from a JSON array file into a pipeline
    Import { pipeline: String, file: PathBuf },
    /// Move one entity to another stage
    Move {
        pipeline: String,
        entity: String,
        stage: String,
    },
    /// Show or initialize configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum StagesCommands {
    /// List stages in board order
    List { pipeline: String },
    /// Append a new stage
    Add {
        pipeline: String,
        /// Display name; the key is derived from it
        name: String,
        #[arg(long)]
        color: Option<String>,
    },
    /// Change a stage's display name (its key stays)
    Rename {
        pipeline: String,
        key: String,
        name: String,
    },
    /// Change a stage's color
    Recolor {
        pipeline: String,
        key: String,
        color: String,
    },
    /// Delete a stage
    Remove { pipeline: String, key: String },
    /// Set the full stage order
    Reorder {
        pipeline: String,
        /// Every stage key, in the new order
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Move one stage to a new position (0-based)
    Move {
        pipeline: String,
        key: String,
        position: usize,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and list any problems
    Validate,
    /// Initialize a stageboard.toml with the built-in pipelines
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    // Config commands must work on a broken stageboard.toml.
    if let Commands::Config { command } = &cli.command {
        logging::init_tracing(if cli.verbose { "debug" } else { "warn" }, false)?;
        return cmd::cmd_config(&project_dir, command.clone());
    }

    let config = StageboardConfig::with_cli_args(project_dir.clone(), cli.verbose)?;
    logging::init_tracing(&config.log_level(), config.toml.log_json())?;

    match cli.command {
        Commands::Init => cmd::cmd_init(&config.project_dir, cli.verbose).await?,
        Commands::Serve { port, dev } => {
            let project = cmd::Project::open(config)?;
            cmd::cmd_serve(project, port, dev).await?;
        }
        Commands::Board { pipeline, cards } => {
            let project = cmd::Project::open(config)?;
            cmd::cmd_board(&project, &pipeline, cards).await?;
        }
        Commands::Stages { command } => {
            let project = cmd::Project::open(config)?;
            cmd::cmd_stages(&project, command).await?;
        }
        Commands::Import { pipeline, file } => {
            let project = cmd::Project::open(config)?;
            cmd::cmd_import(&project, &pipeline, &file).await?;
        }
        Commands::Move {
            pipeline,
            entity,
            stage,
        } => {
            let project = cmd::Project::open(config)?;
            cmd::cmd_move(&project, &pipeline, &entity, &stage).await?;
        }
        Commands::Config { .. } => {}
    }

    Ok(())
}
