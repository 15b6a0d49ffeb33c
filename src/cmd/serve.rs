//! Board server command: `stageboard serve`.

use anyhow::Result;
use stageboard::server::{ServerConfig, start_server};

use super::Project;

pub async fn cmd_serve(project: Project, port: Option<u16>, dev: bool) -> Result<()> {
    project.load().await?;

    let mut config = ServerConfig::from_toml(&project.config.toml);
    if let Some(port) = port {
        config.port = port;
    }
    config.dev_mode |= dev;

    for engine in project.hub.engines() {
        tracing::info!(
            pipeline = %engine.pipeline(),
            stages = engine.stages().len(),
            entities = engine.entities().len(),
            "pipeline ready"
        );
    }

    start_server(config, project.hub).await
}
