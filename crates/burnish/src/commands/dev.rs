//! Development command: build, verify, then watch and serve.

use std::path::Path;

use anyhow::Result;
use burnish_server::DevServer;

use super::{full_build, orchestrator, summarize, verify};

/// Run the dev loop until Ctrl-C.
pub async fn run(config_path: &Path, port: Option<u16>, open: bool) -> Result<()> {
    let (config, orchestrator) = orchestrator(config_path)?;

    let mut results = full_build(&orchestrator).await?;
    results.push(verify(&orchestrator).await?);
    summarize(&results);

    let server = DevServer::new(config.server(port, open), orchestrator);
    server
        .start(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutting down");
        })
        .await?;

    Ok(())
}
