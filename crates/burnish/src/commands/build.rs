//! One-shot build command.

use std::path::Path;

use anyhow::Result;

use super::{full_build, orchestrator, summarize, verify};

/// Build everything, verify the stylesheets, then exit.
pub async fn run(config_path: &Path) -> Result<()> {
    tracing::info!("Building site...");

    let (_, orchestrator) = orchestrator(config_path)?;
    let mut results = full_build(&orchestrator).await?;
    results.push(verify(&orchestrator).await?);

    summarize(&results);
    Ok(())
}
