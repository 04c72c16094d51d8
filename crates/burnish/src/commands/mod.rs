//! CLI subcommands.

pub mod build;
pub mod dev;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use burnish_pipeline::{BuildOrchestrator, BuildResult, Mode, PipelineRegistry};

use crate::config::load_config;

/// Load configuration and assemble the pipelines.
pub fn orchestrator(config_path: &Path) -> Result<(crate::config::ConfigFile, BuildOrchestrator)> {
    let config = load_config(config_path)?;
    let mode = Mode::from_env();
    tracing::debug!("Building in {:?} mode", mode);

    let registry =
        PipelineRegistry::new(config.pipeline(mode)).context("Invalid pipeline configuration")?;
    Ok((config, BuildOrchestrator::new(Arc::new(registry))))
}

/// Build markup, styles and images in parallel.
pub async fn full_build(orchestrator: &BuildOrchestrator) -> Result<Vec<BuildResult>> {
    let tasks = orchestrator.registry().build_tasks()?;
    let runner = orchestrator.clone();
    let outcomes = tokio::task::spawn_blocking(move || runner.build_all(&tasks)).await?;

    let mut results = Vec::with_capacity(outcomes.len());
    for (name, outcome) in outcomes {
        let result = outcome.with_context(|| format!("Task '{}' failed", name))?;
        result.report();
        results.push(result);
    }
    Ok(results)
}

/// Lint built stylesheets in place.
pub async fn verify(orchestrator: &BuildOrchestrator) -> Result<BuildResult> {
    let task = orchestrator.registry().verify_task()?;
    let runner = orchestrator.clone();
    let result = tokio::task::spawn_blocking(move || runner.build(&task))
        .await?
        .context("Verification failed")?;
    result.report();
    Ok(result)
}

/// Log a one-line summary across results.
pub fn summarize(results: &[BuildResult]) {
    let errors: usize = results.iter().map(|r| r.error_count()).sum();
    let warnings: usize = results.iter().map(|r| r.warning_count()).sum();
    let failures: usize = results.iter().map(|r| r.failures.len()).sum();
    let duration: u64 = results.iter().map(|r| r.duration_ms).max().unwrap_or(0);

    if errors + failures > 0 {
        tracing::warn!(
            "Finished with {} error(s), {} warning(s), {} failed file(s) in {}ms",
            errors,
            warnings,
            failures,
            duration
        );
    } else {
        tracing::info!("Finished with {} warning(s) in {}ms", warnings, duration);
    }
}
