//! burnish CLI - static site asset pipeline with live reload.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

mod commands;
mod config;

#[derive(Parser)]
#[command(name = "burnish")]
#[command(about = "Build templated pages, stylesheets and images, then serve them with live reload")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to burnish.toml config file
    #[arg(short, long, default_value = "burnish.toml", global = true)]
    config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build, verify, then watch and serve with live reload (default)
    Dev {
        /// Port to listen on (defaults to config or 3000)
        #[arg(short, long)]
        port: Option<u16>,

        /// Open the site in a browser
        #[arg(long)]
        open: bool,
    },

    /// Build everything and verify stylesheets, then exit
    Build,

    /// Verify built stylesheets only
    Test,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    fmt().with_env_filter(filter).with_target(false).init();

    match cli.command.unwrap_or(Commands::Dev {
        port: None,
        open: false,
    }) {
        Commands::Dev { port, open } => commands::dev::run(&cli.config, port, open).await?,
        Commands::Build => commands::build::run(&cli.config).await?,
        Commands::Test => commands::test::run(&cli.config).await?,
    }

    Ok(())
}
