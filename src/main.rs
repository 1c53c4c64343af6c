mod cli;
mod commands;
mod seeds;

use anyhow::Result;
use clap::Parser;
use tracing::warn;

// glibc malloc holds on to memory under high task concurrency
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use darkmap_core::AppConfig;

use crate::cli::{Cli, Commands};

fn main() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async_main())
}

async fn async_main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config_str = std::fs::read_to_string(&cli.config).unwrap_or_else(|_| {
        warn!(path = %cli.config, "config file not found, using defaults");
        include_str!("../config/default.toml").to_string()
    });
    let mut config: AppConfig = toml::from_str(&config_str)?;
    config.apply_env_overrides();

    match cli.command {
        Commands::Crawl { seeds, seed } => {
            commands::crawl::run(config, seeds, seed).await?;
        }
        Commands::PortScan => {
            commands::portscan::run(config).await?;
        }
        Commands::DirScan => {
            commands::dirscan::run(config).await?;
        }
        Commands::Serve { bind } => {
            commands::serve::run(config, bind).await?;
        }
        Commands::Status => {
            commands::status::run(config).await?;
        }
    }

    Ok(())
}
