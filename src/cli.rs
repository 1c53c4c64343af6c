use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "darkmap", about = "Hidden service crawler & reconnaissance pipeline")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config/default.toml")]
    pub config: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run crawler workers against the crawl queue
    Crawl {
        /// Seed URLs (comma-separated or file path)
        #[arg(short, long)]
        seeds: Option<String>,

        /// Single seed URL
        #[arg(long)]
        seed: Option<String>,
    },
    /// Run port-scan workers against the scan queue
    PortScan,
    /// Run directory-scan workers against the dir-scan queue
    DirScan,
    /// Serve the read API
    Serve {
        /// Bind address (overrides config)
        #[arg(short, long)]
        bind: Option<String>,
    },
    /// Show crawl status and database stats
    Status,
}
