//! calarm CLI.
//!
//! Commands:
//! - `serve`   Start the HTTP server
//! - `extract` Run one extraction and print the readout
//! - `init`    Write a default config file
//! - `config`  Show the effective configuration

use anyhow::Context;
use calarm::{AlarmService, AppConfig};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(
    name = "calarm",
    about = "Natural-language event descriptions to calendar alarms",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: ~/.calarm/config.toml)
    #[arg(short, long, global = true, env = "CALARM_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Extract a single event and print the readout as JSON
    Extract {
        /// Event description, e.g. "dentist monday at 9"
        text: Vec<String>,
    },

    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show the effective configuration (secrets redacted)
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Serve { port } => {
            let mut config = AppConfig::load(cli.config.as_deref())?;
            if let Some(port) = port {
                config.server.port = port;
            }
            let service = AlarmService::from_config(&config)?;
            calarm::server::serve(service, &config.server).await?;
        }
        Commands::Extract { text } => {
            let config = AppConfig::load(cli.config.as_deref())?;
            let service = AlarmService::from_config(&config)?;

            let token = CancellationToken::new();
            let on_interrupt = token.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_interrupt.cancel();
                }
            });

            let readout = service.create_alarm(&text.join(" "), token).await?;
            println!("{}", serde_json::to_string_pretty(&readout)?);
        }
        Commands::Init { force } => {
            let path = cli
                .config
                .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"));
            if path.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            std::fs::write(&path, AppConfig::default_toml())
                .with_context(|| format!("writing {}", path.display()))?;
            println!("Wrote {}", path.display());
        }
        Commands::Config => {
            let config = AppConfig::load(cli.config.as_deref())?;
            println!("{:#?}", config);
        }
    }

    Ok(())
}
