//! hissrv entry point

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use hissrv::config::DEFAULT_CONFIG_PATH;
use hissrv::status::{progress_summary, reset_progress};
use hissrv::{open_progress_pool, HissrvConfig, HistoryService, Result, SERVICE_NAME, SERVICE_VERSION};
use voltage_rtdb::SystemTimeProvider;

#[derive(Parser, Debug)]
#[command(name = "hissrv", version, about = "VoltageEMS history service")]
struct Cli {
    /// Config file (YAML or TOML); defaults to config/hissrv.yaml when present
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured log filter, e.g. `debug`
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Run the service until Ctrl+C or SIGTERM (default)
    Run,
    /// Validate the configuration and exit
    Check,
    /// Print migration progress from the progress database
    MigrationStatus {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Delete all migration progress so the next run starts over
    MigrationReset,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Run);

    let path = cli.config.or_else(|| {
        let default = Path::new(DEFAULT_CONFIG_PATH);
        default.exists().then(|| default.to_path_buf())
    });
    let mut config = HissrvConfig::load(path.as_deref())?;

    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if command != Command::Run {
        // One-shot commands only log to the console
        config.logging.log_dir = None;
    }
    common::init_with_config(&config.logging)?;

    match command {
        Command::Run => {
            info!("Starting {} v{}", SERVICE_NAME, SERVICE_VERSION);
            let service = HistoryService::new(config, Arc::new(SystemTimeProvider)).await?;
            service.run_until_shutdown().await
        },
        Command::Check => {
            println!(
                "Configuration OK: {} points, migration {}",
                config.points.len(),
                if config.migration.enabled { "enabled" } else { "disabled" }
            );
            Ok(())
        },
        Command::MigrationStatus { json } => {
            let pool = open_progress_pool(&config.database.path).await?;
            let summary = progress_summary(&pool).await?;
            pool.close().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("Series: {} ({} finished)", summary.total, summary.finished());
                for (status, count) in &summary.by_status {
                    println!("  {:<22} {}", status, count);
                }
                if let Some(watermark) = summary.lowest_watermark {
                    println!("Lowest watermark: {}", watermark);
                }
            }
            Ok(())
        },
        Command::MigrationReset => {
            let pool = open_progress_pool(&config.database.path).await?;
            let removed = reset_progress(&pool).await?;
            pool.close().await;
            println!("Removed {} progress rows", removed);
            Ok(())
        },
    }
}
