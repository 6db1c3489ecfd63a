use clap::Parser;
use config::ProgramConfig;
use error::AppError;
use indicatif::MultiProgress;
use strata_engine::ResourceManager;
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;
use tracing_subscriber::fmt::writer::MakeWriterExt;

mod cli;
mod config;
mod error;
mod processor;
mod utils;

use cli::CliArgs;
use utils::progress::ProgressManager;

fn main() {
    if let Err(e) = bootstrap() {
        eprintln!("Error: {e}");
        // Log the full error for debugging
        error!(error = ?e, "Application failed");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn bootstrap() -> Result<(), AppError> {
    // Parse command-line arguments
    let args = CliArgs::parse();

    // Setup logging
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open("strata.log")?;

    let multi_writer = MakeWriterExt::and(std::io::stdout, log_file);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(multi_writer)
        .with_ansi(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| AppError::Initialization(e.to_string()))?;

    info!("Strata - layered-cache resource loader");
    info!("==================================================================");

    let program_config = ProgramConfig::from_args(&args)?;

    info!(
        memory_cache = %utils::format_bytes(program_config.cache_config.max_memory_cache_size),
        disk_cache = program_config.cache_config.disk_enabled,
        caching = program_config.cache_config.enabled,
        query_policy = ?program_config.policies.query,
        "Cache configuration"
    );
    info!(
        "HTTP timeout configuration: overall={:?}, connect={:?}, retries={}",
        program_config.http_config.timeout,
        program_config.http_config.connect_timeout,
        program_config.http_config.max_retries
    );

    let manager = ResourceManager::builder()
        .with_cache_config(program_config.cache_config.clone())
        .with_http_config(program_config.http_config.clone())
        .with_cache_policies(program_config.policies)
        .build()
        .await?;

    // Create a progress manager based on show_progress flag
    let multi = MultiProgress::new();
    let progress_manager = if program_config.show_progress {
        ProgressManager::new(multi)
    } else {
        ProgressManager::new_disabled(multi)
    };

    let failed = processor::process_inputs(
        &manager,
        &args.urls,
        &program_config.output_dir,
        program_config.options,
        &progress_manager,
    )
    .await?;

    if failed > 0 {
        return Err(AppError::Incomplete {
            failed,
            total: args.urls.len(),
        });
    }
    Ok(())
}
