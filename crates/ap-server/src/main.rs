//! Action Processor - Main entry point

use std::sync::Arc;

use anyhow::{Context, Result};
use ap_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use clap::Parser;
use serde::Serialize;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use ap_server::cli::{Cli, Commands};
use ap_server::config::Config;
use ap_server::db;
use ap_server::dispatch::ActionHandlerRegistry;
use ap_server::features::batches::{self, ListBatchesQuery, UploadBatchCommand};
use ap_server::features::events::{
    self, GetFailedEventsQuery, ReclaimStaleEventsCommand, RetryFailedEventsCommand,
};
use ap_server::features::owners::{self, CheckOwnerStatusQuery};
use ap_server::features::shared::pagination::PaginationParams;
use ap_server::processor::EventProcessor;
use ap_server::store::PgStore;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::builder()
            .level(LogLevel::Debug)
            .output(LogOutput::Console)
            .log_file_prefix("ap-server")
            .filter_directives("ap_server=debug,sqlx=warn")
            .build()
    } else {
        LogConfig::builder()
            .log_file_prefix("ap-server")
            .filter_directives("ap_server=info,sqlx=warn,reqwest=info")
            .build()
    };

    // Environment variables take precedence
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    let _log_guard = match init_logging(&log_config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        },
    };

    if let Err(e) = execute_command(cli.command).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn execute_command(command: Commands) -> Result<()> {
    let config = Config::load()?;

    let pool = db::create_pool(&config.database)
        .await
        .context("Failed to connect to database")?;
    let store = Arc::new(PgStore::new(pool));

    match command {
        Commands::Migrate => {
            db::run_migrations(store.pool()).await?;
            println!("Migrations applied");
        },

        Commands::Worker => {
            let processor = build_processor(&config, store)?;
            let cancel = CancellationToken::new();

            let worker = tokio::spawn({
                let cancel = cancel.clone();
                async move { processor.run(cancel).await }
            });

            shutdown_signal().await;
            cancel.cancel();
            worker.await.context("Processor task panicked")?;

            info!("Worker shut down gracefully");
        },

        Commands::RunOnce => {
            let processor = build_processor(&config, store)?;
            let report = processor.run_cycle(&CancellationToken::new()).await?;
            print_json(&report)?;
        },

        Commands::Upload { file, owner } => {
            let content = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let file_name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            let response = batches::commands::upload::handle(
                store.as_ref(),
                UploadBatchCommand::new(file_name, owner, content),
            )
            .await?;
            print_json(&response)?;
        },

        Commands::Status { batch_id } => {
            let query = batches::GetBatchStatusQuery { batch_id };
            let response = batches::queries::get_status::handle(store.as_ref(), query).await?;
            print_json(&response)?;
        },

        Commands::Failed { batch, owner } => {
            let query = GetFailedEventsQuery {
                batch_id: batch,
                owner,
                max_retries: Some(config.processor.max_event_retries),
            };
            let response = events::queries::failed::handle(store.as_ref(), query).await?;
            print_json(&response)?;
        },

        Commands::Retry {
            batch_id,
            owner,
            event_ids,
        } => {
            let mut command = RetryFailedEventsCommand::new(batch_id).with_event_ids(event_ids);
            command.max_retries = config.processor.max_event_retries;
            if let Some(owner) = owner {
                command = command.with_owner(owner);
            }

            let response = events::commands::retry_failed::handle(store.as_ref(), command).await?;
            print_json(&response)?;
        },

        Commands::Batches {
            owner,
            page,
            per_page,
        } => {
            let query = ListBatchesQuery {
                owner,
                pagination: PaginationParams::new(page, per_page),
            };
            let response = batches::queries::list::handle(store.as_ref(), query).await?;
            print_json(&response)?;
        },

        Commands::OwnerStatus { owner } => {
            let response =
                owners::queries::status::handle(store.as_ref(), CheckOwnerStatusQuery { owner }).await?;
            print_json(&response)?;
        },

        Commands::Reclaim { older_than_secs } => {
            let response = events::commands::reclaim_stale::handle(
                store.as_ref(),
                ReclaimStaleEventsCommand { older_than_secs },
            )
            .await?;
            print_json(&response)?;
        },
    }

    Ok(())
}

fn build_processor(config: &Config, store: Arc<PgStore>) -> Result<EventProcessor> {
    let registry = ActionHandlerRegistry::from_config(&config.action)?;
    Ok(EventProcessor::new(store, Arc::new(registry), config.processor.clone()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping after the current cycle");
        },
        _ = terminate => {
            info!("Received terminate signal, stopping after the current cycle");
        },
    }
}
