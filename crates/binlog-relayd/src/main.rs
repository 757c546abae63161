//! binlog-relayd - commit-aligned MySQL binlog relay
//!
//! Usage:
//!   # Capture bench.core_event, checkpointing into the source server
//!   binlog-relayd --table core_event --schema bench \
//!     --source-host db-primary --source-user repl --source-password secret
//!
//!   # Keep checkpoints on local disk instead
//!   binlog-relayd --table core_event --checkpoint-backend file \
//!     --checkpoint-dir /var/lib/binlog-relay
//!
//! Exits 0 after a graceful shutdown (Ctrl+C / SIGTERM) and 1 on any fatal
//! error, naming the stage that failed.

mod cli;

use binlog_relay::common::{CdcError, FilePositionStore, PositionStore, Result, Stage};
use binlog_relay::mysql::{MySqlBinlogStream, MySqlPositionStore};
use binlog_relay::{LogSink, Pipeline, StopReason};
use clap::Parser;
use cli::{CheckpointBackend, Cli, LogFormat};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(&cli);

    if let Err(e) = cli.validate() {
        eprintln!("Configuration error: {}", e);
        std::process::exit(1);
    }

    print_banner(&cli);

    if let Err(e) = run(&cli).await {
        error!(
            error_code = e.error_code(),
            category = ?e.category(),
            "{}",
            e
        );
        std::process::exit(1);
    }

    info!("Goodbye!");
    Ok(())
}

fn init_tracing(cli: &Cli) {
    let json = cli.log_format == LogFormat::Json;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .init();
}

async fn run(cli: &Cli) -> Result<()> {
    let pipeline = Pipeline::new(cli.pipeline_config()).map_err(startup)?;

    match cli.checkpoint_backend {
        CheckpointBackend::Mysql => {
            let store = MySqlPositionStore::new(&cli.store_config()).map_err(startup)?;
            store.ensure_table().await.map_err(startup)?;
            relay(cli, &pipeline, store).await
        }
        CheckpointBackend::File => {
            let store = FilePositionStore::new(&cli.checkpoint_dir)
                .await
                .map_err(startup)?;
            relay(cli, &pipeline, store).await
        }
    }
}

async fn relay<P>(cli: &Cli, pipeline: &Pipeline, store: P) -> Result<()>
where
    P: PositionStore + 'static,
{
    let positions = pipeline.load_positions(&store).await?;
    let stream = MySqlBinlogStream::connect(&cli.source_config(), &positions)
        .await
        .map_err(startup)?;

    let outcome = pipeline
        .run(stream, positions, store, LogSink::new(), wait_for_shutdown_signal())
        .await?;

    match outcome.stop_reason {
        StopReason::Shutdown => {
            info!(
                "Relay shut down gracefully at {} ({} batch(es), {} row(s))",
                outcome.positions, outcome.stats.batches_committed, outcome.stats.rows_delivered
            );
            Ok(())
        }
        StopReason::StreamEnded => Err(CdcError::replication("binlog stream ended unexpectedly")
            .in_stage(Stage::StreamReader)),
    }
}

fn startup(e: CdcError) -> CdcError {
    e.in_stage(Stage::Startup)
}

/// Wait for shutdown signals (Ctrl+C or SIGTERM)
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, draining pending batches");
        }
        _ = terminate => {
            info!("Received SIGTERM, draining pending batches");
        }
    }
}

fn print_banner(cli: &Cli) {
    let checkpoint = match cli.checkpoint_backend {
        CheckpointBackend::Mysql => {
            let store = cli.store_config();
            format!(
                "mysql {}:{}/{}.{}",
                store.host, store.port, store.database, store.table
            )
        }
        CheckpointBackend::File => format!("file {}", cli.checkpoint_dir.display()),
    };

    eprintln!(
        "
binlog-relayd {}

  Source:      {}:{} (server_id {})
  Table:       {}
  Stream:      {}
  Checkpoint:  {}
",
        env!("CARGO_PKG_VERSION"),
        cli.source_host,
        cli.source_port,
        cli.server_id,
        cli.table_filter(),
        cli.stream_name(),
        checkpoint
    );
}
