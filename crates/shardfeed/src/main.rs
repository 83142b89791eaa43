//! shardfeed - harvest changed items from every shard into the search index

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use shardfeed::{
    HarvestConfig, HarvestError, HarvestMetrics, HttpIndexSink, MySqlReplicaConnector,
    MySqlShardDirectory, ProgressReporter, RecordExtractor, ReplicaSelector, ShardWorker,
    SqliteCheckpointStore, WorkerPool,
};
use shardfeed_common::logging::{init_logging, LogConfig, LogLevel};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "shardfeed")]
#[command(author, version, about = "Incremental shard harvester for the search index")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Concurrent shard workers
    #[arg(short, long, env = "SHARDFEED_WORKERS")]
    workers: Option<usize>,

    /// Records per indexer request
    #[arg(long, env = "SHARDFEED_BATCH_SIZE")]
    batch_size: Option<usize>,

    /// Checkpoint database path
    #[arg(long, env = "SHARDFEED_CHECKPOINT_PATH")]
    checkpoint_path: Option<PathBuf>,

    /// Bulk indexing endpoint
    #[arg(long, env = "SHARDFEED_INDEXER_URL")]
    indexer_url: Option<String>,

    /// Exit successfully even when some shards failed
    #[arg(long)]
    allow_shard_failures: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Harvest every serviceable shard once (default)
    Run,

    /// Print stored checkpoints and exit
    Checkpoints,
}

impl Cli {
    fn apply(&self, config: &mut HarvestConfig) {
        if let Some(workers) = self.workers {
            config.pool.workers = workers;
        }
        if let Some(batch_size) = self.batch_size {
            config.extraction.batch_size = batch_size;
        }
        if let Some(path) = &self.checkpoint_path {
            config.checkpoint_path.clone_from(path);
        }
        if let Some(url) = &self.indexer_url {
            config.indexer.url.clone_from(url);
        }
        if self.allow_shard_failures {
            config.fail_on_shard_errors = false;
        }
    }

    /// Logging settings from the flags, with the environment taking precedence
    fn log_config(&self) -> Result<LogConfig> {
        LogConfig::default()
            .level(if self.verbose { LogLevel::Debug } else { LogLevel::Info })
            .log_file_prefix("shardfeed")
            .with_env_overrides()
            .context("Invalid logging configuration")
    }
}

/// Label for a run-level failure, taken from the harvest error underneath any context.
fn abort_kind(err: &anyhow::Error) -> &'static str {
    err.downcast_ref::<HarvestError>()
        .map_or("internal", HarvestError::kind)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_config = match cli.log_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e:#}");
            return ExitCode::FAILURE;
        }
    };

    let _guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(kind = abort_kind(&e), error = %format_args!("{e:#}"), "Harvest aborted");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = HarvestConfig::from_env().context("Invalid configuration")?;
    cli.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    let checkpoints = Arc::new(
        SqliteCheckpointStore::open(&config.checkpoint_path)
            .await
            .context("Failed to open checkpoint store")?,
    );

    if let Some(Command::Checkpoints) = cli.command {
        for (shard_id, mark) in checkpoints.list().await? {
            println!("{shard_id}\t{mark}");
        }
        checkpoints.close().await;
        return Ok(ExitCode::SUCCESS);
    }

    let directory = Arc::new(
        MySqlShardDirectory::connect(&config.control)
            .await
            .context("Failed to connect to control database")?,
    );
    let sink = Arc::new(HttpIndexSink::new(&config.indexer.url, config.indexer.timeout())?);
    let connector = MySqlReplicaConnector::new(
        config.shard_credentials.clone(),
        config.extraction.connect_timeout(),
    );
    let metrics = Arc::new(HarvestMetrics::new());

    info!(
        control = %format_args!("{}:{}/{}", config.control.host, config.control.port, config.control.database),
        indexer = %sink.url(),
        workers = config.pool.workers,
        batch_size = config.extraction.batch_size,
        "Starting shardfeed"
    );

    let worker = ShardWorker::new(
        directory.clone(),
        ReplicaSelector::new(connector),
        checkpoints.clone(),
        sink,
        RecordExtractor::new(config.extraction.clone()),
        config.extraction.batch_size,
        metrics.clone(),
    );
    let pool = WorkerPool::new(worker, config.pool.workers);

    let reporter =
        ProgressReporter::spawn(metrics, Duration::from_secs(config.progress_interval_secs));
    let outcome = pool.run().await;
    reporter.stop();

    directory.close().await;
    checkpoints.close().await;

    let summary = outcome.context("Failed to list shards")?;

    info!(
        shards = summary.shards_total,
        succeeded = summary.succeeded,
        failed = summary.failed,
        records = summary.records_indexed,
        "Done"
    );

    if summary.has_failures() {
        if config.fail_on_shard_errors {
            error!(failed = summary.failed, "Some shards failed");
            return Ok(ExitCode::FAILURE);
        }
        warn!(failed = summary.failed, "Some shards failed; exiting successfully as configured");
    }

    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::parse_from([
            "shardfeed",
            "--workers",
            "9",
            "--batch-size",
            "50",
            "--allow-shard-failures",
            "run",
        ]);
        let mut config = HarvestConfig::default();
        cli.apply(&mut config);

        assert_eq!(config.pool.workers, 9);
        assert_eq!(config.extraction.batch_size, 50);
        assert!(!config.fail_on_shard_errors);
        assert!(matches!(cli.command, Some(Command::Run)));
    }

    #[test]
    #[serial]
    fn test_invalid_log_env_is_reported() {
        let cli = Cli::parse_from(["shardfeed", "--verbose"]);

        std::env::set_var("LOG_LEVEL", "loud");
        let err = cli.log_config().unwrap_err();
        std::env::remove_var("LOG_LEVEL");

        assert!(format!("{err:#}").contains("Invalid log level: loud"));
        assert!(matches!(cli.log_config().unwrap().level, LogLevel::Debug));
    }

    #[test]
    fn test_abort_kind_sees_through_context() {
        let err = anyhow::Error::new(HarvestError::directory("control db down"))
            .context("Failed to list shards");
        assert_eq!(abort_kind(&err), "directory");
        assert_eq!(abort_kind(&anyhow::anyhow!("boom")), "internal");
    }

    #[test]
    fn test_cli_verifies() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
