use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use murmur_common::observability::{LogConfig, LogFormat, init_logging};
use murmur_config::{MurmurConfig, MurmurConfigLoader};
use murmur_runtime::MurmurRuntime;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

mod crawl;
mod schedule;
mod wiring;

const DEFAULT_CONFIG_FILE: &str = "murmur.yaml";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "murmur", about = "Relay recent search results to a Pub/Sub topic")]
struct Cli {
    /// YAML config file; `murmur.yaml` is read when present.
    #[arg(long, global = true, env = "MURMUR_CONFIG")]
    config: Option<PathBuf>,

    /// Log messages instead of publishing them.
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Relay the last window once and exit.
    Run {
        /// Trigger payload from the scheduler; not interpreted.
        #[arg(long)]
        payload: Option<String>,
    },
    /// Relay one window per interval until interrupted.
    Schedule,
}

fn load_config(path: Option<&PathBuf>) -> Result<MurmurConfig> {
    let loader = match path {
        Some(p) => MurmurConfigLoader::new().with_file(p),
        None => MurmurConfigLoader::new().with_optional_file(DEFAULT_CONFIG_FILE),
    };
    loader.load().context("loading configuration")
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1) Config first: a missing credential stops us before any network call.
    let cfg = load_config(cli.config.as_ref())?;

    let format: LogFormat = cfg.logging.format.parse().map_err(anyhow::Error::msg)?;
    init_logging(LogConfig {
        app_name: "murmur",
        log_dir: cfg.logging.dir.as_ref().map(PathBuf::from),
        format,
        default_filter: cfg.logging.filter.clone(),
    })?;

    let crawler = Arc::new(wiring::build_crawler(&cfg, cli.dry_run)?);
    let runtime = MurmurRuntime::build("murmur-worker", None)?;
    let handle = runtime.handle();
    handle.cancel_on_ctrl_c();
    let deadline = Duration::from_secs(cfg.schedule.deadline_secs);

    let outcome = match cli.command {
        Command::Run { payload } => {
            if let Some(payload) = payload {
                tracing::debug!(bytes = payload.len(), "murmur.payload_ignored");
            }
            let cancel = handle.deadline(deadline);
            let outcome = runtime.block_on(crawler.run_once(OffsetDateTime::now_utc(), &cancel));
            schedule::report(&outcome);
            outcome.map(|_| ()).map_err(anyhow::Error::from)
        }
        Command::Schedule => {
            tracing::info!(
                interval_secs = cfg.schedule.interval_secs,
                deadline_secs = cfg.schedule.deadline_secs,
                dry_run = cli.dry_run,
                "schedule.started"
            );
            runtime.block_on(schedule::run_schedule(
                crawler,
                handle,
                Duration::from_secs(cfg.schedule.interval_secs),
                deadline,
            ));
            Ok(())
        }
    };

    runtime.shutdown(SHUTDOWN_GRACE);
    outcome
}
