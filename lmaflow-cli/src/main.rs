//! Command line driver for the LMA declaration pipeline.
//!
//! Every command opens the SQLite database, connects the AMICE gateway and
//! logs what it did. `run` keeps ticking until Ctrl-C.

mod config;
mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::time::{self, MissedTickBehavior};
use tracing::{info, warn};
use uuid::Uuid;

use lmaflow_amice::AmiceClient;
use lmaflow_core::{
    ApprovalOutcome, DeclarationId, LmaService, PipelineAdapters, PipelineSettings, ReopenOutcome,
};
use lmaflow_store_sqlite::SqliteStore;

use crate::config::AppConfig;

#[derive(Parser, Debug)]
#[command(
    name = "lmaflow",
    version,
    about = "Detect, submit and reconcile LMA waste declarations"
)]
struct Cli {
    /// Path to the SQLite database, overriding `LMAFLOW_DATABASE`.
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create or refresh declarations waiting for approval.
    Detect,
    /// Schedule a late weight ticket sweep when undeclared lines exist.
    TriggerLate,
    /// Schedule the first and monthly receival jobs for last month.
    ScheduleJobs,
    /// Run every pending declaration job.
    DrainJobs,
    /// Approve a waiting declaration and submit it to the registry.
    Approve {
        /// Twelve digit declaration id.
        id: String,
    },
    /// Poll the registry for every open session.
    Resolve,
    /// Return the pending declarations of a failed session to waiting for approval.
    Reopen {
        /// Session id assigned by the registry.
        session_id: Uuid,
    },
    /// Schedule, drain and resolve on every poll interval until Ctrl-C.
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load().context("invalid configuration")?;
    if let Some(database) = cli.database {
        config.database = database;
    }
    telemetry::init(&config.log_level)?;

    let service = build_service(&config)?;
    execute(&service, cli.command, config.poll_interval).await
}

fn build_service(config: &AppConfig) -> Result<LmaService> {
    let store = Arc::new(
        SqliteStore::open(&config.database)
            .with_context(|| format!("cannot open {}", config.database.display()))?,
    );
    let registry = Arc::new(
        AmiceClient::new(config.amice_url.as_str(), config.amice_timeout)
            .context("cannot build the AMICE client")?,
    );
    info!(
        database = %config.database.display(),
        amice_url = registry.base_url(),
        "pipeline ready"
    );

    let adapters = PipelineAdapters::from_store(&store, registry);
    Ok(LmaService::new(
        adapters,
        PipelineSettings {
            registry_timeout: config.amice_timeout,
            ..PipelineSettings::default()
        },
    ))
}

async fn execute(service: &LmaService, command: Command, poll_interval: Duration) -> Result<()> {
    match command {
        Command::Detect => {
            let report = service.detect(Utc::now()).await?;
            info!(?report, "detection finished");
        }
        Command::TriggerLate => match service.trigger_late_declarations(Utc::now()).await? {
            Some(job) => info!(job_id = %job.id, period = %job.period, "late sweep scheduled"),
            None => info!("no late sweep needed"),
        },
        Command::ScheduleJobs => {
            let jobs = service.schedule_monthly_jobs(Utc::now()).await?;
            info!(scheduled = jobs.len(), "monthly jobs scheduled");
        }
        Command::DrainJobs => {
            let report = service.process_pending_jobs(Utc::now()).await?;
            info!(completed = report.completed, failed = report.failed, "job queue drained");
        }
        Command::Approve { id } => {
            match service.approve(&DeclarationId(id), Utc::now()).await? {
                ApprovalOutcome::Submitted {
                    declaration_id,
                    session_id,
                } => info!(%declaration_id, %session_id, "declaration submitted"),
                ApprovalOutcome::Rejected(failure) => {
                    bail!("declaration not submitted ({:?}): {failure}", failure.kind)
                }
            }
        }
        Command::Resolve => {
            let report = service.resolve_open_sessions().await?;
            info!(?report, "open sessions resolved");
        }
        Command::Reopen { session_id } => match service.reopen_session(session_id).await? {
            Some(ReopenOutcome::Reopened(ids)) => {
                info!(%session_id, reopened = ids.len(), "declarations wait for approval again");
            }
            Some(ReopenOutcome::NotFailed(status)) => {
                bail!("session {session_id} is {status:?}, only failed sessions are reopened")
            }
            None => bail!("unknown session {session_id}"),
        },
        Command::Run => run(service, poll_interval).await?,
    }
    Ok(())
}

async fn run(service: &LmaService, poll_interval: Duration) -> Result<()> {
    let mut ticker = time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(interval_secs = poll_interval.as_secs(), "pipeline loop started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = service.tick(Utc::now()).await {
                    warn!(error = %err, "tick failed, retrying next interval");
                }
            }
            stop = signal::ctrl_c() => {
                stop.context("cannot listen for Ctrl-C")?;
                info!("pipeline loop stopped");
                return Ok(());
            }
        }
    }
}
