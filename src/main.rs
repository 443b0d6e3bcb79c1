//! # Disaster Alerts Entry Point
//!
//! `serve` runs the daily ingestion trigger, the email worker and the operational
//! HTTP server until interrupted. The other subcommands run one piece once.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tracing::info;

use disaster_alerts::{
    config::{AppConfig, ConfigLoader},
    consumer::EmailWorker,
    db,
    feed::FemaFeedClient,
    ingest::DisasterIngestor,
    mail::{EmailTransport, LoggingTransport, MailSettings, SmtpEmailTransport},
    matcher::LocationMatcher,
    pipeline::IngestionCycle,
    planner::NotificationPlanner,
    queue::EmailJobQueue,
    repositories::{
        DisasterRepository, LeaseRepository, LocationRepository, NotificationRepository,
        PipelineStateRepository, UserRepository,
    },
    scheduler::{DailySchedule, DailyTrigger, IngestionJob, JobRun},
    server::run_server,
    telemetry::init_tracing,
};

#[derive(Debug, Parser)]
#[command(name = "disaster-alerts", version, about = "FEMA disaster notification pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the scheduler, email worker and HTTP server
    Serve,
    /// Run one ingestion cycle now
    Ingest {
        /// Lower bound on lastRefresh instead of the stored watermark
        #[arg(long, conflicts_with = "backfill")]
        since: Option<DateTime<Utc>>,
        /// Re-ingest the whole lookback window
        #[arg(long)]
        backfill: bool,
    },
    /// Send every deliverable queued email and exit
    DrainEmails,
    /// Apply pending database migrations
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new().load().context("loading configuration")?;
    init_tracing(&config).context("initializing tracing")?;
    info!(
        profile = %config.profile,
        config = %config.redacted_json().unwrap_or_default(),
        "configuration loaded"
    );

    let db = db::init_pool(&config)
        .await
        .context("initializing database connection pool")?;

    match cli.command {
        Command::Migrate => {
            db::migrate(&db).await?;
            info!("migrations applied");
        }
        Command::Ingest { since, backfill } => {
            db::migrate(&db).await?;
            let job = build_ingestion_job(&config, &db)?;
            let now = Utc::now();
            let since = match (since, backfill) {
                (Some(since), _) => Some(since),
                (None, true) => Some(job.lookback_start(now)),
                (None, false) => None,
            };
            match job.run_once(now, since).await? {
                JobRun::Completed(report) => info!(?report, "ingestion cycle complete"),
                JobRun::Skipped => info!("ingestion cycle already running"),
            }
        }
        Command::DrainEmails => {
            db::migrate(&db).await?;
            let worker = build_email_worker(&config, &db)?;
            let report = worker.drain_all().await?;
            info!(?report, "email queue drained");
        }
        Command::Serve => {
            db::migrate(&db).await?;
            serve(config, db).await?;
        }
    }

    Ok(())
}

async fn serve(config: AppConfig, db: DatabaseConnection) -> Result<()> {
    let shutdown = CancellationToken::new();

    let job = build_ingestion_job(&config, &db)?;
    let schedule = DailySchedule::from_config(&config.scheduler)?;
    let trigger = DailyTrigger::new(job, schedule, config.scheduler.run_on_startup);
    let worker = build_email_worker(&config, &db)?;

    let trigger_task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { trigger.run(shutdown).await })
    };
    let worker_task = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { worker.run(shutdown).await })
    };
    let server_task = {
        let shutdown = shutdown.clone();
        let config = config.clone();
        let db = db.clone();
        tokio::spawn(async move { run_server(&config, db, shutdown).await })
    };

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown signal received");
    shutdown.cancel();

    trigger_task.await?;
    worker_task.await?;
    server_task.await??;
    Ok(())
}

fn build_ingestion_job(config: &AppConfig, db: &DatabaseConnection) -> Result<Arc<IngestionJob>> {
    let feed = Arc::new(FemaFeedClient::new(&config.feed).context("building FEMA feed client")?);
    let disasters = Arc::new(DisasterRepository::new(db.clone()));
    let ingestor = DisasterIngestor::new(feed, disasters.clone(), config.feed.lookback_months);
    let matcher = LocationMatcher::new(Arc::new(LocationRepository::new(db.clone())));
    let planner = NotificationPlanner::new(
        Arc::new(UserRepository::new(db.clone())),
        Arc::new(NotificationRepository::new(db.clone())),
        Arc::new(EmailJobQueue::new(db.clone(), &config.email_worker)),
        MailSettings::from(&config.mail),
    );
    let cycle = IngestionCycle::new(ingestor, disasters, matcher, planner);

    Ok(Arc::new(IngestionJob::new(
        cycle,
        Arc::new(PipelineStateRepository::new(db.clone())),
        Arc::new(LeaseRepository::new(db.clone())),
        &config.scheduler,
    )))
}

fn build_email_worker(config: &AppConfig, db: &DatabaseConnection) -> Result<EmailWorker> {
    let transport: Arc<dyn EmailTransport> = match SmtpEmailTransport::from_config(&config.mail)
        .context("building SMTP transport")?
    {
        Some(smtp) => Arc::new(smtp),
        None => {
            info!("PRISERE_SMTP_HOST not set; emails will be logged instead of sent");
            Arc::new(LoggingTransport)
        }
    };
    let queue = Arc::new(EmailJobQueue::new(db.clone(), &config.email_worker));
    Ok(EmailWorker::new(queue, transport, config.email_worker.clone()))
}
