use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tally_core::app::AppBuilder;
use tally_core::domain::{Priority, TaskType};
use tally_core::impls::{InMemoryCache, InMemoryDatabase, InMemoryResultStore};
use tally_core::queue::{InMemoryBroker, Topology};
use tally_core::typed::{CompetitionId, Submission, WinnerTrigger};
use tally_core::{RunningApp, WorkerConfig};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Submission worker backed by in-memory broker, database and cache.
#[derive(Debug, Parser)]
#[command(name = "tally", version)]
struct Args {
    /// JSON worker config; missing fields keep their defaults
    #[arg(long, env = "TALLY_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides `concurrency` from the config
    #[arg(long, env = "TALLY_CONCURRENCY")]
    concurrency: Option<usize>,

    /// Overrides `pool.max_connections` from the config
    #[arg(long, env = "TALLY_MAX_CONNECTIONS")]
    max_connections: Option<u32>,

    #[arg(long, env = "TALLY_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Enqueue this many demo submissions at startup
    #[arg(long, default_value_t = 0)]
    demo: usize,

    /// Competition used by the demo tasks
    #[arg(long, default_value_t = 1)]
    competition_id: i64,

    /// Delay before the demo winner trigger fires
    #[arg(long, default_value_t = 15)]
    winner_delay_secs: u64,

    /// Seconds between status reports; 0 disables them
    #[arg(long, env = "TALLY_STATUS_INTERVAL", default_value_t = 10)]
    status_interval_secs: u64,
}

fn init_logging(format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    let installed = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("installing tracing subscriber: {e}"))
}

fn load_config(args: &Args) -> Result<WorkerConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?
        }
        None => WorkerConfig::default(),
    };
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(max) = args.max_connections {
        config.pool.max_connections = max;
    }
    Ok(config)
}

async fn enqueue_demo(app: &RunningApp, args: &Args) -> Result<()> {
    let producer = app.producer();
    let competition_id = CompetitionId::Int(args.competition_id);

    for i in 0..args.demo {
        let task_type = if i % 3 == 0 {
            TaskType::PremiumSubmission
        } else {
            TaskType::NormalSubmission
        };
        let submission = Submission {
            competition_id: competition_id.clone(),
            form_data: serde_json::json!({ "answer": i }),
            email: Some(format!("entrant{i}@example.com")),
            phone_number: None,
        };
        let priority = Priority::new((i % 6) as u8)?;
        producer.enqueue(task_type, &submission, priority).await?;
    }

    producer
        .schedule_winner_trigger(
            &WinnerTrigger { competition_id },
            Duration::from_secs(args.winner_delay_secs),
        )
        .await?;
    info!(submissions = args.demo, "demo tasks enqueued");
    Ok(())
}

async fn report_status(app: &RunningApp) {
    match app.status().await {
        Ok(status) => match serde_json::to_string(&status) {
            Ok(json) => info!(
                busy = status.busy_slots(),
                backlog = status.backlog(),
                status = %json,
                "worker status"
            ),
            Err(e) => warn!(error = %e, "status serialization failed"),
        },
        Err(e) => warn!(error = %e, "status unavailable"),
    }
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
            res = tokio::signal::ctrl_c() => {
                res.context("listening for ctrl-c")?;
                info!("received ctrl-c, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.context("listening for ctrl-c")?;
        info!("received ctrl-c, shutting down");
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    init_logging(args.log_format)?;

    let config = load_config(&args)?;
    let topology = Topology::standard(config.max_priority);
    let broker = InMemoryBroker::new(Arc::new(topology.clone()));

    let app = AppBuilder::new()
        .broker(Arc::new(broker))
        .database(Arc::new(InMemoryDatabase::new()))
        .cache(Arc::new(InMemoryCache::new()))
        .results(Arc::new(InMemoryResultStore::new()))
        .topology(topology)
        .config(config)
        .build()?;
    let app = app.start().await?;

    if args.demo > 0 {
        enqueue_demo(&app, &args).await?;
    }

    let mut ticker = (args.status_interval_secs > 0)
        .then(|| tokio::time::interval(Duration::from_secs(args.status_interval_secs)));
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            res = &mut shutdown => {
                res?;
                break;
            }
            _ = async {
                match ticker.as_mut() {
                    Some(t) => { t.tick().await; }
                    None => std::future::pending::<()>().await,
                }
            } => report_status(&app).await,
        }
    }

    app.shutdown().await;
    Ok(())
}
