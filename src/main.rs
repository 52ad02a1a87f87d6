use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use mikrotik_sync::controller::{ControllerState, SyncWorker};
use mikrotik_sync::gateway::RouterOsGateway;
use mikrotik_sync::model::TenantId;
use mikrotik_sync::queue::PgSyncQueue;
use mikrotik_sync::scheduler::{self, Scheduler, SweepKind};
use mikrotik_sync::store::{schema, PgStore};
use mikrotik_sync::{telemetry, Config};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tokio::sync::watch;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(long, global = true, env = "MIKROTIK_SYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the worker pool, scheduler and REST API
    Run(RunArgs),
    /// Create the database schema
    Migrate(DbArgs),
    /// Queue a one-off sweep for a tenant
    Sweep(SweepArgs),
    /// Show version information
    Version,
}

#[derive(Parser, Debug)]
struct DbArgs {
    /// PostgreSQL connection URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,
}

#[derive(Parser, Debug)]
struct RunArgs {
    #[command(flatten)]
    db: DbArgs,

    /// Jobs processed concurrently by this process
    #[arg(long, env = "WORKER_CONCURRENCY")]
    concurrency: Option<usize>,

    /// Identity recorded on leased jobs
    #[arg(long, env = "WORKER_ID")]
    worker_id: Option<String>,

    /// Address the REST API listens on
    #[arg(long, env = "API_BIND")]
    api_bind: Option<SocketAddr>,

    /// Do not run the cron loop in this process
    #[arg(long, env = "DISABLE_SCHEDULER")]
    no_scheduler: bool,

    /// Do not serve the REST API
    #[arg(long, env = "DISABLE_REST_API")]
    no_api: bool,
}

#[derive(Parser, Debug)]
struct SweepArgs {
    #[command(flatten)]
    db: DbArgs,

    /// Tenant to sweep
    #[arg(long)]
    tenant: String,

    /// `reconcile` or `expire`
    #[arg(long)]
    kind: SweepKind,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if let Commands::Version = args.command {
        println!("mikrotik-sync v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let otel_enabled = init_tracing(args.log_json);
    if otel_enabled {
        info!("OpenTelemetry tracing initialized");
    }

    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    let result = match args.command {
        Commands::Run(run_args) => run(config, run_args).await,
        Commands::Migrate(db) => migrate(config, db).await,
        Commands::Sweep(sweep_args) => sweep(config, sweep_args).await,
        Commands::Version => Ok(()),
    };

    // Flush any remaining traces
    telemetry::shutdown_telemetry();

    result
}

/// Install the global subscriber; returns whether OTLP export is active
fn init_tracing(json: bool) -> bool {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    let fmt_layer = if json {
        fmt::layer().json().with_target(true).boxed()
    } else {
        fmt::layer().with_target(true).boxed()
    };

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    // Only enable OTEL if an endpoint is provided
    let otel_layer = telemetry::init_telemetry(&registry);
    let enabled = otel_layer.is_some();
    registry.with(otel_layer).init();
    enabled
}

async fn connect(config: &Config, db: &DbArgs) -> anyhow::Result<PgPool> {
    let url = db
        .database_url
        .clone()
        .or_else(|| config.database.url.clone())
        .context("no database URL: pass --database-url, set DATABASE_URL or [database].url")?;

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&url)
        .await
        .context("failed to connect to PostgreSQL")?;
    info!("Connected to PostgreSQL");
    Ok(pool)
}

fn open_queue(config: &Config, pool: PgPool) -> Arc<PgSyncQueue> {
    Arc::new(PgSyncQueue::new(
        pool,
        config.queue.name.clone(),
        config.retry_policy(),
    ))
}

async fn run(mut config: Config, args: RunArgs) -> anyhow::Result<()> {
    // CLI and environment override the file
    if let Some(concurrency) = args.concurrency {
        config.worker.concurrency = concurrency;
    }
    if let Some(worker_id) = args.worker_id.clone() {
        config.worker.worker_id = Some(worker_id);
    }
    if let Some(bind) = args.api_bind {
        config.api.bind = bind;
    }
    if args.no_scheduler {
        config.schedule.enabled = false;
    }
    if args.no_api {
        config.api.enabled = false;
    }
    config.validate()?;

    info!("Starting mikrotik-sync v{}", env!("CARGO_PKG_VERSION"));

    let pool = connect(&config, &args.db).await?;
    let queue = open_queue(&config, pool.clone());
    let state = Arc::new(ControllerState::new(
        Arc::new(PgStore::new(pool)),
        Arc::new(RouterOsGateway::new(
            config.router_timeout(),
            config.router.accept_invalid_certs,
        )),
        queue.clone(),
        config.sync_settings(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    let worker = SyncWorker::new(Arc::clone(&state), config.worker_config());
    let worker_shutdown = shutdown_rx.clone();
    tasks.push(tokio::spawn(async move { worker.run(worker_shutdown).await }));

    if config.schedule.enabled {
        let scheduler = Scheduler::new(queue.clone(), config.schedule_entries()?);
        let scheduler_shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            scheduler.run(scheduler_shutdown).await
        }));
    } else {
        info!("Scheduler disabled in this process");
    }

    #[cfg(feature = "rest-api")]
    if config.api.enabled {
        let api_state = Arc::clone(&state);
        let api_shutdown = shutdown_rx.clone();
        let bind = config.api.bind;
        tasks.push(tokio::spawn(async move {
            if let Err(e) = mikrotik_sync::rest_api::run_server(api_state, bind, api_shutdown).await
            {
                error!("REST API server error: {}", e);
            }
        }));
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown signal received, draining");
    let _ = shutdown_tx.send(true);

    for task in tasks {
        if let Err(e) = task.await {
            error!("Background task panicked: {}", e);
        }
    }
    info!("Stopped");
    Ok(())
}

async fn migrate(config: Config, db: DbArgs) -> anyhow::Result<()> {
    let pool = connect(&config, &db).await?;
    schema::migrate(&pool).await?;
    info!("Schema is up to date");
    Ok(())
}

async fn sweep(config: Config, args: SweepArgs) -> anyhow::Result<()> {
    let pool = connect(&config, &args.db).await?;
    let queue = open_queue(&config, pool);
    let tenant = TenantId::from(args.tenant.as_str());
    let job = scheduler::enqueue_tenant(queue.as_ref(), args.kind, &tenant).await?;
    println!("Queued {} sweep for tenant {} as job {}", args.kind, tenant, job);
    Ok(())
}
