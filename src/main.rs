use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use pezzottify_event_queue::config::{AppConfig, CliConfig, FileConfig};
use pezzottify_event_queue::events::{
    EmitOptions, EventFilter, EventStatus, EventStore, EventSystem, EventType, HandlerRegistry,
    SqliteEventStore, SystemClock,
};
use pezzottify_event_queue::handlers::register_default_handlers;
use pezzottify_event_queue::server::{self, run_server};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    if path_buf.is_absolute() {
        return Ok(path_buf);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(path_buf))
}

#[derive(Parser, Debug)]
#[clap(version, about = "Durable typed event queue worker")]
struct CliArgs {
    /// Path to a TOML config file. Values in the file override CLI arguments.
    #[clap(long, global = true, env = "EVENTS_CONFIG", value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Path to the SQLite events database file.
    #[clap(long, global = true, env = "EVENTS_DB_PATH", value_parser = parse_path)]
    pub db_path: Option<PathBuf>,

    /// Root directory of stored user files.
    #[clap(long, global = true, env = "EVENTS_STORAGE_DIR", value_parser = parse_path)]
    pub storage_dir: Option<PathBuf>,

    /// Port for the admin/metrics server. Not started when omitted.
    #[clap(long, global = true, env = "EVENTS_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Maximum records claimed per poll cycle.
    #[clap(long, global = true, env = "EVENTS_BATCH_SIZE")]
    pub batch_size: Option<usize>,

    /// Milliseconds between poll cycles.
    #[clap(long, global = true, env = "EVENTS_POLL_INTERVAL_MS")]
    pub poll_interval_ms: Option<u64>,

    /// Maximum dispatches in flight at once.
    #[clap(long, global = true, env = "EVENTS_MAX_CONCURRENCY")]
    pub max_concurrency: Option<usize>,

    /// Whether SCHEDULED records are eligible for claiming.
    #[clap(long, global = true, env = "EVENTS_ENABLE_SCHEDULED_EVENTS")]
    pub enable_scheduled_events: Option<bool>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the worker loop until interrupted.
    Run,
    /// Print record counts per status.
    Stats,
    /// List records, newest first.
    List {
        #[clap(long = "type")]
        event_type: Option<String>,
        #[clap(long)]
        status: Option<String>,
        #[clap(long)]
        priority: Option<i32>,
        #[clap(long, default_value_t = 20)]
        limit: usize,
        #[clap(long, default_value_t = 0)]
        offset: usize,
    },
    /// Emit an event from a JSON payload.
    Emit {
        /// Event type name, e.g. file.expired
        event_type: String,
        /// Payload as a JSON object
        payload: String,
        #[clap(long, default_value_t = 0)]
        priority: i32,
        /// RFC 3339 instant before which the event is not processed
        #[clap(long)]
        scheduled_at: Option<DateTime<Utc>>,
        #[clap(long)]
        max_retries: Option<u32>,
    },
    /// Queue a fresh copy of an existing record.
    Reemit { id: String },
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            db_path: self.db_path.clone(),
            storage_dir: self.storage_dir.clone(),
            metrics_port: self.metrics_port,
            batch_size: self.batch_size,
            poll_interval_ms: self.poll_interval_ms,
            max_concurrency: self.max_concurrency,
            enable_scheduled_events: self.enable_scheduled_events,
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let file_config = match &cli_args.config {
        Some(path) => Some(FileConfig::load(path)?),
        None => None,
    };
    let config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;

    info!("Opening events database at {:?}...", config.db_path);
    let store: Arc<dyn EventStore> = Arc::new(SqliteEventStore::new(&config.db_path)?);
    let registry = Arc::new(HandlerRegistry::new());
    let system = EventSystem::new(
        store,
        registry.clone(),
        Arc::new(SystemClock),
        config.event_queue.clone(),
    );

    match cli_args.command {
        Command::Run => run(config, system, &registry).await,
        Command::Stats => print_json(&system.stats()?),
        Command::List {
            event_type,
            status,
            priority,
            limit,
            offset,
        } => {
            let event_type = event_type.map(|t| t.parse::<EventType>()).transpose()?;
            let status = match status {
                Some(s) => match EventStatus::from_db_str(&s.to_uppercase()) {
                    Some(status) => Some(status),
                    None => bail!("Unknown status '{}'", s),
                },
                None => None,
            };
            let filter = EventFilter {
                event_type,
                status,
                priority,
                limit: Some(limit),
                offset: Some(offset),
                ..Default::default()
            };
            print_json(&system.list(&filter)?)
        }
        Command::Emit {
            event_type,
            payload,
            priority,
            scheduled_at,
            max_retries,
        } => {
            let payload: serde_json::Value =
                serde_json::from_str(&payload).context("Payload is not valid JSON")?;
            let options = EmitOptions {
                priority,
                scheduled_at,
                max_retries,
                metadata: None,
            };
            print_json(&system.emit_json(&event_type, payload, options)?)
        }
        Command::Reemit { id } => print_json(&system.reemit(&id)?),
    }
}

async fn run(config: AppConfig, system: EventSystem, registry: &HandlerRegistry) -> Result<()> {
    info!("Starting event-worker v{}", env!("CARGO_PKG_VERSION"));
    info!("Initializing metrics...");
    server::metrics::init_metrics();

    info!("Registering handlers rooted at {:?}", config.storage_dir);
    register_default_handlers(registry, &config.storage_dir);

    let system = EventSystem::init_global(system);
    system.start();

    let server_shutdown = CancellationToken::new();
    let server_handle = config.metrics_port.map(|port| {
        let state = system.clone();
        let shutdown = server_shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = run_server(state, port, shutdown).await {
                error!("Admin server failed: {:#}", e);
            }
        })
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received, draining in-flight events...");

    system.stop().await;
    server_shutdown.cancel();
    if let Some(handle) = server_handle {
        let _ = handle.await;
    }
    info!("Bye");
    Ok(())
}
