use anyhow::{Context as _, Result};
use chored::chores::schema::ChoresFile;
use chored::chores::store::MemoryStore;
use chored::config::EngineConfig;
use chored::events::consumers::{run_fact_dispatch, FactConsumer, LogConsumer};
use chored::events::FactBus;
use chored::metrics::EngineMetrics;
use chored::{run_boundary_ticker, ChoreEngine};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(
    name = "chored",
    about = "chored — recurring-chore lifecycle engine",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Data directory for config.toml and chore definitions
    #[arg(long, env = "CHORED_DATA_DIR")]
    data_dir: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "CHORED_LOG")]
    log: Option<String>,

    /// Boundary scan cadence in seconds
    #[arg(long, env = "CHORED_TICK_SECS")]
    tick_secs: Option<u64>,

    /// Chore definitions file (default: {data_dir}/chores.toml)
    #[arg(long, env = "CHORED_CHORES_FILE")]
    chores_file: Option<std::path::PathBuf>,

    /// Write logs to this file path (rotated daily). Optional.
    #[arg(long, env = "CHORED_LOG_FILE")]
    log_file: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the engine (default when no subcommand given).
    ///
    /// Runs chored in the foreground: loads chore definitions, starts the
    /// boundary ticker and the fact dispatcher, and serves until Ctrl-C.
    ///
    /// Examples:
    ///   chored serve
    ///   chored
    Serve,
    /// Check a chore definitions file and exit.
    ///
    /// Parses the file and validates every chore. Exits non-zero on the
    /// first invalid definition, printing what is wrong with it.
    ///
    /// Examples:
    ///   chored validate chores.toml
    ///   chored validate
    Validate {
        /// Definitions file to check (default: {data_dir}/chores.toml)
        file: Option<std::path::PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // ── Logging setup ────────────────────────────────────────────────────────
    // Init once — must happen before any tracing calls.
    let log_level = args.log.as_deref().unwrap_or("info").to_owned();
    let log_format =
        std::env::var("CHORED_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());
    let _file_guard = setup_logging(&log_level, args.log_file.as_deref(), &log_format);

    match args.command {
        Some(Command::Validate { file }) => {
            let config = EngineConfig::new(
                args.data_dir,
                Some("error".to_string()),
                None,
                args.chores_file,
            );
            let path = file.unwrap_or(config.chores_file);
            run_validate(&path)
        }
        None | Some(Command::Serve) => {
            run_server(args.data_dir, args.log, args.tick_secs, args.chores_file).await
        }
    }
}

fn run_validate(path: &std::path::Path) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    match ChoresFile::parse(&text) {
        Ok(specs) => {
            println!("{}: ok ({} chores)", path.display(), specs.len());
            Ok(())
        }
        Err(e) => {
            eprintln!("{}: {e}", path.display());
            std::process::exit(1);
        }
    }
}

async fn run_server(
    data_dir: Option<std::path::PathBuf>,
    log: Option<String>,
    tick_secs: Option<u64>,
    chores_file: Option<std::path::PathBuf>,
) -> Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "chored starting");

    let config = EngineConfig::new(data_dir, log, tick_secs, chores_file);
    info!(
        data_dir = %config.data_dir.display(),
        tick_secs = config.tick_secs,
        chores_file = %config.chores_file.display(),
        "config loaded"
    );

    let store = Arc::new(MemoryStore::new());
    let bus = FactBus::new();
    let metrics = Arc::new(EngineMetrics::new());
    let engine = Arc::new(ChoreEngine::new(store, bus.clone(), metrics.clone()));

    // ── Chore definitions ────────────────────────────────────────────────────
    // A missing file is fine (chores can be defined at runtime); an invalid
    // one aborts startup so a typo never silently drops half the roster.
    match std::fs::read_to_string(&config.chores_file) {
        Ok(text) => {
            let specs = ChoresFile::parse(&text).with_context(|| {
                format!(
                    "invalid chore definitions in {}",
                    config.chores_file.display()
                )
            })?;
            let count = specs.len();
            let now = Utc::now();
            for spec in specs {
                let id = spec.id.clone();
                engine
                    .define_chore(spec, now)
                    .await
                    .with_context(|| format!("failed to define chore '{id}'"))?;
            }
            info!(count, file = %config.chores_file.display(), "chore definitions loaded");
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(
                file = %config.chores_file.display(),
                "no chore definitions file — starting with an empty roster"
            );
        }
        Err(e) => {
            return Err(e)
                .with_context(|| format!("failed to read {}", config.chores_file.display()));
        }
    }

    // ── Background jobs ──────────────────────────────────────────────────────
    let ticker = tokio::spawn(run_boundary_ticker(engine.clone(), config.tick_secs));
    let dispatch = tokio::spawn(run_fact_dispatch(
        bus.clone(),
        vec![Arc::new(LogConsumer) as Arc<dyn FactConsumer>],
    ));

    info!("chored running — press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    ticker.abort();
    dispatch.abort();
    info!(metrics = %metrics.summary(), "chored stopped");
    Ok(())
}

/// Initialize the tracing subscriber.
/// If `log_file` is set, logs go to both stdout and a daily-rolling file.
/// Returns a `WorkerGuard` that must stay alive for the process lifetime.
///
/// `log_format` may be `"pretty"` (default, human-readable compact format) or
/// `"json"` (structured JSON for log aggregators).
///
/// If the log directory cannot be created, falls back to stdout-only logging
/// with a warning — never panics.
fn setup_logging(
    log_level: &str,
    log_file: Option<&std::path::Path>,
    log_format: &str,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let use_json = log_format == "json";

    if let Some(path) = log_file {
        let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let filename = path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("chored.log"));

        // Ensure the directory exists before tracing-appender tries to open it.
        if let Err(e) = std::fs::create_dir_all(dir) {
            // Fall back to stdout-only — don't panic on a bad log path.
            eprintln!(
                "warn: could not create log directory '{}': {e} — falling back to stdout",
                dir.display()
            );
            if use_json {
                tracing_subscriber::fmt().json().with_env_filter(log_level).init();
            } else {
                tracing_subscriber::fmt().with_env_filter(log_level).compact().init();
            }
            return None;
        }

        let appender = tracing_appender::rolling::daily(dir, filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);

        if use_json {
            tracing_subscriber::registry()
                .with(EnvFilter::new(log_level))
                .with(fmt::layer().json())
                .with(fmt::layer().json().with_writer(non_blocking))
                .init();
        } else {
            tracing_subscriber::registry()
                .with(EnvFilter::new(log_level))
                .with(fmt::layer().compact())
                .with(fmt::layer().with_writer(non_blocking))
                .init();
        }

        Some(guard)
    } else if use_json {
        tracing_subscriber::fmt().json().with_env_filter(log_level).init();
        None
    } else {
        tracing_subscriber::fmt().with_env_filter(log_level).compact().init();
        None
    }
}
