use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::error;

use crate::chores::boundary::DEFAULT_TICK_SECS;

// ─── TOML config file ─────────────────────────────────────────────────────────

/// `{data_dir}/config.toml` — all fields are optional overrides.
/// Priority: CLI / env var  >  TOML  >  built-in default.
#[derive(Deserialize, Default)]
struct TomlConfig {
    /// Log level filter string, e.g. "debug", "info,chored=trace" (default: "info").
    log: Option<String>,
    /// Log output format: "pretty" (default, human-readable) | "json" (structured).
    log_format: Option<String>,
    /// Boundary scan cadence in seconds (default: 60).
    tick_secs: Option<u64>,
    /// Chore definitions file (default: `{data_dir}/chores.toml`).
    chores_file: Option<PathBuf>,
}

fn load_toml(data_dir: &Path) -> Option<TomlConfig> {
    let path = data_dir.join("config.toml");
    let contents = std::fs::read_to_string(&path).ok()?;
    match toml::from_str::<TomlConfig>(&contents) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            error!(path = %path.display(), err = %e, "failed to parse config.toml — using defaults");
            None
        }
    }
}

// ─── EngineConfig ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub data_dir: PathBuf,
    /// Log level filter string (CHORED_LOG env var, default: "info").
    pub log: String,
    /// Log output format: "pretty" (default) | "json" (CHORED_LOG_FORMAT env var).
    pub log_format: String,
    /// Boundary scan cadence in seconds (CHORED_TICK_SECS env var, default: 60).
    pub tick_secs: u64,
    /// Chore definitions file (CHORED_CHORES_FILE env var).
    pub chores_file: PathBuf,
}

impl EngineConfig {
    /// Build config from CLI/env args + optional TOML file.
    ///
    /// Priority (highest to lowest):
    ///   1. CLI / env — passed as `Some(value)` from clap
    ///   2. TOML file at `{data_dir}/config.toml`
    ///   3. Built-in defaults
    pub fn new(
        data_dir: Option<PathBuf>,
        log: Option<String>,
        tick_secs: Option<u64>,
        chores_file: Option<PathBuf>,
    ) -> Self {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);

        // Load TOML as the lowest-priority override layer
        let toml = load_toml(&data_dir).unwrap_or_default();

        let log = log.or(toml.log).unwrap_or_else(|| "info".to_string());

        let log_format = std::env::var("CHORED_LOG_FORMAT")
            .ok()
            .filter(|s| !s.is_empty())
            .or(toml.log_format)
            .unwrap_or_else(|| "pretty".to_string());

        let tick_secs = tick_secs.or(toml.tick_secs).unwrap_or(DEFAULT_TICK_SECS);

        let chores_file = chores_file
            .or(toml.chores_file)
            .unwrap_or_else(|| data_dir.join("chores.toml"));

        Self {
            data_dir,
            log,
            log_format,
            tick_secs,
            chores_file,
        }
    }
}

fn default_data_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        // ~/Library/Application Support/chored
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("chored");
        }
    }
    #[cfg(target_os = "linux")]
    {
        // $XDG_DATA_HOME/chored or ~/.local/share/chored
        if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
            return PathBuf::from(xdg).join("chored");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home)
                .join(".local")
                .join("share")
                .join("chored");
        }
    }
    #[cfg(target_os = "windows")]
    {
        // %APPDATA%\chored
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("chored");
        }
    }
    // Fallback
    PathBuf::from(".chored")
}

// ─── Tests ───────────────────────────────────────────────────────────────────
