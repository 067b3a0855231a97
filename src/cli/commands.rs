//! CLI command implementations
//!
//! Boot sequence of `start`:
//! 1. Configuration load and validation
//! 2. Decision log open (file backed when `data_dir` is set)
//! 3. Runtime, transport and engine construction
//! 4. Session restore from surviving decision logs (inactive until
//!    reactivated through `/settings`)
//! 5. Sweeper spawn
//! 6. HTTP serving

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::decision_log::{DecisionLog, FileDecisionLog, MemoryDecisionLog};
use crate::http_server::{HttpServer, HttpServerConfig};
use crate::observability::{log_event, Event, Logger, MetricsRegistry, Severity};
use crate::protocol::TransactionEngine;
use crate::timeout::TimeoutConfig;
use crate::transport::HttpTransport;

use super::args::Command;
use super::errors::{CliError, CliResult};

/// Configuration file structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Base URL peers use to reach this node; also its node id
    #[serde(default = "default_node_url")]
    pub node_url: String,

    /// Directory for durable decision logs; in-memory when absent
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Lowest severity written to the process log
    #[serde(default = "default_log_level")]
    pub log_level: Severity,

    #[serde(default)]
    pub server: HttpServerConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

fn default_node_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_log_level() -> Severity {
    Severity::Info
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_url: default_node_url(),
            data_dir: None,
            log_level: default_log_level(),
            server: HttpServerConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> CliResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| CliError::config_error(format!("Failed to read config: {}", e)))?;

        let config: Config = serde_json::from_str(&content)
            .map_err(|e| CliError::config_error(format!("Invalid config JSON: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> CliResult<()> {
        if !(self.node_url.starts_with("http://") || self.node_url.starts_with("https://")) {
            return Err(CliError::config_error(format!(
                "Invalid node_url: '{}'. Must start with http:// or https://",
                self.node_url
            )));
        }

        if self.server.port == 0 {
            return Err(CliError::config_error("server.port must be > 0"));
        }

        self.timeouts
            .validate()
            .map_err(|field| CliError::config_error(format!("timeouts.{} must be > 0", field)))?;

        Ok(())
    }

    /// Opens the decision log this config describes
    pub fn open_decision_log(&self) -> CliResult<Arc<dyn DecisionLog>> {
        match &self.data_dir {
            Some(dir) => {
                let log = FileDecisionLog::open(dir).map_err(|e| {
                    CliError::boot_failed(format!("Failed to open decision log: {}", e))
                })?;
                Ok(Arc::new(log))
            }
            None => Ok(Arc::new(MemoryDecisionLog::new())),
        }
    }
}

/// Main CLI entry point
///
/// Parses arguments and dispatches to the appropriate command.
/// This is the only function that main.rs should call.
pub fn run() -> CliResult<()> {
    let cli = super::args::Cli::parse_args();
    run_command(cli.command)
}

/// Run the appropriate command based on CLI args
pub fn run_command(cmd: Command) -> CliResult<()> {
    match cmd {
        Command::Init {
            config,
            data_dir,
            node_url,
            port,
        } => {
            let mut initial = Config::default();
            initial.data_dir = data_dir;
            if let Some(url) = node_url {
                initial.node_url = url;
            }
            if let Some(port) = port {
                initial.server.port = port;
            }
            init(&config, &initial)
        }
        Command::Start { config, port } => start(&config, port),
    }
}

/// Writes `config` to `config_path` and creates its data directory.
///
/// Refuses to overwrite an existing configuration file.
pub fn init(config_path: &Path, config: &Config) -> CliResult<()> {
    if config_path.exists() {
        return Err(CliError::already_initialized(config_path.display()));
    }
    config.validate()?;

    if let Some(dir) = &config.data_dir {
        fs::create_dir_all(dir).map_err(|e| {
            CliError::io_error(format!("Failed to create directory {:?}: {}", dir, e))
        })?;
    }

    let content = serde_json::to_string_pretty(config)?;
    fs::write(config_path, content).map_err(|e| {
        CliError::io_error(format!("Failed to write {:?}: {}", config_path, e))
    })?;

    println!(
        "{}",
        json!({"initialized": true, "config": config_path.display().to_string()})
    );
    Ok(())
}

/// Boots the node and serves until the listener fails
pub fn start(config_path: &Path, port: Option<u16>) -> CliResult<()> {
    log_event(Event::BootStart, &[("config", &config_path.display().to_string())]);

    let mut config = Config::load(config_path)?;
    if let Some(port) = port {
        config.server.port = port;
        config.validate()?;
    }
    Logger::set_min_severity(config.log_level);

    let data_dir = config
        .data_dir
        .as_ref()
        .map_or_else(|| "memory".to_string(), |d| d.display().to_string());
    log_event(
        Event::ConfigLoaded,
        &[
            ("node", &config.node_url),
            ("data_dir", &data_dir),
            ("port", &config.server.port.to_string()),
        ],
    );

    let log = config.open_decision_log()?;
    let metrics = Arc::new(MetricsRegistry::new());
    let transport = HttpTransport::new(config.timeouts.send_timeout(), metrics.clone())
        .map_err(|e| CliError::boot_failed(format!("Failed to build transport: {}", e)))?;

    let rt = tokio::runtime::Runtime::new()
        .map_err(|e| CliError::boot_failed(format!("Failed to create tokio runtime: {}", e)))?;

    rt.block_on(async {
        let engine = TransactionEngine::new(
            config.node_url.clone(),
            log,
            Arc::new(transport),
            config.timeouts.clone(),
            metrics,
        );
        let restored = engine
            .restore()
            .map_err(|e| CliError::boot_failed(format!("Failed to restore sessions: {}", e)))?;
        log_event(Event::BootRestored, &[("sessions", &restored.len().to_string())]);
        let _sweeper = engine.spawn_sweeper();

        HttpServer::new(config.server.clone(), engine)
            .start()
            .await
            .map_err(|e| CliError::boot_failed(format!("HTTP server failed: {}", e)))
    })?;

    Ok(())
}
