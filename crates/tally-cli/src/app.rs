//! Application initialization
//!
//! Provides the centralized initialization sequence and fatal error handling
//! for the Tally CLI application.

use anyhow::{Context, Result};
use std::panic;
use std::path::PathBuf;
use std::sync::Arc;
use tally_adapters::SqliteStore;
use tally_core::{
    get_default_config_path, init_logger, load_config_from_path, Config, DirectoryManager,
    LogLevel, LoggerConfig, LoggerGuard,
};
use tracing::error;

/// Application context holding initialized components
pub struct AppContext {
    /// Application configuration
    pub config: Arc<Config>,
    /// Where the configuration was loaded from
    pub config_path: PathBuf,
    directories: DirectoryManager,
    /// Keeps the log writer alive
    #[allow(dead_code)]
    logger_guard: Option<LoggerGuard>,
}

impl AppContext {
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn directories(&self) -> &DirectoryManager {
        &self.directories
    }

    /// Opens the history and usage database
    pub async fn open_store(&self) -> Result<SqliteStore> {
        SqliteStore::new(
            &self.directories.database_path(),
            self.directories.captures_dir(),
            self.config.usage.clone(),
        )
        .await
        .context("Failed to open database")
    }
}

/// Application initialization options
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// Configuration file; `None` means `~/.tally/config.toml`
    pub config_path: Option<PathBuf>,
    /// Whether to initialize the logger
    pub init_logger: bool,
    /// Mirror logs to stdout
    pub log_to_stdout: bool,
    /// Log level override
    pub log_level: Option<LogLevel>,
}

impl InitOptions {
    /// Options for an interactive command: file logging at info level
    pub fn command() -> Self {
        Self {
            config_path: None,
            init_logger: true,
            log_to_stdout: false,
            log_level: Some(LogLevel::Info),
        }
    }
}

/// Initializes the Tally application
///
/// 1. Load configuration (creating a default file if missing)
/// 2. Create the data directory structure
/// 3. Initialize logging (if requested)
/// 4. Install the panic hook
pub fn initialize(options: InitOptions) -> Result<AppContext> {
    let config_path = options
        .config_path
        .unwrap_or_else(get_default_config_path);
    let config = load_config_from_path(&config_path).context("Failed to load configuration")?;
    let config = Arc::new(config);

    let directories = DirectoryManager::new(config.storage.data_dir.clone());
    directories
        .initialize()
        .context("Failed to create directory structure")?;

    let logger_guard = if options.init_logger {
        let logger_config = LoggerConfig::new(directories.logs_dir())
            .with_level(options.log_level.unwrap_or(LogLevel::Info))
            .with_stdout(options.log_to_stdout);

        Some(init_logger(logger_config).context("Failed to initialize logger")?)
    } else {
        None
    };

    setup_panic_hook(directories.logs_dir());

    Ok(AppContext {
        config,
        config_path,
        directories,
        logger_guard,
    })
}

/// Logs the panic, points the user at the log file, then runs the default hook
fn setup_panic_hook(logs_dir: PathBuf) {
    let default_hook = panic::take_hook();

    panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown location".to_string());

        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic payload".to_string()
        };

        error!(location = %location, "FATAL ERROR: {}", message);

        eprintln!();
        eprintln!("Tally encountered a fatal error and must exit.");
        eprintln!("Location: {}", location);
        eprintln!("Error: {}", message);
        eprintln!();
        eprintln!("Please check the logs in: {}", logs_dir.display());
        eprintln!();

        default_hook(panic_info);
    }));
}
