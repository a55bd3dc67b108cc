//! Configuration management

use clap::Parser;
use config::{Config as ConfigBuilder, ConfigError as BuilderError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid server configuration: {0}")]
    InvalidServer(String),

    #[error("Invalid storage configuration: {0}")]
    InvalidStorage(String),

    #[error("Invalid repository configuration: {0}")]
    InvalidRepo(String),

    #[error("Invalid logging configuration: {0}")]
    InvalidLogging(String),

    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),
}

impl From<BuilderError> for ConfigError {
    fn from(err: BuilderError) -> Self {
        ConfigError::LoadError(err.to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub repo: RepoConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration with precedence: CLI args > Environment variables > Config file > Defaults
    pub fn load() -> Result<Self, ConfigError> {
        let cli_args = CliArgs::parse();
        Self::load_with_args(cli_args)
    }

    fn load_with_args(cli_args: CliArgs) -> Result<Self, ConfigError> {
        let mut builder = defaults(ConfigBuilder::builder())?;

        // Config file (medium priority)
        if let Some(config_path) = &cli_args.config {
            if !config_path.exists() {
                return Err(ConfigError::FileNotFound(
                    config_path.display().to_string(),
                ));
            }
            builder = builder.add_source(File::from(config_path.as_path()));
        }

        // Environment variables (higher priority), prefixed with YOMU_ and
        // using __ for nesting, e.g. YOMU_SERVER__PORT=50052
        builder = builder.add_source(
            Environment::with_prefix("YOMU")
                .separator("__")
                .try_parsing(true),
        );

        // CLI arguments (highest priority)
        if let Some(host) = &cli_args.host {
            builder = builder.set_override("server.host", host.clone())?;
        }
        if let Some(port) = cli_args.port {
            builder = builder.set_override("server.port", port)?;
        }
        if let Some(data_dir) = &cli_args.data_dir {
            builder = builder.set_override("storage.data_dir", data_dir.clone())?;
        }
        if let Some(log_level) = &cli_args.log_level {
            builder = builder.set_override("logging.level", log_level.clone())?;
        }

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let config: Config = defaults(ConfigBuilder::builder())?
            .add_source(File::from(path))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the loaded configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.host.is_empty() {
            return Err(ConfigError::InvalidServer("host cannot be empty".into()));
        }
        if self.server.port == 0 {
            return Err(ConfigError::InvalidServer("port cannot be 0".into()));
        }
        if self.storage.data_dir.trim().is_empty() {
            return Err(ConfigError::InvalidStorage(
                "data_dir cannot be empty".into(),
            ));
        }
        if !self.repo.index_url.is_empty()
            && !self.repo.index_url.starts_with("http://")
            && !self.repo.index_url.starts_with("https://")
        {
            return Err(ConfigError::InvalidRepo(format!(
                "index_url must be http(s): {}",
                self.repo.index_url
            )));
        }
        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ConfigError::InvalidLogging(format!(
                    "unknown log level: {}",
                    other
                )))
            }
        }
        Ok(())
    }

    /// Absolute, `~`-expanded data directory
    pub fn data_dir(&self) -> PathBuf {
        expand_home(&self.storage.data_dir)
    }

    /// Directory holding converted module archives
    pub fn extensions_dir(&self) -> PathBuf {
        self.data_dir().join("extensions")
    }
}

fn defaults(
    builder: config::builder::ConfigBuilder<config::builder::DefaultState>,
) -> Result<config::builder::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
    Ok(builder
        .set_default("server.host", "127.0.0.1")?
        .set_default("server.port", 50051)?
        .set_default("server.request_timeout", 120)?
        .set_default("storage.data_dir", "./data")?
        .set_default("repo.index_url", "")?
        .set_default("repo.fetch_timeout", 30)?
        .set_default("logging.level", "info")?
        .set_default("logging.format", "text")?
        .set_default("logging.output", "stdout")?
        .set_default("logging.max_file_size", 10485760)?
        .set_default("logging.max_backups", 5)?)
}

/// Expand a leading `~` to the user's home directory
fn expand_home(raw: &str) -> PathBuf {
    let trimmed = raw.trim();
    if trimmed == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = trimmed.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(trimmed)
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Per-request timeout in seconds
    pub request_timeout: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Root directory for the config store and module archives.
    /// Kept as a string so `~` expansion happens at access time.
    pub data_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepoConfig {
    /// Initial extension repository index URL; may also be set at runtime
    /// through the RPC surface and is then persisted in the config store.
    pub index_url: String,
    /// Index fetch / package download timeout in seconds
    pub fetch_timeout: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
    pub output: String,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    pub max_file_size: usize,
    pub max_backups: usize,
}

/// Command-line arguments
#[derive(Debug, Parser)]
#[command(name = "yomu-bridge", about = "Extension bridge server")]
struct CliArgs {
    /// Path to a TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Server bind host
    #[arg(long)]
    host: Option<String>,

    /// Server bind port
    #[arg(long)]
    port: Option<u16>,

    /// Data directory (config store + module archives)
    #[arg(long)]
    data_dir: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            server: ServerConfig {
                host: "127.0.0.1".into(),
                port: 50051,
                request_timeout: 120,
            },
            storage: StorageConfig {
                data_dir: "./data".into(),
            },
            repo: RepoConfig {
                index_url: String::new(),
                fetch_timeout: 30,
            },
            logging: LoggingConfig {
                level: "info".into(),
                format: "text".into(),
                output: "stdout".into(),
                log_file: None,
                max_file_size: 10485760,
                max_backups: 5,
            },
        }
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_port() {
        let mut config = base_config();
        config.server.port = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidServer(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_repo_url() {
        let mut config = base_config();
        config.repo.index_url = "ftp://mirror/index.json".into();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidRepo(_))));
    }

    #[test]
    fn test_validate_rejects_unknown_log_level() {
        let mut config = base_config();
        config.logging.level = "verbose".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidLogging(_))
        ));
    }

    #[test]
    fn test_extensions_dir_under_data_dir() {
        let config = base_config();
        assert!(config.extensions_dir().ends_with("extensions"));
    }

    #[test]
    fn test_expand_home_passthrough() {
        assert_eq!(expand_home("./data"), PathBuf::from("./data"));
    }
}
