//! Bootstrap configuration loading and resolution
//!
//! Every setting resolves in this priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`HXP_*`)
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! A missing TOML file is not an error; the service starts on defaults.
//! A TOML file that exists but cannot be parsed is an error.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5780;
pub const DEFAULT_MODEL_PATH: &str = "final_model.json";
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "HXP_CONFIG";

const CONFIG_DIR_NAME: &str = "hxp";
const CONFIG_FILE_NAME: &str = "hxp-predict.toml";

/// What to report when the classifier emits a label other than 0 or 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelPolicy {
    /// Reject the prediction as a model contract violation
    #[default]
    Strict,
    /// Report any label other than 1 as low risk
    Permissive,
}

impl FromStr for LabelPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(LabelPolicy::Strict),
            "permissive" => Ok(LabelPolicy::Permissive),
            other => Err(Error::Config(format!(
                "Invalid label policy '{}' (expected 'strict' or 'permissive')",
                other
            ))),
        }
    }
}

/// When the model artifact is acquired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadMode {
    /// Load in the background as soon as the service starts
    #[default]
    Eager,
    /// Load on the first prediction request
    Lazy,
}

impl FromStr for LoadMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "eager" => Ok(LoadMode::Eager),
            "lazy" => Ok(LoadMode::Lazy),
            other => Err(Error::Config(format!(
                "Invalid model load mode '{}' (expected 'eager' or 'lazy')",
                other
            ))),
        }
    }
}

/// Bootstrap configuration as written in the TOML file
///
/// Every field is optional; absent fields fall through to compiled defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub host: Option<String>,

    #[serde(default)]
    pub port: Option<u16>,

    #[serde(default)]
    pub label_policy: Option<LabelPolicy>,

    #[serde(default)]
    pub model: ModelToml,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// `[model]` table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelToml {
    /// Local artifact path
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Expected SHA-256 of the artifact bytes (hex)
    #[serde(default)]
    pub sha256: Option<String>,

    /// Remote mirror fetched when the local artifact is absent or corrupt
    #[serde(default)]
    pub remote_url: Option<String>,

    #[serde(default)]
    pub fetch_timeout_secs: Option<u64>,

    #[serde(default)]
    pub load_mode: Option<LoadMode>,
}

/// `[logging]` table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error); `RUST_LOG` overrides
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

/// Command-line overrides (highest priority)
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_path: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub model_path: Option<PathBuf>,
    pub model_url: Option<String>,
    pub load_mode: Option<LoadMode>,
}

/// Where and how to acquire the model artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSourceConfig {
    pub path: PathBuf,
    /// Lowercase hex SHA-256 the artifact bytes must match, if pinned
    pub sha256: Option<String>,
    pub remote_url: Option<String>,
    pub fetch_timeout: Duration,
    pub load_mode: LoadMode,
}

impl ModelSourceConfig {
    /// Local-only source with no integrity pin
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sha256: None,
            remote_url: None,
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            load_mode: LoadMode::Eager,
        }
    }
}

/// Fully resolved service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub label_policy: LabelPolicy,
    pub model: ModelSourceConfig,
    pub log_level: String,
    /// TOML file the configuration was read from, if any
    pub config_file: Option<PathBuf>,
}

impl ServiceConfig {
    /// Resolve configuration from CLI overrides, the process environment,
    /// the TOML file and compiled defaults
    pub fn resolve(overrides: &ConfigOverrides) -> Result<Self> {
        let config_file = locate_config_file(overrides.config_path.as_deref(), env_value)?;

        let toml_config = match &config_file {
            Some(path) => load_toml_config(path)?,
            None => TomlConfig::default(),
        };

        let mut config = Self::from_parts(overrides, toml_config, env_value)?;
        config.config_file = config_file;
        Ok(config)
    }

    /// Merge the configuration layers
    ///
    /// `env` looks up an environment variable; empty values count as unset.
    pub fn from_parts<F>(overrides: &ConfigOverrides, toml: TomlConfig, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = overrides
            .host
            .clone()
            .or_else(|| env("HXP_HOST"))
            .or(toml.host)
            .unwrap_or_else(|| DEFAULT_HOST.to_string());

        let port = match overrides.port {
            Some(port) => port,
            None => match env("HXP_PORT") {
                Some(raw) => parse_env("HXP_PORT", &raw)?,
                None => toml.port.unwrap_or(DEFAULT_PORT),
            },
        };

        let label_policy = match env("HXP_LABEL_POLICY") {
            Some(raw) => raw.parse()?,
            None => toml.label_policy.unwrap_or_default(),
        };

        let path = overrides
            .model_path
            .clone()
            .or_else(|| env("HXP_MODEL_PATH").map(PathBuf::from))
            .or(toml.model.path)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH));

        let sha256 = env("HXP_MODEL_SHA256")
            .or(toml.model.sha256)
            .map(|hash| hash.trim().to_ascii_lowercase());

        let remote_url = overrides
            .model_url
            .clone()
            .or_else(|| env("HXP_MODEL_URL"))
            .or(toml.model.remote_url);

        let fetch_timeout_secs = match env("HXP_MODEL_FETCH_TIMEOUT_SECS") {
            Some(raw) => parse_env("HXP_MODEL_FETCH_TIMEOUT_SECS", &raw)?,
            None => toml
                .model
                .fetch_timeout_secs
                .unwrap_or(DEFAULT_FETCH_TIMEOUT_SECS),
        };

        let load_mode = match overrides.load_mode {
            Some(mode) => mode,
            None => match env("HXP_MODEL_LOAD_MODE") {
                Some(raw) => raw.parse()?,
                None => toml.model.load_mode.unwrap_or_default(),
            },
        };

        let log_level = env("HXP_LOG_LEVEL").unwrap_or(toml.logging.level);

        let config = Self {
            host,
            port,
            label_policy,
            model: ModelSourceConfig {
                path,
                sha256,
                remote_url,
                fetch_timeout: Duration::from_secs(fetch_timeout_secs),
                load_mode,
            },
            log_level,
            config_file: None,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the service cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(Error::Config("port must be non-zero".to_string()));
        }
        if self.host.trim().is_empty() {
            return Err(Error::Config("host must not be empty".to_string()));
        }
        if self.model.fetch_timeout.is_zero() {
            return Err(Error::Config(
                "model fetch timeout must be at least 1 second".to_string(),
            ));
        }
        if let Some(hash) = &self.model.sha256 {
            if !is_sha256_hex(hash) {
                return Err(Error::Config(format!(
                    "model sha256 must be 64 hex characters, got '{}'",
                    hash
                )));
            }
        }
        if let Some(url) = &self.model.remote_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(Error::Config(format!(
                    "model remote_url must be an http(s) URL, got '{}'",
                    url
                )));
            }
        }
        Ok(())
    }

    /// Socket address string for the listener
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Read and parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read config {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse config {} failed: {}", path.display(), e)))
}

/// Find the TOML config file
///
/// An explicitly named file (CLI, then `HXP_CONFIG`) must exist. Otherwise
/// the user config directory and `/etc/hxp` are checked, and `None` means
/// "run on defaults".
pub fn locate_config_file<F>(cli_path: Option<&Path>, env: F) -> Result<Option<PathBuf>>
where
    F: Fn(&str) -> Option<String>,
{
    let explicit = cli_path
        .map(Path::to_path_buf)
        .or_else(|| env(CONFIG_PATH_ENV).map(PathBuf::from));

    if let Some(path) = explicit {
        if path.is_file() {
            return Ok(Some(path));
        }
        return Err(Error::Config(format!(
            "Config file not found: {}",
            path.display()
        )));
    }

    let candidates = [
        dirs::config_dir().map(|d| d.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME)),
        Some(PathBuf::from("/etc").join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME)),
    ];

    Ok(candidates.into_iter().flatten().find(|path| path.is_file()))
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: FromStr>(key: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| Error::Config(format!("Invalid {} '{}': {}", key, raw, e)))
}

fn is_sha256_hex(value: &str) -> bool {
    value.len() == 64 && value.chars().all(|c| c.is_ascii_hexdigit())
}
