//! Process-wide tree configuration.
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic** — a [`TreeConfig`] installed with [`init`]
//! 2. **Environment variables** — values from `CTXTREE_*` env vars
//! 3. **Config file** — a TOML file named by `CTXTREE_CONFIG_FILE`
//!    (requires the `config-file` feature)
//! 4. **Defaults** — [`TreeConfig::default()`]
//!
//! The configuration is frozen the first time it is read, which happens no
//! later than the first deadline being armed. [`init`] after that point fails
//! with [`ConfigError::AlreadyInitialized`].
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `CTXTREE_SCHEDULER_THREAD_NAME` | `String` | `scheduler_thread_name` |
//! | `CTXTREE_SCHEDULER_STACK_SIZE` | `usize` | `scheduler_stack_size` |
//! | `CTXTREE_SKIP_REDUNDANT_TIMERS` | `bool` | `skip_redundant_timers` |
//! | `CTXTREE_CONFIG_FILE` | path | TOML file to load first |

use std::sync::OnceLock;

use crate::tracing_compat::warn;

/// Environment variable name for the scheduler thread name.
pub const ENV_SCHEDULER_THREAD_NAME: &str = "CTXTREE_SCHEDULER_THREAD_NAME";
/// Environment variable name for the scheduler thread stack size.
pub const ENV_SCHEDULER_STACK_SIZE: &str = "CTXTREE_SCHEDULER_STACK_SIZE";
/// Environment variable name for the redundant-timer optimization toggle.
pub const ENV_SKIP_REDUNDANT_TIMERS: &str = "CTXTREE_SKIP_REDUNDANT_TIMERS";
/// Environment variable naming a TOML config file.
pub const ENV_CONFIG_FILE: &str = "CTXTREE_CONFIG_FILE";

static CONFIG: OnceLock<TreeConfig> = OnceLock::new();

/// Errors produced while resolving configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable or file field holds an unparseable value.
    #[error("invalid value for {name}: {message}")]
    InvalidValue {
        /// Variable or field name.
        name: &'static str,
        /// What was wrong with it.
        message: String,
    },

    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path that was read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML for [`TreeConfig`].
    #[cfg(feature = "config-file")]
    #[error("failed to parse TOML config: {0}")]
    Toml(#[from] toml::de::Error),

    /// A config file was named but the `config-file` feature is disabled.
    #[error("config file {0} requires the `config-file` feature")]
    FileSupportDisabled(String),

    /// The configuration was already frozen.
    #[error("tree configuration is already initialized")]
    AlreadyInitialized,
}

/// Settings shared by every context in the process.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "config-file", derive(serde::Deserialize))]
#[cfg_attr(feature = "config-file", serde(default, deny_unknown_fields))]
pub struct TreeConfig {
    /// Name of the deadline scheduler thread.
    pub scheduler_thread_name: String,
    /// Stack size of the scheduler thread in bytes (0 = platform default).
    pub scheduler_stack_size: usize,
    /// Skip arming a timer when an ancestor's deadline is equal or earlier.
    ///
    /// The ancestor's expiry propagates to the child either way.
    pub skip_redundant_timers: bool,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            scheduler_thread_name: "ctxtree-deadline".to_string(),
            scheduler_stack_size: 0,
            skip_redundant_timers: true,
        }
    }
}

impl TreeConfig {
    /// Resolves configuration from the config file (if any), environment
    /// variables and defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match read_env(ENV_CONFIG_FILE) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Parses a TOML document. Missing fields keep their defaults.
    #[cfg(feature = "config-file")]
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_str)?)
    }

    #[cfg(feature = "config-file")]
    fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    #[cfg(not(feature = "config-file"))]
    fn from_file(path: &str) -> Result<Self, ConfigError> {
        Err(ConfigError::FileSupportDisabled(path.to_string()))
    }

    /// Applies `CTXTREE_*` overrides. Only variables that are set are applied.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(val) = read_env(ENV_SCHEDULER_THREAD_NAME) {
            if val.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    name: ENV_SCHEDULER_THREAD_NAME,
                    message: "thread name must not be empty".to_string(),
                });
            }
            self.scheduler_thread_name = val;
        }
        if let Some(val) = read_env(ENV_SCHEDULER_STACK_SIZE) {
            self.scheduler_stack_size = parse_usize(ENV_SCHEDULER_STACK_SIZE, &val)?;
        }
        if let Some(val) = read_env(ENV_SKIP_REDUNDANT_TIMERS) {
            self.skip_redundant_timers = parse_bool(ENV_SKIP_REDUNDANT_TIMERS, &val)?;
        }
        Ok(())
    }
}

/// Installs `config` for the rest of the process.
///
/// Must run before the first deadline context is created.
pub fn init(config: TreeConfig) -> Result<(), ConfigError> {
    CONFIG
        .set(config)
        .map_err(|_| ConfigError::AlreadyInitialized)
}

/// Returns the frozen configuration, resolving it on first use.
///
/// A configuration that fails to resolve is logged and replaced by the
/// defaults.
pub fn current() -> &'static TreeConfig {
    CONFIG.get_or_init(|| {
        TreeConfig::load().unwrap_or_else(|err| {
            warn!(
                target: "ctxtree::config",
                error = %err,
                "falling back to default tree configuration"
            );
            drop(err);
            TreeConfig::default()
        })
    })
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_usize(name: &'static str, val: &str) -> Result<usize, ConfigError> {
    val.trim()
        .parse::<usize>()
        .map_err(|e| ConfigError::InvalidValue {
            name,
            message: format!("expected unsigned integer, got {val:?} ({e})"),
        })
}

fn parse_bool(name: &'static str, val: &str) -> Result<bool, ConfigError> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            name,
            message: format!("expected bool (true/false/1/0/yes/no), got {val:?}"),
        }),
    }
}
