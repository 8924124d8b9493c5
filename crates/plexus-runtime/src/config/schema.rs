//! Configuration schema for the service host.
//!
//! # Example configuration (YAML)
//!
//! ```yaml
//! log_level: info
//! plugin_mode: subprocess
//! run_mode: service
//! plugins:
//!   - type: hello
//!     plugin_path: ./plugins
//!     config:
//!       greeting: "good morning"
//!     env:
//!       HELLO_MODE: loud
//! ```

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use plexus_core::JsonMap;

// =============================================================================
// Root Configuration
// =============================================================================

/// Root configuration handed to the supervisor.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// Default log level.
    pub log_level: LogLevel,

    /// How plugins are hosted.
    pub plugin_mode: PluginMode,

    /// Whether the host keeps routing after bring-up or runs plugins to
    /// completion.
    pub run_mode: RunMode,

    /// Plugins to bring up, in declared order.
    pub plugins: Vec<PluginSpec>,
}

/// Per-plugin configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginSpec {
    /// Plugin name and discovery key. Doubles as its mailbox name.
    #[serde(rename = "type")]
    pub name: String,

    /// Directory to discover the plugin in, or the binary itself.
    #[serde(default = "default_plugin_path")]
    pub plugin_path: PathBuf,

    /// Mailbox capacity override.
    #[serde(default)]
    pub chan_len: Option<usize>,

    /// Free-form map handed to the plugin's `init`.
    #[serde(default)]
    pub config: JsonMap,

    /// Environment variables injected before the plugin initializes.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl PluginSpec {
    /// Creates a spec for a builtin plugin: no discovery path, no env.
    pub fn builtin(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            plugin_path: default_plugin_path(),
            chan_len: None,
            config: JsonMap::new(),
            env: HashMap::new(),
        }
    }

    /// Sets the config map (builder pattern).
    pub fn with_config(mut self, config: JsonMap) -> Self {
        self.config = config;
        self
    }
}

fn default_plugin_path() -> PathBuf {
    PathBuf::from("./")
}

// =============================================================================
// Modes
// =============================================================================

/// How plugins are hosted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PluginMode {
    /// Load plugins as dynamic libraries into the host process.
    #[default]
    InProcess,
    /// Spawn each plugin as a child process behind the RPC tunnel.
    Subprocess,
}

/// Whether the host is a long-running service or a run-to-completion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    /// Keep routing until a stop is requested.
    #[default]
    Service,
    /// Wait for each plugin's start to return, then shut down.
    Job,
}

// =============================================================================
// Log level
// =============================================================================

/// Log level enum, mirroring `tracing::Level`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    #[default]
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Converts to `tracing::Level`.
    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }

    /// Converts to a filter directive string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
