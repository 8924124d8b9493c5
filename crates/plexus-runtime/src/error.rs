//! Error types for the host side: configuration, loading, and lifecycle.

use std::path::PathBuf;

use thiserror::Error;

use plexus_core::{EnvelopeError, MailboxError, PluginError};
use plexus_transport::{HandshakeError, WireError};

/// Errors surfaced by the supervisor and the plugin loaders.
#[derive(Debug, Error)]
pub enum HostError {
    /// The service configuration is unusable.
    #[error("configuration error: {0}")]
    Config(String),

    /// Discovery found nothing to load for a plugin type.
    #[error("no plugin binary found for '{name}' under {path}")]
    BinaryNotFound {
        /// The declared plugin type.
        name: String,
        /// Where discovery looked.
        path: PathBuf,
    },

    /// A dynamic library could not be opened.
    #[error("failed to load library {path}: {reason}")]
    LibraryLoad { path: PathBuf, reason: String },

    /// A required export was absent from a dynamic library.
    #[error("symbol '{symbol}' not found in {path}: {reason}")]
    SymbolNotFound {
        symbol: &'static str,
        path: PathBuf,
        reason: String,
    },

    /// The library was built against an incompatible plugin ABI.
    #[error("{path} was built against plugin API v{got}, host requires v{want}")]
    ApiVersion { path: PathBuf, got: u32, want: u32 },

    /// The loaded plugin does not answer to its declared type.
    #[error("plugin name mismatch: config declares '{declared}' but module reports '{reported}'")]
    NameMismatch { declared: String, reported: String },

    /// An operation referenced a plugin that is not loaded.
    #[error("plugin '{0}' is not loaded")]
    NotLoaded(String),

    /// A plugin with this name is already loaded.
    #[error("plugin '{0}' is already loaded")]
    AlreadyLoaded(String),

    /// A plugin's start was requested twice for one load.
    #[error("plugin '{0}' is already started")]
    AlreadyStarted(String),

    /// A plugin's start task reported an error (job mode surfaces this
    /// from the `start_error` envelope).
    #[error("plugin '{plugin}' start failed: {error}")]
    StartFailed { plugin: String, error: String },

    /// The subprocess handshake failed.
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    /// The subprocess never completed the handshake.
    #[error("plugin binary {path} did not complete the handshake in time")]
    HandshakeTimeout { path: PathBuf },

    /// Spawning or managing a plugin process failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The RPC channel to a subprocess plugin failed.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// A plugin lifecycle operation failed in-process.
    #[error(transparent)]
    Plugin(#[from] PluginError),

    /// A plugin lifecycle operation failed across the wire; the message
    /// was re-inflated from the response's `error` key.
    #[error("{0}")]
    Remote(String),

    /// Envelope construction or conversion failed.
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    /// A mailbox send failed.
    #[error(transparent)]
    Mailbox(#[from] MailboxError),

    /// The supervisor went away before answering a control request.
    #[error("supervisor is not running")]
    SupervisorGone,
}

/// Result type for host operations.
pub type HostResult<T> = Result<T, HostError>;
