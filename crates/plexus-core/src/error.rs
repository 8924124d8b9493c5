//! Unified error types for the Plexus core crate.
//!
//! This module provides standardized error types used across core components.
//! Host-level errors (loading, handshake, routing) are defined in plexus-runtime.

use thiserror::Error;

// =============================================================================
// Envelope Errors
// =============================================================================

/// Errors that can occur while constructing, converting, or answering envelopes.
#[derive(Debug, Clone, Error)]
pub enum EnvelopeError {
    /// A payload body was expected to be a JSON object but was not.
    #[error("payload for '{kind}' is not a JSON object")]
    NotAnObject {
        /// The message type whose body was malformed.
        kind: String,
    },

    /// A control payload was missing a required field or carried a wrong type.
    #[error("malformed '{kind}' payload: {reason}")]
    Malformed {
        /// The message type being decoded.
        kind: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Serializing a payload to JSON failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The envelope's reply slot was already consumed, or it never had
    /// one (one-way, or reconstructed from the wire).
    #[error("no unanswered reply slot on this envelope")]
    ReplyAlreadySent,

    /// The replying side dropped the envelope without answering.
    #[error("reply slot closed before a reply was sent")]
    ReplyDropped,

    /// A second task tried to await a reply that is already being awaited.
    #[error("a reply is already being awaited on this handle")]
    ReplyBusy,
}

impl From<serde_json::Error> for EnvelopeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

// =============================================================================
// Mailbox Errors
// =============================================================================

/// Errors that can occur when sending into a mailbox.
#[derive(Debug, Clone, Error)]
pub enum MailboxError {
    /// The mailbox is at capacity.
    #[error("mailbox '{name}' is full")]
    Full {
        /// The mailbox that rejected the send.
        name: String,
    },

    /// The receiving side of the mailbox is gone.
    #[error("mailbox '{name}' is closed")]
    Closed {
        /// The mailbox that rejected the send.
        name: String,
    },
}

// =============================================================================
// Plugin Errors
// =============================================================================

/// Error type returned by plugin lifecycle operations.
#[derive(Debug, Clone, Error)]
pub enum PluginError {
    /// The plugin rejected its configuration.
    #[error("invalid plugin configuration: {0}")]
    Config(String),

    /// The plugin failed while running or releasing resources.
    #[error("{0}")]
    Runtime(String),
}

impl PluginError {
    /// Creates a runtime error from anything displayable.
    pub fn runtime(msg: impl std::fmt::Display) -> Self {
        Self::Runtime(msg.to_string())
    }

    /// Creates a configuration error from anything displayable.
    pub fn config(msg: impl std::fmt::Display) -> Self {
        Self::Config(msg.to_string())
    }
}

impl From<serde_json::Error> for PluginError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for envelope operations.
pub type EnvelopeResult<T> = Result<T, EnvelopeError>;

/// Result type for mailbox sends.
pub type MailboxResult<T> = Result<T, MailboxError>;

/// Result type for plugin lifecycle operations.
pub type PluginResult<T> = Result<T, PluginError>;
