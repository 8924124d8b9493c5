//! Error types for the wire layer.

use thiserror::Error;

use crate::frame::MAX_FRAME_LEN;

/// Errors that can occur on the RPC channel between host and plugin.
#[derive(Debug, Error)]
pub enum WireError {
    /// Underlying I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    Closed,

    /// A frame announced a length beyond the allowed maximum.
    #[error("frame of {len} bytes exceeds the {MAX_FRAME_LEN}-byte limit")]
    Oversized {
        /// The announced length.
        len: u32,
    },

    /// A frame did not decode as the expected JSON shape.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// The local end of the channel has shut down.
    #[error("rpc channel shut down")]
    ChannelDown,
}

impl From<serde_json::Error> for WireError {
    fn from(err: serde_json::Error) -> Self {
        Self::Malformed(err.to_string())
    }
}

/// Errors raised while establishing a subprocess plugin session.
#[derive(Debug, Clone, Error)]
pub enum HandshakeError {
    /// The handshake line did not match `<version>|tcp|<addr>`.
    #[error("malformed handshake line: '{line}'")]
    Malformed {
        /// The offending line, as printed by the child.
        line: String,
    },

    /// The plugin speaks a protocol version this host does not.
    #[error("plugin speaks protocol version {got}, host requires {want}")]
    Version {
        /// Version announced by the plugin.
        got: u32,
        /// Version this host implements.
        want: u32,
    },

    /// The magic cookie is absent or wrong, meaning the process was not launched
    /// by a Plexus host.
    #[error("magic cookie not present; this binary is a Plexus plugin and must be launched by a host")]
    CookieMissing,
}

/// Result type for wire operations.
pub type WireResult<T> = Result<T, WireError>;
