//! Spawn-time handshake between host and subprocess plugin.
//!
//! The host launches the plugin binary with the magic cookie in its
//! environment. The child verifies the cookie, binds a loopback TCP
//! listener, and prints exactly one line on stdout:
//!
//! ```text
//! <protocol-version>|tcp|<address>
//! ```
//!
//! The host parses the line, checks the protocol version, and connects to
//! the address. Anything else on stdout before that line aborts the load.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::error::HandshakeError;

/// Environment key carrying the magic cookie.
pub const COOKIE_KEY: &str = "EL_GRPCPLUGIN";

/// Expected cookie value; anything else means the child was not launched
/// by a compatible host.
pub const COOKIE_VALUE: &str = "laiyakuaihuoa";

/// Protocol version this crate implements.
pub const PROTOCOL_VERSION: u32 = 1;

/// Whether the current process carries the magic cookie, i.e. was spawned
/// as a plugin by a Plexus host.
pub fn cookie_present() -> bool {
    std::env::var(COOKIE_KEY).is_ok_and(|v| v == COOKIE_VALUE)
}

/// The parsed handshake line a plugin prints on stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handshake {
    /// Protocol version the plugin speaks.
    pub protocol: u32,
    /// Loopback address the plugin is listening on.
    pub addr: SocketAddr,
}

impl Handshake {
    /// Builds the handshake a plugin announces for its listener.
    pub fn announce(addr: SocketAddr) -> Self {
        Self {
            protocol: PROTOCOL_VERSION,
            addr,
        }
    }

    /// Ensures the announced protocol version matches this host.
    pub fn check_version(&self) -> Result<(), HandshakeError> {
        if self.protocol == PROTOCOL_VERSION {
            Ok(())
        } else {
            Err(HandshakeError::Version {
                got: self.protocol,
                want: PROTOCOL_VERSION,
            })
        }
    }
}

impl fmt::Display for Handshake {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|tcp|{}", self.protocol, self.addr)
    }
}

impl FromStr for Handshake {
    type Err = HandshakeError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let malformed = || HandshakeError::Malformed {
            line: line.to_string(),
        };
        let mut parts = line.trim().split('|');
        let protocol = parts
            .next()
            .and_then(|v| v.parse::<u32>().ok())
            .ok_or_else(malformed)?;
        match parts.next() {
            Some("tcp") => {}
            _ => return Err(malformed()),
        }
        let addr = parts
            .next()
            .and_then(|v| v.parse::<SocketAddr>().ok())
            .ok_or_else(malformed)?;
        if parts.next().is_some() {
            return Err(malformed());
        }
        Ok(Self { protocol, addr })
    }
}
