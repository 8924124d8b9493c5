//! # Plexus Plugin
//!
//! The library a subprocess plugin binary links against. A plugin binary
//! is just:
//!
//! ```rust,ignore
//! #[tokio::main]
//! async fn main() -> Result<(), plexus_plugin::ServeError> {
//!     plexus_plugin::serve(Arc::new(MyPlugin::default())).await
//! }
//! ```
//!
//! [`serve`] performs the plugin's half of the handshake (verify the
//! magic cookie, bind a loopback listener, print the handshake line) and
//! then answers the host's unary requests until the host disconnects.

pub mod server;

use std::net::Ipv4Addr;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncWriteExt, stdout};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use plexus_core::SharedPlugin;
use plexus_transport::{Handshake, HandshakeError, WireError, cookie_present, serve_connection};

pub use server::GuestServer;

/// Errors that can end a plugin's serving loop.
#[derive(Debug, Error)]
pub enum ServeError {
    /// The handshake could not be completed.
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    /// Listener setup or stdout failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The primary channel broke mid-conversation.
    #[error(transparent)]
    Wire(#[from] WireError),
}

/// Runs the plugin side of the host protocol to completion.
///
/// Returns once the host disconnects the primary channel (the host kills
/// the child unconditionally after `func_stop`, so a clean return is the
/// exception, not the rule).
pub async fn serve(plugin: SharedPlugin) -> Result<(), ServeError> {
    if !cookie_present() {
        return Err(HandshakeError::CookieMissing.into());
    }

    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
    let handshake = Handshake::announce(listener.local_addr()?);

    // The handshake line must be the first and only thing on stdout.
    let mut out = stdout();
    out.write_all(format!("{handshake}\n").as_bytes()).await?;
    out.flush().await?;
    debug!(addr = %handshake.addr, "announced plugin listener");

    let (stream, peer) = listener.accept().await?;
    stream.set_nodelay(true)?;
    info!(peer = %peer, plugin = %plugin.name(), "host connected");

    let handler = Arc::new(GuestServer::new(plugin));
    serve_connection(stream, handler, CancellationToken::new()).await?;
    info!("host disconnected, shutting down");
    Ok(())
}
