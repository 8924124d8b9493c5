//! # Plexus Runtime
//!
//! The host side of Plexus: the [`Supervisor`] that owns every plugin
//! lifecycle and the routing loop, the per-mode loaders, configuration,
//! and logging.
//!
//! ## Lifecycle
//!
//! ```text
//! load ──▶ init ──▶ start ──▶ running ──▶ (cancel) ──▶ stop ──▶ unload
//! ```
//!
//! The supervisor drives this machine for every configured plugin, either
//! directly (in-process dynamic libraries) or across the RPC tunnel
//! (subprocess plugins).
//!
//! ## Embedding
//!
//! ```rust,ignore
//! use plexus_runtime::{config, run};
//!
//! #[tokio::main]
//! async fn main() -> std::process::ExitCode {
//!     let config = match config::load_config(None) {
//!         Ok(config) => config,
//!         Err(e) => {
//!             eprintln!("{e}");
//!             return std::process::ExitCode::FAILURE;
//!         }
//!     };
//!     match run(config).await {
//!         Ok(()) => std::process::ExitCode::SUCCESS,
//!         Err(_) => std::process::ExitCode::FAILURE,
//!     }
//! }
//! ```

pub mod config;
pub mod error;
pub mod loader;
pub mod logging;
pub mod supervisor;

use tokio::signal;
use tracing::{error, info};

pub use config::{LogLevel, PluginMode, PluginSpec, RunMode, ServiceConfig};
pub use error::{HostError, HostResult};
pub use loader::{BoxedHandle, PluginHandle};
pub use supervisor::{Supervisor, SupervisorHandle};

use plexus_core::{Envelope, Payload, SERVICE_MAILBOX};

/// Brings the service up and drives it to completion.
///
/// Installs logging at the configured level (unless a subscriber is
/// already set), loads and starts every plugin, wires Ctrl-C/SIGTERM to a
/// soft stop, and then either runs the routing loop (service mode) or
/// tears down after the plugins finish (job mode).
pub async fn run(config: ServiceConfig) -> HostResult<()> {
    logging::init_at(config.log_level);

    let mut supervisor = Supervisor::new(config);
    run_supervisor(&mut supervisor).await
}

/// [`run`] for a supervisor the embedder already customized (builtins,
/// pre-registered state).
pub async fn run_supervisor(supervisor: &mut Supervisor) -> HostResult<()> {
    info!("initializing service");
    supervisor.init().await?;

    tokio::spawn(watch_signals(supervisor.handle()));

    info!("starting plugins");
    supervisor.start().await?;

    match supervisor.run_mode() {
        RunMode::Service => supervisor.route().await,
        RunMode::Job => supervisor.shutdown().await,
    }
}

/// Turns Ctrl-C (and SIGTERM on unix) into a soft-stop control message.
async fn watch_signals(handle: SupervisorHandle) {
    wait_for_shutdown_signal().await;
    let stop = Envelope::oneway(SERVICE_MAILBOX, Payload::ServiceStop {
        force: false,
        error: None,
    });
    if handle.send(stop).await.is_err() {
        error!("supervisor already gone, cannot deliver stop");
    }
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!(error = %e, "failed to register SIGTERM handler");
                let _ = signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = signal::ctrl_c() => info!("received Ctrl-C, shutting down"),
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
        info!("received Ctrl-C, shutting down");
    }
}
