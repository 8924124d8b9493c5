//! # Plexus
//!
//! A pluggable service host. Independent worker plugins (loaded
//! in-process from dynamic libraries or spawned as subprocesses behind an
//! RPC tunnel) each get a typed, bounded mailbox, and a supervisor routes
//! envelopes between them and the outside world.
//!
//! This crate is the facade; the work lives in:
//!
//! - [`plexus_core`]: envelopes, mailboxes, the plugin contract
//! - [`plexus_transport`]: wire schema, RPC channels, handshake, broker
//! - [`plexus_runtime`]: supervisor, loaders, config, logging
//! - [`plexus_plugin`]: the library subprocess plugin binaries link
//!
//! # Hosting a service
//!
//! ```rust,ignore
//! use plexus::runtime::{config, run};
//!
//! #[tokio::main]
//! async fn main() -> std::process::ExitCode {
//!     match config::load_config(None).map(run) {
//!         Ok(fut) => match fut.await {
//!             Ok(()) => std::process::ExitCode::SUCCESS,
//!             Err(_) => std::process::ExitCode::FAILURE,
//!         },
//!         Err(e) => {
//!             eprintln!("{e}");
//!             std::process::ExitCode::FAILURE
//!         }
//!     }
//! }
//! ```
//!
//! # Writing a plugin
//!
//! Implement [`Plugin`], then either `export_plugin!` it for in-process
//! loading or hand it to [`plugin::serve`] in a binary for subprocess
//! hosting.

pub use plexus_core as core;
pub use plexus_plugin as plugin;
pub use plexus_runtime as runtime;
pub use plexus_transport as transport;

pub use plexus_core::{
    Envelope, JsonMap, Mailbox, MailboxRegistry, Payload, Plugin, PluginError, PluginIo, Reply,
    SERVICE_MAILBOX, export_plugin,
};
pub use plexus_runtime::{
    HostError, HostResult, PluginSpec, ServiceConfig, Supervisor, SupervisorHandle, run,
};

/// Prelude for plugin authors.
pub mod prelude {
    pub use plexus_core::plugin::async_trait;
    pub use plexus_core::{
        Envelope, JsonMap, Payload, Plugin, PluginError, PluginIo, PluginResult, Reply,
        export_plugin,
    };
}
