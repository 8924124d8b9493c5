//! The plugin contract.
//!
//! Every plugin, in-process or subprocess, exposes the same four
//! operations: [`name`](Plugin::name), [`init`](Plugin::init),
//! [`start`](Plugin::start), and [`stop`](Plugin::stop). The host drives
//! them strictly in that order; `start` runs on a background task and
//! returns only once the cancellation token fires or a fatal error occurs.
//!
//! In-process plugins are loaded from dynamic libraries that export a
//! constructor symbol named `PluginObj`; use [`export_plugin!`] to emit it
//! together with the API-version symbol the loader checks.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

// Re-exported so plugin crates don't need their own async-trait line.
pub use async_trait::async_trait;

use crate::envelope::{Envelope, JsonMap};
use crate::error::PluginResult;

/// Version of the in-process plugin ABI. Bumped whenever the [`Plugin`]
/// trait or [`PluginIo`] changes shape; the loader refuses libraries built
/// against a different version.
pub const PLUGIN_API_VERSION: u32 = 1;

/// Everything a running plugin needs to exchange messages with the host.
pub struct PluginIo {
    /// Envelopes addressed to this plugin.
    pub inbox: mpsc::Receiver<Envelope>,
    /// Where the plugin sends envelopes for routing (the service mailbox).
    pub outbox: mpsc::Sender<Envelope>,
    /// Fires when the host wants `start` to return.
    pub cancel: CancellationToken,
}

/// The four-operation contract every plugin implements.
///
/// Implementations use interior mutability for their state: the host holds
/// plugins behind `Arc` and `start` runs concurrently with later `stop`
/// calls.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// The plugin's name. Pure; must match the `type` declared in its spec.
    fn name(&self) -> &str;

    /// Configures the plugin. Called once per load, before `start`.
    async fn init(&self, config: &JsonMap) -> PluginResult<()>;

    /// Runs the plugin until `io.cancel` fires or a fatal error occurs.
    async fn start(&self, io: PluginIo) -> PluginResult<()>;

    /// Releases external resources. Idempotent; called after cancellation.
    async fn stop(&self) -> PluginResult<()>;
}

/// A shared, type-erased plugin instance.
pub type SharedPlugin = Arc<dyn Plugin>;

/// Emits the symbols an in-process plugin library must export:
///
/// - `PluginObj`: constructor returning the boxed plugin instance;
/// - `PluginObjApiVersion`: the [`PLUGIN_API_VERSION`] the library was
///   built against.
///
/// The macro takes a constructor expression:
///
/// ```rust,ignore
/// plexus_core::export_plugin!(HelloPlugin::default());
/// ```
#[macro_export]
macro_rules! export_plugin {
    ($ctor:expr) => {
        #[unsafe(no_mangle)]
        #[allow(non_snake_case, improper_ctypes_definitions)]
        pub extern "C" fn PluginObj() -> *mut dyn $crate::Plugin {
            let plugin: Box<dyn $crate::Plugin> = Box::new($ctor);
            Box::into_raw(plugin)
        }

        #[unsafe(no_mangle)]
        #[allow(non_snake_case)]
        pub extern "C" fn PluginObjApiVersion() -> u32 {
            $crate::PLUGIN_API_VERSION
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PluginError;

    struct Nop;

    #[async_trait]
    impl Plugin for Nop {
        fn name(&self) -> &str {
            "nop"
        }

        async fn init(&self, _config: &JsonMap) -> PluginResult<()> {
            Ok(())
        }

        async fn start(&self, io: PluginIo) -> PluginResult<()> {
            io.cancel.cancelled().await;
            Ok(())
        }

        async fn stop(&self) -> PluginResult<()> {
            Err(PluginError::runtime("nothing to release"))
        }
    }

    #[tokio::test]
    async fn contract_is_object_safe_and_drivable() {
        let plugin: SharedPlugin = Arc::new(Nop);
        assert_eq!(plugin.name(), "nop");
        plugin.init(&JsonMap::new()).await.unwrap();

        let (_tx, inbox) = mpsc::channel(1);
        let (outbox, _rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        cancel.cancel();
        plugin
            .start(PluginIo {
                inbox,
                outbox,
                cancel,
            })
            .await
            .unwrap();

        assert!(plugin.stop().await.is_err());
    }
}
