//! In-process plugin loading via dynamic libraries.
//!
//! A plugin library exports two symbols, emitted by
//! `plexus_core::export_plugin!`: the `PluginObj` constructor and the
//! `PluginObjApiVersion` ABI check. Libraries cannot be unmapped once
//! opened, so opened handles live in a [`LibraryCache`] keyed by canonical
//! path; re-loading the same library reuses the same code pages.
//!
//! Builtin plugins, instances the embedding binary constructs itself,
//! ride the same [`InProcPlugin`] handle with no library behind them.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use super::{PluginHandle, find_latest_library};
use crate::config::PluginSpec;
use crate::error::{HostError, HostResult};
use plexus_core::{
    Envelope, JsonMap, PLUGIN_API_VERSION, Payload, Plugin, PluginIo, SERVICE_MAILBOX,
    SharedPlugin,
};

const CTOR_SYMBOL: &[u8] = b"PluginObj";
const VERSION_SYMBOL: &[u8] = b"PluginObjApiVersion";

type PluginCtor = unsafe extern "C" fn() -> *mut dyn Plugin;
type ApiVersionFn = unsafe extern "C" fn() -> u32;

// =============================================================================
// Library cache
// =============================================================================

/// An opened plugin library, kept alive for the life of the host.
pub struct LoadedLibrary {
    library: libloading::Library,
    path: PathBuf,
}

impl LoadedLibrary {
    /// The canonical path this library was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for LoadedLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedLibrary")
            .field("path", &self.path)
            .finish()
    }
}

/// Cache of opened libraries, keyed by canonical path.
///
/// Unmapping a library is not possible on common platforms; the cache
/// makes re-loads reuse the existing handle instead of opening the file
/// again.
#[derive(Default)]
pub struct LibraryCache {
    inner: Mutex<HashMap<PathBuf, Arc<LoadedLibrary>>>,
}

impl LibraryCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the library at `path`, opening it on first use.
    pub fn get_or_open(&self, path: &Path) -> HostResult<Arc<LoadedLibrary>> {
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        if let Some(library) = self.inner.lock().get(&canonical) {
            debug!(path = %canonical.display(), "serving library from load cache");
            return Ok(Arc::clone(library));
        }
        // SAFETY: loading a plugin library runs its initializers; the host
        // trusts binaries placed in its configured plugin paths.
        let library = unsafe { libloading::Library::new(&canonical) }.map_err(|e| {
            HostError::LibraryLoad {
                path: canonical.clone(),
                reason: e.to_string(),
            }
        })?;
        let loaded = Arc::new(LoadedLibrary {
            library,
            path: canonical.clone(),
        });
        self.inner.lock().insert(canonical, Arc::clone(&loaded));
        Ok(loaded)
    }
}

// =============================================================================
// InProcPlugin
// =============================================================================

/// Handle for a plugin hosted inside this process.
pub struct InProcPlugin {
    name: String,
    // Declared before `_library` so the instance drops before the code
    // pages it came from.
    instance: SharedPlugin,
    _library: Option<Arc<LoadedLibrary>>,
    service_tx: mpsc::Sender<Envelope>,
    tasks: TaskTracker,
}

impl std::fmt::Debug for InProcPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcPlugin")
            .field("name", &self.name)
            .finish()
    }
}

impl InProcPlugin {
    /// Discovers, opens, and instantiates the plugin library for `spec`.
    pub fn from_library(
        spec: &PluginSpec,
        cache: &LibraryCache,
        service_tx: mpsc::Sender<Envelope>,
        tasks: TaskTracker,
    ) -> HostResult<Self> {
        let path = find_latest_library(&spec.name, &spec.plugin_path).ok_or_else(|| {
            HostError::BinaryNotFound {
                name: spec.name.clone(),
                path: spec.plugin_path.clone(),
            }
        })?;
        let library = cache.get_or_open(&path)?;
        let instance = instantiate(&library)?;

        apply_env(&spec.env);
        let handle = Self::wrap(&spec.name, instance, Some(library), service_tx, tasks)?;
        info!(plugin = %handle.name, path = %path.display(), "loaded in-process plugin");
        Ok(handle)
    }

    /// Wraps a pre-constructed instance (a builtin plugin).
    pub fn from_instance(
        declared: &str,
        instance: SharedPlugin,
        service_tx: mpsc::Sender<Envelope>,
        tasks: TaskTracker,
    ) -> HostResult<Self> {
        Self::wrap(declared, instance, None, service_tx, tasks)
    }

    fn wrap(
        declared: &str,
        instance: SharedPlugin,
        library: Option<Arc<LoadedLibrary>>,
        service_tx: mpsc::Sender<Envelope>,
        tasks: TaskTracker,
    ) -> HostResult<Self> {
        let reported = instance.name();
        if reported != declared {
            return Err(HostError::NameMismatch {
                declared: declared.to_string(),
                reported: reported.to_string(),
            });
        }
        Ok(Self {
            name: declared.to_string(),
            instance,
            _library: library,
            service_tx,
            tasks,
        })
    }
}

#[async_trait]
impl PluginHandle for InProcPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    async fn init(&self, config: &JsonMap) -> HostResult<()> {
        self.instance.init(config).await.map_err(Into::into)
    }

    async fn start(&self, io: PluginIo) -> HostResult<()> {
        let plugin = Arc::clone(&self.instance);
        let service_tx = self.service_tx.clone();
        let name = self.name.clone();
        self.tasks.spawn(async move {
            let result = plugin.start(io).await;
            match &result {
                Ok(()) => debug!(plugin = %name, "start returned"),
                Err(e) => error!(plugin = %name, error = %e, "start returned an error"),
            }
            let envelope = Envelope::oneway(
                SERVICE_MAILBOX,
                Payload::StartError {
                    plugin: name.clone(),
                    error: result.err().map(|e| e.to_string()),
                },
            )
            .with_from(&name);
            // Send failure means the supervisor already shut down.
            let _ = service_tx.send(envelope).await;
        });
        Ok(())
    }

    async fn stop(&self) -> HostResult<()> {
        self.instance.stop().await.map_err(Into::into)
    }
}

/// Resolves the export symbols and constructs the plugin instance.
fn instantiate(library: &Arc<LoadedLibrary>) -> HostResult<SharedPlugin> {
    let path = library.path.clone();

    // SAFETY: symbol types are pinned by the exporting macro; the version
    // check below rejects libraries built against another ABI.
    let version: libloading::Symbol<'_, ApiVersionFn> =
        unsafe { library.library.get(VERSION_SYMBOL) }.map_err(|e| HostError::SymbolNotFound {
            symbol: "PluginObjApiVersion",
            path: path.clone(),
            reason: e.to_string(),
        })?;
    let got = unsafe { version() };
    if got != PLUGIN_API_VERSION {
        return Err(HostError::ApiVersion {
            path,
            got,
            want: PLUGIN_API_VERSION,
        });
    }

    let ctor: libloading::Symbol<'_, PluginCtor> = unsafe { library.library.get(CTOR_SYMBOL) }
        .map_err(|e| HostError::SymbolNotFound {
            symbol: "PluginObj",
            path: path.clone(),
            reason: e.to_string(),
        })?;
    // SAFETY: the constructor hands over a uniquely-owned box.
    let instance = unsafe { Box::from_raw(ctor()) };
    Ok(Arc::from(instance))
}

/// Applies a spec's env entries to the process environment. Happens before
/// `init` so the plugin observes them from the first call.
pub(crate) fn apply_env(env: &HashMap<String, String>) {
    for (key, value) in env {
        debug!(key = %key, "setting environment variable");
        // SAFETY: called from the supervisor's single-threaded bring-up
        // path, before the plugin's tasks exist.
        unsafe { std::env::set_var(key, value) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plexus_core::PluginResult;

    struct Named(&'static str);

    #[async_trait]
    impl Plugin for Named {
        fn name(&self) -> &str {
            self.0
        }
        async fn init(&self, _config: &JsonMap) -> PluginResult<()> {
            Ok(())
        }
        async fn start(&self, io: PluginIo) -> PluginResult<()> {
            io.cancel.cancelled().await;
            Ok(())
        }
        async fn stop(&self) -> PluginResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn builtin_name_must_agree_with_declared_type() {
        let (tx, _rx) = mpsc::channel(8);
        let err = InProcPlugin::from_instance("foo", Arc::new(Named("bar")), tx, TaskTracker::new())
            .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("foo") && text.contains("bar"), "{text}");
    }

    #[tokio::test]
    async fn start_posts_a_start_error_envelope_on_return() {
        let (tx, mut rx) = mpsc::channel(8);
        let tasks = TaskTracker::new();
        let handle =
            InProcPlugin::from_instance("bar", Arc::new(Named("bar")), tx, tasks.clone()).unwrap();

        let (_inbox_tx, inbox) = mpsc::channel(8);
        let (outbox, _outbox_rx) = mpsc::channel(8);
        let cancel = tokio_util::sync::CancellationToken::new();
        handle
            .start(PluginIo {
                inbox,
                outbox,
                cancel: cancel.clone(),
            })
            .await
            .unwrap();

        cancel.cancel();
        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.to(), SERVICE_MAILBOX);
        match envelope.payload() {
            Payload::StartError { plugin, error } => {
                assert_eq!(plugin, "bar");
                assert!(error.is_none());
            }
            other => panic!("unexpected payload {other:?}"),
        }

        tasks.close();
        tasks.wait().await;
    }

    #[test]
    fn missing_library_is_binary_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let spec = PluginSpec {
            plugin_path: dir.path().to_path_buf(),
            ..PluginSpec::builtin("ghost")
        };
        let (tx, _rx) = mpsc::channel(8);
        let err =
            InProcPlugin::from_library(&spec, &LibraryCache::new(), tx, TaskTracker::new())
                .unwrap_err();
        assert!(matches!(err, HostError::BinaryNotFound { .. }));
    }

    #[test]
    fn a_non_library_file_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.so");
        std::fs::write(&path, b"not an elf").unwrap();
        let err = LibraryCache::new().get_or_open(&path).unwrap_err();
        assert!(matches!(err, HostError::LibraryLoad { .. }));
    }
}
