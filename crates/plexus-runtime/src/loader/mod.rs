//! Plugin loaders: one per hosting mode, behind a common lifecycle trait.
//!
//! The supervisor talks to every plugin through [`PluginHandle`]; whether
//! the plugin lives in a dynamic library inside this process or behind an
//! RPC tunnel in a child process is the loader's business.

pub mod inproc;
pub mod subproc;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::HostResult;
use plexus_core::{JsonMap, PluginIo};

/// Lifecycle surface the supervisor drives for each loaded plugin.
///
/// `start` must not block: loaders launch the plugin's start on a
/// background task and report its eventual return as a `start_error`
/// envelope on the service mailbox.
#[async_trait]
pub trait PluginHandle: Send + Sync {
    /// The plugin's resolved name (equals its declared type after a
    /// successful load).
    fn name(&self) -> &str;

    /// Configures the plugin.
    async fn init(&self, config: &JsonMap) -> HostResult<()>;

    /// Hands the plugin its mailbox pair and cancellation token and sets
    /// it running in the background.
    async fn start(&self, io: PluginIo) -> HostResult<()>;

    /// Stops the plugin and releases its resources.
    async fn stop(&self) -> HostResult<()>;
}

/// A boxed plugin handle.
pub type BoxedHandle = Box<dyn PluginHandle>;

// =============================================================================
// Discovery
// =============================================================================

/// Finds the dynamic library for plugin `name` under `path`.
///
/// A file path is taken as-is. In a directory, `<name>.so.<N>` with the
/// highest decimal `N` wins; plain `<name>.so` is selected only when no
/// versioned file exists.
pub fn find_latest_library(name: &str, path: &Path) -> Option<PathBuf> {
    if path.is_file() {
        return Some(path.to_path_buf());
    }
    let prefix = format!("{name}.so");
    let mut plain: Option<PathBuf> = None;
    let mut best: Option<(i64, PathBuf)> = None;
    for entry in path.read_dir().ok()? {
        let Ok(entry) = entry else { continue };
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        if file_name == prefix {
            plain = Some(entry.path());
        } else if let Some(version) = file_name
            .strip_prefix(&prefix)
            .and_then(|rest| rest.strip_prefix('.'))
            .and_then(|v| v.parse::<i64>().ok())
            && best.as_ref().is_none_or(|(b, _)| version > *b)
        {
            best = Some((version, entry.path()));
        }
    }
    best.map(|(_, p)| p).or(plain)
}

/// Finds the executable for a subprocess plugin.
///
/// A bare `<name>` file in the directory wins; otherwise the `.so`
/// versioning scheme applies, so the same layout serves both modes.
pub fn find_plugin_binary(name: &str, path: &Path) -> Option<PathBuf> {
    if path.is_file() {
        return Some(path.to_path_buf());
    }
    let bare = path.join(name);
    if bare.is_file() {
        return Some(bare);
    }
    find_latest_library(name, path)
}
