//! Service configuration: schema and loading.

pub mod loader;
pub mod schema;

pub use loader::{CONFIG_PATH_ENV, load_config, load_config_from_str};
pub use schema::{LogLevel, PluginMode, PluginSpec, RunMode, ServiceConfig};
