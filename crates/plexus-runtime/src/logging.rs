//! Logging setup built on `tracing` and `tracing-subscriber`.
//!
//! The global tracing dispatcher is the host's logger handle: [`run`]
//! installs it once from the configured level, and embedders that want a
//! different shape can install their own subscriber before calling into
//! the runtime.
//!
//! [`run`]: crate::run

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::LogLevel;

/// A builder for the host's logging setup.
///
/// ```rust,ignore
/// LoggingBuilder::new()
///     .with_level(LogLevel::Info)
///     .directive("plexus_transport=trace")
///     .init();
/// ```
#[derive(Default)]
pub struct LoggingBuilder {
    level: Option<LogLevel>,
    directives: Vec<String>,
    with_target: bool,
}

impl LoggingBuilder {
    /// Creates a new logging builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the base log level.
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = Some(level);
        self
    }

    /// Adds a filter directive like `"plexus_runtime=trace"`.
    pub fn directive(mut self, directive: &str) -> Self {
        self.directives.push(directive.to_string());
        self
    }

    /// Include the target (module path) in log output.
    pub fn with_target(mut self, enabled: bool) -> Self {
        self.with_target = enabled;
        self
    }

    fn build_filter(&self) -> EnvFilter {
        // RUST_LOG wins over the configured level.
        let base = self.level.unwrap_or_default().as_str();
        let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(base));
        for directive in &self.directives {
            if let Ok(d) = directive.parse() {
                filter = filter.add_directive(d);
            }
        }
        filter
    }

    /// Installs the subscriber.
    ///
    /// # Panics
    ///
    /// Panics if a global subscriber has already been set.
    pub fn init(self) {
        let filter = self.build_filter();
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(self.with_target))
            .with(filter)
            .init();
    }

    /// Installs the subscriber, returning an error instead of panicking.
    pub fn try_init(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let filter = self.build_filter();
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(self.with_target))
            .with(filter)
            .try_init()
            .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)
    }
}

/// Installs logging at the given level if no subscriber is set yet.
pub fn init_at(level: LogLevel) {
    let _ = LoggingBuilder::new().with_level(level).try_init();
}
