//! Subprocess entry point for the `hello` plugin.
//!
//! Launched by a Plexus host; refuses to run standalone.

use std::sync::Arc;

use hello_plugin::HelloPlugin;

#[tokio::main]
async fn main() -> std::process::ExitCode {
    // Plugin logs go to stderr; the host mirrors them into its own log.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match plexus_plugin::serve(Arc::new(HelloPlugin::default())).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            std::process::ExitCode::FAILURE
        }
    }
}
