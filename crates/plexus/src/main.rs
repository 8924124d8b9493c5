//! The `plexus` host binary.
//!
//! Reads the service configuration from the first argument or
//! `$CONFIGPATH`, brings the service up, and routes until stopped.

use std::path::PathBuf;
use std::process::ExitCode;

use plexus_runtime::config::load_config;

#[tokio::main]
async fn main() -> ExitCode {
    let path = std::env::args().nth(1).map(PathBuf::from);
    let config = match load_config(path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("plexus: {e}");
            return ExitCode::FAILURE;
        }
    };
    match plexus_runtime::run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("plexus: {e}");
            ExitCode::FAILURE
        }
    }
}
