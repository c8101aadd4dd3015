//! Tracing setup for the embedded library.

use std::fs::OpenOptions;

use rns_core::LogConfig;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable overriding `log.filter`.
pub const LOG_ENV: &str = "RNS_LOG";

/// Install the global subscriber.
///
/// Safe to call more than once: only the first call installs anything. The
/// host process may already own a subscriber, in which case ours is dropped.
pub fn init_tracing(config: &LogConfig) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let file = config.file.as_ref().and_then(|path| {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Some(file),
            Err(e) => {
                eprintln!("rns: cannot open log file {}: {}", path.display(), e);
                None
            }
        }
    });

    // The editor owns the terminal, so file output never carries colors
    let (file_layer, stderr_layer) = match file {
        Some(file) => (
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .with_writer(std::sync::Mutex::new(file)),
            ),
            None,
        ),
        None => (
            None,
            Some(
                fmt::layer()
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_writer(std::io::stderr),
            ),
        ),
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init();
}
