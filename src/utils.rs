//! Shared helpers: logging setup, data directory, browser launch

use log::{info, warn};
use std::path::{Path, PathBuf};

const APP_DIR_NAME: &str = "First";

/// Local data directory for the app (`<data_local_dir>/First`)
pub fn app_data_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join(APP_DIR_NAME))
}

/// Initialize the global logger.
///
/// Info level by default, debug when `RUST_LOG` is set. Logs go to
/// `log_file` when it can be opened, stderr otherwise.
pub fn init_logging(log_file: Option<&Path>) {
    let log_level = std::env::var("RUST_LOG")
        .map(|_| log::LevelFilter::Debug)
        .unwrap_or(log::LevelFilter::Info);

    let mut builder = env_logger::Builder::from_default_env();
    builder.filter_level(log_level).format_timestamp_millis();

    if let Some(path) = log_file {
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
        {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!("Failed to open log file {}: {}", path.display(), e),
        }
    }

    // A second init (tests, embedding apps) keeps the first logger
    let _ = builder.try_init();
}

/// Open a URL in the user's default browser
pub fn open_url(url: &str) -> std::io::Result<()> {
    info!("Opening browser to: {}", redact_query(url));
    open::that(url).map_err(|e| {
        warn!("Failed to open URL: {}", e);
        e
    })
}

/// First `n` characters of a secret, for log lines
pub fn preview(secret: &str, n: usize) -> &str {
    match secret.char_indices().nth(n) {
        Some((idx, _)) => &secret[..idx],
        None => secret,
    }
}

/// URL without its query string (authorization URLs carry nonce and state)
fn redact_query(url: &str) -> &str {
    url.split_once('?').map(|(base, _)| base).unwrap_or(url)
}
