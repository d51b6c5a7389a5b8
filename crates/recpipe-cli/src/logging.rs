//! Tracing setup driven by the logging configuration.
//!
//! Console and file outputs are independent layers; either can be JSON or
//! human-readable text. `-v`/`-vv` on the command line raise the level
//! over the configured one; `RUST_LOG` overrides everything.

use std::fs::OpenOptions;
use std::sync::Arc;

use recpipe_core::config::LoggingConfig;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Initializes the global subscriber. Returns a guard placeholder so the
/// call site keeps the same shape if buffered writers are added later.
pub fn init(config: &LoggingConfig, verbose: u8) -> anyhow::Result<()> {
    let level = match verbose {
        0 => config.level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if config.console {
        let layer = if config.structured {
            tracing_subscriber::fmt::layer().json().boxed()
        } else {
            tracing_subscriber::fmt::layer().with_target(false).boxed()
        };
        layers.push(layer);
    }

    if let Some(path) = &config.file {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let writer = Arc::new(file);
        let layer = if config.structured {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .boxed()
        } else {
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(writer)
                .boxed()
        };
        layers.push(layer);
    }

    tracing_subscriber::registry().with(layers).with(filter).init();
    Ok(())
}
