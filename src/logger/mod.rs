//! Logger setup based on `tracing-subscriber`: console output with colour
//! control plus optional file output in full, compact or JSON format.

pub mod config;

pub use config::*;

use std::fs::{self, OpenOptions};
use std::io::IsTerminal;
use std::sync::Mutex;

use anyhow::Context;
use tracing::Subscriber;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber.
pub fn init_logger(config: LoggerConfig) -> anyhow::Result<()> {
    config.validate()?;

    let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));

    // The file layer goes first so console ANSI settings never leak into
    // the file (tokio-rs/tracing#1817).
    let file_layer = if config.file.enabled {
        Some(file_layer(&config.file)?)
    } else {
        None
    };
    let console_layer = config.console.enabled.then(|| {
        let use_ansi = config.console.colored && std::io::stderr().is_terminal();
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(use_ansi)
            .with_target(true)
            .with_level(true)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .context("A global logger is already installed")?;
    Ok(())
}

fn file_layer<S>(config: &FileConfig) -> anyhow::Result<Box<dyn Layer<S> + Send + Sync>>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    if let Some(parent) = config.path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Cannot create log directory {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(config.append)
        .truncate(!config.append)
        .open(&config.path)
        .with_context(|| format!("Cannot open log file {}", config.path.display()))?;
    let writer = Mutex::new(file);

    let layer = fmt::layer().with_ansi(false).with_writer(writer);
    Ok(match config.format {
        LogFormat::Full => layer.with_target(true).boxed(),
        LogFormat::Compact => layer.with_target(true).compact().boxed(),
        LogFormat::Json => layer.json().boxed(),
    })
}
