//! Logging initialization using `tracing` and `tracing-subscriber`.

use std::path::{Path, PathBuf};

use tracing_subscriber::{fmt, fmt::writer::BoxMakeWriter, util::SubscriberInitExt, EnvFilter};

use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Human,
    Json,
}

#[derive(Debug, Clone)]
pub enum LogSink {
    /// Log to stderr, keeping stdout free for user output.
    Console,
    /// Append-only log file.
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    pub sink: LogSink,
    /// Repeatable `-v` count: 0 = info, 1 = debug, 2+ = trace.
    pub verbosity: u8,
}

impl LoggingConfig {
    pub fn console(verbosity: u8) -> Self {
        Self {
            format: LogFormat::Human,
            sink: LogSink::Console,
            verbosity,
        }
    }
}

/// Initialize global tracing subscriber. Safe to call multiple times; subsequent
/// calls will no-op.
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    if tracing::dispatcher::has_been_set() {
        return Ok(());
    }

    let filter = match config.verbosity {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    let (writer, ansi) = match &config.sink {
        LogSink::Console => (BoxMakeWriter::new(std::io::stderr), true),
        LogSink::File(path) => {
            ensure_parent(path)?;
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            (BoxMakeWriter::new(std::sync::Mutex::new(file)), false)
        }
    };

    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(writer)
        .with_ansi(ansi);

    match config.format {
        LogFormat::Human => {
            let _ = builder.finish().try_init();
        }
        LogFormat::Json => {
            let _ = builder.json().finish().try_init();
        }
    };

    Ok(())
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}
