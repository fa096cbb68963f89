use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::app::config::LoggingConfig;
use crate::error::{Error, Result};

const DEFAULT_DIRECTIVE: &str = "chatrelay=info,tower_http=info";
const DEBUG_DIRECTIVE: &str = "chatrelay=debug,tower_http=debug";

/// Keeps the background log writer alive. Dropping it flushes the file log.
#[must_use = "dropping the guard stops file logging"]
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

/// Directive used when `RUST_LOG` is unset.
fn directive(config: &LoggingConfig, debug: bool) -> String {
    if debug {
        DEBUG_DIRECTIVE.to_string()
    } else {
        config
            .directive
            .clone()
            .unwrap_or_else(|| DEFAULT_DIRECTIVE.to_string())
    }
}

/// Installs the global subscriber: stdout (plain or JSON) and, when
/// enabled, a daily rolling file under `logs_dir`.
pub fn init_logging(config: &LoggingConfig, logs_dir: &Path, debug: bool) -> Result<LoggingGuard> {
    let filter = if debug {
        EnvFilter::new(directive(config, true))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive(config, false)))
    };

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if config.json {
        layers.push(fmt::layer().json().with_target(true).boxed());
    } else {
        layers.push(fmt::layer().with_target(true).boxed());
    }

    let mut guard = None;
    if config.file {
        std::fs::create_dir_all(logs_dir)?;
        let appender = tracing_appender::rolling::daily(logs_dir, "chatrelay.log");
        let (writer, worker) = tracing_appender::non_blocking(appender);
        guard = Some(worker);

        let file_layer = fmt::layer().with_writer(writer).with_ansi(false);
        if config.json {
            layers.push(file_layer.json().boxed());
        } else {
            layers.push(file_layer.boxed());
        }
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .map_err(|e| Error::platform(format!("Failed to initialize logging: {}", e)))?;

    Ok(LoggingGuard { _file: guard })
}
