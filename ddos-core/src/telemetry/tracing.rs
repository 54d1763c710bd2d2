//! Structured logging setup, carried over from this repo's own
//! `init_tracing_with_otel`: an `EnvFilter` built from configuration (with
//! `RUST_LOG` taking precedence) feeding a stdout `fmt` layer, plus an
//! optional append-only file sink for `logging.log_file` (§6).

use std::fs::OpenOptions;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

use crate::config::LoggingConfig;
use crate::error::{DetectorError, Result};

pub fn init_tracing(cfg: &LoggingConfig) -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cfg.level.clone()));
    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    let subscriber = Registry::default().with(env_filter).with(stdout_layer);

    if let Some(path) = &cfg.log_file {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let file_layer =
            tracing_subscriber::fmt::layer().with_ansi(false).with_writer(move || {
                file.try_clone().expect("log file descriptor clone")
            });
        let subscriber = subscriber.with(file_layer);
        tracing::subscriber::set_global_default(subscriber)
            .map_err(|e| DetectorError::Config(format!("failed to set tracing subscriber: {e}")))?;
    } else {
        tracing::subscriber::set_global_default(subscriber)
            .map_err(|e| DetectorError::Config(format!("failed to set tracing subscriber: {e}")))?;
    }

    Ok(())
}

/// Flushes stdout/stderr. Kept as its own function (rather than inlined at
/// the call site) because a future OpenTelemetry tracer-provider shutdown
/// would belong here too.
pub fn shutdown_tracing() {
    use std::io::Write;
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();
}
