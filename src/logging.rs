//! Structured logging shared by every job binary.
//!
//! Events go to stderr as JSON lines so stdout stays free for progress and
//! summary records. With a log directory, the same events are also appended
//! to `<dir>/<job>.log`.

use std::path::Path;

use anyhow::Context;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

/// Filter directives, `RUST_LOG` syntax.
pub const LOG_ENV: &str = "RECORRIDO_ADMIN_LOG";
pub const DEFAULT_FILTER: &str = "recorrido_admin=info,sqlx=warn";

/// Keeps the background file writer alive; drop it last.
#[must_use = "dropping the guard stops the file sink"]
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

fn env_filter() -> EnvFilter {
    let directives = std::env::var(LOG_ENV).unwrap_or_else(|_| DEFAULT_FILTER.into());
    EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber. Calling it twice keeps the first one.
pub fn init(job: &str, log_dir: Option<&Path>) -> anyhow::Result<LogGuard> {
    let _ = tracing_log::LogTracer::init();

    let stderr_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_timer(UtcTime::rfc_3339())
        .with_writer(std::io::stderr);

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::never(dir, format!("{job}.log"));
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_target(true)
                .with_ansi(false)
                .with_timer(UtcTime::rfc_3339())
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let subscriber = tracing_subscriber::registry()
        .with(env_filter())
        .with(stderr_layer)
        .with(file_layer);
    let _ = tracing::subscriber::set_global_default(subscriber);

    info!(
        target: "recorrido_admin",
        event = "job_started",
        job,
        version = env!("CARGO_PKG_VERSION"),
        git_hash = env!("RECORRIDO_GIT_HASH"),
    );

    Ok(LogGuard { _file: guard })
}
