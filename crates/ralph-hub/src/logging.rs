use crate::config::HubConfig;
use std::io;
use std::path::Path;
use tracing::Subscriber;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

const LOG_FILE_NAME: &str = "ralph-hub.log";

/// Flushes pending file output when dropped; hold it for the life of the
/// process.
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Installs the global subscriber: stdout always, plus
/// `<log_dir>/ralph-hub.log` when a log directory is configured.
pub fn init_logging(config: &HubConfig) -> LogGuard {
    let directive = ralph_core::log_filter_directive(config.debug, "info");
    let (writer, guard) = match open_log_file(Path::new(config.log_dir.trim())) {
        Ok(Some((writer, guard))) => (Some(writer), Some(guard)),
        Ok(None) => (None, None),
        Err(err) => {
            eprintln!("log_file_error: {err}");
            (None, None)
        }
    };
    if let Err(err) = tracing::subscriber::set_global_default(build_subscriber(&directive, writer)) {
        eprintln!("logging_init_error: {err}");
    }
    LogGuard { _file: guard }
}

fn build_subscriber(
    directive: &str,
    file: Option<NonBlocking>,
) -> impl Subscriber + Send + Sync + 'static {
    let file_layer = file.map(|writer| fmt::layer().with_writer(writer).with_ansi(false));
    tracing_subscriber::registry()
        .with(EnvFilter::new(directive))
        .with(fmt::layer())
        .with(file_layer)
}

fn open_log_file(dir: &Path) -> io::Result<Option<(NonBlocking, WorkerGuard)>> {
    if dir.as_os_str().is_empty() {
        return Ok(None);
    }
    std::fs::create_dir_all(dir)?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(LOG_FILE_NAME)
        .build(dir)
        .map_err(io::Error::other)?;
    Ok(Some(tracing_appender::non_blocking(appender)))
}
