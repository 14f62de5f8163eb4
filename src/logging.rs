use std::path::Path;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const LOG_FILE_PREFIX: &str = "job_agent.log";

/// Installs the global subscriber. Console output goes to stderr; when
/// `log_dir` is given, events are also written to a daily rolling file in it.
///
/// The returned guard flushes the file writer on drop and must be kept alive.
pub fn init_logging(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var("LOG_LEVEL")
        .from_env_lossy();

    let (file_layer, guard) = match log_dir {
        Some(dir) => match std::fs::create_dir_all(dir) {
            Ok(()) => {
                let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
                let (writer, guard) = tracing_appender::non_blocking(appender);
                let layer = tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(writer)
                    .boxed();
                (Some(layer), Some(guard))
            }
            Err(e) => {
                eprintln!("Cannot create log directory {:?}: {}", dir, e);
                (None, None)
            }
        },
        None => (None, None),
    };

    if let Err(e) = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .with(filter)
        .try_init()
    {
        eprintln!("Logging already initialized: {}", e);
    }

    guard
}
