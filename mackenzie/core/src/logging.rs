//! Tracing-subscriber wiring shared by every binary's `main`. Library crates only
//! ever emit `tracing` events; subscriber construction happens exactly once here.

use tracing_subscriber::EnvFilter;

/// Install a stderr `fmt` subscriber, plus a daily-rolling file appender under
/// `log_dir` when one is configured (`{PREFIX}LOG_DIR`). Returns the appender's
/// guard, which must be held for the lifetime of `main` to flush on exit.
pub fn init(log_dir: Option<&std::path::Path>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log_dir {
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_ansi(true)
                .init();
            None
        }
        Some(dir) => {
            let file_appender = tracing_appender::rolling::daily(dir, "mackenzie.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(non_blocking)
                .with_ansi(false)
                .init();
            Some(guard)
        }
    }
}
