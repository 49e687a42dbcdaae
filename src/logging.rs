use tracing_subscriber::{fmt, EnvFilter};

/// Initialize structured logging on stderr; stdout is kept for command output.
///
/// This must be called once at startup (in main.rs).
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

/// Emit a tracing event for a watcher, subject to its own `log_level`.
///
/// `watcher_event!(watcher, WARN, dropped, "pending queue trimmed")`
macro_rules! watcher_event {
    ($watcher:expr, $level:ident, $($rest:tt)+) => {{
        let watcher: &$crate::watcher::WatcherConfig = $watcher;
        if watcher.log_level.allows(::tracing::Level::$level) {
            ::tracing::event!(::tracing::Level::$level, watcher = %watcher.name, $($rest)+);
        }
    }};
}

pub(crate) use watcher_event;
