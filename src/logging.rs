//! Diagnostic output for the SDK
//!
//! The SDK emits `tracing` events under the `proxykit` target. Hosts that
//! already install a subscriber get them for free; otherwise
//! [`install`] sets up a formatted subscriber at the configured level.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Verbosity of SDK diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
    None,
    #[default]
    Error,
    Info,
    Debug,
}

impl LogLevel {
    pub fn as_filter(self) -> LevelFilter {
        match self {
            LogLevel::None => LevelFilter::OFF,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
        }
    }
}

/// Install a global fmt subscriber for SDK diagnostics.
///
/// `RUST_LOG` wins over `level` when set. Returns `false` when nothing was
/// installed, either because `level` is [`LogLevel::None`] or because the
/// host already owns the global subscriber.
pub fn install(level: LogLevel) -> bool {
    if level == LogLevel::None {
        return false;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("proxykit={}", level.as_filter())));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
