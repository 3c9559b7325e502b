//! Log output for the harness.
//!
//! The analyzer's report arrives on its stdout and `bugcheck parse` echoes
//! parsed issues on ours, so harness logs are written to stderr. A run can
//! then be piped into another tool without log lines corrupting the report.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Install the global subscriber, writing to stderr.
///
/// `RUST_LOG` wins over `level` when set. With `json`, each event is one
/// JSON object per line carrying the `event` field set by [`crate::obs`].
/// Only the first call in a process takes effect.
pub fn init_tracing(json: bool, level: Level) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let layer = fmt::layer().with_target(false).with_writer(std::io::stderr);

    let installed = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer.json())
            .try_init()
    } else {
        tracing_subscriber::registry().with(filter).with(layer).try_init()
    };
    if installed.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_tracing_is_idempotent() {
        init_tracing(false, Level::WARN);
        init_tracing(true, Level::DEBUG);
        tracing::info!("still logging after repeated init");
    }
}
