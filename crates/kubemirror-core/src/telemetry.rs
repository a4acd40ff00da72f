//! Tracing initialisation for the kubemirror binary.
//!
//! `RUST_LOG` takes precedence over the level passed in; repeated calls are
//! ignored because the global subscriber can only be set once. Logs go to
//! stderr so `kubemirror list` output on stdout stays clean.

use std::io;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

fn filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()))
}

/// Install the global subscriber, as JSON lines when `json` is set.
///
/// Returns `false` when a subscriber was already installed.
pub fn init_tracing(json: bool, level: Level) -> bool {
    let json_layer = json.then(|| {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(false)
            .with_writer(io::stderr)
    });
    let text_layer = (!json).then(|| {
        fmt::layer()
            .compact()
            .with_target(false)
            .with_writer(io::stderr)
    });

    tracing_subscriber::registry()
        .with(filter(level))
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .is_ok()
}
