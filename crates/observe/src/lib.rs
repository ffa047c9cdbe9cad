//! Process-wide observability: tracing initialization and the global
//! prometheus metric storage the components register into.

pub mod metrics;

use tracing_subscriber::{EnvFilter, fmt};

/// Initializes the global tracing subscriber. `env_filter` follows the
/// `RUST_LOG` syntax; JSON output is meant for prod, the compact
/// human-readable form for dev.
pub fn tracing_initialize(env_filter: &str, json: bool) {
    let filter = EnvFilter::try_new(env_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        fmt()
            .with_env_filter(filter)
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .init();
    } else {
        fmt().with_env_filter(filter).init();
    }
    install_panic_hook();
}

/// Panics inside spawned tasks otherwise only surface on join; log them
/// where the operator will see them.
fn install_panic_hook() {
    let default = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        tracing::error!("thread panicked: {info}");
        default(info);
    }));
}
