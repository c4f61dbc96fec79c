//! Shared test scaffolding: a one-time `tracing` subscriber so `cargo test
//! -- --nocapture` shows the same `info!`/`debug!` output the storage core
//! emits in production, filtered by `RUST_LOG` (defaults to `warn`).

use std::sync::Once;

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init()
            .ok();
    });
}
