//! Tracing setup for the harness.
//!
//! Logs are the audit trail of a run: every build diagnostic, assistant
//! transcript, and diff is emitted through `tracing`, so the default level is
//! `info` rather than `warn`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing subscriber.
///
/// Reads `RUST_LOG` env var. Defaults to `info` if unset.
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=buildloop=debug buildloop run --model openrouter/openai/gpt-5-mini
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
