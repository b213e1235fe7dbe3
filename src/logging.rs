//! `tracing` subscriber setup for the binary and for ad-hoc debugging in tests.

use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const DEFAULT_FILTER: &str = "info,coach_chat=debug";

static INSTALLED: OnceCell<bool> = OnceCell::new();

/// Picks the filter directive: explicit value, then `RUST_LOG`, then the default.
#[must_use]
pub fn resolve_filter(explicit: Option<&str>) -> String {
    let non_blank = |value: &str| !value.trim().is_empty();
    explicit
        .filter(|value| non_blank(value))
        .map(str::to_owned)
        .or_else(|| std::env::var("RUST_LOG").ok().filter(|value| non_blank(value)))
        .unwrap_or_else(|| DEFAULT_FILTER.to_owned())
}

/// Installs a stderr fmt layer once per process. Returns whether this process
/// ended up with our subscriber installed.
pub fn init(filter: Option<&str>) -> bool {
    *INSTALLED.get_or_init(|| {
        let directive = resolve_filter(filter);
        let env_filter =
            EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

        let stderr_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .compact();

        let installed = tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .try_init()
            .is_ok();
        if installed {
            tracing::debug!(filter = %directive, "tracing initialized");
        }
        installed
    })
}
