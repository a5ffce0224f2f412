//! Tracing/logging bootstrap for the smoke runner.

use std::env;

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,harbor_core=debug";

/// Initialize the global tracing subscriber with severity gating from the
/// environment.
///
/// Precedence:
/// 1) `RUST_LOG`
/// 2) `HARBOR_SMOKE_LOG`
/// 3) `HARBOR_LOG`
/// 4) internal default filter
pub fn init() {
    let env_filter = filter_from_env();
    let _ = tracing_subscriber::fmt()
        .with_target(true)
        .with_env_filter(env_filter)
        .try_init();
}

fn filter_from_env() -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }

    for key in ["HARBOR_SMOKE_LOG", "HARBOR_LOG"] {
        if let Some(value) = env::var(key).ok().filter(|v| !v.trim().is_empty())
            && let Ok(filter) = EnvFilter::try_new(value)
        {
            return filter;
        }
    }

    EnvFilter::new(DEFAULT_FILTER)
}
