//! Tracing subscriber setup for the `modekey` binary.
//!
//! Filter priority: `--verbose` > `MODEKEY_LOG` > `RUST_LOG` > `warn`.
//! `MODEKEY_LOG=debug` is shorthand for `warn,modekey=debug`; values with
//! directive syntax are used as-is.

use std::env;

use tracing_subscriber::EnvFilter;

const ENV_VAR: &str = "MODEKEY_LOG";

/// Expand a bare level into a filter scoped to the engine crates
fn expand_level(value: &str) -> String {
    if value.contains(['=', ':', ',']) {
        return value.to_string();
    }
    format!("warn,modekey={value},exchange_line={value}")
}

fn filter_directives(verbose: bool) -> String {
    if verbose {
        return expand_level("debug");
    }
    if let Ok(value) = env::var(ENV_VAR) {
        return expand_level(&value);
    }
    if let Ok(value) = env::var("RUST_LOG") {
        return value;
    }
    "warn".to_string()
}

/// Install the global fmt subscriber on stderr. Safe to call twice; the
/// second call does nothing.
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_new(filter_directives(verbose)).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init();
}
