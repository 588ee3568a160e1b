//! Tracing subscriber setup. Only the binary installs a subscriber; the core
//! crate just emits events.

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const OWN_TARGETS: [&str; 2] = ["packwright_core", "packwright_cli"];

fn level_for(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Install the global subscriber. Output always goes to stderr so stdout
/// stays clean for `--json` reports.
///
/// `-v` raises our own targets to DEBUG, `-vv` to TRACE. `RUST_LOG` still
/// governs every other crate (default `warn`).
///
/// # Panics
/// Panics if a global subscriber is already set.
pub fn init(verbosity: u8, json: bool) {
    let level = level_for(verbosity);
    let filter = OWN_TARGETS.iter().fold(
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        |filter, target| filter.add_directive(format!("{target}={level}").parse().unwrap()),
    );
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        let layer = fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_writer(std::io::stderr);
        registry.with(layer).init();
    } else {
        let layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
        registry.with(layer).init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_for_verbosity() {
        assert_eq!(level_for(0), Level::INFO);
        assert_eq!(level_for(1), Level::DEBUG);
        assert_eq!(level_for(5), Level::TRACE);
    }
}
