//! Tracing setup for the `fleetcheck` binary.
//!
//! Logs go to stderr; stdout is reserved for the run report.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Crates whose events follow the requested level. Everything else (the AWS
/// SDK in particular) stays at `warn` unless `RUST_LOG` says otherwise.
const OWN_TARGETS: &[&str] = &["fleetcheck", "fleetcheck_core", "fleet_adapters", "fleet_interfaces"];

/// Filter directives used when `RUST_LOG` is unset.
pub fn default_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    OWN_TARGETS.iter().fold("warn".to_string(), |mut directives, target| {
        directives.push_str(&format!(",{target}={level}"));
        directives
    })
}

/// Install the global subscriber; a second call is a no-op.
pub fn init_tracing(json: bool, level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    let plain = (!json).then(|| fmt::layer().with_target(false).with_writer(std::io::stderr));
    let structured = json.then(|| {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .json()
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(structured)
        .try_init()
        .ok();
}
