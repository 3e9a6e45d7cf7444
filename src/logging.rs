//! Logging setup
//!
//! Libraries only emit `tracing` events. Hosts that want them printed call
//! [`init`] once at startup.

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Level for a verbosity count: 0 warn, 1 info, 2+ debug
pub fn level_for(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    }
}

/// Install a `fmt` subscriber honouring `RUST_LOG`
///
/// `verbosity` sets the default level. Calling this again, or after another
/// subscriber was installed, does nothing.
pub fn init(verbosity: u8) {
    let filter = EnvFilter::builder()
        .with_default_directive(level_for(verbosity).into())
        .from_env_lossy();

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
