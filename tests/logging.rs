//! Global logging setup. Kept in its own test binary: it installs the
//! process-wide subscriber.

use dockstation::logging::{self, LoggingConfig, OutputFormat};
use tracing::Level;

#[test]
fn test_init_is_idempotent() {
    let config = LoggingConfig::new(Level::DEBUG)
        .with_format(OutputFormat::Compact)
        .with_ansi(false);
    assert!(logging::init(config.clone()).is_ok());
    // A second call finds the subscriber already installed.
    assert!(logging::init(config.with_format(OutputFormat::Json)).is_ok());
    tracing::info!("logging initialised");
}
