//! Global subscriber installation.
//!
//! Kept out of the library's unit tests: once `init` installs the global
//! subscriber, `traced_test` in the same process captures nothing.

use ov5640_focus::logging::{self, LogConfig, OutputFormat};

#[test]
fn init_is_idempotent() {
    let config = LogConfig::new("error").with_format(OutputFormat::Compact);
    assert!(logging::init(&config).is_ok());
    assert!(logging::init(&config).is_ok());
}

#[test]
fn init_rejects_bad_level() {
    assert!(logging::init(&LogConfig::new("loud")).is_err());
}
