//! The shipped configuration file matches the built-in defaults.

use ov5640_focus::FocusConfig;

#[test]
fn shipped_config_equals_defaults() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/ov5640.toml");
    let config = FocusConfig::load(path).unwrap();
    assert_eq!(config, FocusConfig::default());
}
