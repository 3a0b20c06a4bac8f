//! Driver configuration.
//!
//! Every field has a default matching the OV5640, so an empty file is a
//! valid configuration. Values are layered:
//! 1. built-in defaults
//! 2. a TOML file
//! 3. environment variables prefixed with `FOCUS_`, nested keys split on `__`
//!    (e.g. `FOCUS_TIMING__ACK_RETRIES=200`)
//!
//! # Example
//! ```no_run
//! use ov5640_focus::FocusConfig;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = FocusConfig::load("config/ov5640.toml")?;
//! println!("ack ceiling: {:?}", config.timing.ack_ceiling());
//! # Ok(())
//! # }
//! ```

use anyhow::{bail, Context};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::distance::{self, DistancePolicy};
use crate::error::{FocusError, Result};
use crate::firmware::OV5640_CHIP_ID;
use crate::logging::{self, LogConfig};
use crate::position::{PositionConvention, SlewRate};
use crate::registers::{RegisterMap, StatusCodes, COMMAND_PARAM_COUNT};
use crate::timing::TimingConfig;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "FOCUS_";

/// Complete driver configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FocusConfig {
    /// Register addresses
    pub registers: RegisterMap,
    /// Firmware / focus status codes
    pub status: StatusCodes,
    /// Poll ceilings and settle delays
    pub timing: TimingConfig,
    /// Direction of raw position codes
    pub convention: PositionConvention,
    /// Slew rate used when none is requested
    pub default_slew: SlewRate,
    /// Chip ID the startup probe accepts
    pub expected_chip_id: u16,
    /// Distance-to-position policy
    pub distance: DistancePolicy,
    /// Logging options for binaries
    pub log: LogConfig,
}

impl Default for FocusConfig {
    fn default() -> Self {
        Self {
            registers: RegisterMap::default(),
            status: StatusCodes::default(),
            timing: TimingConfig::default(),
            convention: PositionConvention::default(),
            default_slew: SlewRate::default(),
            expected_chip_id: OV5640_CHIP_ID,
            distance: DistancePolicy::default(),
            log: LogConfig::default(),
        }
    }
}

impl FocusConfig {
    /// Load from a TOML file with environment overrides, then validate.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            bail!("Config file not found: {}", path.display());
        }
        debug!("Loading focus config from: {}", path.display());

        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config in {}", path.display()))?;
        Ok(config)
    }

    /// Parse an inline TOML document (no environment overrides), then validate.
    pub fn from_toml_str(document: &str) -> anyhow::Result<Self> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::string(document))
            .extract()
            .context("Failed to parse inline config")?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field consistency.
    pub fn validate(&self) -> Result<()> {
        if !self.status.all_distinct() {
            return Err(invalid("status codes must be distinct".to_string()));
        }

        let map = &self.registers;
        let last_param = usize::from(map.cmd_para0) + COMMAND_PARAM_COUNT - 1;
        if last_param > usize::from(u16::MAX) {
            return Err(invalid(format!(
                "parameter block at {:#06x} runs past the address space",
                map.cmd_para0
            )));
        }
        let control = [
            ("cmd_main", map.cmd_main),
            ("cmd_ack", map.cmd_ack),
            ("fw_status", map.fw_status),
        ];
        for (name, address) in control {
            if (usize::from(map.cmd_para0)..=last_param).contains(&usize::from(address)) {
                return Err(invalid(format!(
                    "{name} at {address:#06x} overlaps the parameter block"
                )));
            }
        }
        if map.cmd_main == map.cmd_ack {
            return Err(invalid("cmd_main and cmd_ack share an address".to_string()));
        }
        if map.vcm_control0 == map.vcm_control1 {
            return Err(invalid("VCM control 0 and 1 share an address".to_string()));
        }

        let timing = &self.timing;
        if timing.ack_retries == 0 || timing.firmware_retries == 0 || timing.single_af_polls == 0 {
            return Err(invalid("poll ceilings must be at least 1".to_string()));
        }

        distance::validate(&self.distance)?;
        logging::parse_level(&self.log.level).map_err(|e| invalid(e.to_string()))?;
        Ok(())
    }
}

fn invalid(message: String) -> FocusError {
    FocusError::InvalidConfig { message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distance::DistanceEntry;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        let config = FocusConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.expected_chip_id, 0x5640);
        assert_eq!(config.convention, PositionConvention::ZeroIsNear);
        assert_eq!(config.default_slew, SlewRate::Step200us);
    }

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config = FocusConfig::from_toml_str(
            r#"
            convention = "zero_is_far"
            default_slew = "step800us"

            [timing]
            ack_retries = 20

            [registers]
            firmware_base = 0x9000
            "#,
        )
        .unwrap();

        assert_eq!(config.convention, PositionConvention::ZeroIsFar);
        assert_eq!(config.default_slew, SlewRate::Step800us);
        assert_eq!(config.timing.ack_retries, 20);
        assert_eq!(config.timing.ack_poll_ms, 5);
        assert_eq!(config.registers.firmware_base, 0x9000);
        assert_eq!(config.registers.cmd_main, 0x3022);
    }

    #[test]
    fn test_distance_table_from_toml() {
        let config = FocusConfig::from_toml_str(
            r#"
            [distance]
            policy = "table"
            entries = [
                { threshold_mm = 50, position = 1023 },
                { threshold_mm = 70, position = 850 },
                { threshold_mm = 0, position = 0 },
            ]
            "#,
        )
        .unwrap();

        assert_eq!(
            config.distance,
            DistancePolicy::Table {
                entries: vec![
                    DistanceEntry::new(50, 1023),
                    DistanceEntry::new(70, 850),
                    DistanceEntry::new(0, 0),
                ]
            }
        );
    }

    #[test]
    fn test_validation_rejects_inconsistent_values() {
        assert!(FocusConfig::from_toml_str("[timing]\nack_retries = 0").is_err());
        assert!(FocusConfig::from_toml_str("[status]\nfocused = 0x70").is_err());
        assert!(FocusConfig::from_toml_str("[registers]\ncmd_ack = 0x3026").is_err());
        assert!(FocusConfig::from_toml_str(
            "[distance]\npolicy = \"linear\"\nmacro_mm = 900\ninfinity_mm = 100\nmin_focus = 0\nmax_focus = 1023"
        )
        .is_err());
        assert!(FocusConfig::from_toml_str("[log]\nlevel = \"loud\"").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "expected_chip_id = 0x2642").unwrap();
        writeln!(file, "[timing]").unwrap();
        writeln!(file, "move_settle_ms = 30").unwrap();

        let config = FocusConfig::load(file.path()).unwrap();
        assert_eq!(config.expected_chip_id, 0x2642);
        assert_eq!(config.timing.move_settle_ms, 30);
    }

    #[test]
    fn test_load_missing_file() {
        let err = FocusConfig::load("/nonexistent/focus.toml").unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_env_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("focus.toml", "[timing]\nack_retries = 10\nack_poll_ms = 2")?;
            jail.set_env("FOCUS_TIMING__ACK_RETRIES", "25");
            jail.set_env("FOCUS_CONVENTION", "zero_is_far");

            let config = FocusConfig::load("focus.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.timing.ack_retries, 25);
            assert_eq!(config.timing.ack_poll_ms, 2);
            assert_eq!(config.convention, PositionConvention::ZeroIsFar);
            Ok(())
        });
    }
}
