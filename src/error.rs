//! Error types for focus-control operations.
//!
//! Every fallible operation in this crate returns [`Result`]. Out-of-range
//! focus positions are corrected by saturation and never surface here; the
//! [`FocusError::OutOfRange`] variant is reserved for values that cannot be
//! corrected, such as an unknown slew-rate code read back from hardware.

use thiserror::Error;

/// Result type alias for focus-control operations.
pub type Result<T> = std::result::Result<T, FocusError>;

/// Errors that can occur while driving the focus actuator.
#[derive(Error, Debug)]
pub enum FocusError {
    /// Actuator or co-processor firmware is not initialised or not powered
    #[error("Not ready: {message}")]
    NotReady { message: String },

    /// A bounded poll loop exhausted its retry ceiling
    #[error("Timed out waiting for {operation} after {attempts} polls")]
    Timeout {
        operation: &'static str,
        attempts: u32,
    },

    /// A raw value cannot be mapped into its domain
    #[error("Value {value} out of range for {what}")]
    OutOfRange { what: &'static str, value: u32 },

    /// The chip-ID probe returned an unexpected identifier
    #[error("Device mismatch: expected chip ID {expected:#06x}, read {actual:#06x}")]
    DeviceMismatch { expected: u16, actual: u16 },

    /// Register transport failure
    #[error("Register access failed at {address:#06x}: {message}")]
    Register { address: u16, message: String },

    /// Single-shot autofocus finished without reaching focus
    #[error("Autofocus finished without focus lock")]
    NotFocused,

    /// Firmware image does not fit in the register address space
    #[error("Firmware image of {len} bytes does not fit at base {base:#06x}")]
    FirmwareTooLarge { len: usize, base: u16 },

    /// Invalid configuration or parameter
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

impl FocusError {
    /// Shorthand for a [`FocusError::Register`] built from any displayable cause.
    pub fn register(address: u16, cause: impl std::fmt::Display) -> Self {
        Self::Register {
            address,
            message: cause.to_string(),
        }
    }

    /// Check if this error came from an exhausted poll loop.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if the device was not ready for the request.
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Self::NotReady { .. })
    }

    /// Check if this is a transport failure.
    pub fn is_register(&self) -> bool {
        matches!(self, Self::Register { .. })
    }
}
