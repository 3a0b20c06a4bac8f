//! Lens-focus control for OV5640-class camera modules.
//!
//! This crate drives the focus actuator of a camera sensor over its register
//! interface. It brings up the on-chip autofocus co-processor, drives the
//! voice-coil motor (VCM) directly in manual mode, and calibrates the usable
//! focus range against an image-sharpness metric supplied by the caller.
//!
//! # Architecture
//!
//! ## Transport
//! - [`RegisterPort`] - byte/word register access, implemented by the caller
//! - [`SensorBus`] - a port paired with its [`Delay`] source
//!
//! ## Protocol
//! - [`CommandChannel`] - command / parameter / ack handshake
//! - [`FirmwareLoader`] - chip-ID probe and firmware upload
//! - [`ManualPositionDriver`] - VCM position packing and power gating
//!
//! ## Control
//! - [`FocusModeController`] - Released / Manual / SingleAuto / ContinuousAuto
//! - [`CalibrationEngine`] - range calibration and windowed focus search
//! - [`DistanceMapper`] - object distance to lens position
//!
//! ## Facade
//! - [`FocusDriver`] - owns the bus and all focus state for one sensor
//! - [`FocusConfig`] - register map, status codes, timing, distance policy
//!
//! # Example
//!
//! ```no_run
//! use ov5640_focus::{FocusDriver, StdDelay};
//! use ov5640_focus::mock::MockSensor;
//!
//! # fn example() -> anyhow::Result<()> {
//! let sensor = MockSensor::new();
//! let mut driver = FocusDriver::with_defaults(sensor.clone(), StdDelay)?;
//!
//! driver.init_manual_focus()?;
//! let mut metric = sensor.sharpness_peak(420);
//! let range = driver.calibrate_range(&mut metric)?;
//! println!("usable range: {}..={}", range.near_limit, range.far_limit);
//!
//! driver.focus_at_distance(300)?;
//! let best = driver.find_optimal_focus(&mut metric, 4)?;
//! println!("sharpest at {best}");
//! # Ok(())
//! # }
//! ```

pub mod calibration;
pub mod command;
pub mod config;
pub mod distance;
pub mod driver;
pub mod error;
pub mod firmware;
pub mod logging;
pub mod mock;
pub mod mode;
pub mod port;
pub mod position;
pub mod registers;
pub mod timing;

pub use calibration::{CalibrationEngine, SharpnessMetric, SharpnessScore};
pub use command::{CommandChannel, CommandFrame, FocusStatus};
pub use config::FocusConfig;
pub use distance::{DistanceEntry, DistanceMapper, DistancePolicy};
pub use driver::FocusDriver;
pub use error::{FocusError, Result};
pub use firmware::{FirmwareLoader, OV5640_CHIP_ID};
pub use mode::{FocusMode, FocusModeController, FocusRequest, ModeContext};
pub use port::{RegisterPort, SensorBus};
pub use position::{
    decode_position, encode_position, FocusPosition, FocusRange, ManualPositionDriver,
    PositionConvention, SlewRate, DEFAULT_POSITION, MAX_POSITION, MIN_POSITION, STEP_SCALE,
};
pub use registers::{RegisterMap, StatusCodes};
pub use timing::{Delay, StdDelay, TimingConfig};
