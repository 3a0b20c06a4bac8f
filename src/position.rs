//! Manual VCM position drive.
//!
//! A focus position is a 10-bit actuator code split across two registers:
//!
//! | Register      | Bit 7      | Bit 6  | Bits 5..0     |
//! |---------------|------------|--------|---------------|
//! | VCM control 1 | power-down | unused | position 9..4 |
//!
//! | Register      | Bits 7..4     | Bits 3..0 |
//! |---------------|---------------|-----------|
//! | VCM control 0 | position 3..0 | slew code |
//!
//! This driver waits a fixed settle after every move instead of polling a
//! move-complete bit, which the VCM block does not expose.
//!
//! # Direction
//!
//! Raw codes have no inherent direction. The OV5640 VCM driver documents
//! code 0 as the nearest focus; other module variants use 0 for infinity.
//! The convention is chosen per driver through [`PositionConvention`].

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::error::{FocusError, Result};
use crate::port::{RegisterPort, SensorBus};
use crate::registers::{
    RegisterMap, VCM_CLOCK_DIV_HIGH, VCM_CLOCK_DIV_LOW, VCM_CURRENT_1X, VCM_HIGH_MASK,
    VCM_HIGH_SHIFT, VCM_LOW_MASK, VCM_LOW_SHIFT, VCM_POWER_DOWN, VCM_SLEW_MASK,
};
use crate::timing::{Delay, TimingConfig};

/// Actuator code in `[MIN_POSITION, MAX_POSITION]`.
pub type FocusPosition = u16;

/// Lowest actuator code.
pub const MIN_POSITION: FocusPosition = 0;
/// Highest actuator code (10-bit).
pub const MAX_POSITION: FocusPosition = 1023;
/// Position assumed at power-up and used by manual initialisation.
pub const DEFAULT_POSITION: FocusPosition = 512;
/// Position units per logical step in [`ManualPositionDriver::step_by`].
pub const STEP_SCALE: i32 = 10;

/// Step timing of a VCM move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SlewRate {
    /// Jump straight to the target code
    Direct = 0x00,
    /// 50 µs per step
    Step50us = 0x01,
    /// 100 µs per step
    Step100us = 0x02,
    /// 200 µs per step
    #[default]
    Step200us = 0x03,
    /// 400 µs per step
    Step400us = 0x04,
    /// 800 µs per step
    Step800us = 0x05,
    /// 1600 µs per step
    Step1600us = 0x06,
    /// 3200 µs per step
    Step3200us = 0x07,
}

impl SlewRate {
    /// All rates, fastest first.
    pub const ALL: [SlewRate; 8] = [
        Self::Direct,
        Self::Step50us,
        Self::Step100us,
        Self::Step200us,
        Self::Step400us,
        Self::Step800us,
        Self::Step1600us,
        Self::Step3200us,
    ];

    /// Register code (bits 3..0 of VCM control 0).
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Decode a register code.
    pub fn from_code(code: u8) -> Result<Self> {
        Self::ALL
            .get(usize::from(code))
            .copied()
            .ok_or(FocusError::OutOfRange {
                what: "slew rate code",
                value: u32::from(code),
            })
    }

    /// Time per actuator step, `None` for a direct jump.
    pub fn step_time(self) -> Option<Duration> {
        match self {
            Self::Direct => None,
            other => Some(Duration::from_micros(25 << other.code())),
        }
    }
}

/// Meaning of actuator code 0 for a given driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionConvention {
    /// Code 0 focuses nearest (OV5640 VCM driver)
    #[default]
    ZeroIsNear,
    /// Code 0 focuses at infinity
    ZeroIsFar,
}

impl PositionConvention {
    /// Convert a nearness value (larger = nearer, as produced by
    /// [`crate::DistanceMapper`]) into this driver's raw code.
    pub fn from_nearness(self, nearness: FocusPosition) -> FocusPosition {
        let nearness = nearness.min(MAX_POSITION);
        match self {
            Self::ZeroIsNear => MAX_POSITION - nearness,
            Self::ZeroIsFar => nearness,
        }
    }
}

/// Usable focus span produced by calibration.
///
/// `near_limit <= far_limit` holds whenever the range is built through
/// [`FocusRange::new`] or repaired with [`FocusRange::normalize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FocusRange {
    /// Lower bound in raw codes
    pub near_limit: FocusPosition,
    /// Upper bound in raw codes
    pub far_limit: FocusPosition,
}

impl FocusRange {
    /// Build an ordered range, swapping bounds given in the wrong order.
    pub fn new(a: FocusPosition, b: FocusPosition) -> Self {
        let mut range = Self {
            near_limit: a.min(MAX_POSITION),
            far_limit: b.min(MAX_POSITION),
        };
        range.normalize();
        range
    }

    /// The full actuator span.
    pub fn full() -> Self {
        Self {
            near_limit: MIN_POSITION,
            far_limit: MAX_POSITION,
        }
    }

    /// Restore `near_limit <= far_limit`; returns true if bounds were swapped.
    pub fn normalize(&mut self) -> bool {
        if self.near_limit > self.far_limit {
            std::mem::swap(&mut self.near_limit, &mut self.far_limit);
            true
        } else {
            false
        }
    }

    /// Clamp a signed position into the range.
    pub fn clamp(&self, position: i32) -> FocusPosition {
        position.clamp(i32::from(self.near_limit), i32::from(self.far_limit)) as FocusPosition
    }

    /// `(near + far) / 2`, rounding down.
    pub fn midpoint(&self) -> FocusPosition {
        ((u32::from(self.near_limit) + u32::from(self.far_limit)) / 2) as FocusPosition
    }

    /// True if `position` lies within the bounds.
    pub fn contains(&self, position: FocusPosition) -> bool {
        (self.near_limit..=self.far_limit).contains(&position)
    }
}

impl Default for FocusRange {
    fn default() -> Self {
        Self::full()
    }
}

/// Pack a position and slew rate into `(control1, control0)`.
///
/// The power-down bit of control 1 is cleared, so writing the pair leaves
/// the actuator powered.
pub fn encode_position(position: FocusPosition, slew: SlewRate) -> (u8, u8) {
    let position = position.min(MAX_POSITION);
    let high = ((position >> VCM_HIGH_SHIFT) as u8) & VCM_HIGH_MASK;
    let low = (((position & VCM_LOW_MASK) as u8) << VCM_LOW_SHIFT) | (slew.code() & VCM_SLEW_MASK);
    (high & !VCM_POWER_DOWN, low)
}

/// Unpack the position from `(control1, control0)`, ignoring power and slew bits.
pub fn decode_position(control1: u8, control0: u8) -> FocusPosition {
    (FocusPosition::from(control1 & VCM_HIGH_MASK) << VCM_HIGH_SHIFT)
        | FocusPosition::from(control0 >> VCM_LOW_SHIFT)
}

/// Direct actuator control through the VCM register pair.
#[derive(Debug, Clone)]
pub struct ManualPositionDriver {
    map: RegisterMap,
    current: FocusPosition,
    powered: bool,
    default_slew: SlewRate,
    settle_ms: u32,
    init_settle_ms: u32,
}

impl ManualPositionDriver {
    /// Create a driver; the actuator is assumed unpowered at [`DEFAULT_POSITION`].
    pub fn new(map: RegisterMap, default_slew: SlewRate, timing: &TimingConfig) -> Self {
        Self {
            map,
            current: DEFAULT_POSITION,
            powered: false,
            default_slew,
            settle_ms: timing.move_settle_ms,
            init_settle_ms: timing.init_settle_ms,
        }
    }

    /// Last commanded (or last read-back) position.
    pub fn current(&self) -> FocusPosition {
        self.current
    }

    /// Whether the driver believes the actuator is powered.
    pub fn is_powered(&self) -> bool {
        self.powered
    }

    /// Slew rate used when none is given.
    pub fn default_slew(&self) -> SlewRate {
        self.default_slew
    }

    /// Program clock divider and drive current, power up, and park at the
    /// default position.
    #[instrument(skip_all, err)]
    pub fn init<P: RegisterPort, D: Delay>(&mut self, bus: &mut SensorBus<P, D>) -> Result<()> {
        bus.write(self.map.vcm_control3, VCM_CLOCK_DIV_HIGH)?;
        bus.write(self.map.vcm_control2, VCM_CLOCK_DIV_LOW)?;
        bus.write(self.map.vcm_control4, VCM_CURRENT_1X)?;
        self.set_powered(bus, true)?;
        self.set_position_with_slew(bus, DEFAULT_POSITION, self.default_slew)?;
        bus.delay_ms(self.init_settle_ms);
        debug!(position = self.current, "Manual focus initialised");
        Ok(())
    }

    /// Move to `position` at the default slew rate.
    pub fn set_position<P: RegisterPort, D: Delay>(
        &mut self,
        bus: &mut SensorBus<P, D>,
        position: FocusPosition,
    ) -> Result<FocusPosition> {
        self.set_position_with_slew(bus, position, self.default_slew)
    }

    /// Move to `position`, saturating at [`MAX_POSITION`].
    ///
    /// Returns the position actually stored. Powers the actuator on first if
    /// needed, writes control 1 then control 0, and waits the fixed settle.
    pub fn set_position_with_slew<P: RegisterPort, D: Delay>(
        &mut self,
        bus: &mut SensorBus<P, D>,
        position: FocusPosition,
        slew: SlewRate,
    ) -> Result<FocusPosition> {
        let target = position.min(MAX_POSITION);
        if target != position {
            warn!(requested = position, clamped = target, "Focus position saturated");
        }

        if !self.powered {
            self.set_powered(bus, true)?;
        }

        let (control1, control0) = encode_position(target, slew);
        bus.write(self.map.vcm_control1, control1)?;
        bus.write(self.map.vcm_control0, control0)?;
        bus.delay_ms(self.settle_ms);

        self.current = target;
        debug!(position = target, ?slew, "VCM moved");
        Ok(target)
    }

    /// Read the position back from the registers.
    ///
    /// Returns 0 while the actuator is unpowered. 0 is also a legal
    /// position, so callers that care must check [`Self::is_powered`].
    pub fn get_position<P: RegisterPort, D: Delay>(
        &mut self,
        bus: &mut SensorBus<P, D>,
    ) -> Result<FocusPosition> {
        if !self.powered {
            return Ok(0);
        }
        self.read_raw_position(bus)
    }

    /// Decode the register pair regardless of power state and record it as
    /// the current position.
    ///
    /// Used after autofocus, where the co-processor drives the VCM itself.
    pub fn read_raw_position<P: RegisterPort, D: Delay>(
        &mut self,
        bus: &mut SensorBus<P, D>,
    ) -> Result<FocusPosition> {
        let control1 = bus.read(self.map.vcm_control1)?;
        let control0 = bus.read(self.map.vcm_control0)?;
        self.current = decode_position(control1, control0);
        Ok(self.current)
    }

    /// Set or clear the power-down bit, keeping the stored position bits.
    pub fn set_powered<P: RegisterPort, D: Delay>(
        &mut self,
        bus: &mut SensorBus<P, D>,
        enable: bool,
    ) -> Result<()> {
        let control1 = bus.read(self.map.vcm_control1)?;
        let control1 = if enable {
            control1 & !VCM_POWER_DOWN
        } else {
            control1 | VCM_POWER_DOWN
        };
        bus.write(self.map.vcm_control1, control1)?;
        self.powered = enable;
        debug!(enable, "VCM power");
        Ok(())
    }

    /// Move to the near limit of `range`.
    pub fn move_to_near<P: RegisterPort, D: Delay>(
        &mut self,
        bus: &mut SensorBus<P, D>,
        range: &FocusRange,
    ) -> Result<FocusPosition> {
        self.set_position(bus, range.near_limit)
    }

    /// Move to the far limit of `range`.
    pub fn move_to_far<P: RegisterPort, D: Delay>(
        &mut self,
        bus: &mut SensorBus<P, D>,
        range: &FocusRange,
    ) -> Result<FocusPosition> {
        self.set_position(bus, range.far_limit)
    }

    /// Move to the midpoint of `range`.
    pub fn move_to_midpoint<P: RegisterPort, D: Delay>(
        &mut self,
        bus: &mut SensorBus<P, D>,
        range: &FocusRange,
    ) -> Result<FocusPosition> {
        self.set_position(bus, range.midpoint())
    }

    /// Move by `steps * STEP_SCALE` units, clamped to `range`.
    pub fn step_by<P: RegisterPort, D: Delay>(
        &mut self,
        bus: &mut SensorBus<P, D>,
        range: &FocusRange,
        steps: i8,
    ) -> Result<FocusPosition> {
        let target = i32::from(self.current) + i32::from(steps) * STEP_SCALE;
        let clamped = range.clamp(target);
        if i32::from(clamped) != target {
            debug!(target, clamped, "Step clamped to focus range");
        }
        self.set_position(bus, clamped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockSensor, RecordingDelay};

    fn driver() -> (MockSensor, SensorBus<MockSensor, RecordingDelay>, ManualPositionDriver) {
        let sensor = MockSensor::new();
        let bus = SensorBus::new(sensor.clone(), RecordingDelay::default());
        let manual = ManualPositionDriver::new(
            RegisterMap::default(),
            SlewRate::default(),
            &TimingConfig::default(),
        );
        (sensor, bus, manual)
    }

    #[test]
    fn test_encode_bit_layout() {
        // 0x2A5 = 10_1010_0101: high 101010, low 0101
        let (control1, control0) = encode_position(0x2A5, SlewRate::Step200us);
        assert_eq!(control1, 0x2A);
        assert_eq!(control0, 0x53);

        let (control1, control0) = encode_position(MAX_POSITION, SlewRate::Step3200us);
        assert_eq!(control1, 0x3F);
        assert_eq!(control0, 0xF7);
    }

    #[test]
    fn test_decode_ignores_power_and_slew_bits() {
        assert_eq!(decode_position(0x80 | 0x2A, 0x53), 0x2A5);
        assert_eq!(decode_position(0xC0, 0x0F), 0);
    }

    #[test]
    fn test_slew_codes() {
        for rate in SlewRate::ALL {
            assert_eq!(SlewRate::from_code(rate.code()).unwrap(), rate);
        }
        assert!(SlewRate::from_code(0x08).is_err());
        assert_eq!(SlewRate::Step50us.step_time(), Some(Duration::from_micros(50)));
        assert_eq!(SlewRate::Step3200us.step_time(), Some(Duration::from_micros(3200)));
        assert_eq!(SlewRate::Direct.step_time(), None);
    }

    #[test]
    fn test_range_normalize_and_midpoint() {
        let range = FocusRange::new(900, 100);
        assert_eq!(range.near_limit, 100);
        assert_eq!(range.far_limit, 900);
        assert_eq!(FocusRange::new(0, 1023).midpoint(), 511);
        assert_eq!(range.clamp(-88), 100);
        assert_eq!(range.clamp(5000), 900);
    }

    #[test]
    fn test_convention_mirrors_nearness() {
        assert_eq!(PositionConvention::ZeroIsFar.from_nearness(850), 850);
        assert_eq!(PositionConvention::ZeroIsNear.from_nearness(1023), 0);
        assert_eq!(PositionConvention::ZeroIsNear.from_nearness(0), 1023);
    }

    #[test]
    fn test_set_position_powers_on_and_settles() {
        let (sensor, mut bus, mut manual) = driver();
        sensor.poke(0x3603, 0x80);

        let stored = manual.set_position(&mut bus, 300).unwrap();

        assert_eq!(stored, 300);
        assert!(manual.is_powered());
        assert_eq!(sensor.peek(0x3603) & 0x80, 0);
        assert_eq!(bus.delay().total_ms(), 100);
    }

    #[test]
    fn test_set_position_saturates() {
        let (_sensor, mut bus, mut manual) = driver();
        assert_eq!(manual.set_position(&mut bus, 4000).unwrap(), MAX_POSITION);
        assert_eq!(manual.current(), MAX_POSITION);
        assert_eq!(manual.get_position(&mut bus).unwrap(), MAX_POSITION);
    }

    #[test]
    #[tracing_test::traced_test]
    fn test_saturation_is_logged() {
        let (_sensor, mut bus, mut manual) = driver();
        manual.set_position(&mut bus, 2000).unwrap();
        assert!(logs_contain("Focus position saturated"));
    }

    #[test]
    fn test_power_down_preserves_position_bits() {
        let (sensor, mut bus, mut manual) = driver();
        manual.set_position(&mut bus, 0x2A5).unwrap();

        manual.set_powered(&mut bus, false).unwrap();
        assert_eq!(sensor.peek(0x3603), 0x80 | 0x2A);
        assert_eq!(manual.get_position(&mut bus).unwrap(), 0);

        manual.set_powered(&mut bus, true).unwrap();
        assert_eq!(manual.get_position(&mut bus).unwrap(), 0x2A5);
    }

    #[test]
    fn test_raw_read_records_externally_driven_position() {
        let (sensor, mut bus, mut manual) = driver();
        manual.set_position(&mut bus, 512).unwrap();
        let (control1, control0) = encode_position(612, SlewRate::default());
        sensor.poke(0x3603, control1);
        sensor.poke(0x3602, control0);

        assert_eq!(manual.read_raw_position(&mut bus).unwrap(), 612);
        assert_eq!(manual.current(), 612);
        assert_eq!(manual.step_by(&mut bus, &FocusRange::full(), 1).unwrap(), 622);
    }

    #[test]
    fn test_step_by_clamps_to_range() {
        let (_sensor, mut bus, mut manual) = driver();
        let range = FocusRange::full();
        manual.set_position(&mut bus, 512).unwrap();

        assert_eq!(manual.step_by(&mut bus, &range, -60).unwrap(), 0);
        assert_eq!(manual.step_by(&mut bus, &range, 3).unwrap(), 30);

        let narrow = FocusRange::new(100, 200);
        assert_eq!(manual.step_by(&mut bus, &narrow, 127).unwrap(), 200);
    }

    #[test]
    fn test_init_programs_clock_and_current() {
        let (sensor, mut bus, mut manual) = driver();
        manual.init(&mut bus).unwrap();

        assert_eq!(sensor.peek(0x3605), 0x04);
        assert_eq!(sensor.peek(0x3604), 0xB0);
        assert_eq!(sensor.peek(0x3606), 0x04);
        assert_eq!(manual.current(), DEFAULT_POSITION);
        assert_eq!(bus.delay().total_ms(), 200);
    }
}
