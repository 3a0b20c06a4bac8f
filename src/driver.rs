//! [`FocusDriver`]: one instance per physical sensor.
//!
//! The driver owns the register port and every piece of mutable focus state
//! (mode, calibrated range, actuator power). All operations block the calling
//! thread; wrap the driver in a mutex if several threads must share it.

use tracing::{info, instrument};

use crate::calibration::{CalibrationEngine, SharpnessMetric};
use crate::command::{CommandChannel, FocusStatus};
use crate::config::FocusConfig;
use crate::distance::DistanceMapper;
use crate::error::{FocusError, Result};
use crate::firmware::FirmwareLoader;
use crate::mode::{FocusMode, FocusModeController, FocusRequest, ModeContext};
use crate::port::{RegisterPort, SensorBus};
use crate::position::{FocusPosition, FocusRange, ManualPositionDriver, PositionConvention, SlewRate};
use crate::registers::RegisterMap;
use crate::timing::{Delay, StdDelay};

/// Focus controller for one sensor.
#[derive(Debug)]
pub struct FocusDriver<P, D = StdDelay> {
    bus: SensorBus<P, D>,
    map: RegisterMap,
    channel: CommandChannel,
    loader: FirmwareLoader,
    manual: ManualPositionDriver,
    calibration: CalibrationEngine,
    modes: FocusModeController,
    range: FocusRange,
    mapper: DistanceMapper,
    convention: PositionConvention,
    firmware_ready: bool,
}

impl<P: RegisterPort, D: Delay> FocusDriver<P, D> {
    /// Build a driver from a validated configuration.
    ///
    /// Nothing is written to the sensor until an operation is called.
    pub fn new(port: P, delay: D, config: &FocusConfig) -> Result<Self> {
        config.validate()?;
        let timing = &config.timing;
        Ok(Self {
            bus: SensorBus::new(port, delay),
            map: config.registers,
            channel: CommandChannel::new(config.registers, config.status, timing),
            loader: FirmwareLoader::new(config.expected_chip_id, timing),
            manual: ManualPositionDriver::new(config.registers, config.default_slew, timing),
            calibration: CalibrationEngine::new(timing),
            modes: FocusModeController::new(timing),
            range: FocusRange::full(),
            mapper: DistanceMapper::new(config.distance.clone())?,
            convention: config.convention,
            firmware_ready: false,
        })
    }

    /// Build a driver with the OV5640 defaults.
    pub fn with_defaults(port: P, delay: D) -> Result<Self> {
        Self::new(port, delay, &FocusConfig::default())
    }

    /// Read the chip ID and check it.
    pub fn probe_chip_id(&mut self) -> Result<u16> {
        self.loader.probe_chip_id(&mut self.bus, &self.map)
    }

    /// Probe, upload `image` to the configured base address, and wait for
    /// the co-processor to go idle.
    ///
    /// Auto modes and status queries are refused until this succeeds. A
    /// failed attempt leaves the firmware marked not ready.
    #[instrument(skip(self, image), fields(len = image.len()), err)]
    pub fn init_firmware(&mut self, image: &[u8]) -> Result<()> {
        self.firmware_ready = false;
        self.loader.probe_chip_id(&mut self.bus, &self.map)?;
        self.loader
            .upload(&mut self.bus, &self.channel, image, self.map.firmware_base)?;
        self.firmware_ready = true;
        Ok(())
    }

    /// Whether co-processor firmware is running.
    pub fn is_firmware_ready(&self) -> bool {
        self.firmware_ready
    }

    /// Read the raw firmware / focus status.
    pub fn query_status(&mut self) -> Result<FocusStatus> {
        if !self.firmware_ready {
            return Err(FocusError::NotReady {
                message: "status query needs co-processor firmware".to_string(),
            });
        }
        self.channel.query_status(&mut self.bus)
    }

    /// Set up the VCM driver for manual focus and park the lens at the
    /// default position. Leaves the driver in Manual mode.
    #[instrument(skip(self), err)]
    pub fn init_manual_focus(&mut self) -> Result<()> {
        self.ensure_manual()?;
        self.manual.init(&mut self.bus)
    }

    /// Current mode.
    pub fn mode(&self) -> FocusMode {
        self.modes.mode()
    }

    /// Request a mode change.
    #[instrument(skip(self), err)]
    pub fn set_mode(&mut self, request: FocusRequest) -> Result<Option<FocusPosition>> {
        let ctx = ModeContext {
            bus: &mut self.bus,
            channel: &self.channel,
            manual: &mut self.manual,
            firmware_ready: self.firmware_ready,
        };
        self.modes.apply(ctx, request)
    }

    /// Release the lens.
    pub fn release(&mut self) -> Result<()> {
        self.set_mode(FocusRequest::Release).map(|_| ())
    }

    /// Run one co-processor autofocus pass and return the locked position.
    pub fn single_autofocus(&mut self) -> Result<FocusPosition> {
        self.set_mode(FocusRequest::SingleAuto)?
            .ok_or(FocusError::NotFocused)
    }

    /// Start continuous autofocus.
    pub fn continuous_autofocus(&mut self) -> Result<()> {
        self.set_mode(FocusRequest::ContinuousAuto).map(|_| ())
    }

    /// Move to `position` at the default slew rate, entering Manual if needed.
    pub fn set_position(&mut self, position: FocusPosition) -> Result<FocusPosition> {
        self.ensure_manual()?;
        self.manual.set_position(&mut self.bus, position)
    }

    /// Move to `position` at `slew`, entering Manual if needed.
    pub fn set_position_with_slew(
        &mut self,
        position: FocusPosition,
        slew: SlewRate,
    ) -> Result<FocusPosition> {
        self.ensure_manual()?;
        self.manual.set_position_with_slew(&mut self.bus, position, slew)
    }

    /// Read the position back from the VCM registers; 0 while unpowered.
    pub fn position(&mut self) -> Result<FocusPosition> {
        self.manual.get_position(&mut self.bus)
    }

    /// Last commanded position, without touching the bus.
    pub fn current_position(&self) -> FocusPosition {
        self.manual.current()
    }

    /// Enable or disable actuator power.
    pub fn set_powered(&mut self, enable: bool) -> Result<()> {
        self.manual.set_powered(&mut self.bus, enable)
    }

    /// Whether the actuator is powered.
    pub fn is_powered(&self) -> bool {
        self.manual.is_powered()
    }

    /// Move to the near limit.
    pub fn move_to_near(&mut self) -> Result<FocusPosition> {
        self.ensure_manual()?;
        self.manual.move_to_near(&mut self.bus, &self.range)
    }

    /// Move to the far limit.
    pub fn move_to_far(&mut self) -> Result<FocusPosition> {
        self.ensure_manual()?;
        self.manual.move_to_far(&mut self.bus, &self.range)
    }

    /// Move to the middle of the range.
    pub fn move_to_midpoint(&mut self) -> Result<FocusPosition> {
        self.ensure_manual()?;
        self.manual.move_to_midpoint(&mut self.bus, &self.range)
    }

    /// Move by `steps` logical steps, clamped to the range.
    pub fn step_by(&mut self, steps: i8) -> Result<FocusPosition> {
        self.ensure_manual()?;
        self.manual.step_by(&mut self.bus, &self.range, steps)
    }

    /// Sweep the near end and update the near limit.
    pub fn calibrate_near_limit<M>(&mut self, metric: &mut M) -> Result<FocusPosition>
    where
        M: SharpnessMetric + ?Sized,
    {
        self.ensure_manual()?;
        self.calibration
            .calibrate_near_limit(&mut self.bus, &mut self.manual, &mut self.range, metric)
    }

    /// Sweep the far end and update the far limit.
    pub fn calibrate_far_limit<M>(&mut self, metric: &mut M) -> Result<FocusPosition>
    where
        M: SharpnessMetric + ?Sized,
    {
        self.ensure_manual()?;
        self.calibration
            .calibrate_far_limit(&mut self.bus, &mut self.manual, &mut self.range, metric)
    }

    /// Calibrate both ends, near first.
    pub fn calibrate_range<M>(&mut self, metric: &mut M) -> Result<FocusRange>
    where
        M: SharpnessMetric + ?Sized,
    {
        self.calibrate_near_limit(metric)?;
        self.calibrate_far_limit(metric)?;
        info!(near = self.range.near_limit, far = self.range.far_limit, "Focus range calibrated");
        Ok(self.range)
    }

    /// Refine focus within `window_size * 10` units of the current position.
    pub fn find_optimal_focus<M>(&mut self, metric: &mut M, window_size: u8) -> Result<FocusPosition>
    where
        M: SharpnessMetric + ?Sized,
    {
        self.ensure_manual()?;
        self.calibration.find_optimal_focus(
            &mut self.bus,
            &mut self.manual,
            &self.range,
            metric,
            window_size,
        )
    }

    /// Calibrated range.
    pub fn range(&self) -> FocusRange {
        self.range
    }

    /// Restore a range saved by the caller.
    pub fn set_range(&mut self, range: FocusRange) {
        self.range = FocusRange::new(range.near_limit, range.far_limit);
    }

    /// Map a distance to a raw position for this driver's convention.
    pub fn map_distance(&self, distance_mm: u32) -> FocusPosition {
        self.convention.from_nearness(self.mapper.map(distance_mm))
    }

    /// Map a distance and drive the lens there in Manual mode.
    #[instrument(skip(self), err)]
    pub fn focus_at_distance(&mut self, distance_mm: u32) -> Result<FocusPosition> {
        let target = self.map_distance(distance_mm);
        self.set_position(target)
    }

    /// Distance mapper in use.
    pub fn mapper(&self) -> &DistanceMapper {
        &self.mapper
    }

    /// Position convention in use.
    pub fn convention(&self) -> PositionConvention {
        self.convention
    }

    /// Borrow the register port.
    pub fn port(&self) -> &P {
        self.bus.port()
    }

    /// Borrow the delay source.
    pub fn delay(&self) -> &D {
        self.bus.delay()
    }

    /// Take the port and delay back.
    pub fn into_parts(self) -> (P, D) {
        self.bus.into_parts()
    }

    fn ensure_manual(&mut self) -> Result<()> {
        self.modes
            .enter_manual(&mut self.bus, &self.channel, &mut self.manual, self.firmware_ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockSensor, RecordingDelay};

    fn driver() -> (MockSensor, FocusDriver<MockSensor, RecordingDelay>) {
        let sensor = MockSensor::new();
        let driver = FocusDriver::with_defaults(sensor.clone(), RecordingDelay::default()).unwrap();
        (sensor, driver)
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut config = FocusConfig::default();
        config.timing.ack_retries = 0;
        assert!(FocusDriver::new(MockSensor::new(), RecordingDelay::default(), &config).is_err());
    }

    #[test]
    fn test_status_query_needs_firmware() {
        let (_sensor, mut driver) = driver();
        assert!(driver.query_status().unwrap_err().is_not_ready());

        driver.init_firmware(&[0x02, 0x00]).unwrap();
        assert_eq!(driver.query_status().unwrap(), FocusStatus::Idle);
    }

    #[test]
    fn test_failed_probe_leaves_firmware_not_ready() {
        let (sensor, mut driver) = driver();
        sensor.set_chip_id(0x7670);
        assert!(driver.init_firmware(&[0x02]).is_err());
        assert!(!driver.is_firmware_ready());
        assert!(sensor.writes().is_empty());
    }

    #[test]
    fn test_set_position_enters_manual() {
        let (_sensor, mut driver) = driver();
        assert_eq!(driver.mode(), FocusMode::Released);
        driver.set_position(700).unwrap();
        assert_eq!(driver.mode(), FocusMode::Manual);
        assert_eq!(driver.position().unwrap(), 700);
    }

    #[test]
    fn test_set_range_reorders() {
        let (_sensor, mut driver) = driver();
        driver.set_range(FocusRange {
            near_limit: 800,
            far_limit: 200,
        });
        assert_eq!(driver.range(), FocusRange::new(200, 800));
    }

    #[test]
    fn test_map_distance_applies_convention() {
        let (_sensor, driver) = driver();
        // Default table maps 60 mm to nearness 850; code 0 is near.
        assert_eq!(driver.map_distance(60), 1023 - 850);

        let config = FocusConfig {
            convention: PositionConvention::ZeroIsFar,
            ..FocusConfig::default()
        };
        let far = FocusDriver::new(MockSensor::new(), RecordingDelay::default(), &config).unwrap();
        assert_eq!(far.map_distance(60), 850);
    }
}
