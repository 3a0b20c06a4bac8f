//! Focus mode state machine.
//!
//! ```text
//!            +-----------> Manual --------+
//!            |                            |
//!  Released -+-----------> SingleAuto ----+--> Released
//!            |                            |
//!            +-----------> ContinuousAuto +
//! ```
//!
//! There is no direct edge between the three active modes. Entering either
//! autofocus mode always sends the release command first, even from
//! Released. Entering Manual releases only when leaving another active mode.
//! Re-targeting the lens while already in Manual is a move, not a transition.

use std::fmt;

use tracing::{debug, info, instrument, warn};

use crate::command::{CommandChannel, CommandFrame, FocusStatus};
use crate::error::{FocusError, Result};
use crate::port::{RegisterPort, SensorBus};
use crate::position::{FocusPosition, ManualPositionDriver, SlewRate};
use crate::timing::{Delay, TimingConfig};

/// Current focus mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FocusMode {
    /// Lens released, nothing driving it
    #[default]
    Released,
    /// Lens driven directly through the VCM registers
    Manual,
    /// One co-processor autofocus run was triggered
    SingleAuto,
    /// Co-processor tracks focus continuously
    ContinuousAuto,
}

impl fmt::Display for FocusMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Released => write!(f, "released"),
            Self::Manual => write!(f, "manual"),
            Self::SingleAuto => write!(f, "single-auto"),
            Self::ContinuousAuto => write!(f, "continuous-auto"),
        }
    }
}

/// A mode-set request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusRequest {
    /// Release the lens
    Release,
    /// Drive to a position; `None` uses the driver's default slew rate
    Manual {
        /// Target position (saturated to the actuator span)
        position: FocusPosition,
        /// Optional slew override
        slew: Option<SlewRate>,
    },
    /// Run one autofocus pass and report the achieved position
    SingleAuto,
    /// Start continuous autofocus
    ContinuousAuto,
}

impl FocusRequest {
    /// Mode reached when the request succeeds.
    pub fn target_mode(&self) -> FocusMode {
        match self {
            Self::Release => FocusMode::Released,
            Self::Manual { .. } => FocusMode::Manual,
            Self::SingleAuto => FocusMode::SingleAuto,
            Self::ContinuousAuto => FocusMode::ContinuousAuto,
        }
    }
}

/// Owner of the focus mode; every change goes through [`Self::apply`].
#[derive(Debug, Clone)]
pub struct FocusModeController {
    mode: FocusMode,
    single_af_polls: u32,
    single_af_poll_ms: u32,
}

/// Collaborators a transition acts on.
pub struct ModeContext<'a, P, D> {
    /// Register transport
    pub bus: &'a mut SensorBus<P, D>,
    /// Co-processor command channel
    pub channel: &'a CommandChannel,
    /// Manual actuator driver
    pub manual: &'a mut ManualPositionDriver,
    /// Whether co-processor firmware is running
    pub firmware_ready: bool,
}

impl FocusModeController {
    /// Start in [`FocusMode::Released`].
    pub fn new(timing: &TimingConfig) -> Self {
        Self {
            mode: FocusMode::Released,
            single_af_polls: timing.single_af_polls,
            single_af_poll_ms: timing.single_af_poll_ms,
        }
    }

    /// Current mode.
    pub fn mode(&self) -> FocusMode {
        self.mode
    }

    /// Run the entry action for `request`.
    ///
    /// Returns the lens position for Manual and SingleAuto requests. When an
    /// entry action fails after the implicit release, the mode stays
    /// Released; a SingleAuto run that was triggered stays in SingleAuto.
    #[instrument(skip(self, ctx), fields(from = %self.mode), err)]
    pub fn apply<P: RegisterPort, D: Delay>(
        &mut self,
        ctx: ModeContext<'_, P, D>,
        request: FocusRequest,
    ) -> Result<Option<FocusPosition>> {
        let ModeContext {
            bus,
            channel,
            manual,
            firmware_ready,
        } = ctx;

        match request {
            FocusRequest::Release => {
                self.release(bus, channel, manual, firmware_ready)?;
                Ok(None)
            }
            FocusRequest::Manual { position, slew } => {
                self.enter_manual(bus, channel, manual, firmware_ready)?;
                let slew = slew.unwrap_or(manual.default_slew());
                manual.set_position_with_slew(bus, position, slew).map(Some)
            }
            FocusRequest::SingleAuto => {
                require_firmware(firmware_ready, "single autofocus")?;
                self.release(bus, channel, manual, firmware_ready)?;
                self.run_single(bus, channel, manual).map(Some)
            }
            FocusRequest::ContinuousAuto => {
                require_firmware(firmware_ready, "continuous autofocus")?;
                self.release(bus, channel, manual, firmware_ready)?;
                channel.send(bus, &CommandFrame::continuous())?;
                self.mode = FocusMode::ContinuousAuto;
                info!("Continuous autofocus running");
                Ok(None)
            }
        }
    }

    /// Enter Manual without moving; releases first unless already Manual.
    pub fn enter_manual<P: RegisterPort, D: Delay>(
        &mut self,
        bus: &mut SensorBus<P, D>,
        channel: &CommandChannel,
        manual: &mut ManualPositionDriver,
        firmware_ready: bool,
    ) -> Result<()> {
        match self.mode {
            FocusMode::Manual => return Ok(()),
            FocusMode::Released => {}
            FocusMode::SingleAuto | FocusMode::ContinuousAuto => {
                self.release(bus, channel, manual, firmware_ready)?;
            }
        }
        self.mode = FocusMode::Manual;
        debug!("Manual focus engaged");
        Ok(())
    }

    fn release<P: RegisterPort, D: Delay>(
        &mut self,
        bus: &mut SensorBus<P, D>,
        channel: &CommandChannel,
        manual: &mut ManualPositionDriver,
        firmware_ready: bool,
    ) -> Result<()> {
        if self.mode == FocusMode::Manual && manual.is_powered() {
            manual.set_powered(bus, false)?;
        }
        if firmware_ready {
            channel.send(bus, &CommandFrame::release())?;
        }
        self.mode = FocusMode::Released;
        debug!("Focus released");
        Ok(())
    }

    fn run_single<P: RegisterPort, D: Delay>(
        &mut self,
        bus: &mut SensorBus<P, D>,
        channel: &CommandChannel,
        manual: &mut ManualPositionDriver,
    ) -> Result<FocusPosition> {
        channel.send(bus, &CommandFrame::trigger_single())?;
        self.mode = FocusMode::SingleAuto;

        let codes = *channel.codes();
        let raw = channel.wait_for_status(
            bus,
            channel.map().fw_status,
            |value| value == codes.focused || value == codes.not_focused,
            self.single_af_polls,
            self.single_af_poll_ms,
            "single autofocus",
        )?;

        match FocusStatus::decode(raw, &codes) {
            FocusStatus::Focused => {
                let position = manual.read_raw_position(bus)?;
                info!(position, "Single autofocus locked");
                Ok(position)
            }
            status => {
                warn!(?status, "Single autofocus finished without lock");
                Err(FocusError::NotFocused)
            }
        }
    }
}

fn require_firmware(firmware_ready: bool, what: &str) -> Result<()> {
    if firmware_ready {
        Ok(())
    } else {
        Err(FocusError::NotReady {
            message: format!("{what} needs co-processor firmware; run init_firmware first"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{AfBehavior, MockSensor, RecordingDelay};
    use crate::registers::{RegisterMap, StatusCodes};

    struct Bench {
        sensor: MockSensor,
        bus: SensorBus<MockSensor, RecordingDelay>,
        channel: CommandChannel,
        manual: ManualPositionDriver,
        modes: FocusModeController,
    }

    impl Bench {
        fn new() -> Self {
            let timing = TimingConfig::default();
            let sensor = MockSensor::new();
            Self {
                bus: SensorBus::new(sensor.clone(), RecordingDelay::default()),
                channel: CommandChannel::new(RegisterMap::default(), StatusCodes::default(), &timing),
                manual: ManualPositionDriver::new(RegisterMap::default(), SlewRate::default(), &timing),
                modes: FocusModeController::new(&timing),
                sensor,
            }
        }

        fn apply(&mut self, request: FocusRequest, firmware_ready: bool) -> Result<Option<FocusPosition>> {
            let ctx = ModeContext {
                bus: &mut self.bus,
                channel: &self.channel,
                manual: &mut self.manual,
                firmware_ready,
            };
            self.modes.apply(ctx, request)
        }
    }

    #[test]
    fn test_manual_without_firmware() {
        let mut b = Bench::new();
        let pos = b
            .apply(FocusRequest::Manual { position: 300, slew: None }, false)
            .unwrap();
        assert_eq!(pos, Some(300));
        assert_eq!(b.modes.mode(), FocusMode::Manual);

        b.apply(FocusRequest::Release, false).unwrap();
        assert_eq!(b.modes.mode(), FocusMode::Released);
        assert!(!b.manual.is_powered());
        assert!(b.sensor.opcodes().is_empty());
    }

    #[test]
    fn test_auto_modes_need_firmware() {
        let mut b = Bench::new();
        let err = b.apply(FocusRequest::ContinuousAuto, false).unwrap_err();
        assert!(err.is_not_ready());
        let err = b.apply(FocusRequest::SingleAuto, false).unwrap_err();
        assert!(err.is_not_ready());
        assert_eq!(b.modes.mode(), FocusMode::Released);
    }

    #[test]
    fn test_manual_to_continuous_releases_first() {
        let mut b = Bench::new();
        b.apply(FocusRequest::Manual { position: 600, slew: None }, true)
            .unwrap();
        b.apply(FocusRequest::ContinuousAuto, true).unwrap();

        assert_eq!(b.modes.mode(), FocusMode::ContinuousAuto);
        assert_eq!(b.sensor.opcodes(), vec![0x08, 0x04]);
        assert!(!b.manual.is_powered());
    }

    #[test]
    fn test_single_auto_reports_locked_position() {
        let mut b = Bench::new();
        b.sensor.set_af_behavior(AfBehavior::LockAfter { polls: 5, position: 444 });

        let pos = b.apply(FocusRequest::SingleAuto, true).unwrap();

        assert_eq!(pos, Some(444));
        assert_eq!(b.modes.mode(), FocusMode::SingleAuto);
        assert_eq!(b.sensor.opcodes(), vec![0x08, 0x03]);
        assert_eq!(b.manual.current(), 444);
    }

    #[test]
    fn test_continuous_from_released_still_releases() {
        let mut b = Bench::new();

        b.apply(FocusRequest::ContinuousAuto, true).unwrap();

        assert_eq!(b.modes.mode(), FocusMode::ContinuousAuto);
        assert_eq!(b.sensor.opcodes(), vec![0x08, 0x04]);
    }

    #[test]
    fn test_single_auto_not_focused() {
        let mut b = Bench::new();
        b.sensor.set_af_behavior(AfBehavior::FailAfter { polls: 2 });
        let err = b.apply(FocusRequest::SingleAuto, true).unwrap_err();
        assert!(matches!(err, FocusError::NotFocused));
    }

    #[test]
    fn test_single_auto_timeout_after_poll_ceiling() {
        let mut b = Bench::new();
        b.sensor.set_af_behavior(AfBehavior::Never);

        let err = b.apply(FocusRequest::SingleAuto, true).unwrap_err();

        assert!(matches!(
            err,
            FocusError::Timeout { operation: "single autofocus", attempts: 50 }
        ));
    }

    #[test]
    fn test_manual_retarget_is_not_a_transition() {
        let mut b = Bench::new();
        b.apply(FocusRequest::Manual { position: 100, slew: None }, true)
            .unwrap();
        b.apply(
            FocusRequest::Manual { position: 200, slew: Some(SlewRate::Direct) },
            true,
        )
        .unwrap();
        assert!(b.sensor.opcodes().is_empty());
        assert_eq!(b.sensor.peek(0x3602) & 0x0F, SlewRate::Direct.code());
    }
}
