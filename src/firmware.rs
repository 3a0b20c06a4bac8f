//! Chip-ID probe and co-processor firmware upload.
//!
//! Upload is one-shot: the MCU is held in reset, the whole image is written
//! byte by byte from the base address, the command block is cleared, and the
//! MCU is released. The loader then polls the status register until the
//! co-processor reports idle. Calling it again re-uploads everything.

use tracing::{debug, info, instrument};

use crate::command::CommandChannel;
use crate::error::{FocusError, Result};
use crate::port::{RegisterPort, SensorBus};
use crate::registers::{RegisterMap, COMMAND_PARAM_COUNT, MCU_RESET_HOLD, MCU_RESET_RUN};
use crate::timing::{Delay, TimingConfig};

/// One past the highest register address.
const ADDRESS_SPACE: usize = 0x1_0000;

/// Chip ID of the OV5640.
pub const OV5640_CHIP_ID: u16 = 0x5640;

/// Firmware upload and startup checks.
#[derive(Debug, Clone)]
pub struct FirmwareLoader {
    expected_chip_id: u16,
    retries: u32,
    poll_ms: u32,
}

impl FirmwareLoader {
    /// Create a loader expecting `expected_chip_id` at probe time.
    pub fn new(expected_chip_id: u16, timing: &TimingConfig) -> Self {
        Self {
            expected_chip_id,
            retries: timing.firmware_retries,
            poll_ms: timing.firmware_poll_ms,
        }
    }

    /// Chip ID the probe accepts.
    pub fn expected_chip_id(&self) -> u16 {
        self.expected_chip_id
    }

    /// Read the chip ID word and compare it against the expected value.
    #[instrument(skip_all, err)]
    pub fn probe_chip_id<P: RegisterPort, D: Delay>(
        &self,
        bus: &mut SensorBus<P, D>,
        map: &RegisterMap,
    ) -> Result<u16> {
        let actual = bus.read_word(map.chip_id)?;
        if actual != self.expected_chip_id {
            return Err(FocusError::DeviceMismatch {
                expected: self.expected_chip_id,
                actual,
            });
        }
        debug!(chip_id = format_args!("{actual:#06x}"), "Chip ID verified");
        Ok(actual)
    }

    /// Write `image` from `base` and wait for the co-processor to go idle.
    ///
    /// Fails before touching the bus if the image is empty or would run past
    /// the end of the 16-bit address space.
    #[instrument(skip(self, bus, channel, image), fields(len = image.len()), err)]
    pub fn upload<P: RegisterPort, D: Delay>(
        &self,
        bus: &mut SensorBus<P, D>,
        channel: &CommandChannel,
        image: &[u8],
        base: u16,
    ) -> Result<()> {
        if image.is_empty() {
            return Err(FocusError::InvalidConfig {
                message: "firmware image is empty".to_string(),
            });
        }
        if usize::from(base) + image.len() > ADDRESS_SPACE {
            return Err(FocusError::FirmwareTooLarge {
                len: image.len(),
                base,
            });
        }

        let map = *channel.map();
        let codes = *channel.codes();

        bus.write(map.mcu_reset, MCU_RESET_HOLD)?;

        for (address, byte) in (base..=u16::MAX).zip(image) {
            bus.write(address, *byte)?;
        }
        debug!(bytes = image.len(), "Firmware image written");

        bus.write(map.cmd_main, 0)?;
        bus.write(map.cmd_ack, 0)?;
        for index in 0..COMMAND_PARAM_COUNT {
            bus.write(map.cmd_param(index), 0)?;
        }
        bus.write(map.fw_status, codes.firmware_loaded)?;
        bus.write(map.mcu_reset, MCU_RESET_RUN)?;

        let idle = codes.idle;
        channel.wait_for_status(
            bus,
            map.fw_status,
            |status| status == idle,
            self.retries,
            self.poll_ms,
            "firmware ready",
        )?;

        info!(bytes = image.len(), "Co-processor firmware running");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{BootBehavior, MockSensor, RecordingDelay};
    use crate::registers::StatusCodes;

    fn setup() -> (MockSensor, SensorBus<MockSensor, RecordingDelay>, CommandChannel, FirmwareLoader) {
        let timing = TimingConfig::default();
        let sensor = MockSensor::new();
        (
            sensor.clone(),
            SensorBus::new(sensor, RecordingDelay::default()),
            CommandChannel::new(RegisterMap::default(), StatusCodes::default(), &timing),
            FirmwareLoader::new(OV5640_CHIP_ID, &timing),
        )
    }

    #[test]
    fn test_probe_accepts_ov5640() {
        let (_sensor, mut bus, _channel, loader) = setup();
        assert_eq!(loader.probe_chip_id(&mut bus, &RegisterMap::default()).unwrap(), 0x5640);
    }

    #[test]
    fn test_probe_rejects_other_chip() {
        let (sensor, mut bus, _channel, loader) = setup();
        sensor.set_chip_id(0x2642);
        let err = loader.probe_chip_id(&mut bus, &RegisterMap::default()).unwrap_err();
        assert!(matches!(
            err,
            FocusError::DeviceMismatch { expected: 0x5640, actual: 0x2642 }
        ));
    }

    #[test]
    fn test_upload_sequence() {
        let (sensor, mut bus, channel, loader) = setup();
        let image = [0x02, 0x0F, 0xD6, 0x02];

        loader.upload(&mut bus, &channel, &image, 0x8000).unwrap();

        let writes = sensor.writes();
        assert_eq!(writes[0], (0x3000, 0x20));
        assert_eq!(&writes[1..5], &[(0x8000, 0x02), (0x8001, 0x0F), (0x8002, 0xD6), (0x8003, 0x02)]);
        assert!(writes.contains(&(0x3029, 0x7F)));
        assert_eq!(writes.last(), Some(&(0x3000, 0x00)));
        assert_eq!(sensor.peek(0x3029), 0x70);
        assert!(sensor.opcodes().is_empty());
    }

    #[test]
    fn test_upload_rejects_oversized_image_before_writing() {
        let (sensor, mut bus, channel, loader) = setup();
        let image = vec![0xAA; 0x20];

        let err = loader.upload(&mut bus, &channel, &image, 0xFFF0).unwrap_err();

        assert!(matches!(err, FocusError::FirmwareTooLarge { len: 0x20, base: 0xFFF0 }));
        assert!(sensor.writes().is_empty());
    }

    #[test]
    fn test_upload_fills_to_last_address() {
        let (sensor, mut bus, channel, loader) = setup();
        let image = vec![0x55; 0x10];
        loader.upload(&mut bus, &channel, &image, 0xFFF0).unwrap();
        assert_eq!(sensor.peek(0xFFFF), 0x55);
    }

    #[test]
    fn test_upload_rejects_empty_image() {
        let (_sensor, mut bus, channel, loader) = setup();
        assert!(loader.upload(&mut bus, &channel, &[], 0x8000).is_err());
    }

    #[test]
    fn test_upload_times_out_when_boot_hangs() {
        let (sensor, mut bus, channel, loader) = setup();
        sensor.set_boot_behavior(BootBehavior::Hang);

        let err = loader.upload(&mut bus, &channel, &[0x01], 0x8000).unwrap_err();

        assert!(matches!(
            err,
            FocusError::Timeout { operation: "firmware ready", attempts: 1000 }
        ));
    }

    #[test]
    fn test_upload_aborts_on_write_failure() {
        let (sensor, mut bus, channel, loader) = setup();
        sensor.fail_writes_to(0x8001);

        let err = loader.upload(&mut bus, &channel, &[1, 2, 3], 0x8000).unwrap_err();

        assert!(err.is_register());
        assert!(!sensor.writes().contains(&(0x8002, 3)));
    }
}
