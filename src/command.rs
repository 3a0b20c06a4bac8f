//! Command/parameter/acknowledge handshake with the AF co-processor.
//!
//! A command is a [`CommandFrame`]: the ack register is armed, up to five
//! parameter bytes are written, and the opcode goes last because writing the
//! command-main register starts execution. The co-processor clears the ack
//! register once it has consumed the command. Every wait is a bounded
//! busy-poll with a fixed interval; there is no event path.

use tracing::{debug, warn};

use crate::error::{FocusError, Result};
use crate::port::{RegisterPort, SensorBus};
use crate::registers::{opcode, RegisterMap, StatusCodes, ACK_ARMED, COMMAND_PARAM_COUNT};
use crate::timing::{Delay, TimingConfig};

/// One co-processor request. Built per request and dropped after the ack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandFrame {
    opcode: u8,
    params: [u8; COMMAND_PARAM_COUNT],
    param_len: usize,
}

impl CommandFrame {
    /// A frame with no parameters.
    pub fn new(opcode: u8) -> Self {
        Self {
            opcode,
            params: [0; COMMAND_PARAM_COUNT],
            param_len: 0,
        }
    }

    /// A frame carrying up to five parameter bytes.
    pub fn with_params(opcode: u8, params: &[u8]) -> Result<Self> {
        if params.len() > COMMAND_PARAM_COUNT {
            return Err(FocusError::InvalidConfig {
                message: format!(
                    "command {:#04x} has {} parameters, at most {} fit",
                    opcode,
                    params.len(),
                    COMMAND_PARAM_COUNT
                ),
            });
        }
        let mut frame = Self::new(opcode);
        frame.params[..params.len()].copy_from_slice(params);
        frame.param_len = params.len();
        Ok(frame)
    }

    /// Trigger one autofocus run.
    pub fn trigger_single() -> Self {
        Self::new(opcode::TRIGGER_SINGLE)
    }

    /// Select continuous autofocus.
    pub fn continuous() -> Self {
        Self::new(opcode::CONTINUOUS)
    }

    /// Release the lens.
    pub fn release() -> Self {
        Self::new(opcode::RELEASE)
    }

    /// Opcode byte.
    pub fn opcode(&self) -> u8 {
        self.opcode
    }

    /// Parameter bytes actually carried.
    pub fn params(&self) -> &[u8] {
        &self.params[..self.param_len]
    }
}

/// Decoded firmware / focus status byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusStatus {
    /// Image loaded, co-processor not started
    FirmwareLoaded,
    /// Co-processor booting
    Startup,
    /// Idle, accepting commands
    Idle,
    /// Autofocus in progress
    Focusing,
    /// Autofocus locked
    Focused,
    /// Autofocus gave up without lock
    NotFocused,
    /// Any code not in the status table
    Unknown(u8),
}

impl FocusStatus {
    /// Decode a raw status byte against the configured codes.
    pub fn decode(raw: u8, codes: &StatusCodes) -> Self {
        match raw {
            r if r == codes.firmware_loaded => Self::FirmwareLoaded,
            r if r == codes.startup => Self::Startup,
            r if r == codes.idle => Self::Idle,
            r if r == codes.focusing => Self::Focusing,
            r if r == codes.focused => Self::Focused,
            r if r == codes.not_focused => Self::NotFocused,
            other => Self::Unknown(other),
        }
    }

    /// True once the co-processor has booted and accepts commands.
    pub fn is_running(self) -> bool {
        matches!(
            self,
            Self::Idle | Self::Focusing | Self::Focused | Self::NotFocused
        )
    }
}

/// Handshake engine over the command register block.
#[derive(Debug, Clone)]
pub struct CommandChannel {
    map: RegisterMap,
    codes: StatusCodes,
    ack_retries: u32,
    ack_poll_ms: u32,
}

impl CommandChannel {
    /// Build a channel for the given register layout and timing.
    pub fn new(map: RegisterMap, codes: StatusCodes, timing: &TimingConfig) -> Self {
        Self {
            map,
            codes,
            ack_retries: timing.ack_retries,
            ack_poll_ms: timing.ack_poll_ms,
        }
    }

    /// Register layout in use.
    pub fn map(&self) -> &RegisterMap {
        &self.map
    }

    /// Status codes in use.
    pub fn codes(&self) -> &StatusCodes {
        &self.codes
    }

    /// Write a frame and wait for the co-processor to clear the ack.
    ///
    /// Performs exactly `ack_retries` ack reads before reporting
    /// [`FocusError::Timeout`]. A transport failure aborts immediately.
    /// Nothing is resent; the caller may retry.
    pub fn send<P: RegisterPort, D: Delay>(
        &self,
        bus: &mut SensorBus<P, D>,
        frame: &CommandFrame,
    ) -> Result<()> {
        debug!(
            opcode = format_args!("{:#04x}", frame.opcode()),
            params = ?frame.params(),
            "Sending co-processor command"
        );

        bus.write(self.map.cmd_ack, ACK_ARMED)?;
        for (index, value) in frame.params().iter().enumerate() {
            bus.write(self.map.cmd_param(index), *value)?;
        }
        bus.write(self.map.cmd_main, frame.opcode())?;

        self.wait_for_status(
            bus,
            self.map.cmd_ack,
            |ack| ack == 0,
            self.ack_retries,
            self.ack_poll_ms,
            "command ack",
        )
        .map(|_| ())
    }

    /// Poll `register` until `predicate` accepts its value.
    ///
    /// Reads at most `max_retries` times with `interval_ms` between reads and
    /// returns the accepted value. `max_retries == 0` fails without reading.
    pub fn wait_for_status<P, D, F>(
        &self,
        bus: &mut SensorBus<P, D>,
        register: u16,
        mut predicate: F,
        max_retries: u32,
        interval_ms: u32,
        operation: &'static str,
    ) -> Result<u8>
    where
        P: RegisterPort,
        D: Delay,
        F: FnMut(u8) -> bool,
    {
        for attempt in 0..max_retries {
            let value = bus.read(register)?;
            if predicate(value) {
                debug!(operation, attempt, value = format_args!("{value:#04x}"), "Poll satisfied");
                return Ok(value);
            }
            if attempt + 1 < max_retries {
                bus.delay_ms(interval_ms);
            }
        }

        warn!(
            operation,
            register = format_args!("{register:#06x}"),
            attempts = max_retries,
            "Poll ceiling exhausted"
        );
        Err(FocusError::Timeout {
            operation,
            attempts: max_retries,
        })
    }

    /// Read and decode the firmware status register once.
    pub fn query_status<P: RegisterPort, D: Delay>(
        &self,
        bus: &mut SensorBus<P, D>,
    ) -> Result<FocusStatus> {
        let raw = bus.read(self.map.fw_status)?;
        Ok(FocusStatus::decode(raw, &self.codes))
    }
}
