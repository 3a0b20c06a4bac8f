//! Register map of the autofocus co-processor and the VCM driver.
//!
//! Addresses and status codes default to the OV5640 layout. Other module
//! variants relocate some of them, so the maps are plain data loaded from
//! configuration. Bit layouts of the VCM position pair are fixed constants.

use serde::{Deserialize, Serialize};

/// Number of parameter registers following the command/ack pair.
pub const COMMAND_PARAM_COUNT: usize = 5;

/// Value written to the MCU reset register to hold the co-processor in reset.
pub const MCU_RESET_HOLD: u8 = 0x20;
/// Value written to the MCU reset register to let the co-processor run.
pub const MCU_RESET_RUN: u8 = 0x00;
/// Value written to the ack register to arm a command.
pub const ACK_ARMED: u8 = 0x01;

// VCM control 1: bit 7 power-down, bits 5..0 carry position bits 9..4.
/// Power-down flag in VCM control 1.
pub const VCM_POWER_DOWN: u8 = 0x80;
/// Position-high field mask in VCM control 1.
pub const VCM_HIGH_MASK: u8 = 0x3F;
/// Right shift that extracts position bits 9..4.
pub const VCM_HIGH_SHIFT: u16 = 4;

// VCM control 0: bits 7..4 carry position bits 3..0, bits 3..0 the slew code.
/// Position-low nibble of the 10-bit position.
pub const VCM_LOW_MASK: u16 = 0x0F;
/// Left shift placing the low nibble in bits 7..4.
pub const VCM_LOW_SHIFT: u8 = 4;
/// Slew-code field mask in VCM control 0.
pub const VCM_SLEW_MASK: u8 = 0x0F;

/// VCM clock divider high byte (1200 at 24 MHz input gives 20 kHz).
pub const VCM_CLOCK_DIV_HIGH: u8 = 0x04;
/// VCM clock divider low byte.
pub const VCM_CLOCK_DIV_LOW: u8 = 0xB0;
/// VCM drive current (1.0x).
pub const VCM_CURRENT_1X: u8 = 0x04;

/// Co-processor opcodes written to the command-main register.
pub mod opcode {
    /// Trigger one autofocus run.
    pub const TRIGGER_SINGLE: u8 = 0x03;
    /// Enter continuous autofocus.
    pub const CONTINUOUS: u8 = 0x04;
    /// Release the lens and stop autofocus.
    pub const RELEASE: u8 = 0x08;
    /// No command.
    pub const NONE: u8 = 0x00;
}

/// Register addresses used by the focus stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegisterMap {
    /// Co-processor reset/run control
    pub mcu_reset: u16,
    /// Chip ID, big-endian word (high byte first)
    pub chip_id: u16,
    /// Command opcode (writing it triggers execution)
    pub cmd_main: u16,
    /// Command acknowledge, cleared by the co-processor
    pub cmd_ack: u16,
    /// First of five consecutive parameter registers
    pub cmd_para0: u16,
    /// Firmware / focus status
    pub fw_status: u16,
    /// First address of the firmware image
    pub firmware_base: u16,
    /// VCM control 0: position low nibble + slew code
    pub vcm_control0: u16,
    /// VCM control 1: power-down flag + position high bits
    pub vcm_control1: u16,
    /// VCM control 2: clock divider low byte
    pub vcm_control2: u16,
    /// VCM control 3: clock divider high byte
    pub vcm_control3: u16,
    /// VCM control 4: drive current
    pub vcm_control4: u16,
}

impl RegisterMap {
    /// Address of parameter register `index` (0-based).
    pub fn cmd_param(&self, index: usize) -> u16 {
        self.cmd_para0.wrapping_add(index as u16)
    }
}

impl Default for RegisterMap {
    fn default() -> Self {
        Self {
            mcu_reset: 0x3000,
            chip_id: 0x300A,
            cmd_main: 0x3022,
            cmd_ack: 0x3023,
            cmd_para0: 0x3024,
            fw_status: 0x3029,
            firmware_base: 0x8000,
            vcm_control0: 0x3602,
            vcm_control1: 0x3603,
            vcm_control2: 0x3604,
            vcm_control3: 0x3605,
            vcm_control4: 0x3606,
        }
    }
}

/// Status codes reported through the firmware-status register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusCodes {
    /// Image written, co-processor not yet started
    pub firmware_loaded: u8,
    /// Co-processor booting
    pub startup: u8,
    /// Idle and ready for commands
    pub idle: u8,
    /// Autofocus running
    pub focusing: u8,
    /// Autofocus locked
    pub focused: u8,
    /// Autofocus finished without lock
    pub not_focused: u8,
}

impl Default for StatusCodes {
    fn default() -> Self {
        Self {
            firmware_loaded: 0x7F,
            startup: 0x7E,
            idle: 0x70,
            focusing: 0x00,
            focused: 0x10,
            not_focused: 0x20,
        }
    }
}

impl StatusCodes {
    /// Check that every code is distinct.
    pub fn all_distinct(&self) -> bool {
        let codes = [
            self.firmware_loaded,
            self.startup,
            self.idle,
            self.focusing,
            self.focused,
            self.not_focused,
        ];
        codes
            .iter()
            .enumerate()
            .all(|(i, a)| codes[i + 1..].iter().all(|b| a != b))
    }
}
