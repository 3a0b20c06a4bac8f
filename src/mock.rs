//! Simulated sensor for tests and the bench binary.
//!
//! [`MockSensor`] is a register file that reacts like the AF co-processor:
//! it clears the ack after a command, boots after the MCU is released, and
//! runs a scripted single-shot autofocus. Clones share state, so a test can
//! hand one clone to the driver and inspect traffic through another.
//!
//! [`RecordingDelay`] replaces wall-clock sleeps with a tally.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::calibration::{SharpnessMetric, SharpnessScore};
use crate::error::{FocusError, Result};
use crate::port::RegisterPort;
use crate::position::{decode_position, encode_position, FocusPosition, SlewRate};
use crate::registers::{opcode, RegisterMap, StatusCodes, MCU_RESET_HOLD, MCU_RESET_RUN, VCM_POWER_DOWN};
use crate::timing::Delay;

/// How the co-processor acknowledges commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckBehavior {
    /// Ack reads zero as soon as the opcode is written
    #[default]
    Immediate,
    /// Ack stays set for this many reads, then clears
    ClearAfter(u32),
    /// Ack never clears
    Stuck,
}

/// Outcome of a single-shot autofocus run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfBehavior {
    /// Report focusing for `polls` status reads, then lock at `position`
    LockAfter {
        /// Status reads before lock
        polls: u32,
        /// Lens position reported on lock
        position: FocusPosition,
    },
    /// Report focusing for `polls` status reads, then give up
    FailAfter {
        /// Status reads before giving up
        polls: u32,
    },
    /// Focus forever
    Never,
}

impl Default for AfBehavior {
    fn default() -> Self {
        Self::LockAfter {
            polls: 3,
            position: 512,
        }
    }
}

/// How the co-processor boots after the MCU is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootBehavior {
    /// Report startup for this many status reads, then idle
    IdleAfter(u32),
    /// Stay in startup forever
    Hang,
}

impl Default for BootBehavior {
    fn default() -> Self {
        Self::IdleAfter(3)
    }
}

#[derive(Debug)]
struct MockState {
    map: RegisterMap,
    codes: StatusCodes,
    regs: HashMap<u16, u8>,
    reads: HashMap<u16, u32>,
    writes: Vec<(u16, u8)>,
    opcodes: Vec<u8>,
    fail_reads: HashSet<u16>,
    fail_writes: HashSet<u16>,
    ack: AckBehavior,
    ack_pending: Option<u32>,
    af: AfBehavior,
    af_pending: Option<u32>,
    boot: BootBehavior,
    boot_pending: Option<u32>,
    mcu_held: bool,
}

impl MockState {
    fn new(map: RegisterMap, codes: StatusCodes) -> Self {
        let mut regs = HashMap::new();
        regs.insert(map.chip_id, 0x56);
        regs.insert(map.chip_id.wrapping_add(1), 0x40);
        regs.insert(map.vcm_control1, VCM_POWER_DOWN);
        regs.insert(map.fw_status, codes.firmware_loaded);
        Self {
            map,
            codes,
            regs,
            reads: HashMap::new(),
            writes: Vec::new(),
            opcodes: Vec::new(),
            fail_reads: HashSet::new(),
            fail_writes: HashSet::new(),
            ack: AckBehavior::default(),
            ack_pending: None,
            af: AfBehavior::default(),
            af_pending: None,
            boot: BootBehavior::default(),
            boot_pending: None,
            mcu_held: false,
        }
    }

    fn get(&self, address: u16) -> u8 {
        self.regs.get(&address).copied().unwrap_or(0)
    }

    fn set(&mut self, address: u16, value: u8) {
        self.regs.insert(address, value);
    }

    fn on_read(&mut self, address: u16) {
        if address == self.map.cmd_ack {
            if let Some(remaining) = self.ack_pending {
                if remaining == 0 {
                    self.ack_pending = None;
                    self.set(address, 0);
                } else {
                    self.ack_pending = Some(remaining - 1);
                }
            }
        }

        if address == self.map.fw_status {
            if let Some(remaining) = self.boot_pending {
                if remaining == 0 {
                    self.boot_pending = None;
                    self.set(address, self.codes.idle);
                } else {
                    self.boot_pending = Some(remaining - 1);
                }
            } else if let Some(remaining) = self.af_pending {
                if remaining == 0 {
                    self.af_pending = None;
                    self.finish_af();
                } else {
                    self.af_pending = Some(remaining - 1);
                }
            }
        }
    }

    fn finish_af(&mut self) {
        match self.af {
            AfBehavior::LockAfter { position, .. } => {
                let (control1, control0) = encode_position(position, SlewRate::Direct);
                self.set(self.map.vcm_control1, control1);
                self.set(self.map.vcm_control0, control0);
                self.set(self.map.fw_status, self.codes.focused);
            }
            AfBehavior::FailAfter { .. } => self.set(self.map.fw_status, self.codes.not_focused),
            AfBehavior::Never => {}
        }
    }

    fn on_write(&mut self, address: u16, value: u8) {
        if address == self.map.cmd_main {
            if value == opcode::NONE {
                return;
            }
            self.opcodes.push(value);
            self.execute(value);
        } else if address == self.map.mcu_reset {
            if value == MCU_RESET_HOLD {
                self.mcu_held = true;
            } else if value == MCU_RESET_RUN && self.mcu_held {
                self.mcu_held = false;
                self.set(self.map.fw_status, self.codes.startup);
                self.boot_pending = match self.boot {
                    BootBehavior::IdleAfter(reads) => Some(reads),
                    BootBehavior::Hang => None,
                };
            }
        }
    }

    fn execute(&mut self, op: u8) {
        match self.ack {
            AckBehavior::Immediate => self.set(self.map.cmd_ack, 0),
            AckBehavior::ClearAfter(reads) => self.ack_pending = Some(reads),
            AckBehavior::Stuck => {}
        }

        match op {
            opcode::TRIGGER_SINGLE => {
                self.set(self.map.fw_status, self.codes.focusing);
                self.af_pending = match self.af {
                    AfBehavior::LockAfter { polls, .. } | AfBehavior::FailAfter { polls } => Some(polls),
                    AfBehavior::Never => None,
                };
            }
            opcode::CONTINUOUS => {
                self.af_pending = None;
                self.set(self.map.fw_status, self.codes.focusing);
            }
            opcode::RELEASE => {
                self.af_pending = None;
                self.set(self.map.fw_status, self.codes.idle);
            }
            _ => {}
        }
    }
}

/// Shared-state register file emulating the sensor.
#[derive(Debug, Clone)]
pub struct MockSensor {
    inner: Arc<Mutex<MockState>>,
}

impl MockSensor {
    /// A sensor with the default OV5640 layout, chip ID 0x5640 and the VCM powered down.
    pub fn new() -> Self {
        Self::with_map(RegisterMap::default(), StatusCodes::default())
    }

    /// A sensor with a custom layout.
    pub fn with_map(map: RegisterMap, codes: StatusCodes) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockState::new(map, codes))),
        }
    }

    /// Set how commands are acknowledged.
    pub fn set_ack_behavior(&self, behavior: AckBehavior) {
        self.inner.lock().ack = behavior;
    }

    /// Set the outcome of single-shot autofocus.
    pub fn set_af_behavior(&self, behavior: AfBehavior) {
        self.inner.lock().af = behavior;
    }

    /// Set how the co-processor boots.
    pub fn set_boot_behavior(&self, behavior: BootBehavior) {
        self.inner.lock().boot = behavior;
    }

    /// Overwrite the chip ID.
    pub fn set_chip_id(&self, id: u16) {
        let mut state = self.inner.lock();
        let [high, low] = id.to_be_bytes();
        let address = state.map.chip_id;
        state.set(address, high);
        state.set(address.wrapping_add(1), low);
    }

    /// Make every read of `address` fail.
    pub fn fail_reads_from(&self, address: u16) {
        self.inner.lock().fail_reads.insert(address);
    }

    /// Make every write to `address` fail.
    pub fn fail_writes_to(&self, address: u16) {
        self.inner.lock().fail_writes.insert(address);
    }

    /// Set a register without recording traffic.
    pub fn poke(&self, address: u16, value: u8) {
        self.inner.lock().set(address, value);
    }

    /// Read a register without recording traffic.
    pub fn peek(&self, address: u16) -> u8 {
        self.inner.lock().get(address)
    }

    /// Number of reads of `address` so far.
    pub fn read_count(&self, address: u16) -> u32 {
        self.inner.lock().reads.get(&address).copied().unwrap_or(0)
    }

    /// All writes so far, in order.
    pub fn writes(&self) -> Vec<(u16, u8)> {
        self.inner.lock().writes.clone()
    }

    /// Opcodes written to the command-main register, in order.
    pub fn opcodes(&self) -> Vec<u8> {
        self.inner.lock().opcodes.clone()
    }

    /// Lens position held in the VCM registers, or `None` while powered down.
    pub fn lens(&self) -> Option<FocusPosition> {
        let state = self.inner.lock();
        let control1 = state.get(state.map.vcm_control1);
        if control1 & VCM_POWER_DOWN != 0 {
            return None;
        }
        Some(decode_position(control1, state.get(state.map.vcm_control0)))
    }

    /// Lens position in the VCM registers regardless of power state.
    pub fn lens_position(&self) -> FocusPosition {
        let state = self.inner.lock();
        decode_position(state.get(state.map.vcm_control1), state.get(state.map.vcm_control0))
    }

    /// A noiseless metric peaking at `peak`.
    pub fn sharpness_peak(&self, peak: FocusPosition) -> SyntheticSharpness {
        SyntheticSharpness::new(self.clone(), peak)
    }
}

impl Default for MockSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterPort for MockSensor {
    fn read_byte(&mut self, address: u16) -> Result<u8> {
        let mut state = self.inner.lock();
        if state.fail_reads.contains(&address) {
            return Err(FocusError::register(address, "simulated read failure"));
        }
        *state.reads.entry(address).or_insert(0) += 1;
        state.on_read(address);
        Ok(state.get(address))
    }

    fn write_byte(&mut self, address: u16, value: u8) -> Result<()> {
        let mut state = self.inner.lock();
        if state.fail_writes.contains(&address) {
            return Err(FocusError::register(address, "simulated write failure"));
        }
        state.writes.push((address, value));
        state.set(address, value);
        state.on_write(address, value);
        Ok(())
    }
}

/// Sharpness that falls off linearly from a peak position.
///
/// Scores zero while the VCM is powered down. Optional seeded noise makes
/// the signal imperfect while keeping runs reproducible.
#[derive(Debug)]
pub struct SyntheticSharpness {
    sensor: MockSensor,
    peak: FocusPosition,
    ceiling: SharpnessScore,
    slope: SharpnessScore,
    noise: Option<(ChaCha8Rng, SharpnessScore)>,
}

impl SyntheticSharpness {
    /// Metric peaking at `peak` with score 10 000 and 10 points per code of falloff.
    pub fn new(sensor: MockSensor, peak: FocusPosition) -> Self {
        Self {
            sensor,
            peak,
            ceiling: 10_000,
            slope: 10,
            noise: None,
        }
    }

    /// Add uniform noise in `[0, amplitude)` from a seeded generator.
    pub fn with_noise(mut self, seed: u64, amplitude: SharpnessScore) -> Self {
        if amplitude > 0 {
            self.noise = Some((ChaCha8Rng::seed_from_u64(seed), amplitude));
        }
        self
    }
}

impl SharpnessMetric for SyntheticSharpness {
    fn measure(&mut self) -> SharpnessScore {
        let Some(position) = self.sensor.lens() else {
            return 0;
        };
        let falloff = SharpnessScore::from(position.abs_diff(self.peak)) * self.slope;
        let base = self.ceiling.saturating_sub(falloff);
        match &mut self.noise {
            Some((rng, amplitude)) => base + rng.gen_range(0..*amplitude),
            None => base,
        }
    }
}

/// [`Delay`] that only counts.
#[derive(Debug, Clone, Default)]
pub struct RecordingDelay {
    calls: u32,
    total_ms: u64,
}

impl RecordingDelay {
    /// Number of delay calls.
    pub fn calls(&self) -> u32 {
        self.calls
    }

    /// Sum of requested milliseconds.
    pub fn total_ms(&self) -> u64 {
        self.total_ms
    }
}

impl Delay for RecordingDelay {
    fn delay_ms(&mut self, ms: u32) {
        self.calls += 1;
        self.total_ms += u64::from(ms);
    }
}
