//! Delay primitive and the fixed timing constants of each algorithm.
//!
//! All waiting in this crate is a blocking sleep of a fixed length. The
//! [`Delay`] trait is the only seam, so tests can substitute a recorder and
//! run the full protocol without wall-clock time passing.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Blocking millisecond delay.
pub trait Delay {
    /// Block the calling thread for `ms` milliseconds.
    fn delay_ms(&mut self, ms: u32);
}

/// [`Delay`] backed by [`std::thread::sleep`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StdDelay;

impl Delay for StdDelay {
    fn delay_ms(&mut self, ms: u32) {
        std::thread::sleep(Duration::from_millis(u64::from(ms)));
    }
}

impl<D: Delay + ?Sized> Delay for &mut D {
    fn delay_ms(&mut self, ms: u32) {
        (**self).delay_ms(ms);
    }
}

/// Poll ceilings and settling delays.
///
/// These are design constants, not per-call parameters. They live in the
/// configuration so a module variant with slower mechanics can stretch them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Ack polls before a command is reported as failed
    pub ack_retries: u32,
    /// Delay between ack polls
    pub ack_poll_ms: u32,
    /// Firmware-status polls after upload before giving up
    pub firmware_retries: u32,
    /// Delay between firmware-status polls
    pub firmware_poll_ms: u32,
    /// Focus-status polls during single-shot autofocus
    pub single_af_polls: u32,
    /// Delay between focus-status polls
    pub single_af_poll_ms: u32,
    /// Fixed settle after every manual move
    pub move_settle_ms: u32,
    /// Extra settle per sample during range calibration
    pub calibration_settle_ms: u32,
    /// Extra settle per sample during the windowed search
    pub search_settle_ms: u32,
    /// Settle after manual-focus initialisation
    pub init_settle_ms: u32,
}

impl TimingConfig {
    /// Worst-case time spent polling for a command ack.
    pub fn ack_ceiling(&self) -> Duration {
        Duration::from_millis(u64::from(self.ack_retries) * u64::from(self.ack_poll_ms))
    }

    /// Worst-case time spent polling for single-shot focus.
    pub fn single_af_ceiling(&self) -> Duration {
        Duration::from_millis(u64::from(self.single_af_polls) * u64::from(self.single_af_poll_ms))
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            ack_retries: 1000,
            ack_poll_ms: 5,
            firmware_retries: 1000,
            firmware_poll_ms: 5,
            single_af_polls: 50,
            single_af_poll_ms: 10,
            move_settle_ms: 100,
            calibration_settle_ms: 100,
            search_settle_ms: 50,
            init_settle_ms: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ceilings() {
        let timing = TimingConfig::default();
        assert_eq!(timing.ack_ceiling(), Duration::from_secs(5));
        assert_eq!(timing.single_af_ceiling(), Duration::from_millis(500));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let timing: TimingConfig = toml::from_str("ack_retries = 10").unwrap();
        assert_eq!(timing.ack_retries, 10);
        assert_eq!(timing.ack_poll_ms, 5);
        assert_eq!(timing.move_settle_ms, 100);
    }

    #[test]
    fn test_std_delay_sleeps() {
        let start = std::time::Instant::now();
        StdDelay.delay_ms(2);
        assert!(start.elapsed() >= Duration::from_millis(2));
    }
}
