//! Sharpness-guided focus search.
//!
//! Both routines are brute-force grid scans: move, settle, score, keep the
//! best. A grid copes with a noisy or multi-peaked sharpness signal where a
//! gradient or golden-section search would lock onto a side lobe.
//!
//! Range sweeps run inward from the absolute extreme, so ties keep the
//! sample closest to it. A score must beat zero to count, so a metric that
//! reports nothing useful leaves the range untouched.

use tracing::{debug, info, instrument};

use crate::error::Result;
use crate::port::{RegisterPort, SensorBus};
use crate::position::{FocusPosition, FocusRange, ManualPositionDriver, MAX_POSITION, MIN_POSITION};
use crate::timing::{Delay, TimingConfig};

/// Image sharpness, larger is sharper.
pub type SharpnessScore = u32;

/// Source of sharpness scores for the lens position at call time.
pub trait SharpnessMetric {
    /// Score the current image.
    fn measure(&mut self) -> SharpnessScore;
}

impl<F: FnMut() -> SharpnessScore> SharpnessMetric for F {
    fn measure(&mut self) -> SharpnessScore {
        self()
    }
}

/// Width of the range-calibration sweep.
pub const CALIBRATION_WINDOW: FocusPosition = 200;
/// Sample spacing of the range-calibration sweep.
pub const CALIBRATION_STEP: usize = 10;
/// Position units per window unit in [`CalibrationEngine::find_optimal_focus`].
pub const SEARCH_SCALE: FocusPosition = 10;
/// Sample spacing of the windowed search.
pub const SEARCH_STEP: usize = 5;

/// Range calibration and local optimum search.
#[derive(Debug, Clone)]
pub struct CalibrationEngine {
    calibration_settle_ms: u32,
    search_settle_ms: u32,
}

impl CalibrationEngine {
    /// Create an engine with the configured settle times.
    pub fn new(timing: &TimingConfig) -> Self {
        Self {
            calibration_settle_ms: timing.calibration_settle_ms,
            search_settle_ms: timing.search_settle_ms,
        }
    }

    /// Sweep `[MIN, MIN + 200)` upward and set `near_limit` to the sharpest
    /// sample.
    ///
    /// Leaves the actuator at `near_limit`, which after a swap is the old
    /// far limit.
    #[instrument(skip_all, err)]
    pub fn calibrate_near_limit<P, D, M>(
        &self,
        bus: &mut SensorBus<P, D>,
        manual: &mut ManualPositionDriver,
        range: &mut FocusRange,
        metric: &mut M,
    ) -> Result<FocusPosition>
    where
        P: RegisterPort,
        D: Delay,
        M: SharpnessMetric + ?Sized,
    {
        let samples = (MIN_POSITION..MIN_POSITION + CALIBRATION_WINDOW).step_by(CALIBRATION_STEP);
        let best = self.sweep(bus, manual, samples, self.calibration_settle_ms, metric)?;

        if let Some((position, score)) = best {
            range.near_limit = position;
            if range.normalize() {
                debug!(?range, "Near limit above far limit, bounds swapped");
            }
            info!(near_limit = position, score, "Near limit calibrated");
        } else {
            info!(near_limit = range.near_limit, "No sharpness signal, near limit unchanged");
        }

        manual.set_position(bus, range.near_limit)?;
        Ok(range.near_limit)
    }

    /// Sweep `[MAX - 200, MAX]` downward and set `far_limit` to the sharpest
    /// sample.
    ///
    /// Leaves the actuator at `far_limit`, which after a swap is the old
    /// near limit.
    #[instrument(skip_all, err)]
    pub fn calibrate_far_limit<P, D, M>(
        &self,
        bus: &mut SensorBus<P, D>,
        manual: &mut ManualPositionDriver,
        range: &mut FocusRange,
        metric: &mut M,
    ) -> Result<FocusPosition>
    where
        P: RegisterPort,
        D: Delay,
        M: SharpnessMetric + ?Sized,
    {
        let samples = (MAX_POSITION - CALIBRATION_WINDOW..=MAX_POSITION)
            .rev()
            .step_by(CALIBRATION_STEP);
        let best = self.sweep(bus, manual, samples, self.calibration_settle_ms, metric)?;

        if let Some((position, score)) = best {
            range.far_limit = position;
            if range.normalize() {
                debug!(?range, "Far limit below near limit, bounds swapped");
            }
            info!(far_limit = position, score, "Far limit calibrated");
        } else {
            info!(far_limit = range.far_limit, "No sharpness signal, far limit unchanged");
        }

        manual.set_position(bus, range.far_limit)?;
        Ok(range.far_limit)
    }

    /// Scan `window_size * 10` units either side of the current position,
    /// clamped to `range`, in steps of 5.
    ///
    /// Returns the sharpest position and leaves the actuator there. A zero
    /// window or an empty clamped window returns the current position
    /// without moving.
    #[instrument(skip(self, bus, manual, metric), err)]
    pub fn find_optimal_focus<P, D, M>(
        &self,
        bus: &mut SensorBus<P, D>,
        manual: &mut ManualPositionDriver,
        range: &FocusRange,
        metric: &mut M,
        window_size: u8,
    ) -> Result<FocusPosition>
    where
        P: RegisterPort,
        D: Delay,
        M: SharpnessMetric + ?Sized,
    {
        let current = manual.current();
        if window_size == 0 {
            return Ok(current);
        }

        let span = FocusPosition::from(window_size) * SEARCH_SCALE;
        let start = current.saturating_sub(span).max(range.near_limit);
        let end = current.saturating_add(span).min(range.far_limit);
        if start > end {
            debug!(start, end, current, "Search window empty");
            return Ok(current);
        }

        let best = self
            .sweep(bus, manual, (start..=end).step_by(SEARCH_STEP), self.search_settle_ms, metric)?
            .map_or(current, |(position, _)| position);

        manual.set_position(bus, best)?;
        info!(best, start, end, "Optimal focus found");
        Ok(best)
    }

    fn sweep<P, D, M, I>(
        &self,
        bus: &mut SensorBus<P, D>,
        manual: &mut ManualPositionDriver,
        samples: I,
        settle_ms: u32,
        metric: &mut M,
    ) -> Result<Option<(FocusPosition, SharpnessScore)>>
    where
        P: RegisterPort,
        D: Delay,
        M: SharpnessMetric + ?Sized,
        I: Iterator<Item = FocusPosition>,
    {
        let mut best: Option<(FocusPosition, SharpnessScore)> = None;

        for position in samples {
            manual.set_position(bus, position)?;
            bus.delay_ms(settle_ms);
            let score = metric.measure();
            debug!(position, score, "Sweep sample");

            if score > best.map_or(0, |(_, s)| s) {
                best = Some((position, score));
            }
        }

        Ok(best)
    }
}
