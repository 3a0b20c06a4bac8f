//! Object distance to focus position.
//!
//! Output is a nearness code: larger values focus nearer. Feed it through
//! [`crate::PositionConvention::from_nearness`] before driving a module whose
//! code 0 is the near end.

use serde::{Deserialize, Serialize};

use crate::error::{FocusError, Result};
use crate::position::{FocusPosition, MAX_POSITION};

/// One row of a lookup table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistanceEntry {
    /// Upper distance bound of this row in millimetres
    pub threshold_mm: u32,
    /// Position for distances up to the threshold
    pub position: FocusPosition,
}

impl DistanceEntry {
    /// Build an entry.
    pub const fn new(threshold_mm: u32, position: FocusPosition) -> Self {
        Self {
            threshold_mm,
            position,
        }
    }
}

/// How distances are turned into positions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum DistancePolicy {
    /// First entry whose threshold is >= the distance; the last entry is the
    /// sentinel returned beyond every threshold (its threshold is ignored).
    Table {
        /// Rows sorted by ascending threshold, sentinel last
        entries: Vec<DistanceEntry>,
    },
    /// Linear between the macro and infinity thresholds, clamped outside.
    Linear {
        /// At or below this distance the lens sits at `max_focus`
        macro_mm: u32,
        /// At or beyond this distance the lens sits at `min_focus`
        infinity_mm: u32,
        /// Position for infinity
        min_focus: FocusPosition,
        /// Position for macro
        max_focus: FocusPosition,
    },
}

impl Default for DistancePolicy {
    fn default() -> Self {
        Self::Table {
            entries: vec![
                DistanceEntry::new(50, 1023),
                DistanceEntry::new(70, 850),
                DistanceEntry::new(100, 680),
                DistanceEntry::new(150, 540),
                DistanceEntry::new(300, 380),
                DistanceEntry::new(600, 240),
                DistanceEntry::new(1500, 110),
                DistanceEntry::new(0, 0),
            ],
        }
    }
}

/// Pure distance-to-position mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistanceMapper {
    policy: DistancePolicy,
}

impl DistanceMapper {
    /// Validate `policy` and wrap it.
    pub fn new(policy: DistancePolicy) -> Result<Self> {
        validate(&policy)?;
        Ok(Self { policy })
    }

    /// Build a table mapper.
    pub fn table(entries: Vec<DistanceEntry>) -> Result<Self> {
        Self::new(DistancePolicy::Table { entries })
    }

    /// Build a linear mapper.
    pub fn linear(
        macro_mm: u32,
        infinity_mm: u32,
        min_focus: FocusPosition,
        max_focus: FocusPosition,
    ) -> Result<Self> {
        Self::new(DistancePolicy::Linear {
            macro_mm,
            infinity_mm,
            min_focus,
            max_focus,
        })
    }

    /// Policy in use.
    pub fn policy(&self) -> &DistancePolicy {
        &self.policy
    }

    /// Map a distance in millimetres to a position.
    pub fn map(&self, distance_mm: u32) -> FocusPosition {
        match &self.policy {
            DistancePolicy::Table { entries } => match entries.split_last() {
                Some((sentinel, rows)) => rows
                    .iter()
                    .find(|row| row.threshold_mm >= distance_mm)
                    .unwrap_or(sentinel)
                    .position,
                None => 0,
            },
            DistancePolicy::Linear {
                macro_mm,
                infinity_mm,
                min_focus,
                max_focus,
            } => {
                if distance_mm <= *macro_mm {
                    return *max_focus;
                }
                if distance_mm >= *infinity_mm {
                    return *min_focus;
                }
                let span = u64::from(max_focus - min_focus);
                let offset = u64::from(distance_mm - macro_mm);
                let width = u64::from(infinity_mm - macro_mm);
                max_focus - (offset * span / width) as FocusPosition
            }
        }
    }
}

impl Default for DistanceMapper {
    fn default() -> Self {
        Self {
            policy: DistancePolicy::default(),
        }
    }
}

fn invalid(message: String) -> FocusError {
    FocusError::InvalidConfig { message }
}

/// Check table ordering and position bounds.
pub fn validate(policy: &DistancePolicy) -> Result<()> {
    match policy {
        DistancePolicy::Table { entries } => {
            let Some((_, rows)) = entries.split_last() else {
                return Err(invalid("distance table is empty".to_string()));
            };
            if let Some(pair) = rows.windows(2).find(|w| w[0].threshold_mm >= w[1].threshold_mm) {
                return Err(invalid(format!(
                    "distance table not ascending at {} mm -> {} mm",
                    pair[0].threshold_mm, pair[1].threshold_mm
                )));
            }
            if let Some(row) = entries.iter().find(|row| row.position > MAX_POSITION) {
                return Err(invalid(format!(
                    "distance table position {} exceeds {}",
                    row.position, MAX_POSITION
                )));
            }
            Ok(())
        }
        DistancePolicy::Linear {
            macro_mm,
            infinity_mm,
            min_focus,
            max_focus,
        } => {
            if macro_mm >= infinity_mm {
                return Err(invalid(format!(
                    "macro threshold {macro_mm} mm must be below infinity threshold {infinity_mm} mm"
                )));
            }
            if min_focus > max_focus || *max_focus > MAX_POSITION {
                return Err(invalid(format!(
                    "focus bounds {min_focus}..{max_focus} invalid (max {MAX_POSITION})"
                )));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn short_table() -> DistanceMapper {
        DistanceMapper::table(vec![
            DistanceEntry::new(50, 1023),
            DistanceEntry::new(70, 850),
            DistanceEntry::new(100, 680),
            DistanceEntry::new(0, 0),
        ])
        .unwrap()
    }

    #[test]
    fn test_table_first_threshold_at_or_above() {
        let mapper = short_table();
        assert_eq!(mapper.map(60), 850);
        assert_eq!(mapper.map(50), 1023);
        assert_eq!(mapper.map(10), 1023);
        assert_eq!(mapper.map(100), 680);
    }

    #[test]
    fn test_table_sentinel_beyond_thresholds() {
        assert_eq!(short_table().map(5000), 0);
        assert_eq!(short_table().map(101), 0);
    }

    #[test]
    fn test_sentinel_only_table() {
        let mapper = DistanceMapper::table(vec![DistanceEntry::new(0, 321)]).unwrap();
        assert_eq!(mapper.map(0), 321);
        assert_eq!(mapper.map(u32::MAX), 321);
    }

    #[test]
    fn test_table_validation() {
        assert!(DistanceMapper::table(vec![]).is_err());
        assert!(DistanceMapper::table(vec![
            DistanceEntry::new(70, 850),
            DistanceEntry::new(50, 1023),
            DistanceEntry::new(0, 0),
        ])
        .is_err());
        assert!(DistanceMapper::table(vec![DistanceEntry::new(50, 2000), DistanceEntry::new(0, 0)]).is_err());
    }

    #[test]
    fn test_linear_clamps_and_interpolates() {
        let mapper = DistanceMapper::linear(100, 1100, 0, 1000).unwrap();
        assert_eq!(mapper.map(20), 1000);
        assert_eq!(mapper.map(100), 1000);
        assert_eq!(mapper.map(600), 500);
        assert_eq!(mapper.map(850), 250);
        assert_eq!(mapper.map(1100), 0);
        assert_eq!(mapper.map(90_000), 0);
    }

    #[test]
    fn test_linear_is_monotonic() {
        let mapper = DistanceMapper::linear(80, 2000, 40, 1023).unwrap();
        let mut previous = mapper.map(0);
        for d in (0..2500).step_by(7) {
            let p = mapper.map(d);
            assert!(p <= previous);
            previous = p;
        }
    }

    #[test]
    fn test_linear_validation() {
        assert!(DistanceMapper::linear(500, 500, 0, 1023).is_err());
        assert!(DistanceMapper::linear(50, 500, 900, 100).is_err());
        assert!(DistanceMapper::linear(50, 500, 0, 1024).is_err());
    }

    #[test]
    fn test_default_table_is_valid() {
        assert!(validate(&DistancePolicy::default()).is_ok());
    }

    #[test]
    fn test_policy_from_toml() {
        let policy: DistancePolicy = toml::from_str(
            r#"
            policy = "linear"
            macro_mm = 100
            infinity_mm = 3000
            min_focus = 0
            max_focus = 1023
            "#,
        )
        .unwrap();
        assert!(matches!(policy, DistancePolicy::Linear { macro_mm: 100, .. }));
    }
}
