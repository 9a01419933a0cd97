use safety::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoolingAction {
    Off,
    ForcedAir,
    /// 10 s pulse, fuse limited.
    PulseFuseLimited,
}

impl fmt::Display for CoolingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CoolingAction::Off => "off",
            CoolingAction::ForcedAir => "forced air",
            CoolingAction::PulseFuseLimited => "pulse (fuse limited)",
        };
        f.write_str(s)
    }
}

/// Raised when the current lies outside the range the policy covers.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CoolingAdvisory {
    AboveRange { current_amps: f64, limit: f64 },
    NonFinite,
}

impl fmt::Display for CoolingAdvisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoolingAdvisory::AboveRange {
                current_amps,
                limit,
            } => write!(f, "{current_amps} A is above the cooling range ({limit} A)"),
            CoolingAdvisory::NonFinite => f.write_str("current reading is not a number"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct CoolingCommand {
    pub action: CoolingAction,
    pub advisory: Option<CoolingAdvisory>,
}

/// Upper current bound (inclusive) of each cooling band.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoolingThresholds {
    pub off_max_a: f64,
    pub forced_air_max_a: f64,
    pub pulse_max_a: f64,
}

impl Default for CoolingThresholds {
    fn default() -> Self {
        Self {
            off_max_a: 60.0,
            forced_air_max_a: 120.0,
            pulse_max_a: 180.0,
        }
    }
}

impl CoolingThresholds {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("off_max_a", self.off_max_a),
            ("forced_air_max_a", self.forced_air_max_a),
            ("pulse_max_a", self.pulse_max_a),
        ] {
            if !value.is_finite() {
                return Err(ConfigError::NonFinite { name, value });
            }
        }
        if self.off_max_a > self.forced_air_max_a {
            return Err(ConfigError::InvertedBounds {
                name: "forced air band",
                low: self.off_max_a,
                high: self.forced_air_max_a,
            });
        }
        if self.forced_air_max_a > self.pulse_max_a {
            return Err(ConfigError::InvertedBounds {
                name: "pulse band",
                low: self.forced_air_max_a,
                high: self.pulse_max_a,
            });
        }
        Ok(())
    }
}

/// Maps discharge current to a cooling action.
#[derive(Clone, Copy, Debug, Default)]
pub struct CoolingPolicy {
    thresholds: CoolingThresholds,
}

impl CoolingPolicy {
    pub fn new(thresholds: CoolingThresholds) -> Self {
        Self { thresholds }
    }

    pub fn select(&self, current_amps: f64) -> CoolingCommand {
        let t = &self.thresholds;
        let (action, advisory) = if !current_amps.is_finite() {
            (CoolingAction::Off, Some(CoolingAdvisory::NonFinite))
        } else if current_amps <= t.off_max_a {
            (CoolingAction::Off, None)
        } else if current_amps <= t.forced_air_max_a {
            (CoolingAction::ForcedAir, None)
        } else if current_amps <= t.pulse_max_a {
            (CoolingAction::PulseFuseLimited, None)
        } else {
            (
                CoolingAction::Off,
                Some(CoolingAdvisory::AboveRange {
                    current_amps,
                    limit: t.pulse_max_a,
                }),
            )
        };
        CoolingCommand { action, advisory }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn action(i: f64) -> CoolingAction {
        CoolingPolicy::default().select(i).action
    }

    #[test]
    fn band_edges() {
        assert_eq!(action(60.0), CoolingAction::Off);
        assert_eq!(action(60.0001), CoolingAction::ForcedAir);
        assert_eq!(action(120.0), CoolingAction::ForcedAir);
        assert_eq!(action(120.0001), CoolingAction::PulseFuseLimited);
        assert_eq!(action(180.0), CoolingAction::PulseFuseLimited);
    }

    #[test]
    fn regen_current_needs_no_cooling() {
        let cmd = CoolingPolicy::default().select(-90.0);
        assert_eq!(cmd.action, CoolingAction::Off);
        assert_eq!(cmd.advisory, None);
    }

    #[test]
    fn above_range_is_flagged() {
        let cmd = CoolingPolicy::default().select(200.0);
        assert_eq!(cmd.action, CoolingAction::Off);
        assert_eq!(
            cmd.advisory,
            Some(CoolingAdvisory::AboveRange {
                current_amps: 200.0,
                limit: 180.0
            })
        );
    }

    #[test]
    fn nan_is_flagged() {
        let cmd = CoolingPolicy::default().select(f64::NAN);
        assert_eq!(cmd.action, CoolingAction::Off);
        assert_eq!(cmd.advisory, Some(CoolingAdvisory::NonFinite));
    }

    #[test]
    fn overlapping_bands_are_rejected() {
        let t = CoolingThresholds {
            forced_air_max_a: 200.0,
            ..Default::default()
        };
        assert!(t.validate().is_err());
        assert!(CoolingThresholds::default().validate().is_ok());
    }

    proptest! {
        #[test]
        fn select_is_deterministic(i in proptest::num::f64::ANY) {
            let p = CoolingPolicy::default();
            prop_assert_eq!(p.select(i).action, p.select(i).action);
        }

        #[test]
        fn advisory_only_outside_range(i in -1000.0f64..1000.0) {
            let cmd = CoolingPolicy::default().select(i);
            prop_assert_eq!(cmd.advisory.is_some(), i > 180.0);
        }
    }
}
