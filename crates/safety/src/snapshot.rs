use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejection of a snapshot before it reaches the state machine.
#[derive(Clone, Copy, Debug, PartialEq, Error)]
pub enum InputError {
    #[error("{field} reading is not a finite number ({value})")]
    NonFinite { field: &'static str, value: f64 },
}

/// One cycle's worth of pack readings and driver signals.
///
/// Produced fresh every cycle by whatever feeds the controller and never
/// mutated afterwards.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MeasurementSnapshot {
    pub temperature_celsius: f64,
    /// Per-cell voltage.
    pub voltage: f64,
    pub current_amps: f64,
    pub fuse_ok: bool,
    pub overcurrent_ok: bool,
    pub shutdown_signal: bool,
    pub accelerator_engaged: bool,
}

impl Default for MeasurementSnapshot {
    fn default() -> Self {
        Self {
            temperature_celsius: 25.0,
            voltage: 3.7,
            current_amps: 0.0,
            fuse_ok: true,
            overcurrent_ok: true,
            shutdown_signal: false,
            accelerator_engaged: false,
        }
    }
}

impl MeasurementSnapshot {
    /// Reject snapshots carrying NaN or infinite readings.
    pub fn validate(&self) -> Result<(), InputError> {
        for (field, value) in [
            ("temperature", self.temperature_celsius),
            ("voltage", self.voltage),
            ("current", self.current_amps),
        ] {
            if !value.is_finite() {
                return Err(InputError::NonFinite { field, value });
            }
        }
        Ok(())
    }

    /// Convenience for callers that want a validated copy.
    pub fn validated(self) -> Result<Self, InputError> {
        self.validate().map(|()| self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_snapshot_is_valid() {
        assert_eq!(MeasurementSnapshot::default().validate(), Ok(()));
    }

    #[test]
    fn nan_voltage_is_rejected() {
        let snap = MeasurementSnapshot {
            voltage: f64::NAN,
            ..Default::default()
        };
        match snap.validate() {
            Err(InputError::NonFinite { field, .. }) => assert_eq!(field, "voltage"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn infinite_current_is_rejected() {
        let snap = MeasurementSnapshot {
            current_amps: f64::NEG_INFINITY,
            ..Default::default()
        };
        assert!(snap.validated().is_err());
    }
}
