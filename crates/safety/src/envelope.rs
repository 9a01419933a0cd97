use crate::MeasurementSnapshot;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Invalid limit configuration.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum ConfigError {
    #[error("{name} must be a finite number, got {value}")]
    NonFinite { name: &'static str, value: f64 },
    #[error("{name} lower bound {low} exceeds upper bound {high}")]
    InvertedBounds {
        name: &'static str,
        low: f64,
        high: f64,
    },
}

/// Operating window for a single pack, discharge mode.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopeLimits {
    pub min_temperature_c: f64,
    pub max_temperature_c: f64,
    pub min_cell_voltage: f64,
    pub max_cell_voltage: f64,
    pub max_current_a: f64,
}

impl Default for EnvelopeLimits {
    fn default() -> Self {
        Self {
            min_temperature_c: -20.0,
            max_temperature_c: 60.0,
            min_cell_voltage: 2.5,
            max_cell_voltage: 4.2,
            max_current_a: 180.0,
        }
    }
}

impl EnvelopeLimits {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("min_temperature_c", self.min_temperature_c),
            ("max_temperature_c", self.max_temperature_c),
            ("min_cell_voltage", self.min_cell_voltage),
            ("max_cell_voltage", self.max_cell_voltage),
            ("max_current_a", self.max_current_a),
        ] {
            if !value.is_finite() {
                return Err(ConfigError::NonFinite { name, value });
            }
        }
        if self.min_temperature_c > self.max_temperature_c {
            return Err(ConfigError::InvertedBounds {
                name: "temperature",
                low: self.min_temperature_c,
                high: self.max_temperature_c,
            });
        }
        if self.min_cell_voltage > self.max_cell_voltage {
            return Err(ConfigError::InvertedBounds {
                name: "cell voltage",
                low: self.min_cell_voltage,
                high: self.max_cell_voltage,
            });
        }
        Ok(())
    }
}

/// A single failed envelope check.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeViolation {
    Temperature,
    Voltage,
    Current,
    Fuse,
    Overcurrent,
}

impl fmt::Display for EnvelopeViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EnvelopeViolation::Temperature => "temperature out of range",
            EnvelopeViolation::Voltage => "cell voltage out of range",
            EnvelopeViolation::Current => "current above limit",
            EnvelopeViolation::Fuse => "fuse open",
            EnvelopeViolation::Overcurrent => "overcurrent flag raised",
        };
        f.write_str(s)
    }
}

/// Outcome of one envelope evaluation. Not kept past the cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct EnvelopeResult {
    pub temperature_ok: bool,
    pub voltage_ok: bool,
    pub current_ok: bool,
    pub fuse_ok: bool,
    pub overcurrent_ok: bool,
    pub overall_ok: bool,
}

impl EnvelopeResult {
    /// Failed checks, in a fixed order.
    pub fn violations(&self) -> impl Iterator<Item = EnvelopeViolation> {
        [
            (self.temperature_ok, EnvelopeViolation::Temperature),
            (self.voltage_ok, EnvelopeViolation::Voltage),
            (self.current_ok, EnvelopeViolation::Current),
            (self.fuse_ok, EnvelopeViolation::Fuse),
            (self.overcurrent_ok, EnvelopeViolation::Overcurrent),
        ]
        .into_iter()
        .filter_map(|(ok, v)| (!ok).then_some(v))
    }
}

fn within(v: f64, lo: f64, hi: f64) -> bool {
    v.is_finite() && v >= lo && v <= hi
}

/// Checks a snapshot against the configured [`EnvelopeLimits`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SafetyEnvelope {
    limits: EnvelopeLimits,
}

impl SafetyEnvelope {
    pub fn new(limits: EnvelopeLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &EnvelopeLimits {
        &self.limits
    }

    /// Evaluate the envelope. Non-finite readings never pass.
    pub fn evaluate(&self, snap: &MeasurementSnapshot) -> EnvelopeResult {
        let l = &self.limits;

        let temperature_ok = within(
            snap.temperature_celsius,
            l.min_temperature_c,
            l.max_temperature_c,
        );
        let voltage_ok = within(snap.voltage, l.min_cell_voltage, l.max_cell_voltage);
        // Discharge only: no lower bound on current.
        let current_ok = snap.current_amps.is_finite() && snap.current_amps <= l.max_current_a;

        EnvelopeResult {
            temperature_ok,
            voltage_ok,
            current_ok,
            fuse_ok: snap.fuse_ok,
            overcurrent_ok: snap.overcurrent_ok,
            overall_ok: temperature_ok
                && voltage_ok
                && current_ok
                && snap.fuse_ok
                && snap.overcurrent_ok,
        }
    }
}
