//! Single-pack battery plant, noisy sensors and the legacy record reader.

use controller::CoolingAction;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

pub mod record;
mod scenario;

pub use record::{parse_record, read_record, LegacyRecord, RecordError};
pub use scenario::{DriverInput, DriverProfile, Harness, Scenario};

#[derive(Clone, Copy, Debug)]
pub struct PackParams {
    pub ambient_c: f64,
    /// J/K for the whole pack.
    pub thermal_mass: f64,
    /// Pack-level resistance used for I²R heating (ohm).
    pub pack_resistance: f64,
    /// Per-cell resistance used for terminal voltage sag (ohm).
    pub cell_resistance: f64,
    pub capacity_ah: f64,
    /// Heat removal in W/K for each cooling action.
    pub k_off: f64,
    pub k_forced_air: f64,
    pub k_pulse: f64,
    /// 0..=1 multiplier on cooling, for degraded fans/ducts.
    pub cooling_efficiency: f64,
    pub fuse_rating_a: f64,
    /// Hardware overcurrent comparator trip point.
    pub overcurrent_trip_a: f64,
}

impl Default for PackParams {
    fn default() -> Self {
        Self {
            ambient_c: 25.0,
            thermal_mass: 1500.0,
            pack_resistance: 0.02,
            cell_resistance: 0.002,
            capacity_ah: 5.0,
            k_off: 2.0,
            k_forced_air: 15.0,
            k_pulse: 30.0,
            cooling_efficiency: 1.0,
            fuse_rating_a: 250.0,
            overcurrent_trip_a: 200.0,
        }
    }
}

impl PackParams {
    fn cooling_conductance(&self, cooling: CoolingAction) -> f64 {
        let k = match cooling {
            CoolingAction::Off => self.k_off,
            CoolingAction::ForcedAir => self.k_forced_air,
            CoolingAction::PulseFuseLimited => self.k_pulse,
        };
        k * self.cooling_efficiency
    }
}

/// Open-circuit cell voltage, linear between 2.5 V (empty) and 4.2 V (full).
pub fn ocv(soc: f64) -> f64 {
    2.5 + 1.7 * soc.clamp(0.0, 1.0)
}

#[derive(Clone, Copy, Debug)]
pub struct PackState {
    pub temperature_c: f64,
    /// 0..=1
    pub state_of_charge: f64,
    pub current_a: f64,
    /// Latches false once the fuse has opened.
    pub fuse_ok: bool,
}

impl Default for PackState {
    fn default() -> Self {
        Self {
            temperature_c: 25.0,
            state_of_charge: 0.9,
            current_a: 0.0,
            fuse_ok: true,
        }
    }
}

impl PackState {
    /// Euler integration of the thermal and charge model:
    /// dT/dt = (I²R - k_cool*(T-ambient)) / thermal_mass
    /// dSoC/dt = -I / (3600 * capacity)
    pub fn step(&mut self, p: &PackParams, load_a: f64, cooling: CoolingAction, dt_s: f64) {
        if self.fuse_ok && load_a.abs() > p.fuse_rating_a {
            self.fuse_ok = false;
        }
        self.current_a = if self.fuse_ok { load_a } else { 0.0 };

        let heat_in = self.current_a * self.current_a * p.pack_resistance;
        let heat_out = p.cooling_conductance(cooling) * (self.temperature_c - p.ambient_c);
        self.temperature_c += (heat_in - heat_out) / p.thermal_mass * dt_s;

        let dsoc = self.current_a * dt_s / (3600.0 * p.capacity_ah);
        self.state_of_charge = (self.state_of_charge - dsoc).clamp(0.0, 1.0);
    }

    /// Loaded per-cell terminal voltage.
    pub fn cell_voltage(&self, p: &PackParams) -> f64 {
        ocv(self.state_of_charge) - self.current_a * p.cell_resistance
    }

    pub fn overcurrent_ok(&self, p: &PackParams) -> bool {
        self.current_a <= p.overcurrent_trip_a
    }
}

#[derive(Clone, Copy, Debug)]
pub enum SensorFault {
    None,
    Stuck { value: f64 },
    Bias { value: f64 },
    Drift { per_s: f64 },
    DropoutEvery { n: u64 },
}

#[derive(Clone, Debug)]
pub struct Sensor {
    pub fault: SensorFault,
    noise_std: f64,
    noise: Option<Normal<f64>>,
    rng: StdRng,
    step_count: u64,
}

impl Sensor {
    /// # Panics
    ///
    /// If `noise_std` is negative or not finite.
    pub fn new(seed: u64, noise_std: f64) -> Self {
        assert!(
            noise_std.is_finite() && noise_std >= 0.0,
            "sensor noise std must be finite and non-negative, got {noise_std}"
        );
        Self {
            fault: SensorFault::None,
            noise_std,
            noise: (noise_std > 0.0)
                .then(|| Normal::new(0.0, noise_std).ok())
                .flatten(),
            rng: StdRng::seed_from_u64(seed),
            step_count: 0,
        }
    }

    pub fn noise_std(&self) -> f64 {
        self.noise_std
    }

    pub fn read(&mut self, true_value: f64, dt_s: f64) -> f64 {
        self.step_count += 1;

        let mut v = match self.fault {
            SensorFault::None => true_value,
            SensorFault::Stuck { value } => value,
            SensorFault::Bias { value } => true_value + value,
            SensorFault::Drift { per_s } => {
                true_value + per_s * (self.step_count as f64) * dt_s
            }
            SensorFault::DropoutEvery { n } => {
                if n > 0 && (self.step_count % n) == 0 {
                    return f64::NAN;
                }
                true_value
            }
        };

        if let Some(normal) = &self.noise {
            v += normal.sample(&mut self.rng);
        }

        v
    }
}
