use crate::{PackParams, PackState, Sensor, SensorFault};
use controller::CoolingAction;
use safety::{ActuationError, FaultAction, FaultActuator, InputError, MeasurementSnapshot};
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scenario {
    Nominal,
    /// Hot ambient with degraded cooling.
    Overheat,
    /// Load steps above the current limit after 5 s.
    Overcurrent,
    /// Pack starts nearly empty.
    DeepDischarge,
    /// 300 A surge opens the fuse after 5 s.
    BlownFuse,
    /// Clean shutdown request after 10 s.
    Shutdown,
    /// Driver lifts off after 10 s.
    PedalRelease,
    /// Temperature sensor drops out periodically.
    SensorDropout,
    /// Over-limit load with a welded main contactor.
    StuckContactor,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DriverInput {
    pub accelerator: bool,
    pub shutdown: bool,
    pub demand_a: f64,
}

/// Driver commands over time.
#[derive(Clone, Copy, Debug)]
pub struct DriverProfile {
    pub demand_a: f64,
    /// From this time on the demand becomes the given current.
    pub step_at: Option<(f64, f64)>,
    pub release_at_s: Option<f64>,
    pub shutdown_at_s: Option<f64>,
}

impl Default for DriverProfile {
    fn default() -> Self {
        Self {
            demand_a: 80.0,
            step_at: None,
            release_at_s: None,
            shutdown_at_s: None,
        }
    }
}

impl DriverProfile {
    pub fn at(&self, t_s: f64) -> DriverInput {
        let shutdown = self.shutdown_at_s.is_some_and(|s| t_s >= s);
        let released = self.release_at_s.is_some_and(|r| t_s >= r);
        let demand_a = match self.step_at {
            Some((at, amps)) if t_s >= at => amps,
            _ => self.demand_a,
        };
        DriverInput {
            // Keying off also lifts the pedal.
            accelerator: !shutdown && !released,
            shutdown,
            demand_a,
        }
    }
}

/// Closed-loop test bench: a pack, its sensors, a driver and the output
/// stage the fault sequence acts on.
#[derive(Clone, Debug)]
pub struct Harness {
    pub params: PackParams,
    pub pack: PackState,
    pub profile: DriverProfile,
    pub temperature_sensor: Sensor,
    pub voltage_sensor: Sensor,
    pub current_sensor: Sensor,
    t_s: f64,
    contactor_closed: bool,
    contactor_stuck: bool,
    bms_indicator_red: bool,
    ts_indicator: bool,
}

impl Harness {
    pub fn new(params: PackParams, pack: PackState, profile: DriverProfile, seed: u64) -> Self {
        Self {
            params,
            pack,
            profile,
            temperature_sensor: Sensor::new(seed ^ 0xA1, 0.2),
            voltage_sensor: Sensor::new(seed ^ 0xB2, 0.005),
            current_sensor: Sensor::new(seed ^ 0xC3, 0.5),
            t_s: 0.0,
            contactor_closed: false,
            contactor_stuck: false,
            bms_indicator_red: false,
            ts_indicator: false,
        }
    }

    pub fn for_scenario(scenario: Scenario, seed: u64) -> Self {
        let mut params = PackParams::default();
        let mut pack = PackState::default();
        let mut profile = DriverProfile::default();
        let mut contactor_stuck = false;

        match scenario {
            Scenario::Nominal => {}
            Scenario::Overheat => {
                params.ambient_c = 45.0;
                params.cooling_efficiency = 0.1;
                pack.temperature_c = 52.0;
                profile.demand_a = 150.0;
            }
            Scenario::Overcurrent => {
                profile.step_at = Some((5.0, 210.0));
            }
            Scenario::DeepDischarge => {
                pack.state_of_charge = 0.1;
                profile.demand_a = 100.0;
            }
            Scenario::BlownFuse => {
                profile.step_at = Some((5.0, 300.0));
            }
            Scenario::Shutdown => {
                profile.shutdown_at_s = Some(10.0);
            }
            Scenario::PedalRelease => {
                profile.release_at_s = Some(10.0);
            }
            Scenario::SensorDropout => {}
            Scenario::StuckContactor => {
                profile.step_at = Some((5.0, 190.0));
                contactor_stuck = true;
            }
        }

        let mut h = Self::new(params, pack, profile, seed);
        h.contactor_stuck = contactor_stuck;
        if scenario == Scenario::SensorDropout {
            h.temperature_sensor.fault = SensorFault::DropoutEvery { n: 25 };
        }
        h
    }

    pub fn time_s(&self) -> f64 {
        self.t_s
    }

    pub fn contactor_closed(&self) -> bool {
        self.contactor_closed
    }

    pub fn indicators(&self) -> (bool, bool) {
        (self.bms_indicator_red, self.ts_indicator)
    }

    pub fn driver_input(&self) -> DriverInput {
        self.profile.at(self.t_s)
    }

    /// Read every sensor once and assemble a validated snapshot.
    pub fn sample(&mut self, dt_s: f64) -> Result<MeasurementSnapshot, InputError> {
        let input = self.driver_input();
        MeasurementSnapshot {
            temperature_celsius: self.temperature_sensor.read(self.pack.temperature_c, dt_s),
            voltage: self
                .voltage_sensor
                .read(self.pack.cell_voltage(&self.params), dt_s),
            current_amps: self.current_sensor.read(self.pack.current_a, dt_s),
            fuse_ok: self.pack.fuse_ok,
            overcurrent_ok: self.pack.overcurrent_ok(&self.params),
            shutdown_signal: input.shutdown,
            accelerator_engaged: input.accelerator,
        }
        .validated()
    }

    /// Advance the plant by one period. Load is drawn only through a closed
    /// contactor, which the controller closes while it is in DRIVE.
    pub fn advance(&mut self, drive: bool, cooling: CoolingAction, dt_s: f64) {
        if drive {
            self.contactor_closed = true;
            self.bms_indicator_red = false;
            self.ts_indicator = false;
        } else if !self.contactor_stuck {
            self.contactor_closed = false;
        }

        let load = if self.contactor_closed {
            self.driver_input().demand_a
        } else {
            0.0
        };
        self.pack.step(&self.params, load, cooling, dt_s);
        self.t_s += dt_s;
    }
}

impl FaultActuator for Harness {
    fn apply(&mut self, action: FaultAction) -> Result<(), ActuationError> {
        debug!(%action, t_s = self.t_s, "actuating");
        match action {
            FaultAction::DisableTractiveSystem => {
                if self.contactor_stuck {
                    return Err(ActuationError {
                        action,
                        detail: "main contactor did not open".to_string(),
                    });
                }
                self.contactor_closed = false;
            }
            FaultAction::BmsIndicatorRed => self.bms_indicator_red = true,
            FaultAction::TractiveSystemIndicator => self.ts_indicator = true,
        }
        Ok(())
    }
}
