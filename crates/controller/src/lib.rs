//! BMS control logic: cooling selection and the drive/idle/fault state machine.

mod cooling;
mod machine;

pub use cooling::{
    CoolingAction, CoolingAdvisory, CoolingCommand, CoolingPolicy, CoolingThresholds,
};
pub use machine::{
    transition, BmsStateMachine, ControllerError, CycleReport, OperatingState, Transition,
    TransitionReason, UnknownState,
};

use safety::{ConfigError, EnvelopeLimits};
use serde::{Deserialize, Serialize};

/// Tunables for one pack controller. Missing fields take their defaults.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub limits: EnvelopeLimits,
    pub cooling: CoolingThresholds,
    /// Enter the latched FAULT state on a safety fault instead of IDLE.
    pub latch_faults: bool,
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.limits.validate()?;
        self.cooling.validate()
    }
}
