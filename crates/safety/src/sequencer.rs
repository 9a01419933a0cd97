use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

/// Protective actions, in the order they are always applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultAction {
    DisableTractiveSystem,
    BmsIndicatorRed,
    TractiveSystemIndicator,
}

impl FaultAction {
    pub const SEQUENCE: [FaultAction; 3] = [
        FaultAction::DisableTractiveSystem,
        FaultAction::BmsIndicatorRed,
        FaultAction::TractiveSystemIndicator,
    ];
}

impl fmt::Display for FaultAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FaultAction::DisableTractiveSystem => "disable tractive system",
            FaultAction::BmsIndicatorRed => "BMS indicator red",
            FaultAction::TractiveSystemIndicator => "tractive system indicator on",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{action} failed: {detail}")]
pub struct ActuationError {
    pub action: FaultAction,
    pub detail: String,
}

/// Whatever physically applies a fault action (relay driver, LED, bus message).
pub trait FaultActuator {
    fn apply(&mut self, action: FaultAction) -> Result<(), ActuationError>;
}

/// Per-step outcome of one fault sequence run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FaultReport {
    steps: Vec<(FaultAction, Result<(), ActuationError>)>,
}

impl FaultReport {
    pub fn steps(&self) -> &[(FaultAction, Result<(), ActuationError>)] {
        &self.steps
    }

    pub fn actions(&self) -> impl Iterator<Item = FaultAction> + '_ {
        self.steps.iter().map(|(a, _)| *a)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ActuationError> + '_ {
        self.steps.iter().filter_map(|(_, r)| r.as_ref().err())
    }

    /// True when every protective action was confirmed.
    pub fn is_complete(&self) -> bool {
        self.steps.iter().all(|(_, r)| r.is_ok())
    }

    /// True when the tractive system is confirmed disabled, even if an
    /// indicator step failed.
    pub fn tractive_system_disabled(&self) -> bool {
        self.steps
            .iter()
            .any(|(a, r)| *a == FaultAction::DisableTractiveSystem && r.is_ok())
    }
}

/// Runs the fixed fault-response sequence.
///
/// Every step is attempted even if an earlier one fails: a missing indicator
/// must never keep the tractive system energised, and a failed disable must
/// still light the indicators.
#[derive(Clone, Copy, Debug, Default)]
pub struct FaultSequencer;

impl FaultSequencer {
    pub fn run<A: FaultActuator + ?Sized>(&self, actuator: &mut A) -> FaultReport {
        warn!("running fault sequence");
        let steps = FaultAction::SEQUENCE
            .into_iter()
            .map(|action| {
                let res = actuator.apply(action);
                if let Err(e) = &res {
                    error!(%action, error = %e, "fault action not confirmed");
                }
                (action, res)
            })
            .collect();
        FaultReport { steps }
    }
}

/// Actuator that records what it was asked to do. Optionally refuses one action.
#[derive(Clone, Debug, Default)]
pub struct RecordingActuator {
    applied: Vec<FaultAction>,
    runs: usize,
    fail_on: Option<FaultAction>,
}

impl RecordingActuator {
    pub fn new() -> Self {
        Self::default()
    }

    /// An actuator whose `action` step always reports failure.
    pub fn failing_on(action: FaultAction) -> Self {
        Self {
            fail_on: Some(action),
            ..Self::default()
        }
    }

    /// Stop injecting failures (e.g. after a relay has been repaired).
    pub fn repair(&mut self) {
        self.fail_on = None;
    }

    pub fn applied(&self) -> &[FaultAction] {
        &self.applied
    }

    /// Number of complete sequences started, counted on the first action.
    pub fn runs(&self) -> usize {
        self.runs
    }

    pub fn clear(&mut self) {
        self.applied.clear();
        self.runs = 0;
    }
}

impl FaultActuator for RecordingActuator {
    fn apply(&mut self, action: FaultAction) -> Result<(), ActuationError> {
        if action == FaultAction::SEQUENCE[0] {
            self.runs += 1;
        }
        if self.fail_on == Some(action) {
            return Err(ActuationError {
                action,
                detail: "no confirmation from output stage".to_string(),
            });
        }
        self.applied.push(action);
        Ok(())
    }
}
