use crate::cooling::{CoolingCommand, CoolingPolicy};
use crate::ControllerConfig;
use safety::{
    ConfigError, EnvelopeResult, FaultActuator, FaultReport, FaultSequencer, MeasurementSnapshot,
    SafetyEnvelope,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperatingState {
    Drive,
    Idle,
    /// Latched after a fault that needs acknowledgement.
    Fault,
}

impl OperatingState {
    pub fn as_str(self) -> &'static str {
        match self {
            OperatingState::Drive => "DRIVE",
            OperatingState::Idle => "IDLE",
            OperatingState::Fault => "FAULT",
        }
    }
}

impl fmt::Display for OperatingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("unknown operating state {0:?} (expected DRIVE, IDLE or FAULT)")]
pub struct UnknownState(pub String);

impl FromStr for OperatingState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DRIVE" => Ok(OperatingState::Drive),
            "IDLE" => Ok(OperatingState::Idle),
            "FAULT" => Ok(OperatingState::Fault),
            _ => Err(UnknownState(s.trim().to_string())),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionReason {
    /// No trigger matched; state unchanged.
    Hold,
    Shutdown,
    SafetyFault,
    AcceleratorReleased,
    AcceleratorEngaged,
    /// Fault sequence ran but not every action was confirmed.
    ActuationUnconfirmed,
}

/// Decision of one cycle, before any fault action is applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    pub next: OperatingState,
    pub engage_fault: bool,
    pub reason: TransitionReason,
}

impl Transition {
    fn hold(state: OperatingState) -> Self {
        Self {
            next: state,
            engage_fault: false,
            reason: TransitionReason::Hold,
        }
    }

    fn to(next: OperatingState, reason: TransitionReason) -> Self {
        Self {
            next,
            engage_fault: false,
            reason,
        }
    }

    fn fault(next: OperatingState) -> Self {
        Self {
            next,
            engage_fault: true,
            reason: TransitionReason::SafetyFault,
        }
    }
}

/// Pure transition rule. Triggers are checked in a fixed order and the first
/// match wins, so a cycle never engages the fault sequence more than once.
pub fn transition(
    state: OperatingState,
    envelope: &EnvelopeResult,
    snap: &MeasurementSnapshot,
    latch_faults: bool,
) -> Transition {
    let fault_target = if latch_faults {
        OperatingState::Fault
    } else {
        OperatingState::Idle
    };

    match state {
        OperatingState::Drive => {
            if snap.shutdown_signal {
                // Clean shutdown, not a fault.
                Transition::to(OperatingState::Idle, TransitionReason::Shutdown)
            } else if !envelope.overall_ok {
                Transition::fault(fault_target)
            } else if !snap.accelerator_engaged {
                Transition::to(OperatingState::Idle, TransitionReason::AcceleratorReleased)
            } else {
                Transition::hold(state)
            }
        }
        OperatingState::Idle => {
            if !envelope.overall_ok {
                Transition::fault(fault_target)
            } else if snap.accelerator_engaged {
                Transition::to(OperatingState::Drive, TransitionReason::AcceleratorEngaged)
            } else {
                Transition::hold(state)
            }
        }
        OperatingState::Fault => {
            if !envelope.overall_ok {
                Transition::fault(OperatingState::Fault)
            } else {
                Transition::hold(state)
            }
        }
    }
}

/// Everything one cycle decided and did.
#[derive(Clone, Debug, PartialEq)]
pub struct CycleReport {
    pub cycle: u64,
    pub previous: OperatingState,
    pub next: OperatingState,
    pub reason: TransitionReason,
    pub envelope: EnvelopeResult,
    pub cooling: CoolingCommand,
    pub fault: Option<FaultReport>,
}

impl CycleReport {
    pub fn changed(&self) -> bool {
        self.previous != self.next
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ControllerError {
    #[error("acknowledge requested while in {0}, not FAULT")]
    NotFaulted(OperatingState),
    #[error("last fault sequence did not complete; tractive system shutdown unconfirmed")]
    ActuationUnconfirmed,
}

/// Owns the operating state and runs one control cycle per snapshot.
#[derive(Debug)]
pub struct BmsStateMachine {
    state: OperatingState,
    envelope: SafetyEnvelope,
    cooling: CoolingPolicy,
    sequencer: FaultSequencer,
    latch_faults: bool,
    cycle: u64,
    last_fault: Option<FaultReport>,
}

impl BmsStateMachine {
    pub fn new(initial: OperatingState, cfg: &ControllerConfig) -> Result<Self, ConfigError> {
        cfg.validate()?;
        Ok(Self::from_config(initial, cfg))
    }

    /// Machine with default limits.
    pub fn with_defaults(initial: OperatingState) -> Self {
        Self::from_config(initial, &ControllerConfig::default())
    }

    fn from_config(initial: OperatingState, cfg: &ControllerConfig) -> Self {
        Self {
            state: initial,
            envelope: SafetyEnvelope::new(cfg.limits),
            cooling: CoolingPolicy::new(cfg.cooling),
            sequencer: FaultSequencer,
            latch_faults: cfg.latch_faults,
            cycle: 0,
            last_fault: None,
        }
    }

    /// True while the most recent fault sequence left an action unconfirmed.
    pub fn actuation_pending(&self) -> bool {
        self.last_fault.as_ref().is_some_and(|f| !f.is_complete())
    }

    pub fn state(&self) -> OperatingState {
        self.state
    }

    pub fn cycles(&self) -> u64 {
        self.cycle
    }

    pub fn last_fault(&self) -> Option<&FaultReport> {
        self.last_fault.as_ref()
    }

    /// One control cycle: envelope, cooling, transition, then fault actions
    /// if the transition asked for them.
    pub fn step<A: FaultActuator + ?Sized>(
        &mut self,
        snap: &MeasurementSnapshot,
        actuator: &mut A,
    ) -> CycleReport {
        self.cycle += 1;
        let previous = self.state;

        let envelope = self.envelope.evaluate(snap);
        let cooling = self.cooling.select(snap.current_amps);
        if let Some(advisory) = &cooling.advisory {
            warn!(cycle = self.cycle, %advisory, "cooling advisory");
        }

        debug!(
            cycle = self.cycle,
            state = %previous,
            temperature_c = snap.temperature_celsius,
            voltage = snap.voltage,
            current_a = snap.current_amps,
            ok = envelope.overall_ok,
            cooling = %cooling.action,
            "cycle"
        );

        for v in envelope.violations() {
            warn!(cycle = self.cycle, violation = %v, "envelope violation");
        }

        let mut t = transition(previous, &envelope, snap, self.latch_faults);

        // An unconfirmed sequence is retried every cycle in FAULT, even once
        // the envelope passes, until every action is confirmed.
        let retry =
            previous == OperatingState::Fault && !t.engage_fault && self.actuation_pending();
        if retry {
            t.engage_fault = true;
        }

        let fault = if t.engage_fault {
            let report = self.sequencer.run(actuator);
            if !report.is_complete() {
                t.next = OperatingState::Fault;
                t.reason = TransitionReason::ActuationUnconfirmed;
            } else if retry {
                info!(cycle = self.cycle, "fault actions confirmed on retry");
            }
            self.last_fault = Some(report.clone());
            Some(report)
        } else {
            None
        };

        if t.next != previous {
            info!(
                cycle = self.cycle,
                from = %previous,
                to = %t.next,
                reason = ?t.reason,
                "state transition"
            );
        }
        self.state = t.next;

        CycleReport {
            cycle: self.cycle,
            previous,
            next: t.next,
            reason: t.reason,
            envelope,
            cooling,
            fault,
        }
    }

    /// Leave the latched `Fault` state. Refused unless the most recent fault
    /// sequence confirmed every action.
    pub fn acknowledge_fault(&mut self) -> Result<(), ControllerError> {
        if self.state != OperatingState::Fault {
            return Err(ControllerError::NotFaulted(self.state));
        }
        if let Some(report) = &self.last_fault {
            if !report.is_complete() {
                return Err(ControllerError::ActuationUnconfirmed);
            }
        }
        info!(cycle = self.cycle, "fault acknowledged");
        self.state = OperatingState::Idle;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use safety::{FaultAction, RecordingActuator};
    use tracing_test::traced_test;

    fn nominal() -> MeasurementSnapshot {
        MeasurementSnapshot {
            temperature_celsius: 25.0,
            voltage: 3.7,
            current_amps: 40.0,
            fuse_ok: true,
            overcurrent_ok: true,
            shutdown_signal: false,
            accelerator_engaged: true,
        }
    }

    #[test]
    fn drive_holds_while_envelope_passes() {
        let mut m = BmsStateMachine::with_defaults(OperatingState::Drive);
        let mut act = RecordingActuator::new();
        let r = m.step(&nominal(), &mut act);
        assert_eq!(r.next, OperatingState::Drive);
        assert_eq!(r.reason, TransitionReason::Hold);
        assert!(r.fault.is_none());
        assert_eq!(act.runs(), 0);
    }

    #[test]
    fn shutdown_is_not_a_fault() {
        let mut m = BmsStateMachine::with_defaults(OperatingState::Drive);
        let mut act = RecordingActuator::new();
        let snap = MeasurementSnapshot {
            shutdown_signal: true,
            ..nominal()
        };
        let r = m.step(&snap, &mut act);
        assert_eq!(r.next, OperatingState::Idle);
        assert_eq!(r.reason, TransitionReason::Shutdown);
        assert!(r.fault.is_none());
    }

    #[test]
    fn shutdown_takes_precedence_over_fault() {
        let mut m = BmsStateMachine::with_defaults(OperatingState::Drive);
        let mut act = RecordingActuator::new();
        let snap = MeasurementSnapshot {
            shutdown_signal: true,
            voltage: 2.0,
            ..nominal()
        };
        let r = m.step(&snap, &mut act);
        assert_eq!(r.next, OperatingState::Idle);
        assert_eq!(act.runs(), 0);
    }

    #[test]
    fn undervoltage_in_drive_runs_fault_sequence() {
        let mut m = BmsStateMachine::with_defaults(OperatingState::Drive);
        let mut act = RecordingActuator::new();
        let snap = MeasurementSnapshot {
            voltage: 2.0,
            ..nominal()
        };
        let r = m.step(&snap, &mut act);
        assert!(!r.envelope.overall_ok);
        assert_eq!(r.next, OperatingState::Idle);
        assert_eq!(r.reason, TransitionReason::SafetyFault);
        assert_eq!(act.runs(), 1);
        assert_eq!(act.applied(), &FaultAction::SEQUENCE);
    }

    #[test]
    fn released_pedal_returns_to_idle() {
        let mut m = BmsStateMachine::with_defaults(OperatingState::Drive);
        let snap = MeasurementSnapshot {
            accelerator_engaged: false,
            ..nominal()
        };
        let r = m.step(&snap, &mut RecordingActuator::new());
        assert_eq!(r.next, OperatingState::Idle);
        assert_eq!(r.reason, TransitionReason::AcceleratorReleased);
    }

    #[test]
    fn idle_engages_drive_when_safe() {
        let mut m = BmsStateMachine::with_defaults(OperatingState::Idle);
        let r = m.step(&nominal(), &mut RecordingActuator::new());
        assert_eq!(r.next, OperatingState::Drive);
        assert_eq!(m.state(), OperatingState::Drive);
    }

    #[test]
    fn idle_ignores_accelerator_while_faulted() {
        let mut m = BmsStateMachine::with_defaults(OperatingState::Idle);
        let mut act = RecordingActuator::new();
        let snap = MeasurementSnapshot {
            current_amps: 200.0,
            ..nominal()
        };
        let r = m.step(&snap, &mut act);
        assert_eq!(r.next, OperatingState::Idle);
        assert!(r.fault.is_some());
        assert_eq!(act.runs(), 1);
    }

    #[test]
    fn persistent_fault_runs_sequence_once_per_cycle() {
        let mut m = BmsStateMachine::with_defaults(OperatingState::Idle);
        let mut act = RecordingActuator::new();
        let snap = MeasurementSnapshot {
            fuse_ok: false,
            ..nominal()
        };
        for n in 1..=5 {
            let r = m.step(&snap, &mut act);
            assert_eq!(r.next, OperatingState::Idle);
            assert_eq!(act.runs(), n);
        }
        assert_eq!(m.cycles(), 5);
    }

    #[test]
    fn cooling_is_derived_even_when_faulted() {
        let mut m = BmsStateMachine::with_defaults(OperatingState::Drive);
        let snap = MeasurementSnapshot {
            current_amps: 150.0,
            temperature_celsius: 70.0,
            ..nominal()
        };
        let r = m.step(&snap, &mut RecordingActuator::new());
        assert_eq!(r.cooling.action, crate::CoolingAction::PulseFuseLimited);
    }

    #[test]
    fn latched_fault_requires_acknowledgement() {
        let cfg = ControllerConfig {
            latch_faults: true,
            ..Default::default()
        };
        let mut m = BmsStateMachine::new(OperatingState::Drive, &cfg).unwrap();
        let mut act = RecordingActuator::new();

        let hot = MeasurementSnapshot {
            temperature_celsius: 75.0,
            ..nominal()
        };
        assert_eq!(m.step(&hot, &mut act).next, OperatingState::Fault);

        // Conditions clear, pedal still pressed: stays latched.
        let r = m.step(&nominal(), &mut act);
        assert_eq!(r.next, OperatingState::Fault);
        assert!(r.fault.is_none());

        m.acknowledge_fault().unwrap();
        assert_eq!(m.state(), OperatingState::Idle);
        assert_eq!(m.step(&nominal(), &mut act).next, OperatingState::Drive);
    }

    #[test]
    fn fault_state_reruns_sequence_while_condition_persists() {
        let mut m = BmsStateMachine::with_defaults(OperatingState::Fault);
        let mut act = RecordingActuator::new();
        let snap = MeasurementSnapshot {
            overcurrent_ok: false,
            ..nominal()
        };
        let r = m.step(&snap, &mut act);
        assert_eq!(r.next, OperatingState::Fault);
        assert_eq!(act.runs(), 1);
    }

    #[test]
    fn unconfirmed_actuation_latches_fault() {
        let mut m = BmsStateMachine::with_defaults(OperatingState::Drive);
        let mut act = RecordingActuator::failing_on(FaultAction::DisableTractiveSystem);
        let snap = MeasurementSnapshot {
            voltage: 4.5,
            ..nominal()
        };
        let r = m.step(&snap, &mut act);
        assert_eq!(r.next, OperatingState::Fault);
        assert_eq!(r.reason, TransitionReason::ActuationUnconfirmed);
        assert_eq!(
            m.acknowledge_fault(),
            Err(ControllerError::ActuationUnconfirmed)
        );

        // Relay repaired; fault still present so the sequence reruns and completes.
        act.repair();
        m.step(&snap, &mut act);
        assert!(m.last_fault().is_some_and(|f| f.is_complete()));
        assert!(m.acknowledge_fault().is_ok());
    }

    #[test]
    fn repaired_actuator_is_confirmed_after_envelope_clears() {
        let mut m = BmsStateMachine::with_defaults(OperatingState::Drive);
        let mut act = RecordingActuator::failing_on(FaultAction::DisableTractiveSystem);
        let snap = MeasurementSnapshot {
            voltage: 4.5,
            ..nominal()
        };
        assert_eq!(m.step(&snap, &mut act).next, OperatingState::Fault);

        // Envelope clears but the output stage is still broken: keep retrying.
        let r = m.step(&nominal(), &mut act);
        assert_eq!(r.next, OperatingState::Fault);
        assert_eq!(r.reason, TransitionReason::ActuationUnconfirmed);
        assert_eq!(act.runs(), 2);
        assert!(m.actuation_pending());

        act.repair();
        let r = m.step(&nominal(), &mut act);
        assert_eq!(r.next, OperatingState::Fault);
        assert!(r.fault.as_ref().is_some_and(|f| f.is_complete()));
        assert!(!m.actuation_pending());

        // Confirmed: no further reruns, and the fault can be acknowledged.
        m.step(&nominal(), &mut act);
        assert_eq!(act.runs(), 3);
        assert!(m.acknowledge_fault().is_ok());
        assert_eq!(m.step(&nominal(), &mut act).next, OperatingState::Drive);
    }

    #[traced_test]
    #[test]
    fn violation_is_logged_on_clean_shutdown() {
        let mut m = BmsStateMachine::with_defaults(OperatingState::Drive);
        let mut act = RecordingActuator::new();
        let snap = MeasurementSnapshot {
            shutdown_signal: true,
            voltage: 2.0,
            ..nominal()
        };
        let r = m.step(&snap, &mut act);
        assert_eq!(r.reason, TransitionReason::Shutdown);
        assert_eq!(act.runs(), 0);
        assert!(logs_contain("cell voltage out of range"));
    }

    #[test]
    fn acknowledge_outside_fault_is_refused() {
        let mut m = BmsStateMachine::with_defaults(OperatingState::Idle);
        assert_eq!(
            m.acknowledge_fault(),
            Err(ControllerError::NotFaulted(OperatingState::Idle))
        );
    }

    #[test]
    fn state_names_parse() {
        assert_eq!("DRIVE".parse(), Ok(OperatingState::Drive));
        assert_eq!(" idle\r".parse(), Ok(OperatingState::Idle));
        assert!("PARK".parse::<OperatingState>().is_err());
    }

    #[test]
    fn transition_is_pure() {
        let env = SafetyEnvelope::default();
        let snap = MeasurementSnapshot {
            current_amps: 300.0,
            ..nominal()
        };
        let r = env.evaluate(&snap);
        let a = transition(OperatingState::Drive, &r, &snap, false);
        let b = transition(OperatingState::Drive, &r, &snap, false);
        assert_eq!(a, b);
        assert!(a.engage_fault);
        assert_eq!(a.next, OperatingState::Idle);
    }

    #[traced_test]
    #[test]
    fn fault_is_logged_with_violation() {
        let mut m = BmsStateMachine::with_defaults(OperatingState::Drive);
        let snap = MeasurementSnapshot {
            fuse_ok: false,
            ..nominal()
        };
        m.step(&snap, &mut RecordingActuator::new());
        assert!(logs_contain("fuse open"));
        assert!(logs_contain("state transition"));
    }
}
