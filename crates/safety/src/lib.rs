//! Pack safety checks: the measurement snapshot, the operating envelope and
//! the fault-response sequence.

mod envelope;
mod sequencer;
mod snapshot;

pub use envelope::{
    ConfigError, EnvelopeLimits, EnvelopeResult, EnvelopeViolation, SafetyEnvelope,
};
pub use sequencer::{
    ActuationError, FaultAction, FaultActuator, FaultReport, FaultSequencer, RecordingActuator,
};
pub use snapshot::{InputError, MeasurementSnapshot};
