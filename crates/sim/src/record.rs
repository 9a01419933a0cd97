//! Reader for the legacy line-per-value input record.
//!
//! ```text
//! DRIVE      <- starting state
//! 25.0       <- temperature (C)
//! 3.7        <- cell voltage
//! 80         <- current (A)
//! OK         <- fuse
//! OK         <- overcurrent
//! FALSE      <- shutdown signal
//! TRUE       <- accelerator
//! ```
//!
//! Any number of seven-line snapshot blocks may follow the state line.
//! Blank lines and `#` comments are skipped.

use controller::{OperatingState, UnknownState};
use safety::MeasurementSnapshot;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("record is empty")]
    Empty,
    #[error("line {line}: {source}")]
    State {
        line: usize,
        #[source]
        source: UnknownState,
    },
    #[error("record ends before {field} (after line {line})")]
    MissingField { field: &'static str, line: usize },
    #[error("line {line}: {field} {value:?} is not a number")]
    InvalidNumber {
        field: &'static str,
        line: usize,
        value: String,
    },
    #[error("record declares a state but no readings")]
    NoSnapshots,
    #[error("reading record: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone, Debug, PartialEq)]
pub struct LegacyRecord {
    pub initial_state: OperatingState,
    pub snapshots: Vec<MeasurementSnapshot>,
}

const FIELDS: [&str; 7] = [
    "temperature",
    "voltage",
    "current",
    "fuse status",
    "overcurrent status",
    "shutdown signal",
    "accelerator",
];

pub fn read_record(path: impl AsRef<Path>) -> Result<LegacyRecord, RecordError> {
    let text = std::fs::read_to_string(path)?;
    parse_record(&text)
}

pub fn parse_record(text: &str) -> Result<LegacyRecord, RecordError> {
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty() && !l.starts_with('#'));

    let (state_line, state) = lines.next().ok_or(RecordError::Empty)?;
    let initial_state = state.parse().map_err(|source| RecordError::State {
        line: state_line,
        source,
    })?;

    let mut snapshots = Vec::new();
    while let Some(first) = lines.next() {
        let mut block = [(0usize, ""); 7];
        block[0] = first;
        let mut last_line = first.0;
        for (slot, field) in block.iter_mut().zip(FIELDS).skip(1) {
            *slot = lines
                .next()
                .ok_or(RecordError::MissingField { field, line: last_line })?;
            last_line = slot.0;
        }

        let snap = MeasurementSnapshot {
            temperature_celsius: number(block[0], FIELDS[0])?,
            voltage: number(block[1], FIELDS[1])?,
            current_amps: number(block[2], FIELDS[2])?,
            fuse_ok: block[3].1 == "OK",
            overcurrent_ok: block[4].1 == "OK",
            shutdown_signal: block[5].1 == "TRUE",
            accelerator_engaged: block[6].1 == "TRUE",
        };
        snapshots.push(snap);
    }

    if snapshots.is_empty() {
        return Err(RecordError::NoSnapshots);
    }

    Ok(LegacyRecord {
        initial_state,
        snapshots,
    })
}

fn number((line, raw): (usize, &str), field: &'static str) -> Result<f64, RecordError> {
    let invalid = || RecordError::InvalidNumber {
        field,
        line,
        value: raw.to_string(),
    };
    let v: f64 = raw.parse().map_err(|_| invalid())?;
    if !v.is_finite() {
        return Err(invalid());
    }
    Ok(v)
}
