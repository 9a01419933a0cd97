use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use controller::{
    BmsStateMachine, ControllerConfig, CoolingAction, CoolingAdvisory, CycleReport,
    OperatingState, TransitionReason,
};
use safety::{EnvelopeViolation, FaultAction, MeasurementSnapshot, RecordingActuator};
use serde::Serialize;
use sim::{Harness, Scenario};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ScenarioArg {
    Nominal,
    Overheat,
    Overcurrent,
    DeepDischarge,
    BlownFuse,
    Shutdown,
    PedalRelease,
    SensorDropout,
    StuckContactor,
}

impl From<ScenarioArg> for Scenario {
    fn from(s: ScenarioArg) -> Self {
        match s {
            ScenarioArg::Nominal => Scenario::Nominal,
            ScenarioArg::Overheat => Scenario::Overheat,
            ScenarioArg::Overcurrent => Scenario::Overcurrent,
            ScenarioArg::DeepDischarge => Scenario::DeepDischarge,
            ScenarioArg::BlownFuse => Scenario::BlownFuse,
            ScenarioArg::Shutdown => Scenario::Shutdown,
            ScenarioArg::PedalRelease => Scenario::PedalRelease,
            ScenarioArg::SensorDropout => Scenario::SensorDropout,
            ScenarioArg::StuckContactor => Scenario::StuckContactor,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "bms-safety-sim",
    version,
    about = "Battery management safety state machine, simulated or replayed from a record file"
)]
struct Args {
    #[arg(value_enum, long, default_value = "nominal")]
    scenario: ScenarioArg,

    /// Replay a legacy line-per-value record instead of simulating
    #[arg(long, value_name = "FILE")]
    input: Option<PathBuf>,

    /// JSON file with envelope limits, cooling bands and latch mode
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Starting state (DRIVE, IDLE or FAULT); a record file declares its own
    #[arg(long)]
    initial_state: Option<OperatingState>,

    /// Latch safety faults into FAULT instead of falling back to IDLE
    #[arg(long)]
    latch: bool,

    /// Number of control cycles to simulate
    #[arg(long, default_value_t = 600)]
    cycles: u64,

    /// Simulated time per cycle in milliseconds
    #[arg(long, default_value_t = 100)]
    dt_ms: u64,

    /// Wall-clock delay between cycles in milliseconds
    #[arg(long, default_value_t = 0)]
    period_ms: u64,

    /// Consecutive rejected snapshots tolerated before giving up
    #[arg(long, default_value_t = 10)]
    max_rejected: u32,

    /// RNG seed for deterministic runs
    #[arg(long, default_value_t = 12345)]
    seed: u64,
}

#[derive(Serialize)]
struct TraceRow {
    cycle: u64,
    t_s: Option<f64>,
    state: OperatingState,
    next: OperatingState,
    reason: TransitionReason,
    temperature_c: f64,
    voltage: f64,
    current_a: f64,
    fuse_ok: bool,
    overcurrent_ok: bool,
    shutdown: bool,
    accelerator: bool,
    envelope_ok: bool,
    violations: Vec<EnvelopeViolation>,
    cooling: CoolingAction,
    cooling_advisory: Option<CoolingAdvisory>,
    fault_actions: Option<Vec<FaultAction>>,
    fault_complete: Option<bool>,
}

impl TraceRow {
    fn new(t_s: Option<f64>, snap: &MeasurementSnapshot, r: &CycleReport) -> Self {
        Self {
            cycle: r.cycle,
            t_s,
            state: r.previous,
            next: r.next,
            reason: r.reason,
            temperature_c: snap.temperature_celsius,
            voltage: snap.voltage,
            current_a: snap.current_amps,
            fuse_ok: snap.fuse_ok,
            overcurrent_ok: snap.overcurrent_ok,
            shutdown: snap.shutdown_signal,
            accelerator: snap.accelerator_engaged,
            envelope_ok: r.envelope.overall_ok,
            violations: r.envelope.violations().collect(),
            cooling: r.cooling.action,
            cooling_advisory: r.cooling.advisory,
            fault_actions: r.fault.as_ref().map(|f| f.actions().collect()),
            fault_complete: r.fault.as_ref().map(|f| f.is_complete()),
        }
    }
}

#[derive(Serialize)]
struct RejectedRow {
    t_s: f64,
    rejected: String,
}

#[derive(Default)]
struct Tally {
    cycles: u64,
    faults: u64,
    rejected: u64,
}

impl Tally {
    fn record(&mut self, r: &CycleReport) {
        self.cycles += 1;
        if r.fault.is_some() {
            self.faults += 1;
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,controller=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut cfg = match &args.config {
        Some(path) => load_config(path)?,
        None => ControllerConfig::default(),
    };
    cfg.latch_faults |= args.latch;
    cfg.validate().context("invalid controller configuration")?;

    let tally = match &args.input {
        Some(path) => replay(&args, &cfg, path)?,
        None => simulate(&args, &cfg)?,
    };

    info!(
        cycles = tally.cycles,
        faults = tally.faults,
        rejected = tally.rejected,
        "run complete"
    );
    Ok(())
}

fn load_config(path: &Path) -> Result<ControllerConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
}

fn replay(args: &Args, cfg: &ControllerConfig, path: &Path) -> Result<Tally> {
    let record =
        sim::read_record(path).with_context(|| format!("loading record {}", path.display()))?;
    let initial = args.initial_state.unwrap_or(record.initial_state);
    info!(
        path = %path.display(),
        initial = %initial,
        snapshots = record.snapshots.len(),
        "replaying record"
    );

    let mut machine = BmsStateMachine::new(initial, cfg)?;
    let mut actuator = RecordingActuator::new();
    let mut tally = Tally::default();

    for snap in &record.snapshots {
        let report = machine.step(snap, &mut actuator);
        tally.record(&report);
        emit(&TraceRow::new(None, snap, &report))?;
        pace(args.period_ms);
    }
    Ok(tally)
}

fn simulate(args: &Args, cfg: &ControllerConfig) -> Result<Tally> {
    let dt_s = (args.dt_ms as f64) / 1000.0;
    let scenario = Scenario::from(args.scenario);
    let initial = args.initial_state.unwrap_or(OperatingState::Idle);
    info!(
        ?scenario,
        initial = %initial,
        cycles = args.cycles,
        seed = args.seed,
        "starting simulation"
    );

    let mut harness = Harness::for_scenario(scenario, args.seed);
    let mut machine = BmsStateMachine::new(initial, cfg)?;
    let mut tally = Tally::default();
    let mut consecutive_rejects = 0u32;

    for _ in 0..args.cycles {
        let t_s = harness.time_s();
        match harness.sample(dt_s) {
            Ok(snap) => {
                consecutive_rejects = 0;
                let report = machine.step(&snap, &mut harness);
                tally.record(&report);
                emit(&TraceRow::new(Some(t_s), &snap, &report))?;
                harness.advance(
                    report.next == OperatingState::Drive,
                    report.cooling.action,
                    dt_s,
                );
            }
            Err(e) => {
                // Hold state and outputs; the controller never sees a bad snapshot.
                warn!(t_s, error = %e, "snapshot rejected");
                tally.rejected += 1;
                consecutive_rejects += 1;
                if consecutive_rejects > args.max_rejected {
                    bail!("{consecutive_rejects} consecutive snapshots rejected, last: {e}");
                }
                emit(&RejectedRow {
                    t_s,
                    rejected: e.to_string(),
                })?;
                harness.advance(
                    machine.state() == OperatingState::Drive,
                    CoolingAction::Off,
                    dt_s,
                );
            }
        }
        pace(args.period_ms);
    }
    Ok(tally)
}

fn emit<T: Serialize>(row: &T) -> Result<()> {
    println!("{}", serde_json::to_string(row)?);
    Ok(())
}

fn pace(period_ms: u64) {
    if period_ms > 0 {
        std::thread::sleep(Duration::from_millis(period_ms));
    }
}
