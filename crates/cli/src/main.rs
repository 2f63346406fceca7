use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use controller::{
    LogRecord, LogSink, OperatingMode, SafetyController, SequenceDisplay, StandConfig,
    TracingSink,
};
use sim::{FaultKind, PermissivePanel};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Debug, ValueEnum)]
enum Scenario {
    /// Clean run through every phase.
    Nominal,
    /// Tank overpressure injected at `--event-ms`.
    Fault,
    /// Random fault injected at `--event-ms`.
    RandomFault,
    /// Emergency stop at `--event-ms`.
    Estop,
    /// Arm, then lose the vent permissive at `--event-ms` before starting.
    PermissiveDrop,
}

#[derive(Parser, Debug)]
#[command(
    name = "test-stand-interlock",
    version,
    about = "Propulsion test-stand safety interlock simulation"
)]
struct Args {
    #[arg(value_enum, long, default_value = "nominal")]
    scenario: Scenario,

    /// Total simulated time in seconds
    #[arg(long, default_value_t = 25.0)]
    seconds: f64,

    /// Fixed time step in milliseconds
    #[arg(long, default_value_t = 100)]
    dt_ms: u64,

    /// When the scenario event fires, in ms after start
    #[arg(long, default_value_t = 13_000)]
    event_ms: u64,

    /// RNG seed for deterministic runs (overrides the config file)
    #[arg(long)]
    seed: Option<u64>,

    /// Stand configuration (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Also emit a snapshot row every step
    #[arg(long)]
    trace: bool,

    /// Send log records to the tracing subscriber (stderr) instead of stdout JSON
    #[arg(long)]
    log_to_tracing: bool,
}

/// Writes each record to stdout as one JSON object per line.
struct JsonLinesSink;

impl LogSink for JsonLinesSink {
    fn record(&mut self, record: &LogRecord) {
        let line = serde_json::json!({ "kind": "log", "record": record });
        let mut out = std::io::stdout().lock();
        if let Err(e) = writeln!(out, "{line}") {
            tracing::error!(error = %e, "failed to write log record");
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.log_to_tracing { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut cfg = match &args.config {
        Some(path) => StandConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => StandConfig::default(),
    };
    if args.seed.is_some() {
        cfg.seed = args.seed;
    }

    let dt_ms = args.dt_ms.max(1);
    let steps = ((args.seconds * 1000.0) / dt_ms as f64).ceil() as u64;

    let mut c = if args.log_to_tracing {
        SafetyController::new(&cfg, TracingSink)
    } else {
        SafetyController::new(&cfg, JsonLinesSink)
    };

    c.update_permissives(|p| *p = PermissivePanel::all_granted());
    c.arm()?;
    if !matches!(args.scenario, Scenario::PermissiveDrop) {
        c.start()?;
    }

    let mut event_done = false;
    for _ in 0..steps {
        if !event_done && c.now_ms() >= args.event_ms {
            event_done = true;
            apply_event(&args.scenario, &mut c);
        }

        c.advance_clock(dt_ms);

        if args.trace {
            let row = serde_json::json!({ "kind": "trace", "snapshot": c.snapshot() });
            println!("{}", serde_json::to_string(&row)?);
        }

        // stop early for clarity
        let done = c.current_mode() == OperatingMode::Abort
            || c.sequence_display() == SequenceDisplay::Complete;
        if done {
            break;
        }
    }

    tracing::info!(mode = %c.current_mode(), at_ms = c.now_ms(), "simulation finished");
    Ok(())
}

fn apply_event(s: &Scenario, c: &mut SafetyController) {
    match s {
        Scenario::Nominal => {}
        Scenario::Fault => c.inject_fault(FaultKind::TankOverpressure),
        Scenario::RandomFault => {
            let kind = c.fault_inject();
            tracing::info!(?kind, "random fault injected");
        }
        Scenario::Estop => c.estop(),
        Scenario::PermissiveDrop => c.update_permissives(|p| p.vent_open = false),
    }
}
