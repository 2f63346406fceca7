//! Test-stand safety controller.
//!
//! [`SafetyController`] owns the operating mode, both panels and the sequence
//! runner. All mutation goes through its commands and notifications; the only
//! asynchronous re-entry is a phase timer firing, delivered via
//! [`SafetyController::fire_timer`] or driven by [`SafetyController::advance_clock`].

pub mod config;
pub mod error;
pub mod log;
pub mod runner;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use safety::{InterlockLimits, InterlockSet, Verdict};
use serde::Serialize;
use sim::{FaultKind, Phase, PermissivePanel, SensorPanel};
use tracing::{debug, info, warn};

pub use config::{ConfigError, StandConfig};
pub use error::{Command, CommandError, Guard};
pub use log::{Channel, LogRecord, LogSink, LogTag, RecordingSink, Severity, TracingSink};
pub use runner::{PendingTimer, SequenceRunner, StepContext, StepOutcome, TimerOutcome, TimerToken};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperatingMode {
    Idle,
    Armed,
    Chilldown,
    Pressurize,
    Ignition,
    Burn,
    Shutdown,
    Abort,
}

impl OperatingMode {
    pub fn name(self) -> &'static str {
        match self {
            OperatingMode::Idle => "IDLE",
            OperatingMode::Armed => "ARMED",
            OperatingMode::Chilldown => "CHILLDOWN",
            OperatingMode::Pressurize => "PRESSURIZE",
            OperatingMode::Ignition => "IGNITION",
            OperatingMode::Burn => "BURN",
            OperatingMode::Shutdown => "SHUTDOWN",
            OperatingMode::Abort => "ABORT",
        }
    }
}

impl From<Phase> for OperatingMode {
    fn from(p: Phase) -> Self {
        match p {
            Phase::Chilldown => OperatingMode::Chilldown,
            Phase::Pressurize => OperatingMode::Pressurize,
            Phase::Ignition => OperatingMode::Ignition,
            Phase::Burn => OperatingMode::Burn,
            Phase::Shutdown => OperatingMode::Shutdown,
        }
    }
}

impl std::fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum AbortReason {
    Manual,
    EmergencyStop,
    PermissiveDropped,
    InterlockTripped,
    RandomFault,
    InterlockDuringPhase(Phase),
    InterlockAtEndOfPhase(Phase),
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::Manual => f.write_str("manual abort command issued"),
            AbortReason::EmergencyStop => f.write_str("emergency stop activated"),
            AbortReason::PermissiveDropped => f.write_str("permissive dropped while armed"),
            AbortReason::InterlockTripped => {
                f.write_str("interlock triggered by sensor or status change")
            }
            AbortReason::RandomFault => f.write_str("random fault triggered interlock"),
            AbortReason::InterlockDuringPhase(p) => {
                write!(f, "interlock active during {p} — automatic shutdown")
            }
            AbortReason::InterlockAtEndOfPhase(p) => {
                write!(f, "interlock active at end of {p} — automatic shutdown")
            }
        }
    }
}

/// What the sequence display shows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SequenceDisplay {
    NotStarted,
    InPhase(Phase),
    Complete,
    Aborted,
}

impl std::fmt::Display for SequenceDisplay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SequenceDisplay::NotStarted => f.write_str("—"),
            SequenceDisplay::InPhase(p) => write!(f, "{p}"),
            SequenceDisplay::Complete => f.write_str("COMPLETE"),
            SequenceDisplay::Aborted => f.write_str("ABORTED"),
        }
    }
}

/// Which operator buttons are live. Reset and E-stop are always available.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CommandAvailability {
    pub arm: bool,
    pub start: bool,
    pub abort: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ControllerSnapshot {
    pub at_ms: u64,
    pub mode: OperatingMode,
    pub run_id: Option<String>,
    pub step: String,
    pub progress_pct: f64,
    pub sequence_running: bool,
    pub sensors: SensorPanel,
    pub permissives: PermissivePanel,
    pub permissives_ok: bool,
    pub interlocks: InterlockSet,
    pub last_abort: Option<String>,
}

/// `RUN-<YYMMDD>-<100..=999>`.
pub fn new_run_id<R: Rng + ?Sized>(rng: &mut R) -> String {
    let date = Utc::now().date_naive();
    format!("RUN-{}-{}", date.format("%y%m%d"), rng.gen_range(100..1000))
}

pub struct SafetyController {
    limits: InterlockLimits,
    mode: OperatingMode,
    sensors: SensorPanel,
    permissives: PermissivePanel,
    /// Latched by E-stop, cleared only by reset.
    estop: bool,
    verdict: Verdict,
    run_id: Option<String>,
    runner: SequenceRunner,
    display: SequenceDisplay,
    progress_pct: f64,
    last_abort: Option<AbortReason>,
    now_ms: u64,
    rng: Box<dyn RngCore + Send>,
    sink: Box<dyn LogSink + Send>,
}

impl SafetyController {
    /// Controller seeded from `config.seed`, or from entropy when unset.
    pub fn new(config: &StandConfig, sink: impl LogSink + Send + 'static) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self::with_rng(config, sink, rng)
    }

    /// Controller with an explicit random source for fault selection and run ids.
    pub fn with_rng(
        config: &StandConfig,
        sink: impl LogSink + Send + 'static,
        rng: impl RngCore + Send + 'static,
    ) -> Self {
        let mut c = Self {
            limits: config.limits,
            mode: OperatingMode::Idle,
            sensors: SensorPanel::default(),
            permissives: PermissivePanel::default(),
            estop: false,
            verdict: Verdict::default(),
            run_id: None,
            runner: SequenceRunner::new(),
            display: SequenceDisplay::NotStarted,
            progress_pct: 0.0,
            last_abort: None,
            now_ms: 0,
            rng: Box::new(rng),
            sink: Box::new(sink),
        };
        c.refresh_verdict();
        c.emit(
            Channel::Sys,
            Severity::State,
            "Simulator initialized. Configure permissives, then ARM and start the sequence.",
        );
        c
    }

    // ---- queries ----

    pub fn current_mode(&self) -> OperatingMode {
        self.mode
    }

    pub fn current_interlocks(&self) -> InterlockSet {
        self.verdict.interlocks
    }

    pub fn permissives_satisfied(&self) -> bool {
        self.verdict.permissives_ok
    }

    pub fn sequence_running(&self) -> bool {
        self.runner.running()
    }

    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    pub fn current_step_index(&self) -> i32 {
        self.runner.current_step_index()
    }

    pub fn pending_timer(&self) -> Option<PendingTimer> {
        self.runner.pending()
    }

    pub fn last_abort_reason(&self) -> Option<AbortReason> {
        self.last_abort
    }

    pub fn sequence_display(&self) -> SequenceDisplay {
        self.display
    }

    pub fn progress_pct(&self) -> f64 {
        self.progress_pct
    }

    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    pub fn limits(&self) -> &InterlockLimits {
        &self.limits
    }

    pub fn sensors(&self) -> &SensorPanel {
        &self.sensors
    }

    pub fn permissives(&self) -> &PermissivePanel {
        &self.permissives
    }

    pub fn permissive_report(&self) -> Vec<(&'static str, bool)> {
        safety::permissive_report(&self.permissives)
    }

    pub fn available_commands(&self) -> CommandAvailability {
        match self.mode {
            OperatingMode::Idle => CommandAvailability {
                arm: self.verdict.permissives_ok,
                ..Default::default()
            },
            OperatingMode::Armed => CommandAvailability {
                arm: false,
                start: true,
                abort: true,
            },
            OperatingMode::Abort => CommandAvailability::default(),
            _ => CommandAvailability {
                abort: true,
                ..Default::default()
            },
        }
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        ControllerSnapshot {
            at_ms: self.now_ms,
            mode: self.mode,
            run_id: self.run_id.clone(),
            step: self.display.to_string(),
            progress_pct: self.progress_pct,
            sequence_running: self.runner.running(),
            sensors: self.sensors,
            permissives: self.permissives,
            permissives_ok: self.verdict.permissives_ok,
            interlocks: self.verdict.interlocks,
            last_abort: self.last_abort.map(|r| r.to_string()),
        }
    }

    // ---- environment surface ----

    /// Direct access to the sensor panel. Call [`Self::on_sensor_changed`] afterwards.
    pub fn sensors_mut(&mut self) -> &mut SensorPanel {
        &mut self.sensors
    }

    /// Direct access to the permissive panel. Call [`Self::on_permissive_changed`] afterwards.
    pub fn permissives_mut(&mut self) -> &mut PermissivePanel {
        &mut self.permissives
    }

    /// Edit the sensor panel and notify in one step.
    pub fn update_sensors(&mut self, f: impl FnOnce(&mut SensorPanel)) {
        f(&mut self.sensors);
        self.on_sensor_changed();
    }

    /// Edit the permissive panel and notify in one step.
    pub fn update_permissives(&mut self, f: impl FnOnce(&mut PermissivePanel)) {
        f(&mut self.permissives);
        self.on_permissive_changed();
    }

    pub fn on_permissive_changed(&mut self) {
        self.react_to_environment();
    }

    pub fn on_sensor_changed(&mut self) {
        self.react_to_environment();
    }

    fn react_to_environment(&mut self) {
        let v = self.refresh_verdict();
        if self.mode == OperatingMode::Armed && !v.permissives_ok {
            self.abort_with(AbortReason::PermissiveDropped);
        } else if v.any_interlock() && (self.mode != OperatingMode::Idle || self.runner.running()) {
            self.abort_with(AbortReason::InterlockTripped);
        }
    }

    // ---- commands ----

    /// Back to a freshly initialized stand, from any mode.
    pub fn reset(&mut self) {
        self.runner.reset();
        self.mode = OperatingMode::Idle;
        self.estop = false;
        self.run_id = None;
        self.sensors = SensorPanel::default();
        self.permissives = PermissivePanel::default();
        self.display = SequenceDisplay::NotStarted;
        self.progress_pct = 0.0;
        self.last_abort = None;
        self.refresh_verdict();
        info!("stand reset");
        self.emit(
            Channel::Sys,
            Severity::State,
            "System reset to IDLE. All interlocks cleared.",
        );
    }

    pub fn arm(&mut self) -> Result<(), CommandError> {
        if self.mode != OperatingMode::Idle {
            return self.reject(CommandError::InvalidTransition {
                command: Command::Arm,
                mode: self.mode,
                required: OperatingMode::Idle,
            });
        }
        let v = self.refresh_verdict();
        self.check_guards(Command::Arm, v)?;

        self.mode = OperatingMode::Armed;
        if self.run_id.is_none() {
            self.run_id = Some(new_run_id(&mut self.rng));
        }
        info!(run_id = self.run_id.as_deref().unwrap_or_default(), "stand armed");
        self.emit(Channel::Arm, Severity::State, "System ARMED. Ready to start sequence.");
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), CommandError> {
        let v = self.refresh_verdict();
        self.check_guards(Command::Start, v)?;
        if self.mode != OperatingMode::Armed {
            return self.reject(CommandError::InvalidTransition {
                command: Command::Start,
                mode: self.mode,
                required: OperatingMode::Armed,
            });
        }

        self.mode = OperatingMode::Chilldown;
        self.emit(Channel::Seq, Severity::State, "Sequence initiated.");
        if self.run_id.is_none() {
            self.run_id = Some(new_run_id(&mut self.rng));
        }
        self.emit(Channel::Seq, Severity::Info, "Beginning automated test sequence.");

        let step = self.runner.start(StepContext {
            sensors: &mut self.sensors,
            permissives: &self.permissives,
            limits: &self.limits,
            estop: self.estop,
            now_ms: self.now_ms,
        });
        self.apply_step(step);
        Ok(())
    }

    pub fn abort(&mut self) {
        self.abort_with(AbortReason::Manual);
    }

    /// Latch the E-stop interlock, then abort.
    pub fn estop(&mut self) {
        self.estop = true;
        self.refresh_verdict();
        self.abort_with(AbortReason::EmergencyStop);
    }

    /// Inject one uniformly chosen fault. Returns the fault that was applied.
    pub fn fault_inject(&mut self) -> FaultKind {
        let kind = FaultKind::pick(&mut self.rng);
        self.inject_fault(kind);
        kind
    }

    pub fn inject_fault(&mut self, kind: FaultKind) {
        kind.apply(
            &self.limits.fault_targets(),
            &mut self.sensors,
            &mut self.permissives,
        );
        self.emit(
            Channel::Fault,
            Severity::Fault,
            format!("Injected fault: {}.", kind.describe()),
        );
        let v = self.refresh_verdict();
        if self.runner.running() && v.any_interlock() {
            self.abort_with(AbortReason::RandomFault);
        }
    }

    // ---- time ----

    /// Deliver a phase timer firing. Stale tokens are ignored.
    pub fn fire_timer(&mut self, token: TimerToken) {
        let outcome = self.runner.on_timer(
            token,
            self.mode == OperatingMode::Abort,
            StepContext {
                sensors: &mut self.sensors,
                permissives: &self.permissives,
                limits: &self.limits,
                estop: self.estop,
                now_ms: self.now_ms,
            },
        );
        match outcome {
            TimerOutcome::Stale => {}
            TimerOutcome::AbortRequested { verdict, reason } => {
                self.verdict = verdict;
                self.abort_with(reason);
            }
            TimerOutcome::Suppressed { verdict } => {
                self.verdict = verdict;
                debug!("phase advance suppressed, stand already aborted");
            }
            TimerOutcome::Advanced { verdict, step } => {
                self.verdict = verdict;
                self.apply_step(step);
            }
        }
    }

    /// Move the controller clock forward, firing every timer that falls due on the way.
    pub fn advance_clock(&mut self, delta_ms: u64) {
        let target = self.now_ms.saturating_add(delta_ms);
        while let Some(t) = self.runner.pending() {
            if t.due_at_ms > target {
                break;
            }
            self.now_ms = t.due_at_ms;
            self.fire_timer(t.token);
        }
        self.now_ms = target;
    }

    // ---- internals ----

    fn refresh_verdict(&mut self) -> Verdict {
        self.verdict = safety::evaluate(&self.limits, &self.sensors, &self.permissives, self.estop);
        self.verdict
    }

    fn check_guards(&mut self, command: Command, v: Verdict) -> Result<(), CommandError> {
        if v.ready() {
            return Ok(());
        }
        if !v.permissives_ok {
            return self.reject(CommandError::GuardRejected {
                command,
                guard: Guard::Permissives,
            });
        }
        self.reject(CommandError::GuardRejected {
            command,
            guard: Guard::Interlocks,
        })
    }

    fn reject(&mut self, err: CommandError) -> Result<(), CommandError> {
        let channel = match err {
            CommandError::GuardRejected { command: Command::Arm, .. }
            | CommandError::InvalidTransition { command: Command::Arm, .. } => Channel::Arm,
            _ => Channel::Seq,
        };
        debug!(error = %err, "command rejected");
        self.emit(channel, Severity::Info, format!("{err}."));
        Err(err)
    }

    fn apply_step(&mut self, step: StepOutcome) {
        match step {
            StepOutcome::Complete => {
                self.mode = OperatingMode::Idle;
                self.display = SequenceDisplay::Complete;
                self.progress_pct = 100.0;
                info!("sequence complete");
                self.emit(
                    Channel::Seq,
                    Severity::State,
                    "Sequence completed successfully. System returning to IDLE.",
                );
                self.refresh_verdict();
            }
            StepOutcome::Scheduled { phase, verdict, .. } => {
                self.enter_phase(phase);
                self.verdict = verdict;
            }
            StepOutcome::AbortRequested {
                phase,
                verdict,
                reason,
            } => {
                self.enter_phase(phase);
                self.verdict = verdict;
                self.abort_with(reason);
            }
        }
    }

    fn enter_phase(&mut self, phase: Phase) {
        self.mode = phase.into();
        self.display = SequenceDisplay::InPhase(phase);
        let total = self.runner.phases().len() as f64;
        self.progress_pct = (self.runner.current_step_index() + 1) as f64 / total * 100.0;
        let secs = phase.duration_ms() as f64 / 1000.0;
        self.emit(
            Channel::Seq,
            Severity::State,
            format!("Entering {phase} phase ({secs}s)."),
        );
    }

    fn abort_with(&mut self, reason: AbortReason) {
        if self.mode == OperatingMode::Abort {
            return;
        }
        self.mode = OperatingMode::Abort;
        self.runner.halt();
        self.display = SequenceDisplay::Aborted;
        self.progress_pct = 0.0;
        self.last_abort = Some(reason);
        warn!(%reason, "stand aborted");
        self.emit(Channel::Abort, Severity::Abort, format!("System ABORTED: {reason}"));
        self.refresh_verdict();
    }

    fn emit(&mut self, channel: Channel, severity: Severity, message: impl Into<String>) {
        let record = LogRecord {
            timestamp: Utc::now(),
            at_ms: self.now_ms,
            tag: LogTag::for_event(channel, severity),
            channel,
            severity,
            message: message.into(),
        };
        self.sink.record(&record);
    }
}

impl std::fmt::Debug for SafetyController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafetyController")
            .field("mode", &self.mode)
            .field("run_id", &self.run_id)
            .field("step", &self.runner.current_step_index())
            .field("estop", &self.estop)
            .field("verdict", &self.verdict)
            .field("now_ms", &self.now_ms)
            .finish_non_exhaustive()
    }
}
