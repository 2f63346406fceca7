//! Timed sequence runner.
//!
//! The runner owns the phase index and the single pending phase timer. It never
//! touches the operating mode itself: every step returns an outcome that the
//! controller applies, so abort decisions stay in one place.

use safety::{InterlockLimits, Verdict};
use serde::Serialize;
use sim::{Phase, PermissivePanel, SensorPanel};
use tracing::debug;

use crate::AbortReason;

/// Identifies one scheduled phase timer. A firing whose token is not the
/// currently pending one is stale and ignored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct TimerToken(u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct PendingTimer {
    pub token: TimerToken,
    pub phase: Phase,
    pub due_at_ms: u64,
}

/// Everything a step needs to perturb the panel and re-evaluate it.
pub struct StepContext<'a> {
    pub sensors: &'a mut SensorPanel,
    pub permissives: &'a PermissivePanel,
    pub limits: &'a InterlockLimits,
    pub estop: bool,
    pub now_ms: u64,
}

impl StepContext<'_> {
    fn verdict(&self) -> Verdict {
        safety::evaluate(self.limits, &*self.sensors, self.permissives, self.estop)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StepOutcome {
    /// Phase entered, panel still clean, timer armed for the phase duration.
    Scheduled {
        phase: Phase,
        verdict: Verdict,
        timer: PendingTimer,
    },
    /// Phase entered but the drift tripped an interlock. No timer was scheduled.
    AbortRequested {
        phase: Phase,
        verdict: Verdict,
        reason: AbortReason,
    },
    /// Ran past the last phase.
    Complete,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TimerOutcome {
    /// Token was cancelled or superseded.
    Stale,
    AbortRequested { verdict: Verdict, reason: AbortReason },
    /// Interlocks clear but the stand was already aborted; abort wins.
    Suppressed { verdict: Verdict },
    Advanced { verdict: Verdict, step: StepOutcome },
}

#[derive(Clone, Debug)]
pub struct SequenceRunner {
    phases: Vec<Phase>,
    /// `None` until the first phase is entered.
    step: Option<usize>,
    running: bool,
    pending: Option<PendingTimer>,
    next_token: u64,
}

impl Default for SequenceRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl SequenceRunner {
    pub fn new() -> Self {
        Self {
            phases: Phase::SEQUENCE.to_vec(),
            step: None,
            running: false,
            pending: None,
            next_token: 0,
        }
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn running(&self) -> bool {
        self.running
    }

    /// -1 before the first phase, `phases().len()` once complete.
    pub fn current_step_index(&self) -> i32 {
        self.step.map_or(-1, |i| i as i32)
    }

    pub fn pending(&self) -> Option<PendingTimer> {
        self.pending
    }

    /// Begin the sequence. The caller has already checked the stand is armed.
    pub fn start(&mut self, ctx: StepContext<'_>) -> StepOutcome {
        self.cancel();
        self.step = None;
        self.running = true;
        self.advance(ctx)
    }

    /// Move to the next phase, or finish the sequence.
    pub fn advance(&mut self, ctx: StepContext<'_>) -> StepOutcome {
        let next = self.step.map_or(0, |i| i + 1);
        self.step = Some(next);

        let Some(&phase) = self.phases.get(next) else {
            self.running = false;
            self.pending = None;
            return StepOutcome::Complete;
        };

        phase.apply_drift(ctx.sensors);
        let verdict = ctx.verdict();
        if verdict.any_interlock() {
            return StepOutcome::AbortRequested {
                phase,
                verdict,
                reason: AbortReason::InterlockDuringPhase(phase),
            };
        }

        let timer = PendingTimer {
            token: TimerToken(self.next_token),
            phase,
            due_at_ms: ctx.now_ms.saturating_add(phase.duration_ms()),
        };
        self.next_token += 1;
        self.pending = Some(timer);
        debug!(phase = %phase, due_at_ms = timer.due_at_ms, "phase timer scheduled");

        StepOutcome::Scheduled {
            phase,
            verdict,
            timer,
        }
    }

    /// Continuation for a fired phase timer.
    ///
    /// Interlocks are re-checked first since conditions may have drifted during
    /// the wait; the abort check on `aborted` comes after that and before advancing.
    pub fn on_timer(&mut self, token: TimerToken, aborted: bool, ctx: StepContext<'_>) -> TimerOutcome {
        let timer = match self.pending {
            Some(t) if t.token == token => t,
            _ => {
                debug!(?token, "stale phase timer ignored");
                return TimerOutcome::Stale;
            }
        };
        self.pending = None;

        let verdict = ctx.verdict();
        if verdict.any_interlock() {
            return TimerOutcome::AbortRequested {
                verdict,
                reason: AbortReason::InterlockAtEndOfPhase(timer.phase),
            };
        }
        if aborted {
            return TimerOutcome::Suppressed { verdict };
        }

        let step = self.advance(ctx);
        TimerOutcome::Advanced { verdict, step }
    }

    /// Drop the pending timer, if any. Idempotent.
    pub fn cancel(&mut self) {
        if let Some(t) = self.pending.take() {
            debug!(phase = %t.phase, "phase timer cancelled");
        }
    }

    /// Cancel and mark the sequence as no longer running. Keeps the step index
    /// so the aborted phase stays visible.
    pub fn halt(&mut self) {
        self.cancel();
        self.running = false;
    }

    pub fn reset(&mut self) {
        self.halt();
        self.step = None;
    }
}
