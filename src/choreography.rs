use std::time::{Duration, Instant};

use derive_new::new;
use log::{error, info, warn};
use thiserror::Error;

use crate::arm_hal::{ArmHal, ArmResult, Waypoint};
use crate::block_task::{reverse_tasks, BlockTask};
use crate::choreography_events::{ChoreographyEvent, ChoreographyStep, EventSink, Leg};
use crate::end_effector::EndEffectorKind;
use crate::stop_signal::StopSignal;

/// Heights and pauses shared by every task in a run.
#[derive(Debug, PartialEq, Clone, new)]
pub struct MotionProfile {
    pub safe_height: f64,
    pub default_rotation: f64,
    pub motion_settle: Duration,
    pub actuation_settle: Duration,
    pub leg_cooldown: Duration,
    pub park: Option<Waypoint>,
}

impl MotionProfile {
    /// Simulated arms don't need to wait for anything.
    pub fn without_delays(self) -> Self {
        Self {
            motion_settle: Duration::ZERO,
            actuation_settle: Duration::ZERO,
            leg_cooldown: Duration::ZERO,
            ..self
        }
    }
}

#[derive(Debug, PartialEq, Copy, Clone)]
pub enum StepAction {
    Move(Waypoint),
    Actuate(bool),
}

/// What the arm has to do for `step` of `task`.
pub fn plan_step(step: ChoreographyStep, task: &BlockTask, profile: &MotionProfile) -> StepAction {
    let rot = profile.default_rotation;
    let safe = profile.safe_height;
    let pick = task.pick_point();
    let drop = task.drop_point();
    match step {
        ChoreographyStep::ApproachPick => StepAction::Move(pick.at_height(safe, rot)),
        ChoreographyStep::DescendToPick => StepAction::Move(pick.resolve(rot)),
        ChoreographyStep::Engage => StepAction::Actuate(true),
        ChoreographyStep::LiftFromPick => StepAction::Move(pick.at_height(safe, rot)),
        ChoreographyStep::ApproachDrop => StepAction::Move(drop.at_height(safe, rot)),
        ChoreographyStep::DescendToDrop => StepAction::Move(drop.resolve(rot)),
        ChoreographyStep::Release => StepAction::Actuate(false),
        ChoreographyStep::LiftFromDrop => StepAction::Move(drop.at_height(safe, rot)),
    }
}

/// An operator stop.  `partial` holds the results of every leg that ran up to the stop, the
/// interrupted leg last.
#[derive(Error, Debug, PartialEq)]
pub enum ChoreographyError {
    #[error("interrupted during {leg} of block {task_id} before: {step}")]
    Interrupted { leg: Leg, task_id: u32, step: ChoreographyStep, partial: Vec<RunResult> },
    #[error("interrupted after the last block of the {leg}")]
    InterruptedAfterLeg { leg: Leg, partial: Vec<RunResult> },
    #[error("interrupted while pausing before the return leg")]
    InterruptedDuringCooldown { partial: Vec<RunResult> },
}

impl ChoreographyError {
    pub fn partial_results(&self) -> &[RunResult] {
        match self {
            ChoreographyError::Interrupted { partial, .. }
            | ChoreographyError::InterruptedAfterLeg { partial, .. }
            | ChoreographyError::InterruptedDuringCooldown { partial } => partial,
        }
    }

    fn partial_results_mut(&mut self) -> &mut Vec<RunResult> {
        match self {
            ChoreographyError::Interrupted { partial, .. }
            | ChoreographyError::InterruptedAfterLeg { partial, .. }
            | ChoreographyError::InterruptedDuringCooldown { partial } => partial,
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct RunResult {
    pub leg: Leg,
    pub planned: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed_ids: Vec<u32>,
    pub elapsed: Duration,
}

impl RunResult {
    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }

    pub fn all_succeeded(&self) -> bool {
        self.succeeded == self.planned
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum RoundTripOutcome {
    Completed { forward: RunResult, back: RunResult, elapsed: Duration },
    /// Nothing made it across, so there was nothing to bring back.
    ReturnSkipped { forward: RunResult },
}

impl RoundTripOutcome {
    pub fn forward(&self) -> &RunResult {
        match self {
            RoundTripOutcome::Completed { forward, .. } => forward,
            RoundTripOutcome::ReturnSkipped { forward } => forward,
        }
    }

    pub fn back(&self) -> Option<&RunResult> {
        match self {
            RoundTripOutcome::Completed { back, .. } => Some(back),
            RoundTripOutcome::ReturnSkipped { .. } => None,
        }
    }

    pub fn all_succeeded(&self) -> bool {
        match self {
            RoundTripOutcome::Completed { forward, back, .. } => forward.all_succeeded() && back.all_succeeded(),
            RoundTripOutcome::ReturnSkipped { .. } => false,
        }
    }
}

pub struct ExecutorArgs {
    pub hal: Box<dyn ArmHal>,
    pub profile: MotionProfile,
    pub stop: StopSignal,
    pub sink: Box<dyn EventSink>,
    pub end_effector: EndEffectorKind,
}

/// Drives one arm through the pick-and-place sequence for each task it is handed.  Owns the HAL
/// and releases it (disengage, park, close) exactly once, at the latest when dropped.
pub struct ChoreographyExecutor {
    hal: Box<dyn ArmHal>,
    profile: MotionProfile,
    stop: StopSignal,
    sink: Box<dyn EventSink>,
    end_effector: EndEffectorKind,
    shut_down: bool,
}

impl ChoreographyExecutor {
    pub fn new(args: ExecutorArgs) -> Self {
        Self {
            hal: args.hal,
            profile: args.profile,
            stop: args.stop,
            sink: args.sink,
            end_effector: args.end_effector,
            shut_down: false,
        }
    }

    /// Disengages the end-effector, e.g. right after connecting in case a previous run left it on.
    pub fn release_end_effector(&mut self) -> ArmResult<()> {
        self.hal.set_end_effector(false)?;
        info!("{}", self.end_effector.released_message());
        Ok(())
    }

    /// Runs the full sequence for `task`.  A failing step fails only this task: the end-effector
    /// is released once and `Ok(false)` comes back.  Only an operator stop is an error.
    pub fn run_one(&mut self, leg: Leg, task: &BlockTask) -> Result<bool, ChoreographyError> {
        let task_id = task.id();
        self.emit(ChoreographyEvent::TaskStarted { leg, task_id });

        for step in ChoreographyStep::SEQUENCE {
            if self.stop.is_triggered() {
                self.emit(ChoreographyEvent::Interrupted { leg, task_id, step });
                self.emergency_stop();
                return Err(ChoreographyError::Interrupted { leg, task_id, step, partial: Vec::new() });
            }

            match self.perform(step, task) {
                Ok(()) => self.emit(ChoreographyEvent::StepCompleted { leg, task_id, step }),
                Err(e) => {
                    self.emit(ChoreographyEvent::StepFailed { leg, task_id, step, error: e.to_string() });
                    let released = match self.hal.set_end_effector(false) {
                        Ok(()) => true,
                        Err(e) => {
                            error!("Fail-safe release for block {task_id} failed: {e}");
                            false
                        }
                    };
                    self.emit(ChoreographyEvent::FailSafeRelease { leg, task_id, released });
                    self.emit(ChoreographyEvent::TaskFinished { leg, task_id, succeeded: false });
                    return Ok(false);
                }
            }
        }

        self.emit(ChoreographyEvent::TaskFinished { leg, task_id, succeeded: true });
        Ok(true)
    }

    /// Attempts every task in order, regardless of earlier failures.  On a stop the task that was
    /// underway counts as failed, unless it had not moved yet.
    pub fn run_all(&mut self, leg: Leg, tasks: &[BlockTask]) -> Result<RunResult, ChoreographyError> {
        let start = Instant::now();
        self.emit(ChoreographyEvent::LegStarted { leg, planned: tasks.len() });

        let mut result = RunResult {
            leg,
            planned: tasks.len(),
            attempted: 0,
            succeeded: 0,
            failed_ids: Vec::new(),
            elapsed: Duration::ZERO,
        };
        for task in tasks {
            match self.run_one(leg, task) {
                Ok(true) => result.succeeded += 1,
                Ok(false) => result.failed_ids.push(task.id()),
                Err(mut e) => {
                    if let ChoreographyError::Interrupted { step, .. } = &e {
                        if *step != ChoreographyStep::ApproachPick {
                            result.attempted += 1;
                            result.failed_ids.push(task.id());
                        }
                    }
                    warn!("Stopping {leg} after {} of {} blocks", result.attempted, tasks.len());
                    self.finish_leg(&mut result, start);
                    e.partial_results_mut().push(result);
                    return Err(e);
                }
            }
            result.attempted += 1;
        }

        self.finish_leg(&mut result, start);
        // Stopped during the pause after the final step.
        if self.stop.is_triggered() {
            self.emergency_stop();
            return Err(ChoreographyError::InterruptedAfterLeg { leg, partial: vec![result] });
        }
        Ok(result)
    }

    /// Transfers every block, then brings back the ones that can be brought back.  The return leg
    /// is skipped entirely when no block made it across.
    pub fn run_round_trip(&mut self, tasks: &[BlockTask]) -> Result<RoundTripOutcome, ChoreographyError> {
        let start = Instant::now();
        let forward = self.run_all(Leg::Transfer, tasks)?;
        if forward.succeeded == 0 {
            self.emit(ChoreographyEvent::ReturnSkipped);
            return Ok(RoundTripOutcome::ReturnSkipped { forward });
        }

        self.emit(ChoreographyEvent::Cooldown { secs: self.profile.leg_cooldown.as_secs_f64() });
        if !self.stop.sleep(self.profile.leg_cooldown) {
            self.emergency_stop();
            return Err(ChoreographyError::InterruptedDuringCooldown { partial: vec![forward] });
        }

        let back = match self.run_all(Leg::Return, &reverse_tasks(tasks)) {
            Ok(back) => back,
            Err(mut e) => {
                e.partial_results_mut().insert(0, forward);
                return Err(e);
            }
        };
        Ok(RoundTripOutcome::Completed { forward, back, elapsed: start.elapsed() })
    }

    /// Drops whatever is held.  Safe to call any number of times and never fails.
    pub fn emergency_stop(&mut self) {
        let released = match self.hal.set_end_effector(false) {
            Ok(()) => true,
            Err(e) => {
                error!("Emergency release failed: {e}");
                false
            }
        };
        self.emit(ChoreographyEvent::EmergencyStop { released });
    }

    /// Moves to the configured park pose, if any.  Returns false only if the move failed.
    pub fn park(&mut self) -> bool {
        let target = match self.profile.park {
            Some(target) => target,
            None => return true,
        };
        info!("Moving to safe position {target}...");
        match self.hal.move_to(target) {
            Ok(()) => true,
            Err(e) => {
                warn!("Could not reach safe position: {e}");
                false
            }
        }
    }

    /// Disengage, park, close.  Only the first call does anything.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        info!("Disconnecting from Dobot...");
        if let Err(e) = self.release_end_effector() {
            warn!("Could not release end-effector: {e}");
        }
        self.park();
        match self.hal.close() {
            Ok(()) => info!("Disconnected from Dobot"),
            Err(e) => warn!("Error while disconnecting: {e}"),
        }
    }

    fn perform(&mut self, step: ChoreographyStep, task: &BlockTask) -> ArmResult<()> {
        let settle = match plan_step(step, task, &self.profile) {
            StepAction::Move(target) => {
                self.hal.move_to(target)?;
                self.profile.motion_settle
            }
            StepAction::Actuate(engaged) => {
                self.hal.set_end_effector(engaged)?;
                self.profile.actuation_settle
            }
        };
        // A stop during the pause is picked up before the next step.
        self.stop.sleep(settle);
        Ok(())
    }

    fn finish_leg(&mut self, result: &mut RunResult, start: Instant) {
        result.elapsed = start.elapsed();
        self.emit(ChoreographyEvent::LegFinished {
            leg: result.leg,
            planned: result.planned,
            attempted: result.attempted,
            succeeded: result.succeeded,
            elapsed_secs: result.elapsed_seconds(),
        });
    }

    fn emit(&mut self, event: ChoreographyEvent) {
        self.sink.record(&event);
    }
}

impl Drop for ChoreographyExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
