use std::cell::RefCell;
use std::fmt;
use std::fs::File;
use std::io::{LineWriter, Write};
use std::path::Path;
use std::rc::Rc;

use log::{debug, error, info, warn};
use serde::Serialize;

#[derive(Debug, PartialEq, Eq, Copy, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChoreographyStep {
    ApproachPick,
    DescendToPick,
    Engage,
    LiftFromPick,
    ApproachDrop,
    DescendToDrop,
    Release,
    LiftFromDrop,
}

impl ChoreographyStep {
    pub const SEQUENCE: [ChoreographyStep; 8] = [
        ChoreographyStep::ApproachPick,
        ChoreographyStep::DescendToPick,
        ChoreographyStep::Engage,
        ChoreographyStep::LiftFromPick,
        ChoreographyStep::ApproachDrop,
        ChoreographyStep::DescendToDrop,
        ChoreographyStep::Release,
        ChoreographyStep::LiftFromDrop,
    ];

    pub fn describe(&self) -> &'static str {
        match self {
            ChoreographyStep::ApproachPick => "Moving above pick point",
            ChoreographyStep::DescendToPick => "Moving down to pick",
            ChoreographyStep::Engage => "Picking up block",
            ChoreographyStep::LiftFromPick => "Lifting block",
            ChoreographyStep::ApproachDrop => "Moving above drop point",
            ChoreographyStep::DescendToDrop => "Moving down to drop",
            ChoreographyStep::Release => "Dropping block",
            ChoreographyStep::LiftFromDrop => "Lifting after drop",
        }
    }
}

impl fmt::Display for ChoreographyStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

#[derive(Debug, PartialEq, Eq, Copy, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Leg {
    Transfer,
    Return,
}

impl Leg {
    pub fn past_tense(&self) -> &'static str {
        match self {
            Leg::Transfer => "transferred",
            Leg::Return => "returned",
        }
    }
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Leg::Transfer => f.write_str("transfer"),
            Leg::Return => f.write_str("return"),
        }
    }
}

/// Progress records emitted by the executor.  Every step that runs yields exactly one
/// `StepCompleted` or `StepFailed`.
#[derive(Debug, PartialEq, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ChoreographyEvent {
    LegStarted { leg: Leg, planned: usize },
    TaskStarted { leg: Leg, task_id: u32 },
    StepCompleted { leg: Leg, task_id: u32, step: ChoreographyStep },
    StepFailed { leg: Leg, task_id: u32, step: ChoreographyStep, error: String },
    FailSafeRelease { leg: Leg, task_id: u32, released: bool },
    TaskFinished { leg: Leg, task_id: u32, succeeded: bool },
    Interrupted { leg: Leg, task_id: u32, step: ChoreographyStep },
    LegFinished { leg: Leg, planned: usize, attempted: usize, succeeded: usize, elapsed_secs: f64 },
    Cooldown { secs: f64 },
    ReturnSkipped,
    EmergencyStop { released: bool },
}

pub trait EventSink {
    fn record(&mut self, event: &ChoreographyEvent);
}

/// Renders events as the operator-facing console log.
#[derive(Default)]
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn record(&mut self, event: &ChoreographyEvent) {
        match event {
            ChoreographyEvent::LegStarted { leg, planned } => {
                info!("=== Starting {leg} of {planned} blocks ===");
            }
            ChoreographyEvent::TaskStarted { leg, task_id } => info!("Handling block {task_id} ({leg}):"),
            ChoreographyEvent::StepCompleted { step, .. } => match step {
                ChoreographyStep::Engage | ChoreographyStep::Release => info!("  {step}..."),
                _ => debug!("  {step}... done"),
            },
            ChoreographyEvent::StepFailed { task_id, step, error, .. } => {
                warn!("  Error handling block {task_id} while {}: {error}", step.describe().to_lowercase());
            }
            ChoreographyEvent::FailSafeRelease { released: false, task_id, .. } => {
                error!("  Could not release end-effector after block {task_id} failed!");
            }
            ChoreographyEvent::FailSafeRelease { .. } => debug!("  End-effector released after failure"),
            ChoreographyEvent::TaskFinished { leg, task_id, succeeded: true } => {
                info!("  Block {task_id} {leg} completed successfully!");
            }
            ChoreographyEvent::TaskFinished { leg, task_id, succeeded: false } => {
                warn!("Failed to {leg} block {task_id}");
            }
            ChoreographyEvent::Interrupted { leg, task_id, step } => {
                warn!("Interrupted during {leg} of block {task_id} before: {step}");
            }
            ChoreographyEvent::LegFinished { leg, planned, attempted, succeeded, elapsed_secs } => {
                let verdict = if attempted < planned { "stopped" } else { "complete" };
                info!(
                    "=== {} {verdict}: {succeeded}/{planned} blocks {} in {elapsed_secs:.2}s ({attempted} attempted) ===",
                    capitalize(&leg.to_string()),
                    leg.past_tense());
            }
            ChoreographyEvent::Cooldown { secs } => info!("Pausing for {secs:.1} seconds before return operation..."),
            ChoreographyEvent::ReturnSkipped => {
                warn!("No blocks were transferred successfully. Skipping return operation.");
            }
            ChoreographyEvent::EmergencyStop { released } => {
                if *released {
                    warn!("!!! EMERGENCY STOP !!! End-effector released");
                } else {
                    error!("!!! EMERGENCY STOP !!! End-effector could not be released");
                }
            }
        }
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Writes one JSON object per line, for tooling that follows a run.
pub struct JsonLinesEventSink<W: Write> {
    writer: W,
}

impl JsonLinesEventSink<LineWriter<File>> {
    pub fn create(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let file = File::create(path)?;
        Ok(Self::new(LineWriter::new(file)))
    }
}

impl<W: Write> JsonLinesEventSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> EventSink for JsonLinesEventSink<W> {
    fn record(&mut self, event: &ChoreographyEvent) {
        let result = serde_json::to_writer(&mut self.writer, event)
            .map_err(std::io::Error::from)
            .and_then(|_| self.writer.write_all(b"\n"));
        if let Err(e) = result {
            warn!("Dropping event {event:?}: {e}");
        }
    }
}

#[derive(Default)]
pub struct FanOutEventSink {
    sinks: Vec<Box<dyn EventSink>>,
}

impl FanOutEventSink {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with(mut self, sink: impl EventSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }
}

impl EventSink for FanOutEventSink {
    fn record(&mut self, event: &ChoreographyEvent) {
        for sink in &mut self.sinks {
            sink.record(event);
        }
    }
}

/// Keeps every event in memory.  Clones share the same buffer.
#[derive(Clone, Default)]
pub struct RecordingEventSink {
    events: Rc<RefCell<Vec<ChoreographyEvent>>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn events(&self) -> Vec<ChoreographyEvent> {
        self.events.borrow().clone()
    }
}

impl EventSink for RecordingEventSink {
    fn record(&mut self, event: &ChoreographyEvent) {
        self.events.borrow_mut().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_lines_are_tagged_by_event() {
        let mut sink = JsonLinesEventSink::new(Vec::new());
        sink.record(&ChoreographyEvent::StepCompleted {
            leg: Leg::Return,
            task_id: 3,
            step: ChoreographyStep::DescendToDrop,
        });
        sink.record(&ChoreographyEvent::ReturnSkipped);

        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, vec![
            r#"{"event":"step_completed","leg":"return","task_id":3,"step":"descend_to_drop"}"#,
            r#"{"event":"return_skipped"}"#,
        ]);
    }

    #[test]
    fn fan_out_reaches_every_sink() {
        let first = RecordingEventSink::new();
        let second = RecordingEventSink::new();
        let mut sink = FanOutEventSink::new().with(first.clone()).with(LogEventSink).with(second.clone());
        sink.record(&ChoreographyEvent::Cooldown { secs: 3.0 });
        assert_eq!(first.events(), second.events());
        assert_eq!(first.events().len(), 1);
    }

    #[test]
    fn step_sequence_starts_and_ends_at_safe_height() {
        assert_eq!(ChoreographyStep::SEQUENCE.first(), Some(&ChoreographyStep::ApproachPick));
        assert_eq!(ChoreographyStep::SEQUENCE.last(), Some(&ChoreographyStep::LiftFromDrop));
        assert_eq!(Leg::Transfer.to_string(), "transfer");
        assert_eq!(capitalize("return"), "Return");
    }
}
