//! Progress reporting
//!
//! A run reports into a [`ProgressReporter`] from its orchestrating thread. All
//! methods have no-op defaults, so reporters implement only what they display.

use parking_lot::Mutex;
use std::fmt;

/// Major stages of a run, reported as each one completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunStage {
    Validate,
    BuildMesh,
    Initialize,
    Solve,
    Interpolate,
    PostProcess,
    Write,
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunStage::Validate => "validate",
            RunStage::BuildMesh => "build mesh",
            RunStage::Initialize => "initialize",
            RunStage::Solve => "solve",
            RunStage::Interpolate => "interpolate",
            RunStage::PostProcess => "post-process",
            RunStage::Write => "write",
        };
        f.write_str(name)
    }
}

/// Receives progress notifications from a run.
pub trait ProgressReporter: Send + Sync {
    /// Solver iteration progress within one solve.
    fn step(&self, _current: usize, _total: usize) {}

    /// Free-form status line.
    fn status(&self, _message: &str) {}

    /// Station-matching progress, 0 to 100.
    fn matching_progress(&self, _percent: u8) {}

    /// A stage finished successfully.
    fn stage_completed(&self, _stage: RunStage) {}
}

/// Reporter that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProgress;

impl ProgressReporter for NullProgress {}

/// Every notification received, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Step(usize, usize),
    Status(String),
    Matching(u8),
    Stage(RunStage),
}

/// Reporter that records notifications; used by tests and callers that poll.
#[derive(Debug, Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().clone()
    }

    pub fn matching_values(&self) -> Vec<u8> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::Matching(p) => Some(*p),
                _ => None,
            })
            .collect()
    }

    pub fn completed_stages(&self) -> Vec<RunStage> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::Stage(s) => Some(*s),
                _ => None,
            })
            .collect()
    }
}

impl ProgressReporter for RecordingProgress {
    fn step(&self, current: usize, total: usize) {
        self.events.lock().push(ProgressEvent::Step(current, total));
    }

    fn status(&self, message: &str) {
        self.events
            .lock()
            .push(ProgressEvent::Status(message.to_string()));
    }

    fn matching_progress(&self, percent: u8) {
        self.events.lock().push(ProgressEvent::Matching(percent));
    }

    fn stage_completed(&self, stage: RunStage) {
        self.events.lock().push(ProgressEvent::Stage(stage));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_keeps_order() {
        let rec = RecordingProgress::new();
        rec.status("meshing");
        rec.stage_completed(RunStage::BuildMesh);
        rec.matching_progress(10);
        rec.matching_progress(100);
        assert_eq!(rec.completed_stages(), vec![RunStage::BuildMesh]);
        assert_eq!(rec.matching_values(), vec![10, 100]);
        assert_eq!(rec.events().len(), 4);
        assert_eq!(RunStage::PostProcess.to_string(), "post-process");
    }
}
