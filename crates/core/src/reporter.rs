//! Emitter-side helper that builds the events of one job run.
//!
//! [`ProgressReporter`] tracks the step counter and wall-clock start of a
//! run so emitters only report "step N done" and get percentage, elapsed
//! time and ETA filled in. It refuses to build anything after the terminal
//! event, which keeps the one-terminal-event-per-job rule on the sending
//! side too.

use std::time::{Duration, Instant};

use crate::protocol::{EventKind, ProgressEvent};
use crate::types::JobId;

/// Builds the progress events of a single job.
#[derive(Debug)]
pub struct ProgressReporter {
    job_id: JobId,
    total_steps: u32,
    started: Instant,
    finished: bool,
}

impl ProgressReporter {
    pub fn new(job_id: JobId, total_steps: u32) -> Self {
        Self {
            job_id,
            total_steps,
            started: Instant::now(),
            finished: false,
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// The job entered a new named phase.
    pub fn stage(&self, stage: &str, message: &str) -> Option<ProgressEvent> {
        self.build(EventKind::StageChange {
            stage: stage.to_string(),
            message: message.to_string(),
        })
    }

    /// Step `step` of the run finished, timed from the reporter's creation.
    pub fn step(&self, step: u32) -> Option<ProgressEvent> {
        self.step_after(step, self.started.elapsed())
    }

    /// Step `step` finished `elapsed` after the run started.
    pub fn step_after(&self, step: u32, elapsed: Duration) -> Option<ProgressEvent> {
        let step = step.min(self.total_steps);
        let progress_pct = if self.total_steps > 0 {
            f64::from(step) / f64::from(self.total_steps) * 100.0
        } else {
            0.0
        };
        let elapsed_sec = elapsed.as_secs_f64();
        let eta_sec = if step > 0 {
            elapsed_sec / f64::from(step) * f64::from(self.total_steps - step)
        } else {
            0.0
        };

        self.build(EventKind::StepComplete {
            step,
            total_steps: self.total_steps,
            progress_pct: round2(progress_pct),
            elapsed_sec: round2(elapsed_sec),
            eta_sec: round2(eta_sec),
        })
    }

    /// Terminal success. Returns `None` if the run already finished.
    pub fn complete(&mut self, message: &str) -> Option<ProgressEvent> {
        let elapsed_sec = round2(self.started.elapsed().as_secs_f64());
        self.finish(EventKind::Completed {
            message: message.to_string(),
            elapsed_sec,
        })
    }

    /// Terminal failure. Returns `None` if the run already finished.
    pub fn fail(&mut self, message: &str) -> Option<ProgressEvent> {
        self.finish(EventKind::Failed {
            message: message.to_string(),
        })
    }

    fn finish(&mut self, kind: EventKind) -> Option<ProgressEvent> {
        let event = self.build(kind)?;
        self.finished = true;
        Some(event)
    }

    fn build(&self, kind: EventKind) -> Option<ProgressEvent> {
        if self.finished {
            return None;
        }
        Some(ProgressEvent::new(self.job_id.clone(), kind))
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
