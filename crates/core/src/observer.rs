//! Folding progress events into a display snapshot.

use serde::Serialize;

use crate::protocol::{EventKind, ProgressEvent};
use crate::types::JobId;

/// Stage reported before the first `stage_change` arrives.
pub const IDLE_STAGE: &str = "idle";

/// Message shown when a completion event carries none.
pub const DEFAULT_COMPLETE_MESSAGE: &str = "Generation complete";

/// Message stored when a failure event carries none.
pub const DEFAULT_ERROR_MESSAGE: &str = "Unknown error";

/// Current progress of one job as seen by a consumer.
///
/// `is_complete` and `is_error` only ever go from `false` to `true`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub job_id: Option<JobId>,
    pub stage: String,
    pub message: String,
    pub step: u32,
    pub total_steps: u32,
    pub progress_pct: f64,
    pub elapsed_sec: f64,
    pub eta_sec: f64,
    pub is_complete: bool,
    pub is_error: bool,
    pub error_message: Option<String>,
}

impl Default for ProgressSnapshot {
    fn default() -> Self {
        Self {
            job_id: None,
            stage: IDLE_STAGE.to_string(),
            message: String::new(),
            step: 0,
            total_steps: 0,
            progress_pct: 0.0,
            elapsed_sec: 0.0,
            eta_sec: 0.0,
            is_complete: false,
            is_error: false,
            error_message: None,
        }
    }
}

impl ProgressSnapshot {
    /// Empty snapshot bound to `job_id`.
    pub fn for_job(job_id: JobId) -> Self {
        Self {
            job_id: Some(job_id),
            ..Self::default()
        }
    }

    /// `true` once a terminal event has been folded in.
    pub fn is_finished(&self) -> bool {
        self.is_complete || self.is_error
    }

    /// Fold one event into the snapshot.
    pub fn apply(&mut self, event: &ProgressEvent) {
        if self.job_id.is_none() {
            self.job_id = Some(event.job_id.clone());
        }

        match &event.kind {
            EventKind::StageChange { stage, message } => {
                if !stage.is_empty() {
                    self.stage.clone_from(stage);
                }
                self.message.clone_from(message);
            }
            EventKind::StepComplete {
                step,
                total_steps,
                progress_pct,
                elapsed_sec,
                eta_sec,
            } => {
                self.step = *step;
                if *total_steps > 0 {
                    self.total_steps = *total_steps;
                }
                self.progress_pct = *progress_pct;
                self.elapsed_sec = *elapsed_sec;
                self.eta_sec = *eta_sec;
            }
            EventKind::Completed {
                message,
                elapsed_sec,
            } => {
                self.is_complete = true;
                self.progress_pct = 100.0;
                self.message = if message.is_empty() {
                    DEFAULT_COMPLETE_MESSAGE.to_string()
                } else {
                    message.clone()
                };
                if *elapsed_sec > 0.0 {
                    self.elapsed_sec = *elapsed_sec;
                }
            }
            EventKind::Failed { message } => {
                self.is_error = true;
                self.error_message = Some(if message.is_empty() {
                    DEFAULT_ERROR_MESSAGE.to_string()
                } else {
                    message.clone()
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> JobId {
        JobId::parse("job-42").unwrap()
    }

    fn event(kind: EventKind) -> ProgressEvent {
        ProgressEvent::new(job(), kind)
    }

    fn step(step: u32, total_steps: u32, progress_pct: f64) -> ProgressEvent {
        event(EventKind::StepComplete {
            step,
            total_steps,
            progress_pct,
            elapsed_sec: 1.0,
            eta_sec: 3.0,
        })
    }

    #[test]
    fn starts_idle() {
        let snapshot = ProgressSnapshot::default();
        assert_eq!(snapshot.stage, "idle");
        assert!(!snapshot.is_finished());
    }

    #[test]
    fn stage_change_updates_stage_and_message_only() {
        let mut snapshot = ProgressSnapshot::default();
        snapshot.apply(&step(3, 10, 30.0));
        snapshot.apply(&event(EventKind::StageChange {
            stage: "saving".into(),
            message: "Writing PNG".into(),
        }));

        assert_eq!(snapshot.stage, "saving");
        assert_eq!(snapshot.message, "Writing PNG");
        assert_eq!(snapshot.step, 3);
        assert_eq!(snapshot.progress_pct, 30.0);
    }

    #[test]
    fn empty_stage_keeps_previous() {
        let mut snapshot = ProgressSnapshot::default();
        snapshot.apply(&event(EventKind::StageChange {
            stage: "generating".into(),
            message: String::new(),
        }));
        snapshot.apply(&event(EventKind::StageChange {
            stage: String::new(),
            message: "still going".into(),
        }));
        assert_eq!(snapshot.stage, "generating");
        assert_eq!(snapshot.message, "still going");
    }

    #[test]
    fn step_complete_updates_numeric_fields() {
        let mut snapshot = ProgressSnapshot::default();
        snapshot.apply(&step(5, 20, 25.0));

        assert_eq!(snapshot.step, 5);
        assert_eq!(snapshot.total_steps, 20);
        assert_eq!(snapshot.progress_pct, 25.0);
        assert_eq!(snapshot.elapsed_sec, 1.0);
        assert_eq!(snapshot.eta_sec, 3.0);
        assert_eq!(snapshot.job_id, Some(job()));
    }

    #[test]
    fn generating_then_step_then_complete_scenario() {
        let mut snapshot = ProgressSnapshot::default();
        snapshot.apply(&event(EventKind::StageChange {
            stage: "generating".into(),
            message: String::new(),
        }));
        snapshot.apply(&step(5, 20, 25.0));
        snapshot.apply(&event(EventKind::Completed {
            message: "done".into(),
            elapsed_sec: 4.0,
        }));

        assert_eq!(snapshot.stage, "generating");
        assert_eq!(snapshot.step, 5);
        assert_eq!(snapshot.total_steps, 20);
        assert_eq!(snapshot.progress_pct, 100.0);
        assert!(snapshot.is_complete);
        assert!(!snapshot.is_error);
        assert_eq!(snapshot.message, "done");
    }

    #[test]
    fn failure_sets_error_and_message() {
        let mut snapshot = ProgressSnapshot::default();
        snapshot.apply(&event(EventKind::Failed {
            message: "out of memory".into(),
        }));
        assert!(snapshot.is_error);
        assert_eq!(snapshot.error_message.as_deref(), Some("out of memory"));

        let mut blank = ProgressSnapshot::default();
        blank.apply(&event(EventKind::Failed {
            message: String::new(),
        }));
        assert_eq!(blank.error_message.as_deref(), Some("Unknown error"));
    }

    #[test]
    fn terminal_flags_are_monotonic() {
        let mut snapshot = ProgressSnapshot::default();
        snapshot.apply(&event(EventKind::Completed {
            message: String::new(),
            elapsed_sec: 0.0,
        }));
        snapshot.apply(&step(1, 20, 5.0));
        snapshot.apply(&event(EventKind::StageChange {
            stage: "initializing".into(),
            message: String::new(),
        }));

        assert!(snapshot.is_complete);
        assert_eq!(snapshot.message, "");

        snapshot.apply(&event(EventKind::Failed {
            message: "late".into(),
        }));
        assert!(snapshot.is_complete);
        assert!(snapshot.is_error);
    }
}
