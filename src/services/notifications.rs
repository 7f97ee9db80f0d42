use serde::Serialize;
use tokio::sync::mpsc;

/// Lifecycle events handed to the surrounding system after the owning
/// transaction has committed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExamEvent {
    SubmissionCreated {
        submission_id: String,
        exam_id: String,
        student_id: String,
        attempt: i32,
    },
    SubmissionSubmitted {
        submission_id: String,
        exam_id: String,
        student_id: String,
        auto_submitted: bool,
        total_score: Option<f64>,
    },
    SubmissionGraded {
        submission_id: String,
        exam_id: String,
        student_id: String,
        manual_score: Option<f64>,
        graded_by: String,
    },
}

impl ExamEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SubmissionCreated { .. } => "submission_created",
            Self::SubmissionSubmitted { .. } => "submission_submitted",
            Self::SubmissionGraded { .. } => "submission_graded",
        }
    }
}

/// Fire-and-forget delivery. Implementations must not block.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: ExamEvent);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn publish(&self, event: ExamEvent) {
        match serde_json::to_string(&event) {
            Ok(payload) => tracing::info!(event = event.name(), %payload, "Exam event"),
            Err(err) => {
                tracing::warn!(event = event.name(), error = %err, "Failed to encode event")
            }
        }
    }
}

/// Forwards events to an unbounded channel drained by a delivery task.
#[derive(Debug, Clone)]
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<ExamEvent>,
}

impl ChannelEventSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ExamEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelEventSink {
    fn publish(&self, event: ExamEvent) {
        if let Err(err) = self.tx.send(event) {
            tracing::warn!(event = err.0.name(), "Event receiver dropped; event discarded");
        }
    }
}
