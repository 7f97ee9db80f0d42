use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core::time::format_offset;
use crate::db::models::ExamSubmission;
use crate::db::types::{SubmissionStatus, ViolationKind};
use crate::services::shuffle::{OptionLabel, PresentedOption};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SaveAnswerRequest {
    #[serde(alias = "questionId")]
    #[validate(length(min = 1, message = "question_id must not be empty"))]
    pub question_id: String,
    #[validate(length(min = 1, max = 8, message = "answer must be an option label"))]
    pub answer: String,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct SubmitRequest {
    /// Answers the client had not saved yet: question id -> shuffled label.
    #[serde(default)]
    pub answers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct GradeRequest {
    #[validate(range(min = 0.0, message = "score must be non-negative"))]
    pub score: f64,
    #[serde(default)]
    #[validate(length(max = 4000, message = "note is too long"))]
    pub note: Option<String>,
    #[serde(default, alias = "expectedVersion")]
    pub expected_version: Option<i32>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ViolationRequest {
    pub kind: ViolationKind,
    #[serde(default)]
    pub details: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PresentedQuestion {
    pub question_id: String,
    pub position: usize,
    pub content: String,
    pub options: Vec<PresentedOption>,
    pub selected: Option<OptionLabel>,
}

/// The student's paper: shuffled questions without the answer key.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptView {
    pub submission_id: String,
    pub exam_id: String,
    pub exam_code: String,
    pub attempt: i32,
    pub status: SubmissionStatus,
    pub started_at: String,
    pub deadline: String,
    pub remaining_seconds: i64,
    pub resumed: bool,
    pub questions: Vec<PresentedQuestion>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SaveAnswerAck {
    pub submission_id: String,
    pub question_id: String,
    pub answer: OptionLabel,
    pub remaining_seconds: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreSource {
    Computed,
    Manual,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoreSummary {
    pub submission_id: String,
    pub exam_id: String,
    pub attempt: i32,
    pub status: SubmissionStatus,
    pub submitted_at: Option<String>,
    pub auto_submitted: bool,
    pub correct_count: i32,
    pub wrong_count: i32,
    pub unanswered_count: i32,
    pub total_score: Option<f64>,
    pub manual_score: Option<f64>,
    pub grader_note: Option<String>,
    pub score_source: ScoreSource,
    pub version: i32,
}

impl ScoreSummary {
    /// The score reporting surfaces should treat as final.
    pub fn authoritative_score(&self) -> Option<f64> {
        match self.score_source {
            ScoreSource::Manual => self.manual_score,
            ScoreSource::Computed => self.total_score,
        }
    }
}

impl From<&ExamSubmission> for ScoreSummary {
    fn from(submission: &ExamSubmission) -> Self {
        let score_source = if submission.manual_score.is_some() {
            ScoreSource::Manual
        } else {
            ScoreSource::Computed
        };
        Self {
            submission_id: submission.id.clone(),
            exam_id: submission.exam_id.clone(),
            attempt: submission.attempt,
            status: submission.status,
            submitted_at: submission.submitted_at.map(format_offset),
            auto_submitted: submission.auto_submitted,
            correct_count: submission.correct_count,
            wrong_count: submission.wrong_count,
            unanswered_count: submission.unanswered_count,
            total_score: submission.total_score,
            manual_score: submission.manual_score,
            grader_note: submission.grader_note.clone(),
            score_source,
            version: submission.version,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestionResult {
    pub question_id: String,
    pub position: usize,
    pub content: String,
    pub options: Vec<PresentedOption>,
    pub student_answer: Option<OptionLabel>,
    /// Correct option in this code's shuffled frame.
    pub correct_answer: Option<OptionLabel>,
    pub is_correct: bool,
    pub explanation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "visibility", content = "questions", rename_all = "lowercase")]
pub enum ResultDetail {
    Revealed(Vec<QuestionResult>),
    Hidden,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmissionResult {
    pub summary: ScoreSummary,
    pub detail: ResultDetail,
}
