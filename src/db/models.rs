use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use time::OffsetDateTime;

use crate::db::types::{Difficulty, ExamStatus, SubmissionStatus, ViolationKind};
use crate::services::shuffle::{OptionLabel, OptionSet, ShuffleMap};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Question {
    pub id: String,
    pub question_bank_id: String,
    pub chapter_id: String,
    pub content: String,
    pub options: Json<OptionSet>,
    pub correct_answer: OptionLabel,
    pub difficulty: Difficulty,
    pub explanation: Option<String>,
}

/// Required number of questions per difficulty tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DifficultyConfig {
    pub easy: u32,
    pub medium: u32,
    pub hard: u32,
}

impl DifficultyConfig {
    pub fn new(easy: u32, medium: u32, hard: u32) -> Self {
        Self { easy, medium, hard }
    }

    pub fn get(&self, tier: Difficulty) -> u32 {
        match tier {
            Difficulty::Easy => self.easy,
            Difficulty::Medium => self.medium,
            Difficulty::Hard => self.hard,
        }
    }

    pub fn total(&self) -> u32 {
        self.easy + self.medium + self.hard
    }

    pub fn tiers(&self) -> impl Iterator<Item = (Difficulty, u32)> + '_ {
        Difficulty::ALL.into_iter().map(|tier| (tier, self.get(tier)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Exam {
    pub id: String,
    pub title: String,
    pub owner_id: String,
    pub question_bank_id: String,
    pub chapter_ids: Json<Vec<String>>,
    pub total_questions: i32,
    pub difficulty_config: Option<Json<DifficultyConfig>>,
    pub time_limit_minutes: i32,
    pub max_attempts: i32,
    pub show_answers_after_submit: bool,
    pub anti_cheat_enabled: bool,
    pub status: ExamStatus,
    pub start_time: Option<OffsetDateTime>,
    pub end_time: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ExamCode {
    pub id: String,
    pub exam_id: String,
    pub code: String,
    pub question_order: Json<Vec<String>>,
    pub option_shuffle_map: Json<BTreeMap<String, ShuffleMap>>,
    pub created_at: OffsetDateTime,
}

impl ExamCode {
    pub fn shuffle_for(&self, question_id: &str) -> Option<&ShuffleMap> {
        self.option_shuffle_map.0.get(question_id)
    }

    pub fn contains_question(&self, question_id: &str) -> bool {
        self.question_order.0.iter().any(|id| id == question_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ExamSubmission {
    pub id: String,
    pub exam_id: String,
    pub exam_code_id: String,
    pub student_id: String,
    pub attempt: i32,
    pub started_at: OffsetDateTime,
    pub submitted_at: Option<OffsetDateTime>,
    pub status: SubmissionStatus,
    /// question id -> shuffled label chosen by the student.
    pub answers: Json<BTreeMap<String, OptionLabel>>,
    pub total_score: Option<f64>,
    pub correct_count: i32,
    pub wrong_count: i32,
    pub unanswered_count: i32,
    pub manual_score: Option<f64>,
    pub grader_note: Option<String>,
    pub graded_by: Option<String>,
    pub graded_at: Option<OffsetDateTime>,
    pub auto_submitted: bool,
    pub version: i32,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ViolationLog {
    pub id: String,
    pub submission_id: String,
    pub kind: ViolationKind,
    pub details: Option<String>,
    pub recorded_at: OffsetDateTime,
}
