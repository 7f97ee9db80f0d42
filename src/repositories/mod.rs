//! Persistence seam for the exam engine.
//!
//! Every engine operation runs inside one [`StoreTx`]: reads, writes and the
//! per-key locks it takes are released together on commit or drop. Dropping a
//! transaction without calling [`StoreTx::commit`] discards its writes.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;

use crate::db::models::{Exam, ExamCode, ExamSubmission, Question, ViolationLog};
use crate::db::types::ExamStatus;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("store invariant violated: {0}")]
    Invariant(String),
}

#[async_trait]
pub trait ExamStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError>;
}

#[async_trait]
pub trait StoreTx: Send {
    /// Serializes code generation and status changes for one exam.
    async fn lock_exam(&mut self, exam_id: &str) -> Result<(), StoreError>;

    /// Serializes attempt lifecycle operations for one (exam, student) pair.
    async fn lock_exam_student(&mut self, exam_id: &str, student_id: &str)
        -> Result<(), StoreError>;

    async fn find_exam(&mut self, exam_id: &str) -> Result<Option<Exam>, StoreError>;

    async fn update_exam_status(
        &mut self,
        exam_id: &str,
        status: ExamStatus,
        now: OffsetDateTime,
    ) -> Result<(), StoreError>;

    /// Questions of a bank, restricted to `chapter_ids` unless it is empty.
    async fn list_bank_questions(
        &mut self,
        bank_id: &str,
        chapter_ids: &[String],
    ) -> Result<Vec<Question>, StoreError>;

    async fn find_questions(&mut self, ids: &[String]) -> Result<Vec<Question>, StoreError>;

    /// Codes of an exam ordered by label.
    async fn list_codes(&mut self, exam_id: &str) -> Result<Vec<ExamCode>, StoreError>;

    async fn find_code(&mut self, code_id: &str) -> Result<Option<ExamCode>, StoreError>;

    async fn delete_codes(&mut self, exam_id: &str) -> Result<u64, StoreError>;

    async fn insert_codes(&mut self, codes: &[ExamCode]) -> Result<(), StoreError>;

    /// Submissions referencing any code of the exam.
    async fn count_exam_submissions(&mut self, exam_id: &str) -> Result<i64, StoreError>;

    async fn find_submission(&mut self, id: &str) -> Result<Option<ExamSubmission>, StoreError>;

    async fn find_in_progress(
        &mut self,
        exam_id: &str,
        student_id: &str,
    ) -> Result<Option<ExamSubmission>, StoreError>;

    /// Submitted plus graded attempts of a student.
    async fn count_finalized(&mut self, exam_id: &str, student_id: &str)
        -> Result<i64, StoreError>;

    /// Returns false when another in-progress attempt already exists for the pair.
    async fn insert_submission(&mut self, submission: &ExamSubmission) -> Result<bool, StoreError>;

    /// Writes `submission` if the stored row still carries `expected_version`.
    async fn update_submission(
        &mut self,
        submission: &ExamSubmission,
        expected_version: i32,
    ) -> Result<bool, StoreError>;

    /// In-progress attempts whose deadline is at or before `now`, earliest deadline first.
    async fn list_expired(
        &mut self,
        now: OffsetDateTime,
        limit: i64,
    ) -> Result<Vec<ExamSubmission>, StoreError>;

    async fn insert_violation(&mut self, violation: &ViolationLog) -> Result<(), StoreError>;

    async fn list_violations(
        &mut self,
        submission_id: &str,
    ) -> Result<Vec<ViolationLog>, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
