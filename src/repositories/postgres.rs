use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use time::OffsetDateTime;

use super::{ExamStore, StoreError, StoreTx};
use crate::db::models::{Exam, ExamCode, ExamSubmission, Question, ViolationLog};
use crate::db::types::{ExamStatus, SubmissionStatus};

const EXAM_COLUMNS: &str = "\
    id, title, owner_id, question_bank_id, chapter_ids, total_questions, difficulty_config, \
    time_limit_minutes, max_attempts, show_answers_after_submit, anti_cheat_enabled, status, \
    start_time, end_time, created_at, updated_at";

const QUESTION_COLUMNS: &str = "\
    id, question_bank_id, chapter_id, content, options, correct_answer, difficulty, explanation";

const CODE_COLUMNS: &str = "id, exam_id, code, question_order, option_shuffle_map, created_at";

const SUBMISSION_COLUMNS: &str = "\
    id, exam_id, exam_code_id, student_id, attempt, started_at, submitted_at, status, answers, \
    total_score, correct_count, wrong_count, unanswered_count, manual_score, grader_note, \
    graded_by, graded_at, auto_submitted, version, created_at, updated_at";

const VIOLATION_COLUMNS: &str = "id, submission_id, kind, details, recorded_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExamStore for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }
}

struct PgTx {
    tx: Transaction<'static, Postgres>,
}

impl PgTx {
    async fn advisory_lock(&mut self, key: &str) -> Result<(), StoreError> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(key)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl StoreTx for PgTx {
    async fn lock_exam(&mut self, exam_id: &str) -> Result<(), StoreError> {
        self.advisory_lock(&format!("exam:{exam_id}")).await
    }

    async fn lock_exam_student(
        &mut self,
        exam_id: &str,
        student_id: &str,
    ) -> Result<(), StoreError> {
        self.advisory_lock(&format!("exam:{exam_id}:student:{student_id}")).await
    }

    async fn find_exam(&mut self, exam_id: &str) -> Result<Option<Exam>, StoreError> {
        let exam =
            sqlx::query_as::<_, Exam>(&format!("SELECT {EXAM_COLUMNS} FROM exams WHERE id = $1"))
                .bind(exam_id)
                .fetch_optional(&mut *self.tx)
                .await?;
        Ok(exam)
    }

    async fn update_exam_status(
        &mut self,
        exam_id: &str,
        status: ExamStatus,
        now: OffsetDateTime,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE exams SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(exam_id)
            .bind(status)
            .bind(now)
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Invariant(format!("exam {exam_id} missing")));
        }
        Ok(())
    }

    async fn list_bank_questions(
        &mut self,
        bank_id: &str,
        chapter_ids: &[String],
    ) -> Result<Vec<Question>, StoreError> {
        let questions = sqlx::query_as::<_, Question>(&format!(
            "SELECT {QUESTION_COLUMNS} FROM questions \
             WHERE question_bank_id = $1 \
               AND (cardinality($2::text[]) = 0 OR chapter_id = ANY($2)) \
             ORDER BY id"
        ))
        .bind(bank_id)
        .bind(chapter_ids)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(questions)
    }

    async fn find_questions(&mut self, ids: &[String]) -> Result<Vec<Question>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let questions = sqlx::query_as::<_, Question>(&format!(
            "SELECT {QUESTION_COLUMNS} FROM questions WHERE id = ANY($1)"
        ))
        .bind(ids)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(questions)
    }

    async fn list_codes(&mut self, exam_id: &str) -> Result<Vec<ExamCode>, StoreError> {
        let codes = sqlx::query_as::<_, ExamCode>(&format!(
            "SELECT {CODE_COLUMNS} FROM exam_codes WHERE exam_id = $1 ORDER BY code"
        ))
        .bind(exam_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(codes)
    }

    async fn find_code(&mut self, code_id: &str) -> Result<Option<ExamCode>, StoreError> {
        let code = sqlx::query_as::<_, ExamCode>(&format!(
            "SELECT {CODE_COLUMNS} FROM exam_codes WHERE id = $1"
        ))
        .bind(code_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(code)
    }

    async fn delete_codes(&mut self, exam_id: &str) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM exam_codes WHERE exam_id = $1")
            .bind(exam_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn insert_codes(&mut self, codes: &[ExamCode]) -> Result<(), StoreError> {
        for code in codes {
            sqlx::query(&format!(
                "INSERT INTO exam_codes ({CODE_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6)"
            ))
            .bind(&code.id)
            .bind(&code.exam_id)
            .bind(&code.code)
            .bind(&code.question_order)
            .bind(&code.option_shuffle_map)
            .bind(code.created_at)
            .execute(&mut *self.tx)
            .await?;
        }
        Ok(())
    }

    async fn count_exam_submissions(&mut self, exam_id: &str) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar(
            "SELECT COUNT(*) FROM exam_submissions s \
             JOIN exam_codes c ON c.id = s.exam_code_id \
             WHERE c.exam_id = $1",
        )
        .bind(exam_id)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(count)
    }

    async fn find_submission(&mut self, id: &str) -> Result<Option<ExamSubmission>, StoreError> {
        let submission = sqlx::query_as::<_, ExamSubmission>(&format!(
            "SELECT {SUBMISSION_COLUMNS} FROM exam_submissions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(submission)
    }

    async fn find_in_progress(
        &mut self,
        exam_id: &str,
        student_id: &str,
    ) -> Result<Option<ExamSubmission>, StoreError> {
        let submission = sqlx::query_as::<_, ExamSubmission>(&format!(
            "SELECT {SUBMISSION_COLUMNS} FROM exam_submissions \
             WHERE exam_id = $1 AND student_id = $2 AND status = $3"
        ))
        .bind(exam_id)
        .bind(student_id)
        .bind(SubmissionStatus::InProgress)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(submission)
    }

    async fn count_finalized(
        &mut self,
        exam_id: &str,
        student_id: &str,
    ) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar(
            "SELECT COUNT(*) FROM exam_submissions \
             WHERE exam_id = $1 AND student_id = $2 AND status IN ($3, $4)",
        )
        .bind(exam_id)
        .bind(student_id)
        .bind(SubmissionStatus::Submitted)
        .bind(SubmissionStatus::Graded)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(count)
    }

    async fn insert_submission(&mut self, submission: &ExamSubmission) -> Result<bool, StoreError> {
        let result = sqlx::query(&format!(
            "INSERT INTO exam_submissions ({SUBMISSION_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, \
                     $17, $18, $19, $20, $21) \
             ON CONFLICT (exam_id, student_id) WHERE status = 'in_progress' DO NOTHING"
        ))
        .bind(&submission.id)
        .bind(&submission.exam_id)
        .bind(&submission.exam_code_id)
        .bind(&submission.student_id)
        .bind(submission.attempt)
        .bind(submission.started_at)
        .bind(submission.submitted_at)
        .bind(submission.status)
        .bind(&submission.answers)
        .bind(submission.total_score)
        .bind(submission.correct_count)
        .bind(submission.wrong_count)
        .bind(submission.unanswered_count)
        .bind(submission.manual_score)
        .bind(&submission.grader_note)
        .bind(&submission.graded_by)
        .bind(submission.graded_at)
        .bind(submission.auto_submitted)
        .bind(submission.version)
        .bind(submission.created_at)
        .bind(submission.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_submission(
        &mut self,
        submission: &ExamSubmission,
        expected_version: i32,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE exam_submissions SET \
                submitted_at = $3, status = $4, answers = $5, total_score = $6, \
                correct_count = $7, wrong_count = $8, unanswered_count = $9, \
                manual_score = $10, grader_note = $11, graded_by = $12, graded_at = $13, \
                auto_submitted = $14, version = $15, updated_at = $16 \
             WHERE id = $1 AND version = $2",
        )
        .bind(&submission.id)
        .bind(expected_version)
        .bind(submission.submitted_at)
        .bind(submission.status)
        .bind(&submission.answers)
        .bind(submission.total_score)
        .bind(submission.correct_count)
        .bind(submission.wrong_count)
        .bind(submission.unanswered_count)
        .bind(submission.manual_score)
        .bind(&submission.grader_note)
        .bind(&submission.graded_by)
        .bind(submission.graded_at)
        .bind(submission.auto_submitted)
        .bind(submission.version)
        .bind(submission.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_expired(
        &mut self,
        now: OffsetDateTime,
        limit: i64,
    ) -> Result<Vec<ExamSubmission>, StoreError> {
        let submissions = sqlx::query_as::<_, ExamSubmission>(&format!(
            "SELECT {SUBMISSION_COLUMNS} FROM ( \
                 SELECT s.*, LEAST( \
                     s.started_at + make_interval(mins => e.time_limit_minutes), \
                     COALESCE(e.end_time, 'infinity'::timestamptz)) AS deadline \
                 FROM exam_submissions s JOIN exams e ON e.id = s.exam_id \
                 WHERE s.status = $1 \
             ) expiring \
             WHERE deadline <= $2 \
             ORDER BY deadline, id LIMIT $3"
        ))
        .bind(SubmissionStatus::InProgress)
        .bind(now)
        .bind(limit.clamp(1, 10_000))
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(submissions)
    }

    async fn insert_violation(&mut self, violation: &ViolationLog) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO violation_logs ({VIOLATION_COLUMNS}) VALUES ($1, $2, $3, $4, $5)"
        ))
        .bind(&violation.id)
        .bind(&violation.submission_id)
        .bind(violation.kind)
        .bind(&violation.details)
        .bind(violation.recorded_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn list_violations(
        &mut self,
        submission_id: &str,
    ) -> Result<Vec<ViolationLog>, StoreError> {
        let violations = sqlx::query_as::<_, ViolationLog>(&format!(
            "SELECT {VIOLATION_COLUMNS} FROM violation_logs \
             WHERE submission_id = $1 ORDER BY recorded_at, id"
        ))
        .bind(submission_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(violations)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}
