use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{ExamStore, StoreError, StoreTx};
use crate::db::models::{Exam, ExamCode, ExamSubmission, Question, ViolationLog};
use crate::db::types::{ExamStatus, SubmissionStatus};
use crate::services::work_timing;

#[derive(Debug, Clone, Default)]
struct MemoryState {
    exams: BTreeMap<String, Exam>,
    questions: BTreeMap<String, Question>,
    codes: BTreeMap<String, ExamCode>,
    submissions: BTreeMap<String, ExamSubmission>,
    violations: Vec<ViolationLog>,
}

/// Process-local store. One transaction runs at a time, so the per-key
/// locks of the trait are satisfied by the global guard.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_exam(&self, exam: Exam) {
        self.state.lock().await.exams.insert(exam.id.clone(), exam);
    }

    pub async fn insert_questions(&self, questions: impl IntoIterator<Item = Question>) {
        let mut state = self.state.lock().await;
        for question in questions {
            state.questions.insert(question.id.clone(), question);
        }
    }

    pub async fn submissions_for(&self, exam_id: &str) -> Vec<ExamSubmission> {
        let state = self.state.lock().await;
        let mut items: Vec<_> =
            state.submissions.values().filter(|s| s.exam_id == exam_id).cloned().collect();
        items.sort_by_key(|s| (s.student_id.clone(), s.attempt));
        items
    }
}

#[async_trait]
impl ExamStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryTx { guard, staged }))
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn lock_exam(&mut self, _exam_id: &str) -> Result<(), StoreError> {
        Ok(())
    }

    async fn lock_exam_student(
        &mut self,
        _exam_id: &str,
        _student_id: &str,
    ) -> Result<(), StoreError> {
        Ok(())
    }

    async fn find_exam(&mut self, exam_id: &str) -> Result<Option<Exam>, StoreError> {
        Ok(self.staged.exams.get(exam_id).cloned())
    }

    async fn update_exam_status(
        &mut self,
        exam_id: &str,
        status: ExamStatus,
        now: OffsetDateTime,
    ) -> Result<(), StoreError> {
        let exam = self
            .staged
            .exams
            .get_mut(exam_id)
            .ok_or_else(|| StoreError::Invariant(format!("exam {exam_id} missing")))?;
        exam.status = status;
        exam.updated_at = now;
        Ok(())
    }

    async fn list_bank_questions(
        &mut self,
        bank_id: &str,
        chapter_ids: &[String],
    ) -> Result<Vec<Question>, StoreError> {
        Ok(self
            .staged
            .questions
            .values()
            .filter(|q| q.question_bank_id == bank_id)
            .filter(|q| chapter_ids.is_empty() || chapter_ids.contains(&q.chapter_id))
            .cloned()
            .collect())
    }

    async fn find_questions(&mut self, ids: &[String]) -> Result<Vec<Question>, StoreError> {
        Ok(ids.iter().filter_map(|id| self.staged.questions.get(id).cloned()).collect())
    }

    async fn list_codes(&mut self, exam_id: &str) -> Result<Vec<ExamCode>, StoreError> {
        let mut codes: Vec<_> =
            self.staged.codes.values().filter(|c| c.exam_id == exam_id).cloned().collect();
        codes.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(codes)
    }

    async fn find_code(&mut self, code_id: &str) -> Result<Option<ExamCode>, StoreError> {
        Ok(self.staged.codes.get(code_id).cloned())
    }

    async fn delete_codes(&mut self, exam_id: &str) -> Result<u64, StoreError> {
        let before = self.staged.codes.len();
        self.staged.codes.retain(|_, code| code.exam_id != exam_id);
        Ok((before - self.staged.codes.len()) as u64)
    }

    async fn insert_codes(&mut self, codes: &[ExamCode]) -> Result<(), StoreError> {
        for code in codes {
            let duplicate = self
                .staged
                .codes
                .values()
                .any(|existing| existing.exam_id == code.exam_id && existing.code == code.code);
            if duplicate || self.staged.codes.contains_key(&code.id) {
                return Err(StoreError::Invariant(format!(
                    "exam code {} already exists for exam {}",
                    code.code, code.exam_id
                )));
            }
            self.staged.codes.insert(code.id.clone(), code.clone());
        }
        Ok(())
    }

    async fn count_exam_submissions(&mut self, exam_id: &str) -> Result<i64, StoreError> {
        let staged = &self.staged;
        let count = staged
            .submissions
            .values()
            .filter(|s| staged.codes.get(&s.exam_code_id).is_some_and(|c| c.exam_id == exam_id))
            .count();
        Ok(count as i64)
    }

    async fn find_submission(&mut self, id: &str) -> Result<Option<ExamSubmission>, StoreError> {
        Ok(self.staged.submissions.get(id).cloned())
    }

    async fn find_in_progress(
        &mut self,
        exam_id: &str,
        student_id: &str,
    ) -> Result<Option<ExamSubmission>, StoreError> {
        Ok(self
            .staged
            .submissions
            .values()
            .find(|s| {
                s.exam_id == exam_id
                    && s.student_id == student_id
                    && s.status == SubmissionStatus::InProgress
            })
            .cloned())
    }

    async fn count_finalized(
        &mut self,
        exam_id: &str,
        student_id: &str,
    ) -> Result<i64, StoreError> {
        let count = self
            .staged
            .submissions
            .values()
            .filter(|s| {
                s.exam_id == exam_id && s.student_id == student_id && s.status.is_finalized()
            })
            .count();
        Ok(count as i64)
    }

    async fn insert_submission(&mut self, submission: &ExamSubmission) -> Result<bool, StoreError> {
        if self.staged.submissions.contains_key(&submission.id) {
            return Err(StoreError::Invariant(format!(
                "submission {} already exists",
                submission.id
            )));
        }
        if submission.status == SubmissionStatus::InProgress
            && self.find_in_progress(&submission.exam_id, &submission.student_id).await?.is_some()
        {
            return Ok(false);
        }
        self.staged.submissions.insert(submission.id.clone(), submission.clone());
        Ok(true)
    }

    async fn update_submission(
        &mut self,
        submission: &ExamSubmission,
        expected_version: i32,
    ) -> Result<bool, StoreError> {
        match self.staged.submissions.get_mut(&submission.id) {
            Some(stored) if stored.version == expected_version => {
                *stored = submission.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_expired(
        &mut self,
        now: OffsetDateTime,
        limit: i64,
    ) -> Result<Vec<ExamSubmission>, StoreError> {
        let exams = &self.staged.exams;
        let mut items: Vec<_> = self
            .staged
            .submissions
            .values()
            .filter(|s| s.status == SubmissionStatus::InProgress)
            .filter_map(|s| {
                let deadline = work_timing::attempt_deadline(exams.get(&s.exam_id)?, s.started_at);
                (deadline <= now).then(|| (deadline, s.clone()))
            })
            .collect();
        items.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));
        items.truncate(limit.max(0) as usize);
        Ok(items.into_iter().map(|(_, s)| s).collect())
    }

    async fn insert_violation(&mut self, violation: &ViolationLog) -> Result<(), StoreError> {
        self.staged.violations.push(violation.clone());
        Ok(())
    }

    async fn list_violations(
        &mut self,
        submission_id: &str,
    ) -> Result<Vec<ViolationLog>, StoreError> {
        Ok(self
            .staged
            .violations
            .iter()
            .filter(|v| v.submission_id == submission_id)
            .cloned()
            .collect())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTx { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }
}
