//! Background auto-submit for attempts nobody touched after their deadline.
//!
//! The student's own next call finalizes an expired attempt as well; the sweep
//! only bounds how long a stale `in_progress` row can linger.

use std::collections::BTreeMap;

use time::OffsetDateTime;

use crate::core::state::EngineState;
use crate::db::models::ExamSubmission;
use crate::db::types::SubmissionStatus;
use crate::errors::ExamError;
use crate::services::submissions::{self, FinalizeMode};
use crate::services::work_timing;

async fn close_if_expired(
    state: &EngineState,
    submission_id: &str,
    now: OffsetDateTime,
) -> Result<Option<ExamSubmission>, ExamError> {
    let mut tx = state.store().begin().await?;
    let Some(unlocked) = tx.find_submission(submission_id).await? else {
        return Ok(None);
    };
    tx.lock_exam_student(&unlocked.exam_id, &unlocked.student_id).await?;

    let Some(submission) = tx.find_submission(submission_id).await? else {
        return Ok(None);
    };
    if submission.status != SubmissionStatus::InProgress {
        return Ok(None);
    }
    let exam = submissions::load_exam(&mut *tx, &submission.exam_id).await?;
    if !work_timing::is_expired(&exam, submission.started_at, now) {
        return Ok(None);
    }

    let (code, questions) = submissions::load_paper(&mut *tx, &submission).await?;
    let submission = submissions::finalize(
        &mut *tx,
        state,
        &code,
        &questions,
        submission,
        BTreeMap::new(),
        FinalizeMode::Auto,
        now,
    )
    .await?;
    tx.commit().await?;

    Ok(Some(submission))
}

/// Auto-submits expired in-progress attempts, earliest deadline first, one
/// transaction per attempt. Returns how many were closed.
pub async fn sweep_expired(state: &EngineState) -> Result<usize, ExamError> {
    let now = state.clock().now();
    let batch_size = state.settings().exam().sweep_batch_size;

    let candidates = {
        let mut tx = state.store().begin().await?;
        tx.list_expired(now, batch_size).await?
    };

    let mut closed = 0;
    for candidate in &candidates {
        match close_if_expired(state, &candidate.id, now).await {
            Ok(Some(submission)) => {
                submissions::after_finalize(state, &submission, FinalizeMode::Auto);
                closed += 1;
            }
            Ok(None) => {}
            Err(err) => {
                tracing::error!(
                    submission_id = %candidate.id,
                    error = %err,
                    "Failed to auto-submit expired attempt"
                );
            }
        }
    }

    metrics::counter!("expired_submissions_swept_total").increment(closed as u64);
    tracing::info!(inspected = candidates.len(), closed, "Expired submission sweep finished");
    Ok(closed)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sqlx::types::Json;
    use time::Duration;

    use super::*;
    use crate::core::config::{ExamSettings, Settings};
    use crate::db::models::DifficultyConfig;
    use crate::schemas::exam_code::GenerateCodesRequest;
    use crate::services::actor::ActorContext;
    use crate::services::notifications::TracingEventSink;
    use crate::services::{code_generator, exam_status};
    use crate::test_support::{self, TestEngine, EXAM_ID, OWNER_ID, STUDENT_ID};

    #[tokio::test]
    async fn sweep_closes_only_expired_attempts() {
        let engine = TestEngine::published_with(1, |exam| exam.time_limit_minutes = 10).await;
        engine.roster.enroll(EXAM_ID, "student-2").await;

        engine.start(STUDENT_ID).await.unwrap();
        engine.advance(Duration::minutes(6));
        engine.start("student-2").await.unwrap();
        engine.advance(Duration::minutes(5));
        engine.drain_events();

        assert_eq!(sweep_expired(&engine.state).await.unwrap(), 1);

        let stored = engine.submissions().await;
        let first = stored.iter().find(|s| s.student_id == STUDENT_ID).unwrap();
        let second = stored.iter().find(|s| s.student_id == "student-2").unwrap();
        assert_eq!(first.status, SubmissionStatus::Submitted);
        assert!(first.auto_submitted);
        assert_eq!(first.submitted_at, Some(engine.now()));
        assert_eq!(second.status, SubmissionStatus::InProgress);
        assert_eq!(engine.drain_events().len(), 1);
    }

    #[tokio::test]
    async fn long_running_attempts_do_not_starve_the_batch() {
        let engine = TestEngine::published_with(1, |exam| exam.time_limit_minutes = 120).await;
        for n in 2..=4 {
            let student = format!("student-{n}");
            engine.roster.enroll(EXAM_ID, &student).await;
            engine.start(&student).await.unwrap();
        }

        let mut quiz = test_support::exam("exam-2", OWNER_ID);
        quiz.time_limit_minutes = 1;
        quiz.difficulty_config = Some(Json(DifficultyConfig::new(6, 3, 1)));
        engine.store.insert_exam(quiz).await;
        let owner = engine.owner();
        let request = GenerateCodesRequest { count: 1 };
        code_generator::generate_codes(&engine.state, &owner, "exam-2", request).await.unwrap();
        exam_status::publish(&engine.state, &owner, "exam-2").await.unwrap();
        engine.roster.enroll("exam-2", STUDENT_ID).await;

        engine.advance(Duration::minutes(1));
        let student = ActorContext::student(STUDENT_ID);
        let quiz_attempt =
            submissions::start_attempt(&engine.state, &student, "exam-2").await.unwrap();
        engine.advance(Duration::minutes(2));

        let exam_settings = ExamSettings { sweep_batch_size: 1, ..ExamSettings::default() };
        let state = EngineState::new(
            Settings::for_tests().with_exam(exam_settings).unwrap(),
            Arc::new(engine.store.clone()),
            engine.clock.clone(),
            Arc::new(engine.roster.clone()),
            Arc::new(TracingEventSink),
        );

        assert_eq!(sweep_expired(&state).await.unwrap(), 1);
        let swept = engine.store.submissions_for("exam-2").await.remove(0);
        assert_eq!(swept.id, quiz_attempt.submission_id);
        assert!(swept.auto_submitted);
        let long_running = engine.submissions().await;
        assert_eq!(long_running.len(), 3);
        assert!(long_running.iter().all(|s| s.status == SubmissionStatus::InProgress));
    }

    #[tokio::test]
    async fn sweep_is_idempotent() {
        let engine = TestEngine::published_with(1, |exam| exam.time_limit_minutes = 1).await;
        engine.start(STUDENT_ID).await.unwrap();
        engine.advance(Duration::minutes(2));

        assert_eq!(sweep_expired(&engine.state).await.unwrap(), 1);
        assert_eq!(sweep_expired(&engine.state).await.unwrap(), 0);
    }
}
