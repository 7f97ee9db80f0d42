//! Anti-cheat signals reported by the client during an attempt.
//!
//! Recording is best effort: the student's attempt never fails because a
//! violation could not be stored, so [`log_violation`] swallows every error
//! after logging it.

use uuid::Uuid;
use validator::Validate;

use crate::core::state::EngineState;
use crate::db::models::ViolationLog;
use crate::db::types::SubmissionStatus;
use crate::errors::ExamError;
use crate::schemas::submission::ViolationRequest;
use crate::services::actor::ActorContext;
use crate::services::submissions::load_exam;

fn truncate_details(details: String, max_chars: usize) -> String {
    match details.char_indices().nth(max_chars) {
        Some((cut, _)) => details[..cut].to_string(),
        None => details,
    }
}

async fn record(
    state: &EngineState,
    actor: &ActorContext,
    submission_id: &str,
    request: ViolationRequest,
) -> Result<Option<ViolationLog>, ExamError> {
    request.validate()?;
    let mut tx = state.store().begin().await?;

    let Some(submission) = tx.find_submission(submission_id).await? else {
        tracing::debug!(submission_id, "Violation for unknown submission ignored");
        return Ok(None);
    };
    if submission.student_id != actor.id {
        tracing::debug!(submission_id, actor_id = %actor.id, "Violation from non-owner ignored");
        return Ok(None);
    }
    if submission.status != SubmissionStatus::InProgress {
        return Ok(None);
    }
    let exam = load_exam(&mut *tx, &submission.exam_id).await?;
    if !exam.anti_cheat_enabled {
        return Ok(None);
    }

    let max_chars = state.settings().exam().violation_details_max_chars;
    let violation = ViolationLog {
        id: Uuid::new_v4().to_string(),
        submission_id: submission.id,
        kind: request.kind,
        details: request.details.map(|details| truncate_details(details, max_chars)),
        recorded_at: state.clock().now(),
    };
    tx.insert_violation(&violation).await?;
    tx.commit().await?;

    Ok(Some(violation))
}

/// Appends a violation to an in-progress attempt of an anti-cheat exam.
/// Anything else is a silent no-op.
pub async fn log_violation(
    state: &EngineState,
    actor: &ActorContext,
    submission_id: &str,
    request: ViolationRequest,
) {
    match record(state, actor, submission_id, request).await {
        Ok(Some(violation)) => {
            metrics::counter!("exam_violations_recorded_total", "kind" => violation.kind.as_str())
                .increment(1);
            tracing::info!(
                submission_id,
                kind = violation.kind.as_str(),
                "Violation recorded"
            );
        }
        Ok(None) => {}
        Err(err) => {
            tracing::warn!(submission_id, error = %err, "Failed to record violation");
        }
    }
}

/// Violations of one submission in recording order, for the exam's managers.
pub async fn list_violations(
    state: &EngineState,
    actor: &ActorContext,
    submission_id: &str,
) -> Result<Vec<ViolationLog>, ExamError> {
    let mut tx = state.store().begin().await?;
    let submission =
        tx.find_submission(submission_id).await?.ok_or(ExamError::NotFound("Submission"))?;
    let exam = load_exam(&mut *tx, &submission.exam_id).await?;
    actor.require_manager(&exam)?;

    let mut violations = tx.list_violations(submission_id).await?;
    violations.sort_by_key(|violation| violation.recorded_at);
    Ok(violations)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use time::Duration;

    use super::*;
    use crate::db::types::ViolationKind;
    use crate::test_support::{FailingStore, TestEngine, STUDENT_ID};

    fn tab_switch(details: Option<&str>) -> ViolationRequest {
        ViolationRequest { kind: ViolationKind::TabSwitch, details: details.map(str::to_string) }
    }

    #[tokio::test]
    async fn records_violations_for_in_progress_attempt() {
        let engine = TestEngine::published(1).await;
        let view = engine.start(STUDENT_ID).await.unwrap();
        let student = ActorContext::student(STUDENT_ID);

        log_violation(&engine.state, &student, &view.submission_id, tab_switch(Some("left"))).await;
        engine.advance(Duration::seconds(5));
        let blur = ViolationRequest { kind: ViolationKind::WindowBlur, details: None };
        log_violation(&engine.state, &student, &view.submission_id, blur).await;

        let logged =
            list_violations(&engine.state, &engine.owner(), &view.submission_id).await.unwrap();
        let kinds: Vec<_> = logged.iter().map(|v| v.kind).collect();
        assert_eq!(kinds, [ViolationKind::TabSwitch, ViolationKind::WindowBlur]);
        assert_eq!(logged[0].details.as_deref(), Some("left"));
    }

    #[tokio::test]
    async fn ignored_when_anti_cheat_disabled() {
        let engine = TestEngine::published_with(1, |exam| exam.anti_cheat_enabled = false).await;
        let view = engine.start(STUDENT_ID).await.unwrap();
        let student = ActorContext::student(STUDENT_ID);

        log_violation(&engine.state, &student, &view.submission_id, tab_switch(None)).await;

        let logged =
            list_violations(&engine.state, &engine.owner(), &view.submission_id).await.unwrap();
        assert!(logged.is_empty());
    }

    #[tokio::test]
    async fn ignored_after_submit_and_for_other_students() {
        let engine = TestEngine::published(1).await;
        let view = engine.start(STUDENT_ID).await.unwrap();

        let intruder = ActorContext::student("student-2");
        log_violation(&engine.state, &intruder, &view.submission_id, tab_switch(None)).await;
        engine.submit(&view.submission_id).await.unwrap();
        let student = ActorContext::student(STUDENT_ID);
        log_violation(&engine.state, &student, &view.submission_id, tab_switch(None)).await;
        log_violation(&engine.state, &student, "missing", tab_switch(None)).await;

        let logged =
            list_violations(&engine.state, &engine.owner(), &view.submission_id).await.unwrap();
        assert!(logged.is_empty());
    }

    #[tokio::test]
    async fn long_details_are_truncated() {
        let engine = TestEngine::published(1).await;
        let view = engine.start(STUDENT_ID).await.unwrap();
        let student = ActorContext::student(STUDENT_ID);
        let details = "ж".repeat(2500);

        log_violation(&engine.state, &student, &view.submission_id, tab_switch(Some(&details)))
            .await;

        let logged =
            list_violations(&engine.state, &engine.owner(), &view.submission_id).await.unwrap();
        let stored = logged[0].details.as_deref().unwrap();
        assert_eq!(stored.chars().count(), 2000);
    }

    #[tokio::test]
    async fn storage_failure_is_swallowed() {
        let engine = TestEngine::with_store(Arc::new(FailingStore)).await;
        let student = ActorContext::student(STUDENT_ID);

        log_violation(&engine.state, &student, "sub-1", tab_switch(None)).await;
    }

    #[tokio::test]
    async fn students_cannot_list_violations() {
        let engine = TestEngine::published(1).await;
        let view = engine.start(STUDENT_ID).await.unwrap();
        let student = ActorContext::student(STUDENT_ID);

        let err = list_violations(&engine.state, &student, &view.submission_id).await.unwrap_err();
        assert!(matches!(err, ExamError::Forbidden(_)));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_details("héllo".to_string(), 2), "hé");
        assert_eq!(truncate_details("abc".to_string(), 10), "abc");
    }
}
