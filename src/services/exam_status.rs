use crate::core::state::EngineState;
use crate::db::models::Exam;
use crate::db::types::ExamStatus;
use crate::errors::ExamError;
use crate::services::actor::ActorContext;

/// draft -> published. Requires at least one generated code.
pub async fn publish(
    state: &EngineState,
    actor: &ActorContext,
    exam_id: &str,
) -> Result<Exam, ExamError> {
    transition(state, actor, exam_id, ExamStatus::Draft, ExamStatus::Published).await
}

/// published -> closed. In-progress attempts may still be submitted.
pub async fn close(
    state: &EngineState,
    actor: &ActorContext,
    exam_id: &str,
) -> Result<Exam, ExamError> {
    transition(state, actor, exam_id, ExamStatus::Published, ExamStatus::Closed).await
}

async fn transition(
    state: &EngineState,
    actor: &ActorContext,
    exam_id: &str,
    from: ExamStatus,
    to: ExamStatus,
) -> Result<Exam, ExamError> {
    let now = state.clock().now();
    let mut tx = state.store().begin().await?;
    tx.lock_exam(exam_id).await?;

    let mut exam = tx.find_exam(exam_id).await?.ok_or(ExamError::NotFound("Exam"))?;
    actor.require_manager(&exam)?;
    if exam.status != from {
        return Err(ExamError::Validation(format!("Exam is {}, expected {from}", exam.status)));
    }
    if to == ExamStatus::Published && tx.list_codes(exam_id).await?.is_empty() {
        return Err(ExamError::Validation("Generate at least one exam code first".to_string()));
    }

    tx.update_exam_status(exam_id, to, now).await?;
    tx.commit().await?;

    tracing::info!(exam_id, actor_id = %actor.id, from = %from, to = %to, "Exam status changed");
    exam.status = to;
    exam.updated_at = now;
    Ok(exam)
}
