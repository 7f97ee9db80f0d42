//! Student attempt lifecycle: start/resume, autosave, submit, auto-submit on
//! expiry, result assembly and manual grading.
//!
//! Every mutating path opens one store transaction and takes the
//! (exam, student) lock before reading the state it is about to change, so
//! concurrent calls for the same student are linearized.
//!
//! Expiry is pulled, not pushed: an attempt past its deadline stays
//! `in_progress` until the student's next call or the expiry sweeper finalizes
//! it.

use std::collections::{BTreeMap, HashMap};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use sqlx::types::Json;
use time::OffsetDateTime;
use uuid::Uuid;
use validator::Validate;

use crate::core::state::EngineState;
use crate::core::time::format_offset;
use crate::db::models::{Exam, ExamCode, ExamSubmission, Question};
use crate::db::types::{ExamStatus, SubmissionStatus};
use crate::errors::ExamError;
use crate::repositories::{StoreError, StoreTx};
use crate::schemas::submission::{
    AttemptView, GradeRequest, PresentedQuestion, ResultDetail, SaveAnswerAck, SaveAnswerRequest,
    ScoreSummary, SubmissionResult, SubmitRequest,
};
use crate::services::actor::ActorContext;
use crate::services::notifications::ExamEvent;
use crate::services::scoring;
use crate::services::shuffle::{self, OptionLabel, ShuffleError};
use crate::services::work_timing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FinalizeMode {
    Manual,
    Auto,
}

impl FinalizeMode {
    fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Auto => "auto",
        }
    }
}

type QuestionMap = HashMap<String, Question>;

pub(crate) async fn load_exam(tx: &mut dyn StoreTx, exam_id: &str) -> Result<Exam, ExamError> {
    tx.find_exam(exam_id).await?.ok_or(ExamError::NotFound("Exam"))
}

/// The code a submission was assigned and the bank questions it references.
pub(crate) async fn load_paper(
    tx: &mut dyn StoreTx,
    submission: &ExamSubmission,
) -> Result<(ExamCode, QuestionMap), ExamError> {
    let code_id = &submission.exam_code_id;
    let code = tx.find_code(code_id).await?.ok_or_else(|| {
        let submission_id = &submission.id;
        StoreError::Invariant(format!("exam code {code_id} of submission {submission_id} missing"))
    })?;
    let questions = scoring::index_questions(tx.find_questions(&code.question_order.0).await?);
    Ok((code, questions))
}

/// Reads a submission owned by `actor`, takes its (exam, student) lock and re-reads it.
async fn lock_own_submission(
    tx: &mut dyn StoreTx,
    actor: &ActorContext,
    submission_id: &str,
) -> Result<ExamSubmission, ExamError> {
    let unlocked = tx
        .find_submission(submission_id)
        .await?
        .filter(|submission| submission.student_id == actor.id)
        .ok_or(ExamError::NotFound("Submission"))?;
    tx.lock_exam_student(&unlocked.exam_id, &unlocked.student_id).await?;
    tx.find_submission(submission_id).await?.ok_or(ExamError::NotFound("Submission"))
}

fn ensure_in_progress(submission: &ExamSubmission) -> Result<(), ExamError> {
    if submission.status == SubmissionStatus::InProgress {
        Ok(())
    } else {
        Err(ExamError::AlreadyFinalized { status: submission.status })
    }
}

fn label_offered(
    code: &ExamCode,
    questions: &QuestionMap,
    question_id: &str,
    answer: &OptionLabel,
) -> bool {
    match questions.get(question_id) {
        Some(question) => {
            let map = shuffle::effective_map(question, code.shuffle_for(question_id));
            shuffle::to_canonical(map, answer)
                .is_some_and(|canonical| question.options.0.contains(&canonical))
        }
        None => {
            code.shuffle_for(question_id).map_or(true, |map| map.to_canonical(answer).is_some())
        }
    }
}

fn ensure_answer_fits(
    code: &ExamCode,
    questions: &QuestionMap,
    question_id: &str,
    answer: &OptionLabel,
) -> Result<(), ExamError> {
    if !code.contains_question(question_id) {
        return Err(ExamError::Validation(format!(
            "Question {question_id} is not part of this exam code"
        )));
    }
    if !label_offered(code, questions, question_id, answer) {
        return Err(ExamError::Validation(format!(
            "{answer} is not an option of question {question_id}"
        )));
    }
    Ok(())
}

/// in_progress -> submitted inside the caller's transaction. Merges
/// `trailing` answers, scores the paper and stamps `submitted_at`.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn finalize(
    tx: &mut dyn StoreTx,
    state: &EngineState,
    code: &ExamCode,
    questions: &QuestionMap,
    mut submission: ExamSubmission,
    trailing: BTreeMap<String, OptionLabel>,
    mode: FinalizeMode,
    now: OffsetDateTime,
) -> Result<ExamSubmission, ExamError> {
    ensure_in_progress(&submission)?;

    submission.answers.0.extend(trailing);
    let breakdown =
        scoring::score(code, &submission.answers.0, questions, state.settings().exam().score_scale);

    let expected_version = submission.version;
    submission.status = SubmissionStatus::Submitted;
    submission.submitted_at = Some(now);
    submission.auto_submitted = mode == FinalizeMode::Auto;
    submission.correct_count = breakdown.correct_count;
    submission.wrong_count = breakdown.wrong_count;
    submission.unanswered_count = breakdown.unanswered_count;
    submission.total_score = Some(breakdown.total_score);
    submission.version = expected_version + 1;
    submission.updated_at = now;

    if !tx.update_submission(&submission, expected_version).await? {
        return Err(ExamError::Conflict("Submission changed concurrently".to_string()));
    }
    Ok(submission)
}

/// Post-commit bookkeeping for a finalized submission.
pub(crate) fn after_finalize(state: &EngineState, submission: &ExamSubmission, mode: FinalizeMode) {
    metrics::counter!("exam_submissions_finalized_total", "mode" => mode.as_str()).increment(1);
    tracing::info!(
        submission_id = %submission.id,
        exam_id = %submission.exam_id,
        student_id = %submission.student_id,
        attempt = submission.attempt,
        mode = mode.as_str(),
        correct = submission.correct_count,
        wrong = submission.wrong_count,
        unanswered = submission.unanswered_count,
        total_score = submission.total_score,
        "Submission finalized"
    );
    state.events().publish(ExamEvent::SubmissionSubmitted {
        submission_id: submission.id.clone(),
        exam_id: submission.exam_id.clone(),
        student_id: submission.student_id.clone(),
        auto_submitted: submission.auto_submitted,
        total_score: submission.total_score,
    });
}

/// Auto-submits an expired attempt, commits, and reports the expiry to the caller.
async fn expire<T>(
    state: &EngineState,
    mut tx: Box<dyn StoreTx>,
    submission: ExamSubmission,
    now: OffsetDateTime,
) -> Result<T, ExamError> {
    let (code, questions) = load_paper(&mut *tx, &submission).await?;
    let submission = finalize(
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
    after_finalize(state, &submission, FinalizeMode::Auto);

    Err(ExamError::Expired { submission_id: submission.id, auto_submitted: true })
}

fn attempt_view(
    exam: &Exam,
    submission: &ExamSubmission,
    code: &ExamCode,
    questions: &QuestionMap,
    now: OffsetDateTime,
    resumed: bool,
) -> AttemptView {
    let mut presented = Vec::with_capacity(code.question_order.0.len());
    for (position, question_id) in code.question_order.0.iter().enumerate() {
        let Some(question) = questions.get(question_id) else {
            tracing::warn!(
                exam_code_id = %code.id,
                question_id = %question_id,
                "Question missing from bank; omitted from paper"
            );
            continue;
        };
        presented.push(PresentedQuestion {
            question_id: question_id.clone(),
            position: position + 1,
            content: question.content.clone(),
            options: shuffle::shuffled_options(question, code.shuffle_for(question_id)),
            selected: submission.answers.0.get(question_id).cloned(),
        });
    }

    AttemptView {
        submission_id: submission.id.clone(),
        exam_id: submission.exam_id.clone(),
        exam_code: code.code.clone(),
        attempt: submission.attempt,
        status: submission.status,
        started_at: format_offset(submission.started_at),
        deadline: format_offset(work_timing::attempt_deadline(exam, submission.started_at)),
        remaining_seconds: work_timing::remaining_seconds(exam, submission.started_at, now),
        resumed,
        questions: presented,
    }
}

fn assemble_result(
    submission: &ExamSubmission,
    code: &ExamCode,
    questions: &QuestionMap,
    reveal: bool,
) -> SubmissionResult {
    let detail = if reveal {
        ResultDetail::Revealed(scoring::question_results(code, &submission.answers.0, questions))
    } else {
        ResultDetail::Hidden
    };
    SubmissionResult { summary: ScoreSummary::from(submission), detail }
}

async fn create_attempt(
    tx: &mut dyn StoreTx,
    actor: &ActorContext,
    exam: &Exam,
    enrolled: bool,
    now: OffsetDateTime,
) -> Result<(ExamSubmission, ExamCode, QuestionMap), ExamError> {
    if exam.status != ExamStatus::Published {
        return Err(ExamError::NotEligible(format!("Exam is {}", exam.status)));
    }
    work_timing::ensure_within_window(exam, now)?;
    if !enrolled {
        return Err(ExamError::NotEligible("Student is not enrolled in this exam".to_string()));
    }

    let used = tx.count_finalized(&exam.id, &actor.id).await?;
    if used >= i64::from(exam.max_attempts) {
        return Err(ExamError::AttemptsExhausted { max_attempts: exam.max_attempts, used });
    }

    let codes = tx.list_codes(&exam.id).await?;
    let code = {
        let mut rng = StdRng::seed_from_u64(rand::random());
        codes.choose(&mut rng).cloned()
    }
    .ok_or_else(|| ExamError::NotEligible("Exam has no generated codes".to_string()))?;

    let submission = ExamSubmission {
        id: Uuid::new_v4().to_string(),
        exam_id: exam.id.clone(),
        exam_code_id: code.id.clone(),
        student_id: actor.id.clone(),
        attempt: (used + 1) as i32,
        started_at: now,
        submitted_at: None,
        status: SubmissionStatus::InProgress,
        answers: Json(BTreeMap::new()),
        total_score: None,
        correct_count: 0,
        wrong_count: 0,
        unanswered_count: 0,
        manual_score: None,
        grader_note: None,
        graded_by: None,
        graded_at: None,
        auto_submitted: false,
        version: 1,
        created_at: now,
        updated_at: now,
    };
    if !tx.insert_submission(&submission).await? {
        return Err(ExamError::Conflict("An attempt is already in progress".to_string()));
    }

    let questions = scoring::index_questions(tx.find_questions(&code.question_order.0).await?);
    Ok((submission, code, questions))
}

/// Creates a new attempt, or returns the student's in-progress one.
///
/// An in-progress attempt found past its deadline is auto-submitted first; a
/// fresh attempt is then created if the student still has attempts left.
pub async fn start_attempt(
    state: &EngineState,
    actor: &ActorContext,
    exam_id: &str,
) -> Result<AttemptView, ExamError> {
    actor.require_student()?;
    let now = state.clock().now();
    // Outside the transaction: the policy may need a pooled connection of its own.
    let enrolled = state.enrollment().is_eligible(exam_id, &actor.id).await?;

    let mut tx = state.store().begin().await?;
    tx.lock_exam_student(exam_id, &actor.id).await?;
    let exam = load_exam(&mut *tx, exam_id).await?;

    let mut expired = None;
    if let Some(existing) = tx.find_in_progress(exam_id, &actor.id).await? {
        let (code, questions) = load_paper(&mut *tx, &existing).await?;
        if !work_timing::is_expired(&exam, existing.started_at, now) {
            tx.commit().await?;
            metrics::counter!("exam_attempts_resumed_total").increment(1);
            tracing::info!(
                submission_id = %existing.id,
                exam_id,
                student_id = %actor.id,
                attempt = existing.attempt,
                "Attempt resumed"
            );
            return Ok(attempt_view(&exam, &existing, &code, &questions, now, true));
        }

        let finalized = finalize(
            &mut *tx,
            state,
            &code,
            &questions,
            existing,
            BTreeMap::new(),
            FinalizeMode::Auto,
            now,
        )
        .await?;
        expired = Some(finalized);
    }

    let created = create_attempt(&mut *tx, actor, &exam, enrolled, now).await;
    let (submission, code, questions) = match created {
        Ok(created) => created,
        Err(err) => {
            if let Some(finalized) = expired {
                tx.commit().await?;
                after_finalize(state, &finalized, FinalizeMode::Auto);
            }
            return Err(err);
        }
    };
    tx.commit().await?;

    if let Some(finalized) = expired {
        after_finalize(state, &finalized, FinalizeMode::Auto);
    }
    metrics::counter!("exam_attempts_started_total").increment(1);
    tracing::info!(
        submission_id = %submission.id,
        exam_id,
        student_id = %actor.id,
        exam_code = %code.code,
        attempt = submission.attempt,
        "Attempt started"
    );
    state.events().publish(ExamEvent::SubmissionCreated {
        submission_id: submission.id.clone(),
        exam_id: submission.exam_id.clone(),
        student_id: submission.student_id.clone(),
        attempt: submission.attempt,
    });

    Ok(attempt_view(&exam, &submission, &code, &questions, now, false))
}

/// The student's current paper with saved answers and remaining time.
pub async fn load_attempt(
    state: &EngineState,
    actor: &ActorContext,
    submission_id: &str,
) -> Result<AttemptView, ExamError> {
    let now = state.clock().now();
    let mut tx = state.store().begin().await?;
    let submission = lock_own_submission(&mut *tx, actor, submission_id).await?;
    ensure_in_progress(&submission)?;

    let exam = load_exam(&mut *tx, &submission.exam_id).await?;
    if work_timing::is_expired(&exam, submission.started_at, now) {
        return expire(state, tx, submission, now).await;
    }

    let (code, questions) = load_paper(&mut *tx, &submission).await?;
    tx.commit().await?;
    Ok(attempt_view(&exam, &submission, &code, &questions, now, true))
}

/// Upserts one answer in the student's shuffled label space.
pub async fn save_answer(
    state: &EngineState,
    actor: &ActorContext,
    submission_id: &str,
    request: SaveAnswerRequest,
) -> Result<SaveAnswerAck, ExamError> {
    request.validate()?;
    let answer = OptionLabel::parse(&request.answer)?;
    let now = state.clock().now();

    let mut tx = state.store().begin().await?;
    let mut submission = lock_own_submission(&mut *tx, actor, submission_id).await?;
    ensure_in_progress(&submission)?;

    let exam = load_exam(&mut *tx, &submission.exam_id).await?;
    if work_timing::is_expired(&exam, submission.started_at, now) {
        return expire(state, tx, submission, now).await;
    }

    let (code, questions) = load_paper(&mut *tx, &submission).await?;
    ensure_answer_fits(&code, &questions, &request.question_id, &answer)?;

    let expected_version = submission.version;
    submission.answers.0.insert(request.question_id.clone(), answer.clone());
    submission.version = expected_version + 1;
    submission.updated_at = now;
    if !tx.update_submission(&submission, expected_version).await? {
        return Err(ExamError::Conflict("Submission changed concurrently".to_string()));
    }
    tx.commit().await?;

    tracing::debug!(
        submission_id,
        question_id = %request.question_id,
        answered = submission.answers.0.len(),
        "Answer saved"
    );

    Ok(SaveAnswerAck {
        submission_id: submission.id,
        question_id: request.question_id,
        answer,
        remaining_seconds: work_timing::remaining_seconds(&exam, submission.started_at, now),
    })
}

/// Finalizes the attempt. Trailing answers are merged unless the grace window
/// after the deadline has passed, in which case the attempt is auto-submitted
/// with what was saved.
pub async fn submit(
    state: &EngineState,
    actor: &ActorContext,
    submission_id: &str,
    request: SubmitRequest,
) -> Result<SubmissionResult, ExamError> {
    request.validate()?;
    let trailing = request
        .answers
        .iter()
        .map(|(question_id, raw)| Ok((question_id.clone(), OptionLabel::parse(raw)?)))
        .collect::<Result<BTreeMap<_, _>, ShuffleError>>()?;
    let now = state.clock().now();

    let mut tx = state.store().begin().await?;
    let submission = lock_own_submission(&mut *tx, actor, submission_id).await?;
    ensure_in_progress(&submission)?;

    let exam = load_exam(&mut *tx, &submission.exam_id).await?;
    let (code, questions) = load_paper(&mut *tx, &submission).await?;
    for (question_id, answer) in &trailing {
        ensure_answer_fits(&code, &questions, question_id, answer)?;
    }

    let grace = state.settings().exam().submit_grace_seconds;
    let (mode, trailing) =
        if work_timing::accepts_trailing_answers(&exam, submission.started_at, now, grace) {
            (FinalizeMode::Manual, trailing)
        } else {
            if !trailing.is_empty() {
                tracing::info!(
                    submission_id,
                    dropped = trailing.len(),
                    "Submit arrived after the grace window; trailing answers dropped"
                );
            }
            (FinalizeMode::Auto, BTreeMap::new())
        };

    let submission =
        finalize(&mut *tx, state, &code, &questions, submission, trailing, mode, now).await?;
    tx.commit().await?;
    after_finalize(state, &submission, mode);

    Ok(assemble_result(&submission, &code, &questions, exam.show_answers_after_submit))
}

/// Score summary plus question detail when answers may be shown to `actor`.
///
/// Reading an expired in-progress attempt auto-submits it first.
pub async fn get_result(
    state: &EngineState,
    actor: &ActorContext,
    submission_id: &str,
) -> Result<SubmissionResult, ExamError> {
    let now = state.clock().now();
    let mut tx = state.store().begin().await?;

    let mut submission =
        tx.find_submission(submission_id).await?.ok_or(ExamError::NotFound("Submission"))?;
    let exam = load_exam(&mut *tx, &submission.exam_id).await?;
    let manager = actor.can_manage(&exam);
    if submission.student_id != actor.id && !manager {
        return Err(ExamError::NotFound("Submission"));
    }

    if submission.status == SubmissionStatus::InProgress {
        tx.lock_exam_student(&submission.exam_id, &submission.student_id).await?;
        submission =
            tx.find_submission(submission_id).await?.ok_or(ExamError::NotFound("Submission"))?;
    }
    let (code, questions) = load_paper(&mut *tx, &submission).await?;

    let mut auto_finalized = false;
    if submission.status == SubmissionStatus::InProgress {
        if !work_timing::is_expired(&exam, submission.started_at, now) {
            return Err(ExamError::Validation("Submission is still in progress".to_string()));
        }
        submission = finalize(
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
        auto_finalized = true;
    }
    tx.commit().await?;

    if auto_finalized {
        after_finalize(state, &submission, FinalizeMode::Auto);
    }

    let reveal = exam.show_answers_after_submit || manager;
    Ok(assemble_result(&submission, &code, &questions, reveal))
}

/// Records a manual score. Re-grading overwrites the previous manual score;
/// the computed score is never touched.
pub async fn grade_manually(
    state: &EngineState,
    actor: &ActorContext,
    submission_id: &str,
    request: GradeRequest,
) -> Result<ScoreSummary, ExamError> {
    request.validate()?;
    let scale = state.settings().exam().score_scale;
    if !request.score.is_finite() || request.score > scale {
        return Err(ExamError::Validation(format!("score must be between 0 and {scale}")));
    }
    let now = state.clock().now();

    let mut tx = state.store().begin().await?;
    let unlocked =
        tx.find_submission(submission_id).await?.ok_or(ExamError::NotFound("Submission"))?;
    let exam = load_exam(&mut *tx, &unlocked.exam_id).await?;
    actor.require_manager(&exam)?;

    tx.lock_exam_student(&unlocked.exam_id, &unlocked.student_id).await?;
    let mut submission =
        tx.find_submission(submission_id).await?.ok_or(ExamError::NotFound("Submission"))?;
    if !submission.status.can_transition_to(SubmissionStatus::Graded) {
        return Err(ExamError::Validation("Submission has not been submitted yet".to_string()));
    }
    if let Some(expected) = request.expected_version {
        if expected != submission.version {
            return Err(ExamError::Conflict(format!(
                "Submission is at version {}, expected {expected}",
                submission.version
            )));
        }
    }

    let expected_version = submission.version;
    submission.manual_score = Some(request.score);
    submission.grader_note = request.note;
    submission.graded_by = Some(actor.id.clone());
    submission.graded_at = Some(now);
    submission.status = SubmissionStatus::Graded;
    submission.version = expected_version + 1;
    submission.updated_at = now;
    if !tx.update_submission(&submission, expected_version).await? {
        return Err(ExamError::Conflict("Submission changed concurrently".to_string()));
    }
    tx.commit().await?;

    metrics::counter!("exam_submissions_graded_total").increment(1);
    tracing::info!(
        submission_id,
        exam_id = %submission.exam_id,
        grader_id = %actor.id,
        manual_score = request.score,
        version = submission.version,
        "Submission graded"
    );
    state.events().publish(ExamEvent::SubmissionGraded {
        submission_id: submission.id.clone(),
        exam_id: submission.exam_id.clone(),
        student_id: submission.student_id.clone(),
        manual_score: submission.manual_score,
        graded_by: actor.id.clone(),
    });

    Ok(ScoreSummary::from(&submission))
}
