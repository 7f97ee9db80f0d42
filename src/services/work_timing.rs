use time::{Duration, OffsetDateTime};

use crate::db::models::Exam;
use crate::errors::ExamError;

/// When an attempt stops accepting answers: the time limit, cut short by the
/// exam window when one is set.
pub fn attempt_deadline(exam: &Exam, started_at: OffsetDateTime) -> OffsetDateTime {
    let by_limit = started_at + Duration::minutes(i64::from(exam.time_limit_minutes));
    match exam.end_time {
        Some(end_time) if end_time < by_limit => end_time,
        _ => by_limit,
    }
}

pub fn remaining_seconds(exam: &Exam, started_at: OffsetDateTime, now: OffsetDateTime) -> i64 {
    (attempt_deadline(exam, started_at) - now).whole_seconds().max(0)
}

pub fn is_expired(exam: &Exam, started_at: OffsetDateTime, now: OffsetDateTime) -> bool {
    now >= attempt_deadline(exam, started_at)
}

/// Answers carried by a late `Submit` are still merged inside the grace window.
pub fn accepts_trailing_answers(
    exam: &Exam,
    started_at: OffsetDateTime,
    now: OffsetDateTime,
    grace_seconds: u64,
) -> bool {
    let grace = Duration::seconds(i64::try_from(grace_seconds).unwrap_or(i64::MAX));
    match attempt_deadline(exam, started_at).checked_add(grace) {
        Some(closes_at) => now <= closes_at,
        None => true,
    }
}

pub fn ensure_within_window(exam: &Exam, now: OffsetDateTime) -> Result<(), ExamError> {
    if exam.start_time.is_some_and(|start| now < start) {
        return Err(ExamError::NotEligible("Exam has not started yet".to_string()));
    }
    if exam.end_time.is_some_and(|end| now > end) {
        return Err(ExamError::NotEligible("Exam has ended".to_string()));
    }
    Ok(())
}
