use serde::Serialize;
use thiserror::Error;

use crate::db::types::{Difficulty, SubmissionStatus};
use crate::repositories::StoreError;
use crate::services::shuffle::ShuffleError;

#[derive(Debug, Error)]
pub enum ExamError {
    #[error("{0}")]
    Validation(String),
    #[error("question bank cannot satisfy {tier} quota: needed {needed}, available {available}")]
    InsufficientBankCapacity { tier: Difficulty, needed: u32, available: u32 },
    #[error("exam {exam_id} already has {submissions} submission(s); codes cannot be regenerated")]
    RegenerationBlocked { exam_id: String, submissions: i64 },
    #[error("not eligible: {0}")]
    NotEligible(String),
    #[error("maximum attempts reached ({used} of {max_attempts})")]
    AttemptsExhausted { max_attempts: i32, used: i64 },
    #[error("submission is already {status}")]
    AlreadyFinalized { status: SubmissionStatus },
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("time limit passed; submission {submission_id} was submitted automatically")]
    Expired { submission_id: String, auto_submitted: bool },
    #[error("{0}")]
    Forbidden(&'static str),
    #[error("{0}")]
    Conflict(String),
    #[error("storage failure")]
    Storage(#[from] StoreError),
}

impl ExamError {
    /// Stable machine-readable code for the surrounding transport layer.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::InsufficientBankCapacity { .. } => "insufficient_bank_capacity",
            Self::RegenerationBlocked { .. } => "regeneration_blocked",
            Self::NotEligible(_) => "not_eligible",
            Self::AttemptsExhausted { .. } => "attempts_exhausted",
            Self::AlreadyFinalized { .. } => "already_finalized",
            Self::NotFound(_) => "not_found",
            Self::Expired { .. } => "expired",
            Self::Forbidden(_) => "forbidden",
            Self::Conflict(_) => "conflict",
            Self::Storage(_) => "internal_error",
        }
    }

    /// Caller-facing view. Storage details stay in the logs.
    pub fn to_body(&self) -> ErrorBody {
        let detail = match self {
            Self::Storage(err) => {
                tracing::error!(error = %err, "Exam engine storage failure");
                "Internal error".to_string()
            }
            other => other.to_string(),
        };
        ErrorBody { code: self.code(), detail }
    }
}

impl From<ShuffleError> for ExamError {
    fn from(err: ShuffleError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<validator::ValidationErrors> for ExamError {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::Validation(err.to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub detail: String,
}
