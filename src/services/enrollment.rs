use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::RwLock;

use crate::repositories::StoreError;

/// Answers "may this student attempt this exam". Owned by the surrounding system.
///
/// Engine operations consult the policy before opening their own store
/// transaction, so an implementation may use the same connection pool.
#[async_trait]
pub trait EnrollmentPolicy: Send + Sync {
    async fn is_eligible(&self, exam_id: &str, student_id: &str) -> Result<bool, StoreError>;
}

/// In-process roster keyed by exam id.
#[derive(Clone, Default)]
pub struct RosterEnrollment {
    roster: Arc<RwLock<HashMap<String, HashSet<String>>>>,
}

impl RosterEnrollment {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn enroll(&self, exam_id: &str, student_id: &str) {
        self.roster
            .write()
            .await
            .entry(exam_id.to_string())
            .or_default()
            .insert(student_id.to_string());
    }

    pub async fn withdraw(&self, exam_id: &str, student_id: &str) -> bool {
        self.roster
            .write()
            .await
            .get_mut(exam_id)
            .map(|students| students.remove(student_id))
            .unwrap_or(false)
    }
}

#[async_trait]
impl EnrollmentPolicy for RosterEnrollment {
    async fn is_eligible(&self, exam_id: &str, student_id: &str) -> Result<bool, StoreError> {
        Ok(self
            .roster
            .read()
            .await
            .get(exam_id)
            .is_some_and(|students| students.contains(student_id)))
    }
}

/// Reads the `exam_enrollments` table.
#[derive(Clone)]
pub struct PgEnrollment {
    pool: PgPool,
}

impl PgEnrollment {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EnrollmentPolicy for PgEnrollment {
    async fn is_eligible(&self, exam_id: &str, student_id: &str) -> Result<bool, StoreError> {
        let enrolled = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM exam_enrollments WHERE exam_id = $1 AND student_id = $2)",
        )
        .bind(exam_id)
        .bind(student_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(enrolled)
    }
}
