use crate::db::models::Exam;
use crate::db::types::ActorRole;
use crate::errors::ExamError;

/// Who is calling into the engine. Authentication happens upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorContext {
    pub id: String,
    pub role: ActorRole,
}

impl ActorContext {
    pub fn new(id: impl Into<String>, role: ActorRole) -> Self {
        Self { id: id.into(), role }
    }

    pub fn student(id: impl Into<String>) -> Self {
        Self::new(id, ActorRole::Student)
    }

    pub fn instructor(id: impl Into<String>) -> Self {
        Self::new(id, ActorRole::Instructor)
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Self::new(id, ActorRole::Admin)
    }

    /// Owners and admins may generate codes, change status, grade and see answers.
    pub fn can_manage(&self, exam: &Exam) -> bool {
        match self.role {
            ActorRole::Admin => true,
            ActorRole::Instructor => exam.owner_id == self.id,
            ActorRole::Student => false,
        }
    }

    pub(crate) fn require_manager(&self, exam: &Exam) -> Result<(), ExamError> {
        if self.can_manage(exam) {
            Ok(())
        } else {
            Err(ExamError::Forbidden("Only the exam owner or an admin can do this"))
        }
    }

    pub(crate) fn require_student(&self) -> Result<(), ExamError> {
        if self.role == ActorRole::Student {
            Ok(())
        } else {
            Err(ExamError::Forbidden("Only students can take exams"))
        }
    }
}
