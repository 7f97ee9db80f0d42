use serde::{Deserialize, Serialize};
use sqlx::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "difficultylevel", rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Hard => "hard",
        }
    }
}

impl std::fmt::Display for Difficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "examstatus", rename_all = "lowercase")]
pub enum ExamStatus {
    Draft,
    Published,
    Closed,
}

impl ExamStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for ExamStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "submissionstatus", rename_all = "snake_case")]
pub enum SubmissionStatus {
    InProgress,
    Submitted,
    Graded,
}

impl SubmissionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Submitted => "submitted",
            Self::Graded => "graded",
        }
    }

    /// Submitted and graded attempts count against `max_attempts`.
    pub fn is_finalized(self) -> bool {
        matches!(self, Self::Submitted | Self::Graded)
    }

    /// Status only moves forward: in_progress -> submitted -> graded.
    pub fn can_transition_to(self, next: SubmissionStatus) -> bool {
        matches!(
            (self, next),
            (Self::InProgress, Self::Submitted)
                | (Self::Submitted, Self::Graded)
                | (Self::Graded, Self::Graded)
        )
    }
}

impl std::fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "violationkind", rename_all = "snake_case")]
pub enum ViolationKind {
    TabSwitch,
    WindowBlur,
    CopyPaste,
    FullscreenExit,
    DevtoolsOpen,
    Other,
}

impl ViolationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TabSwitch => "tab_switch",
            Self::WindowBlur => "window_blur",
            Self::CopyPaste => "copy_paste",
            Self::FullscreenExit => "fullscreen_exit",
            Self::DevtoolsOpen => "devtools_open",
            Self::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorRole {
    Student,
    Instructor,
    Admin,
}
