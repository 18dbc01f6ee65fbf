use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum LeaderboardError {
    #[error("Course {0} not found.")]
    CourseNotFound(Uuid),

    #[error("failed to read gradebook data: {0}")]
    Data(#[from] sqlx::Error),
}

impl LeaderboardError {
    /// Data-read failures may succeed on a later attempt; a missing course will not.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Data(_))
    }
}

#[derive(Debug, Error)]
pub enum GradingError {
    #[error("Submission {0} not found or you do not have permission to grade it.")]
    SubmissionNotFound(Uuid),

    #[error("Grade must be between 0 and {max_points}, got {grade}.")]
    InvalidGrade { grade: i32, max_points: i32 },

    #[error("Grading window closed. Grades can only be modified within {hours} hours of initial grading.")]
    WindowClosed { hours: i64 },

    #[error("Submission {0} has no grade to reset.")]
    NotGraded(Uuid),

    #[error("failed to access gradebook data: {0}")]
    Data(#[from] sqlx::Error),
}

impl GradingError {
    /// True when the request itself was refused, as opposed to a lookup or storage failure.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::InvalidGrade { .. } | Self::WindowClosed { .. } | Self::NotGraded(_)
        )
    }
}
