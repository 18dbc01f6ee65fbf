use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{CourseRecord, StudentRecord, SubmissionRecord};

/// Read-only access to the course data a leaderboard is built from.
#[async_trait]
pub trait GradebookRepository: Send + Sync {
    async fn find_course(&self, course_id: Uuid) -> Result<Option<CourseRecord>, sqlx::Error>;

    /// Sum of `max_points` over the course's assignments, 0 when it has none.
    async fn max_course_points(&self, course_id: Uuid) -> Result<i64, sqlx::Error>;

    async fn enrolled_students(&self, course_id: Uuid) -> Result<Vec<StudentRecord>, sqlx::Error>;

    /// Every submission, graded or not, made against an assignment of the course.
    async fn course_submissions(
        &self,
        course_id: Uuid,
    ) -> Result<Vec<SubmissionRecord>, sqlx::Error>;
}
