use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseRecord {
    pub course_id: Uuid,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentRecord {
    pub student_id: Uuid,
    pub full_name: String,
}

/// One submission row for an assignment of the course being ranked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRecord {
    pub student_id: Uuid,
    pub assignment_id: Uuid,
    pub grade: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub id: Uuid,
    pub name: String,
    pub total_score: i64,
    pub assignments_submitted: usize,
    pub score_percentage: f64,
    pub rank: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Leaderboard {
    pub course_id: Uuid,
    pub course_title: String,
    pub max_course_points: i64,
    pub results: usize,
    pub leaderboard: Vec<LeaderboardEntry>,
}

#[derive(Debug, Clone)]
pub struct CourseSummary {
    pub course_id: Uuid,
    pub title: String,
    pub teacher_name: String,
    pub assignment_count: i64,
    pub enrollment_count: i64,
    pub max_points: i64,
}

/// A submission as seen from the grade center, scoped to the grading teacher.
#[derive(Debug, Clone)]
pub struct GradeCenterRow {
    pub submission_id: Uuid,
    pub student_name: String,
    pub course_title: String,
    pub assignment_title: String,
    pub max_points: i32,
    pub grade: Option<i32>,
    pub student_comment: Option<String>,
    pub feedback: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub graded_at: Option<DateTime<Utc>>,
}

/// The fields grading decisions are made on.
#[derive(Debug, Clone)]
pub struct GradableSubmission {
    pub submission_id: Uuid,
    pub student_name: String,
    pub assignment_title: String,
    pub max_points: i32,
    pub grade: Option<i32>,
    pub graded_at: Option<DateTime<Utc>>,
}
