use std::fmt;

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::db;
use crate::error::GradingError;
use crate::models::{GradableSubmission, GradeCenterRow};

pub const GRADE_EDIT_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionStatus {
    Pending,
    Graded,
}

impl SubmissionStatus {
    pub fn of(grade: Option<i32>) -> Self {
        match grade {
            Some(_) => Self::Graded,
            None => Self::Pending,
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("PENDING"),
            Self::Graded => f.write_str("GRADED"),
        }
    }
}

pub fn validate_grade(grade: i32, max_points: i32) -> Result<(), GradingError> {
    if (0..=max_points).contains(&grade) {
        Ok(())
    } else {
        Err(GradingError::InvalidGrade { grade, max_points })
    }
}

/// A grade may be changed until a full edit window has elapsed since it was recorded.
pub fn can_edit(graded_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match graded_at {
        Some(at) => now - at < Duration::hours(GRADE_EDIT_WINDOW_HOURS),
        None => false,
    }
}

pub fn check_edit_window(
    graded_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<(), GradingError> {
    match graded_at {
        Some(_) if !can_edit(graded_at, now) => Err(GradingError::WindowClosed {
            hours: GRADE_EDIT_WINDOW_HOURS,
        }),
        _ => Ok(()),
    }
}

/// Checks a grade against the submission's current state before it is written.
pub fn review_grade(
    submission: &GradableSubmission,
    grade: i32,
    now: DateTime<Utc>,
) -> Result<(), GradingError> {
    validate_grade(grade, submission.max_points)?;
    if submission.grade.is_some() {
        check_edit_window(submission.graded_at, now)?;
    }
    Ok(())
}

pub fn review_reset(submission: &GradableSubmission, now: DateTime<Utc>) -> Result<(), GradingError> {
    if submission.grade.is_none() {
        return Err(GradingError::NotGraded(submission.submission_id));
    }
    check_edit_window(submission.graded_at, now)
}

/// Earliest `graded_at` that is still editable at `now`.
pub fn edit_window_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::hours(GRADE_EDIT_WINDOW_HOURS)
}

/// Explains a conditional write that matched no row, from a fresh read of the submission.
pub fn refused_write(
    submission_id: Uuid,
    fresh: Option<GradableSubmission>,
    review: impl Fn(&GradableSubmission) -> Result<(), GradingError>,
) -> GradingError {
    match fresh {
        None => GradingError::SubmissionNotFound(submission_id),
        Some(submission) => match review(&submission) {
            Err(err) => err,
            Ok(()) => GradingError::WindowClosed {
                hours: GRADE_EDIT_WINDOW_HOURS,
            },
        },
    }
}

#[instrument(skip(pool, feedback))]
pub async fn grade_submission(
    pool: &PgPool,
    submission_id: Uuid,
    teacher_id: Uuid,
    grade: i32,
    feedback: Option<&str>,
) -> Result<GradableSubmission, GradingError> {
    let submission = db::fetch_gradable_submission(pool, submission_id, teacher_id)
        .await?
        .ok_or(GradingError::SubmissionNotFound(submission_id))?;

    let now = Utc::now();
    review_grade(&submission, grade, now)?;

    let written = db::record_grade(
        pool,
        submission_id,
        teacher_id,
        grade,
        feedback,
        now,
        edit_window_start(now),
    )
    .await?;
    if !written {
        let fresh = db::fetch_gradable_submission(pool, submission_id, teacher_id).await?;
        return Err(refused_write(submission_id, fresh, |current| {
            review_grade(current, grade, now)
        }));
    }

    info!(
        student = %submission.student_name,
        assignment = %submission.assignment_title,
        grade,
        max_points = submission.max_points,
        "Submission graded"
    );

    Ok(GradableSubmission {
        grade: Some(grade),
        graded_at: Some(now),
        ..submission
    })
}

#[instrument(skip(pool))]
pub async fn reset_grade(
    pool: &PgPool,
    submission_id: Uuid,
    teacher_id: Uuid,
) -> Result<GradableSubmission, GradingError> {
    let submission = db::fetch_gradable_submission(pool, submission_id, teacher_id)
        .await?
        .ok_or(GradingError::SubmissionNotFound(submission_id))?;

    let now = Utc::now();
    review_reset(&submission, now)?;

    if !db::clear_grade(pool, submission_id, teacher_id, edit_window_start(now)).await? {
        let fresh = db::fetch_gradable_submission(pool, submission_id, teacher_id).await?;
        return Err(refused_write(submission_id, fresh, |current| {
            review_reset(current, now)
        }));
    }

    info!(
        student = %submission.student_name,
        assignment = %submission.assignment_title,
        "Grade reset; submission is pending again"
    );

    Ok(GradableSubmission {
        grade: None,
        graded_at: None,
        ..submission
    })
}

pub fn pending_only(rows: Vec<GradeCenterRow>) -> Vec<GradeCenterRow> {
    rows.into_iter()
        .filter(|row| SubmissionStatus::of(row.grade) == SubmissionStatus::Pending)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission(grade: Option<i32>, graded_hours_ago: Option<i64>, now: DateTime<Utc>) -> GradableSubmission {
        GradableSubmission {
            submission_id: Uuid::new_v4(),
            student_name: "Avery Lee".to_string(),
            assignment_title: "Dynamic Programming".to_string(),
            max_points: 50,
            grade,
            graded_at: graded_hours_ago.map(|hours| now - Duration::hours(hours)),
        }
    }

    fn row(grade: Option<i32>) -> GradeCenterRow {
        GradeCenterRow {
            submission_id: Uuid::new_v4(),
            student_name: "Jules Moreno".to_string(),
            course_title: "Algorithms 101".to_string(),
            assignment_title: "Graphs".to_string(),
            max_points: 50,
            grade,
            student_comment: None,
            feedback: None,
            submitted_at: Utc::now(),
            graded_at: grade.map(|_| Utc::now()),
        }
    }

    #[test]
    fn grade_bounds_are_inclusive() {
        assert!(validate_grade(0, 50).is_ok());
        assert!(validate_grade(50, 50).is_ok());
        assert!(matches!(
            validate_grade(51, 50),
            Err(GradingError::InvalidGrade { grade: 51, max_points: 50 })
        ));
        assert!(validate_grade(-1, 50).is_err());
        assert!(validate_grade(0, 0).is_ok());
    }

    #[test]
    fn edit_window_closes_after_a_full_day() {
        let now = Utc::now();
        assert!(can_edit(Some(now - Duration::hours(23) - Duration::minutes(59)), now));
        assert!(!can_edit(Some(now - Duration::hours(24)), now));
        assert!(!can_edit(None, now));
    }

    #[test]
    fn first_grade_ignores_window() {
        let now = Utc::now();
        assert!(review_grade(&submission(None, None, now), 42, now).is_ok());
    }

    #[test]
    fn regrade_respects_window() {
        let now = Utc::now();
        assert!(review_grade(&submission(Some(30), Some(2), now), 35, now).is_ok());
        assert!(matches!(
            review_grade(&submission(Some(30), Some(30), now), 35, now),
            Err(GradingError::WindowClosed { hours: 24 })
        ));
    }

    #[test]
    fn regrade_still_validates_bounds_first() {
        let now = Utc::now();
        assert!(matches!(
            review_grade(&submission(Some(30), Some(30), now), 80, now),
            Err(GradingError::InvalidGrade { .. })
        ));
    }

    #[test]
    fn reset_requires_recent_grade() {
        let now = Utc::now();
        assert!(matches!(
            review_reset(&submission(None, None, now), now),
            Err(GradingError::NotGraded(_))
        ));
        assert!(review_reset(&submission(Some(40), Some(1), now), now).is_ok());
        assert!(matches!(
            review_reset(&submission(Some(40), Some(48), now), now),
            Err(GradingError::WindowClosed { .. })
        ));
    }

    #[test]
    fn window_start_matches_can_edit() {
        let now = Utc::now();
        let start = edit_window_start(now);
        assert!(!can_edit(Some(start), now));
        assert!(can_edit(Some(start + Duration::seconds(1)), now));
    }

    #[test]
    fn refused_write_reports_missing_submission() {
        let id = Uuid::new_v4();
        let err = refused_write(id, None, |_| Ok(()));
        assert!(matches!(err, GradingError::SubmissionNotFound(found) if found == id));
    }

    #[test]
    fn refused_regrade_after_concurrent_grade_reports_window() {
        // Another grader recorded a grade that has since aged out of the window.
        let now = Utc::now();
        let fresh = submission(Some(30), Some(25), now);
        let err = refused_write(fresh.submission_id, Some(fresh), |current| {
            review_grade(current, 35, now)
        });
        assert!(matches!(err, GradingError::WindowClosed { hours: 24 }));
    }

    #[test]
    fn refused_reset_after_concurrent_reset_reports_not_graded() {
        let now = Utc::now();
        let fresh = submission(None, None, now);
        let id = fresh.submission_id;
        let err = refused_write(id, Some(fresh), |current| review_reset(current, now));
        assert!(matches!(err, GradingError::NotGraded(found) if found == id));
    }

    #[test]
    fn refused_write_that_now_passes_review_is_still_a_closed_window() {
        let now = Utc::now();
        let fresh = submission(Some(30), Some(1), now);
        let err = refused_write(fresh.submission_id, Some(fresh), |current| {
            review_grade(current, 35, now)
        });
        assert!(matches!(err, GradingError::WindowClosed { .. }));
    }

    #[test]
    fn status_follows_grade() {
        assert_eq!(SubmissionStatus::of(None).to_string(), "PENDING");
        assert_eq!(SubmissionStatus::of(Some(0)).to_string(), "GRADED");
    }

    #[test]
    fn pending_filter_keeps_ungraded_rows() {
        let rows = vec![row(Some(10)), row(None), row(None)];
        let pending = pending_only(rows);
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().all(|row| row.grade.is_none()));
    }
}
