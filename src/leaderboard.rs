use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use tracing::{debug, instrument};
use uuid::Uuid;

use crate::error::LeaderboardError;
use crate::models::{CourseRecord, Leaderboard, LeaderboardEntry, StudentRecord, SubmissionRecord};
use crate::repository::GradebookRepository;

/// Builds the ranked leaderboard for one course from the current gradebook state.
#[instrument(skip(repo))]
pub async fn course_leaderboard<R>(repo: &R, course_id: Uuid) -> Result<Leaderboard, LeaderboardError>
where
    R: GradebookRepository + ?Sized,
{
    let course = repo
        .find_course(course_id)
        .await?
        .ok_or(LeaderboardError::CourseNotFound(course_id))?;

    let max_course_points = repo.max_course_points(course_id).await?;
    let roster = repo.enrolled_students(course_id).await?;
    let submissions = repo.course_submissions(course_id).await?;

    debug!(
        students = roster.len(),
        submissions = submissions.len(),
        max_course_points,
        "Aggregating course scores"
    );

    Ok(rank_students(&course, max_course_points, &roster, &submissions))
}

pub fn rank_students(
    course: &CourseRecord,
    max_course_points: i64,
    roster: &[StudentRecord],
    submissions: &[SubmissionRecord],
) -> Leaderboard {
    let mut totals: HashMap<Uuid, (i64, HashSet<Uuid>)> = roster
        .iter()
        .map(|student| (student.student_id, (0, HashSet::new())))
        .collect();

    for submission in submissions {
        let Some(grade) = submission.grade else {
            continue;
        };
        // Submissions from students no longer enrolled do not place on the board.
        if let Some(entry) = totals.get_mut(&submission.student_id) {
            if entry.1.insert(submission.assignment_id) {
                entry.0 += i64::from(grade);
            }
        }
    }

    let mut entries: Vec<LeaderboardEntry> = roster
        .iter()
        .map(|student| {
            let (total_score, graded) = totals
                .get(&student.student_id)
                .map(|(score, assignments)| (*score, assignments.len()))
                .unwrap_or((0, 0));
            LeaderboardEntry {
                id: student.student_id,
                name: student.full_name.clone(),
                total_score,
                assignments_submitted: graded,
                score_percentage: score_percentage(total_score, max_course_points),
                rank: 0,
            }
        })
        .collect();

    entries.sort_by(compare_entries);
    assign_competition_ranks(&mut entries);

    Leaderboard {
        course_id: course.course_id,
        course_title: course.title.clone(),
        max_course_points,
        results: entries.len(),
        leaderboard: entries,
    }
}

/// Percentage of the course maximum, rounded to one decimal place.
pub fn score_percentage(total_score: i64, max_course_points: i64) -> f64 {
    if max_course_points <= 0 {
        return 0.0;
    }
    let percentage = total_score as f64 / max_course_points as f64 * 100.0;
    (percentage * 10.0).round() / 10.0
}

fn compare_entries(a: &LeaderboardEntry, b: &LeaderboardEntry) -> Ordering {
    b.total_score
        .cmp(&a.total_score)
        .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        .then_with(|| a.name.cmp(&b.name))
        .then_with(|| a.id.cmp(&b.id))
}

/// Tied scores share a rank; the next score down ranks after everyone ahead of it.
fn assign_competition_ranks(entries: &mut [LeaderboardEntry]) {
    let mut previous: Option<(i64, usize)> = None;
    for (index, entry) in entries.iter_mut().enumerate() {
        entry.rank = match previous {
            Some((score, rank)) if score == entry.total_score => rank,
            _ => index + 1,
        };
        previous = Some((entry.total_score, entry.rank));
    }
}
