use std::collections::HashMap;
use std::io::Read;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgConnection, PgPool, Row};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::grading;
use crate::models::{
    CourseRecord, CourseSummary, GradableSubmission, GradeCenterRow, StudentRecord,
    SubmissionRecord,
};
use crate::repository::GradebookRepository;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Student,
    Teacher,
}

impl Role {
    fn as_str(self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Teacher => "teacher",
        }
    }
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let mut tx = pool.begin().await?;

    let teacher = upsert_user(
        &mut tx,
        "Dana Whitfield",
        "dana.whitfield@example.edu",
        Role::Teacher,
    )
    .await?;
    let avery = upsert_user(&mut tx, "Avery Lee", "avery.lee@example.edu", Role::Student).await?;
    let jules = upsert_user(&mut tx, "Jules Moreno", "jules.moreno@example.edu", Role::Student).await?;
    let kiara = upsert_user(&mut tx, "Kiara Patel", "kiara.patel@example.edu", Role::Student).await?;

    let algorithms = upsert_course(&mut tx, teacher, "Algorithms 101").await?;
    let sorting = upsert_assignment(&mut tx, algorithms, "Sorting", 50).await?;
    let graphs = upsert_assignment(&mut tx, algorithms, "Graph Search", 50).await?;

    let structures = upsert_course(&mut tx, teacher, "Data Structures").await?;
    let heaps = upsert_assignment(&mut tx, structures, "Heaps", 20).await?;

    for student in [avery, jules, kiara] {
        enroll(&mut tx, student, algorithms).await?;
    }
    enroll(&mut tx, avery, structures).await?;

    let two_days_ago = Utc::now() - Duration::days(2);
    let an_hour_ago = Utc::now() - Duration::hours(1);
    let submissions = [
        (sorting, avery, Some(45), Some(two_days_ago), None),
        (graphs, avery, Some(35), Some(two_days_ago), None),
        (sorting, kiara, Some(40), Some(an_hour_ago), None),
        (graphs, kiara, None, None, Some("BFS and Dijkstra variants both included.")),
        (heaps, avery, Some(18), Some(two_days_ago), None),
    ];

    for (assignment, student, grade, graded_at, student_comment) in submissions {
        let incoming = IncomingSubmission {
            grade,
            graded_by: grade.map(|_| teacher),
            graded_at,
            student_comment,
        };
        upsert_submission(&mut tx, assignment, student, &incoming).await?;
    }

    tx.commit().await?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
pub struct ImportRow {
    #[serde(skip)]
    pub line: usize,
    pub course_title: String,
    pub teacher_name: String,
    pub teacher_email: String,
    pub student_name: String,
    pub student_email: String,
    pub assignment_title: Option<String>,
    pub max_points: Option<i32>,
    pub grade: Option<i32>,
    #[serde(default)]
    pub student_comment: Option<String>,
}

/// Parses and checks every row before anything is written.
pub fn read_import_rows<R: Read>(input: R) -> anyhow::Result<Vec<ImportRow>> {
    let mut reader = csv::Reader::from_reader(input);
    let mut rows = Vec::new();
    let mut assignment_points: HashMap<(String, String, String), (i32, usize)> = HashMap::new();
    let mut roles: HashMap<String, (Role, usize)> = HashMap::new();

    for (index, result) in reader.deserialize::<ImportRow>().enumerate() {
        // Header occupies line 1.
        let line = index + 2;
        let mut row = result.with_context(|| format!("line {line}: malformed row"))?;
        row.line = line;

        for (email, role) in [
            (&row.teacher_email, Role::Teacher),
            (&row.student_email, Role::Student),
        ] {
            match roles.get(email) {
                Some((seen, first)) if *seen != role => anyhow::bail!(
                    "line {line}: {email} appears as a {} but line {first} lists it as a {}",
                    role.as_str(),
                    seen.as_str()
                ),
                Some(_) => {}
                None => {
                    roles.insert(email.clone(), (role, line));
                }
            }
        }

        match (&row.assignment_title, row.max_points, row.grade) {
            (None, None, None) => {}
            (None, _, _) => {
                anyhow::bail!("line {line}: max_points or grade given without assignment_title")
            }
            (Some(_), None, _) => anyhow::bail!("line {line}: assignment_title needs max_points"),
            (Some(title), Some(max_points), grade) => {
                if max_points < 0 {
                    anyhow::bail!("line {line}: max_points must not be negative");
                }
                let key = (row.course_title.clone(), row.teacher_email.clone(), title.clone());
                match assignment_points.get(&key) {
                    Some((points, first)) if *points != max_points => anyhow::bail!(
                        "line {line}: {title} has max_points {max_points} but line {first} gives {points}"
                    ),
                    Some(_) => {}
                    None => {
                        assignment_points.insert(key, (max_points, line));
                    }
                }
                if let Some(grade) = grade {
                    grading::validate_grade(grade, max_points)
                        .with_context(|| format!("line {line}: grade rejected"))?;
                }
            }
        }

        rows.push(row);
    }

    Ok(rows)
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    let file = std::fs::File::open(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let rows = read_import_rows(file)?;
    debug!(rows = rows.len(), "Import rows validated");

    let mut tx = pool.begin().await?;
    let mut written = 0usize;
    let now = Utc::now();

    for row in rows {
        let line = row.line;
        let teacher = upsert_user(&mut tx, &row.teacher_name, &row.teacher_email, Role::Teacher)
            .await
            .with_context(|| format!("line {line}: teacher rejected"))?;
        let student = upsert_user(&mut tx, &row.student_name, &row.student_email, Role::Student)
            .await
            .with_context(|| format!("line {line}: student rejected"))?;
        let course = upsert_course(&mut tx, teacher, &row.course_title).await?;
        enroll(&mut tx, student, course).await?;

        let (Some(title), Some(max_points)) = (row.assignment_title.as_deref(), row.max_points) else {
            continue;
        };

        let assignment = upsert_assignment(&mut tx, course, title, max_points)
            .await
            .with_context(|| format!("line {line}: assignment rejected"))?;
        let incoming = IncomingSubmission {
            grade: row.grade,
            graded_by: row.grade.map(|_| teacher),
            graded_at: row.grade.map(|_| now),
            student_comment: row.student_comment.as_deref(),
        };
        if upsert_submission(&mut tx, assignment, student, &incoming).await? {
            written += 1;
        }
    }

    tx.commit().await?;
    info!(written, path = %csv_path.display(), "CSV import committed");
    Ok(written)
}

fn ensure_role(email: &str, expected: Role, stored: &str) -> anyhow::Result<()> {
    if stored == expected.as_str() {
        Ok(())
    } else {
        anyhow::bail!(
            "{email} is registered as a {stored}, not a {}",
            expected.as_str()
        )
    }
}

async fn upsert_user(
    conn: &mut PgConnection,
    full_name: &str,
    email: &str,
    role: Role,
) -> anyhow::Result<Uuid> {
    let row = sqlx::query(
        r#"
        INSERT INTO course_leaderboard.users (id, full_name, email, role)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (email) DO UPDATE
        SET full_name = EXCLUDED.full_name
        RETURNING id, role
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(full_name)
    .bind(email)
    .bind(role.as_str())
    .fetch_one(&mut *conn)
    .await
    .with_context(|| format!("failed to upsert user {email}"))?;

    let stored: String = row.get("role");
    ensure_role(email, role, &stored)?;
    Ok(row.get("id"))
}

async fn upsert_course(conn: &mut PgConnection, teacher_id: Uuid, title: &str) -> anyhow::Result<Uuid> {
    let id = sqlx::query(
        r#"
        INSERT INTO course_leaderboard.courses (id, title, teacher_id)
        VALUES ($1, $2, $3)
        ON CONFLICT (teacher_id, title) DO UPDATE
        SET title = EXCLUDED.title
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(title)
    .bind(teacher_id)
    .fetch_one(&mut *conn)
    .await
    .with_context(|| format!("failed to upsert course {title}"))?
    .get("id");

    Ok(id)
}

/// Writes the assignment, refusing a `max_points` below a grade already recorded against it.
async fn upsert_assignment(
    conn: &mut PgConnection,
    course_id: Uuid,
    title: &str,
    max_points: i32,
) -> anyhow::Result<Uuid> {
    let id: Uuid = sqlx::query(
        r#"
        INSERT INTO course_leaderboard.assignments (id, course_id, title, max_points)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (course_id, title) DO UPDATE
        SET max_points = EXCLUDED.max_points
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(course_id)
    .bind(title)
    .bind(max_points)
    .fetch_one(&mut *conn)
    .await
    .with_context(|| format!("failed to upsert assignment {title}"))?
    .get("id");

    let highest: Option<i32> = sqlx::query(
        "SELECT MAX(grade) AS highest FROM course_leaderboard.submissions WHERE assignment_id = $1",
    )
    .bind(id)
    .fetch_one(&mut *conn)
    .await?
    .get("highest");

    if let Some(highest) = highest {
        if highest > max_points {
            anyhow::bail!(
                "{title} already has a grade of {highest}, above the new max_points {max_points}"
            );
        }
    }

    Ok(id)
}

async fn enroll(conn: &mut PgConnection, student_id: Uuid, course_id: Uuid) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO course_leaderboard.enrollments (student_id, course_id)
        VALUES ($1, $2)
        ON CONFLICT (student_id, course_id) DO NOTHING
        "#,
    )
    .bind(student_id)
    .bind(course_id)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

struct IncomingSubmission<'a> {
    grade: Option<i32>,
    graded_by: Option<Uuid>,
    graded_at: Option<DateTime<Utc>>,
    student_comment: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubmissionWrite {
    Insert,
    Regrade,
    Keep,
}

/// `existing` is `None` when no submission exists yet, otherwise its current grade.
/// A blank grade never clears a recorded one, and an unchanged grade keeps its timestamp.
fn plan_submission_write(existing: Option<Option<i32>>, incoming: Option<i32>) -> SubmissionWrite {
    match (existing, incoming) {
        (None, _) => SubmissionWrite::Insert,
        (Some(_), None) => SubmissionWrite::Keep,
        (Some(current), Some(grade)) if current == Some(grade) => SubmissionWrite::Keep,
        (Some(_), Some(_)) => SubmissionWrite::Regrade,
    }
}

async fn upsert_submission(
    conn: &mut PgConnection,
    assignment_id: Uuid,
    student_id: Uuid,
    incoming: &IncomingSubmission<'_>,
) -> anyhow::Result<bool> {
    let existing: Option<Option<i32>> = sqlx::query(
        r#"
        SELECT grade FROM course_leaderboard.submissions
        WHERE assignment_id = $1 AND student_id = $2
        FOR UPDATE
        "#,
    )
    .bind(assignment_id)
    .bind(student_id)
    .fetch_optional(&mut *conn)
    .await?
    .map(|row| row.get("grade"));

    let result = match plan_submission_write(existing, incoming.grade) {
        SubmissionWrite::Keep => return Ok(false),
        SubmissionWrite::Insert => {
            sqlx::query(
                r#"
                INSERT INTO course_leaderboard.submissions
                (id, assignment_id, student_id, student_comment, grade, graded_by, graded_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(assignment_id)
            .bind(student_id)
            .bind(incoming.student_comment)
            .bind(incoming.grade)
            .bind(incoming.graded_by)
            .bind(incoming.graded_at)
            .execute(&mut *conn)
            .await?
        }
        SubmissionWrite::Regrade => {
            sqlx::query(
                r#"
                UPDATE course_leaderboard.submissions
                SET grade = $3, graded_by = $4, graded_at = $5
                WHERE assignment_id = $1 AND student_id = $2
                "#,
            )
            .bind(assignment_id)
            .bind(student_id)
            .bind(incoming.grade)
            .bind(incoming.graded_by)
            .bind(incoming.graded_at)
            .execute(&mut *conn)
            .await?
        }
    };

    Ok(result.rows_affected() > 0)
}

/// Postgres-backed gradebook reads.
#[derive(Clone)]
pub struct PgGradebook {
    pool: PgPool,
}

impl PgGradebook {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GradebookRepository for PgGradebook {
    async fn find_course(&self, course_id: Uuid) -> Result<Option<CourseRecord>, sqlx::Error> {
        let row = sqlx::query("SELECT id, title FROM course_leaderboard.courses WHERE id = $1")
            .bind(course_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| CourseRecord {
            course_id: row.get("id"),
            title: row.get("title"),
        }))
    }

    async fn max_course_points(&self, course_id: Uuid) -> Result<i64, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(max_points), 0)::BIGINT AS max_points
            FROM course_leaderboard.assignments
            WHERE course_id = $1
            "#,
        )
        .bind(course_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("max_points"))
    }

    async fn enrolled_students(&self, course_id: Uuid) -> Result<Vec<StudentRecord>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT u.id, u.full_name
            FROM course_leaderboard.enrollments e
            JOIN course_leaderboard.users u ON u.id = e.student_id
            WHERE e.course_id = $1
            "#,
        )
        .bind(course_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| StudentRecord {
                student_id: row.get("id"),
                full_name: row.get("full_name"),
            })
            .collect())
    }

    async fn course_submissions(
        &self,
        course_id: Uuid,
    ) -> Result<Vec<SubmissionRecord>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT s.student_id, s.assignment_id, s.grade
            FROM course_leaderboard.submissions s
            JOIN course_leaderboard.assignments a ON a.id = s.assignment_id
            WHERE a.course_id = $1
            "#,
        )
        .bind(course_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| SubmissionRecord {
                student_id: row.get("student_id"),
                assignment_id: row.get("assignment_id"),
                grade: row.get("grade"),
            })
            .collect())
    }
}

pub async fn list_courses(pool: &PgPool) -> anyhow::Result<Vec<CourseSummary>> {
    let rows = sqlx::query(
        r#"
        SELECT c.id, c.title, t.full_name AS teacher_name,
               (SELECT COUNT(*) FROM course_leaderboard.assignments a
                 WHERE a.course_id = c.id) AS assignment_count,
               (SELECT COUNT(*) FROM course_leaderboard.enrollments e
                 WHERE e.course_id = c.id) AS enrollment_count,
               (SELECT COALESCE(SUM(a.max_points), 0)::BIGINT FROM course_leaderboard.assignments a
                 WHERE a.course_id = c.id) AS max_points
        FROM course_leaderboard.courses c
        JOIN course_leaderboard.users t ON t.id = c.teacher_id
        ORDER BY c.title
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| CourseSummary {
            course_id: row.get("id"),
            title: row.get("title"),
            teacher_name: row.get("teacher_name"),
            assignment_count: row.get("assignment_count"),
            enrollment_count: row.get("enrollment_count"),
            max_points: row.get("max_points"),
        })
        .collect())
}

pub async fn find_teacher_id(pool: &PgPool, email: &str) -> anyhow::Result<Option<Uuid>> {
    let row = sqlx::query(
        "SELECT id FROM course_leaderboard.users WHERE email = $1 AND role = 'teacher'",
    )
    .bind(email)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| row.get("id")))
}

/// Loads a submission only if it belongs to a course the teacher runs.
#[instrument(skip(pool))]
pub async fn fetch_gradable_submission(
    pool: &PgPool,
    submission_id: Uuid,
    teacher_id: Uuid,
) -> Result<Option<GradableSubmission>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT s.id, u.full_name, a.title, a.max_points, s.grade, s.graded_at
        FROM course_leaderboard.submissions s
        JOIN course_leaderboard.assignments a ON a.id = s.assignment_id
        JOIN course_leaderboard.courses c ON c.id = a.course_id
        JOIN course_leaderboard.users u ON u.id = s.student_id
        WHERE s.id = $1 AND c.teacher_id = $2
        "#,
    )
    .bind(submission_id)
    .bind(teacher_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| GradableSubmission {
        submission_id: row.get("id"),
        student_name: row.get("full_name"),
        assignment_title: row.get("title"),
        max_points: row.get("max_points"),
        grade: row.get("grade"),
        graded_at: row.get("graded_at"),
    }))
}

/// Writes the grade only while the submission is ungraded or its grade is newer than
/// `window_start`, and only for a course the teacher runs. Returns whether a row changed.
pub async fn record_grade(
    pool: &PgPool,
    submission_id: Uuid,
    teacher_id: Uuid,
    grade: i32,
    feedback: Option<&str>,
    graded_at: DateTime<Utc>,
    window_start: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE course_leaderboard.submissions s
        SET grade = $2, feedback = $3, graded_by = $4, graded_at = $5
        FROM course_leaderboard.assignments a
        JOIN course_leaderboard.courses c ON c.id = a.course_id
        WHERE s.id = $1
          AND a.id = s.assignment_id
          AND c.teacher_id = $4
          AND (s.grade IS NULL OR s.graded_at IS NULL OR s.graded_at > $6)
        "#,
    )
    .bind(submission_id)
    .bind(grade)
    .bind(feedback)
    .bind(teacher_id)
    .bind(graded_at)
    .bind(window_start)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Clears a grade still inside its edit window. Returns whether a row changed.
pub async fn clear_grade(
    pool: &PgPool,
    submission_id: Uuid,
    teacher_id: Uuid,
    window_start: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE course_leaderboard.submissions s
        SET grade = NULL, feedback = NULL, graded_by = NULL, graded_at = NULL
        FROM course_leaderboard.assignments a
        JOIN course_leaderboard.courses c ON c.id = a.course_id
        WHERE s.id = $1
          AND a.id = s.assignment_id
          AND c.teacher_id = $2
          AND s.grade IS NOT NULL
          AND (s.graded_at IS NULL OR s.graded_at > $3)
        "#,
    )
    .bind(submission_id)
    .bind(teacher_id)
    .bind(window_start)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn fetch_grade_center(pool: &PgPool, teacher_id: Uuid) -> anyhow::Result<Vec<GradeCenterRow>> {
    let rows = sqlx::query(
        r#"
        SELECT s.id, u.full_name, c.title AS course_title, a.title AS assignment_title,
               a.max_points, s.grade, s.student_comment, s.feedback, s.submitted_at, s.graded_at
        FROM course_leaderboard.submissions s
        JOIN course_leaderboard.assignments a ON a.id = s.assignment_id
        JOIN course_leaderboard.courses c ON c.id = a.course_id
        JOIN course_leaderboard.users u ON u.id = s.student_id
        WHERE c.teacher_id = $1
        ORDER BY s.submitted_at DESC
        "#,
    )
    .bind(teacher_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| GradeCenterRow {
            submission_id: row.get("id"),
            student_name: row.get("full_name"),
            course_title: row.get("course_title"),
            assignment_title: row.get("assignment_title"),
            max_points: row.get("max_points"),
            grade: row.get("grade"),
            student_comment: row.get("student_comment"),
            feedback: row.get("feedback"),
            submitted_at: row.get("submitted_at"),
            graded_at: row.get("graded_at"),
        })
        .collect())
}
