use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod config;
mod db;
mod error;
mod grading;
mod leaderboard;
mod models;
mod report;
mod repository;

use crate::config::{Config, LogFormat};
use crate::error::{GradingError, LeaderboardError};

const EXIT_NOT_FOUND: u8 = 2;
const EXIT_REJECTED: u8 = 3;

#[derive(Parser)]
#[command(name = "course-leaderboard")]
#[command(about = "Course gradebook, grade center and leaderboard", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a sample gradebook
    Seed,
    /// Import courses, enrollments and grades from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// List courses with their ids
    Courses,
    /// Rank enrolled students by total graded score
    Leaderboard {
        #[arg(long)]
        course: Uuid,
        /// Print the full leaderboard as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
        /// Only display the first N entries
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Generate a markdown leaderboard report
    Report {
        #[arg(long)]
        course: Uuid,
        #[arg(long, default_value = "leaderboard.md")]
        out: PathBuf,
    },
    /// List submissions in the teacher's courses, newest first
    GradeCenter {
        #[arg(long)]
        teacher: String,
        /// Only show submissions awaiting a grade
        #[arg(long, default_value_t = false)]
        pending: bool,
    },
    /// Grade a submission
    Grade {
        submission: Uuid,
        #[arg(long)]
        grade: i32,
        #[arg(long)]
        feedback: Option<String>,
        #[arg(long)]
        teacher: String,
    },
    /// Remove a recent grade so the submission is pending again
    ResetGrade {
        submission: Uuid,
        #[arg(long)]
        teacher: String,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().with_current_span(true).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;
    init_tracing(config.log_format);

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let written = db::import_csv(&pool, &csv).await?;
            println!("Wrote {written} submissions from {}.", csv.display());
        }
        Commands::Courses => {
            let courses = db::list_courses(&pool).await?;
            if courses.is_empty() {
                println!("No courses found.");
            }
            for course in courses {
                println!(
                    "{}  {} (taught by {}) {} assignments, {} enrolled, {} max points",
                    course.course_id,
                    course.title,
                    course.teacher_name,
                    course.assignment_count,
                    course.enrollment_count,
                    course.max_points
                );
            }
        }
        Commands::Leaderboard {
            course,
            json,
            limit,
        } => {
            let gradebook = db::PgGradebook::new(pool.clone());
            let board = match leaderboard::course_leaderboard(&gradebook, course).await {
                Ok(board) => board,
                Err(err) => return Ok(leaderboard_failure(err)),
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&board)?);
                return Ok(ExitCode::SUCCESS);
            }

            println!(
                "{} leaderboard ({} max points):",
                board.course_title, board.max_course_points
            );
            if board.leaderboard.is_empty() {
                println!("No students are enrolled in this course.");
            }
            for entry in board.leaderboard.iter().take(limit.unwrap_or(usize::MAX)) {
                println!(
                    "{:>3}. {} {} pts ({:.1}%) across {} graded submissions",
                    entry.rank,
                    entry.name,
                    entry.total_score,
                    entry.score_percentage,
                    entry.assignments_submitted
                );
            }
        }
        Commands::Report { course, out } => {
            let gradebook = db::PgGradebook::new(pool.clone());
            let board = match leaderboard::course_leaderboard(&gradebook, course).await {
                Ok(board) => board,
                Err(err) => return Ok(leaderboard_failure(err)),
            };
            let report = report::build_report(&board, Utc::now().date_naive());
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
        Commands::GradeCenter { teacher, pending } => {
            let Some(teacher_id) = db::find_teacher_id(&pool, &teacher).await? else {
                eprintln!("No teacher account for {teacher}.");
                return Ok(ExitCode::from(EXIT_NOT_FOUND));
            };

            let mut rows = db::fetch_grade_center(&pool, teacher_id).await?;
            if pending {
                rows = grading::pending_only(rows);
            }
            if rows.is_empty() {
                println!("No submissions to show.");
                return Ok(ExitCode::SUCCESS);
            }

            let now = Utc::now();
            println!("{} submissions:", rows.len());
            for row in rows {
                let score = row
                    .grade
                    .map(|grade| format!("{grade}/{}", row.max_points))
                    .unwrap_or_else(|| format!("-/{}", row.max_points));
                println!(
                    "{}  [{}] {} / {}: {} submitted {} score {}{}",
                    row.submission_id,
                    grading::SubmissionStatus::of(row.grade),
                    row.course_title,
                    row.assignment_title,
                    row.student_name,
                    row.submitted_at.format("%Y-%m-%d %H:%M"),
                    score,
                    if grading::can_edit(row.graded_at, now) {
                        " (editable)"
                    } else {
                        ""
                    }
                );
                if let Some(comment) = row.student_comment.as_deref() {
                    println!("    student comment: {comment}");
                }
                if let Some(feedback) = row.feedback.as_deref() {
                    println!("    feedback: {feedback}");
                }
            }
        }
        Commands::Grade {
            submission,
            grade,
            feedback,
            teacher,
        } => {
            let Some(teacher_id) = db::find_teacher_id(&pool, &teacher).await? else {
                eprintln!("No teacher account for {teacher}.");
                return Ok(ExitCode::from(EXIT_NOT_FOUND));
            };

            match grading::grade_submission(&pool, submission, teacher_id, grade, feedback.as_deref())
                .await
            {
                Ok(graded) => println!(
                    "Graded {} for {}: {}/{}.",
                    graded.assignment_title, graded.student_name, grade, graded.max_points
                ),
                Err(err) => return Ok(grading_failure(err)),
            }
        }
        Commands::ResetGrade {
            submission,
            teacher,
        } => {
            let Some(teacher_id) = db::find_teacher_id(&pool, &teacher).await? else {
                eprintln!("No teacher account for {teacher}.");
                return Ok(ExitCode::from(EXIT_NOT_FOUND));
            };

            match grading::reset_grade(&pool, submission, teacher_id).await {
                Ok(reset) => println!(
                    "Grade removed from {} for {}; submission is pending.",
                    reset.assignment_title, reset.student_name
                ),
                Err(err) => return Ok(grading_failure(err)),
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn leaderboard_failure(err: LeaderboardError) -> ExitCode {
    match err {
        LeaderboardError::CourseNotFound(_) => {
            warn!(error = %err, "Leaderboard requested for unknown course");
            eprintln!("{err}");
            ExitCode::from(EXIT_NOT_FOUND)
        }
        LeaderboardError::Data(_) => {
            error!(error = %err, transient = err.is_transient(), "Failed to build leaderboard");
            eprintln!("Failed to retrieve course leaderboard: {err}");
            ExitCode::FAILURE
        }
    }
}

fn grading_failure(err: GradingError) -> ExitCode {
    eprintln!("{err}");
    if err.is_rejection() {
        info!(error = %err, "Grading request rejected");
        ExitCode::from(EXIT_REJECTED)
    } else if matches!(err, GradingError::SubmissionNotFound(_)) {
        ExitCode::from(EXIT_NOT_FOUND)
    } else {
        error!(error = %err, "Grading request failed");
        ExitCode::FAILURE
    }
}
