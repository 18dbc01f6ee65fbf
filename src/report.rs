use std::fmt::Write;

use chrono::NaiveDate;

use crate::models::Leaderboard;

pub fn class_average_percentage(board: &Leaderboard) -> f64 {
    if board.leaderboard.is_empty() {
        return 0.0;
    }
    let total: f64 = board
        .leaderboard
        .iter()
        .map(|entry| entry.score_percentage)
        .sum();
    let average = total / board.leaderboard.len() as f64;
    (average * 10.0).round() / 10.0
}

pub fn build_report(board: &Leaderboard, generated_on: NaiveDate) -> String {
    let mut output = String::new();
    let graded_students = board
        .leaderboard
        .iter()
        .filter(|entry| entry.assignments_submitted > 0)
        .count();

    let _ = writeln!(output, "# Course Leaderboard: {}", board.course_title);
    let _ = writeln!(output, "Generated on {}", generated_on);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Summary");
    let _ = writeln!(output, "- Maximum course points: {}", board.max_course_points);
    let _ = writeln!(output, "- Enrolled students: {}", board.results);
    let _ = writeln!(output, "- Students with graded work: {}", graded_students);
    let _ = writeln!(
        output,
        "- Class average: {:.1}%",
        class_average_percentage(board)
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Standings");

    if board.leaderboard.is_empty() {
        let _ = writeln!(output, "No students are enrolled in this course.");
    } else {
        let _ = writeln!(output, "| Rank | Student | Score | Percentage | Graded |");
        let _ = writeln!(output, "|---:|---|---:|---:|---:|");
        for entry in board.leaderboard.iter() {
            let _ = writeln!(
                output,
                "| {} | {} | {} / {} | {:.1}% | {} |",
                entry.rank,
                entry.name,
                entry.total_score,
                board.max_course_points,
                entry.score_percentage,
                entry.assignments_submitted
            );
        }
    }

    let waiting: Vec<&str> = board
        .leaderboard
        .iter()
        .filter(|entry| entry.assignments_submitted == 0)
        .map(|entry| entry.name.as_str())
        .collect();

    let _ = writeln!(output);
    let _ = writeln!(output, "## Not Yet Graded");

    if waiting.is_empty() {
        let _ = writeln!(output, "Every enrolled student has graded work.");
    } else {
        for name in waiting {
            let _ = writeln!(output, "- {}", name);
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LeaderboardEntry;
    use uuid::Uuid;

    fn entry(name: &str, total_score: i64, percentage: f64, graded: usize, rank: usize) -> LeaderboardEntry {
        LeaderboardEntry {
            id: Uuid::new_v4(),
            name: name.to_string(),
            total_score,
            assignments_submitted: graded,
            score_percentage: percentage,
            rank,
        }
    }

    fn board(entries: Vec<LeaderboardEntry>) -> Leaderboard {
        Leaderboard {
            course_id: Uuid::new_v4(),
            course_title: "Algorithms 101".to_string(),
            max_course_points: 100,
            results: entries.len(),
            leaderboard: entries,
        }
    }

    #[test]
    fn report_lists_standings_and_ungraded_students() {
        let board = board(vec![
            entry("Avery Lee", 80, 80.0, 2, 1),
            entry("Jules Moreno", 0, 0.0, 0, 2),
        ]);
        let date = NaiveDate::from_ymd_opt(2026, 2, 2).unwrap();

        let report = build_report(&board, date);

        assert!(report.starts_with("# Course Leaderboard: Algorithms 101"));
        assert!(report.contains("| 1 | Avery Lee | 80 / 100 | 80.0% | 2 |"));
        assert!(report.contains("- Class average: 40.0%"));
        assert!(report.contains("- Students with graded work: 1"));
        assert!(report.contains("## Not Yet Graded\n- Jules Moreno"));
    }

    #[test]
    fn empty_roster_reports_no_students() {
        let report = build_report(&board(Vec::new()), NaiveDate::from_ymd_opt(2026, 2, 2).unwrap());

        assert!(report.contains("No students are enrolled in this course."));
        assert!(report.contains("- Class average: 0.0%"));
    }
}
