// Plain-text formatting of boards, questions and connection status.

use quizboard_core::model::QuestionView;
use quizboard_live::{BoardSnapshot, ConnectionState, StreamStatus};

/// One board as a header line followed by one line per entry, in server
/// order.
pub fn board(board: &BoardSnapshot) -> String {
    let mut out = format!(
        "== {} ({}) ==",
        board.quiz_id,
        board.updated_at.format("%H:%M:%S")
    );
    if board.entries.is_empty() {
        out.push_str("\n  (no scores yet)");
    }
    for entry in &board.entries {
        let rank = entry.rank.map_or_else(|| "-".to_string(), |r| r.to_string());
        out.push_str(&format!(
            "\n  {:>3}. {:<24} {:>5}",
            rank, entry.user_id, entry.score
        ));
    }
    out
}

pub fn question(number: usize, total: usize, question: &QuestionView) -> String {
    let mut out = format!("Question {number}/{total}: {}", question.text);
    for (i, answer) in question.answers.iter().enumerate() {
        out.push_str(&format!("\n  {}) {}", i + 1, answer.text));
    }
    out
}

/// `None` when the change is not worth a line (e.g. still connecting for
/// the first time).
pub fn status(label: &str, status: &StreamStatus) -> Option<String> {
    match status.state {
        ConnectionState::Open => Some(format!("[{label}] connected")),
        ConnectionState::Reconnecting => {
            let reason = status
                .last_error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "connection lost".to_string());
            Some(format!(
                "[{label}] connection issue ({reason}), retry #{}",
                status.attempt
            ))
        }
        ConnectionState::Closed => Some(format!("[{label}] closed")),
        ConnectionState::Connecting => None,
    }
}

/// 1-based menu choice to a 0-based index.
pub fn parse_choice(input: &str, count: usize) -> Option<usize> {
    match input.trim().parse::<usize>() {
        Ok(n) if (1..=count).contains(&n) => Some(n - 1),
        _ => None,
    }
}
