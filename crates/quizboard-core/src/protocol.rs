// Backend endpoints and the JSON bodies exchanged with them.
//
// Paths here are relative to `server.base_url` + `server.api_prefix`.

use serde::{Deserialize, Serialize};

use crate::model::{LeaderboardEntry, QuizId, SessionId};

// ---------------------------------------------------------------------------
// Endpoints
// ---------------------------------------------------------------------------

/// Aggregate push stream carrying updates for every quiz.
pub const ALL_LEADERBOARDS_STREAM: &str = "/leaderboards/all/stream";

/// Join endpoint; the body is a [`JoinRequest`].
pub const JOIN_QUIZ: &str = "/quizzes/join";

pub fn quiz_path(quiz_id: &QuizId) -> String {
    format!("/quizzes/{quiz_id}")
}

pub fn leaderboard_path(quiz_id: &QuizId) -> String {
    format!("/leaderboards/{quiz_id}")
}

pub fn provisional_score_path(quiz_id: &QuizId) -> String {
    format!("/leaderboards/{quiz_id}/score")
}

pub fn final_score_path(session_id: &SessionId) -> String {
    format!("/quiz-sessions/{session_id}/score")
}

/// Per-quiz push stream; each message is a full replacement snapshot.
pub fn quiz_stream_path(quiz_id: &QuizId) -> String {
    format!("/quiz-sessions/leaderboard/{quiz_id}/stream")
}

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequest {
    pub quiz_id: QuizId,
}

/// Body of both the provisional push and the final submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreUpdate {
    pub score: u32,
}

// ---------------------------------------------------------------------------
// Stream payloads
// ---------------------------------------------------------------------------

/// One message of the aggregate stream.
///
/// The backend reports its own failures in-band as `{"error": "..."}` on the
/// same stream, so both shapes are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum AggregateMessage {
    Update {
        quiz_id: QuizId,
        leaderboard: Vec<LeaderboardEntry>,
    },
    Error {
        error: String,
    },
}
