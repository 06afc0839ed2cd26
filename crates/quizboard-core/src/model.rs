// Quiz, session and leaderboard data model shared by every quizboard crate.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Backend identifier of a quiz.
    QuizId
);
string_id!(
    /// Backend identifier of a quiz session (one user's attempt at a quiz).
    SessionId
);
string_id!(QuestionId);
string_id!(AnswerId);
string_id!(
    /// Backend identifier of a user, as reported on leaderboard rows.
    UserId
);

// ---------------------------------------------------------------------------
// Quiz content
// ---------------------------------------------------------------------------

/// A quiz as delivered by `GET /quizzes/{id}`.
///
/// The payload carries the correctness flag of every answer. Grading happens
/// locally from these flags, so a modified client can report any score; the
/// backend is the only place that could re-validate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quiz {
    pub id: QuizId,
    pub name: String,
    #[serde(default)]
    pub questions: Vec<Question>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub text: String,
    #[serde(default)]
    pub answers: Vec<Answer>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub id: AnswerId,
    pub text: String,
    pub is_correct: bool,
}

impl Question {
    /// The first answer flagged correct. Server data is untrusted, so a
    /// question may have none.
    pub fn correct_answer(&self) -> Option<&Answer> {
        self.answers.iter().find(|a| a.is_correct)
    }

    pub fn has_answer(&self, answer_id: &AnswerId) -> bool {
        self.answers.iter().any(|a| &a.id == answer_id)
    }

    /// A copy of the question safe to show before grading: answer order and
    /// text are preserved, correctness flags are stripped.
    pub fn view(&self) -> QuestionView {
        QuestionView {
            id: self.id.clone(),
            text: self.text.clone(),
            answers: self
                .answers
                .iter()
                .map(|a| AnswerView {
                    id: a.id.clone(),
                    text: a.text.clone(),
                })
                .collect(),
        }
    }
}

/// Question as presented to the player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionView {
    pub id: QuestionId,
    pub text: String,
    pub answers: Vec<AnswerView>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerView {
    pub id: AnswerId,
    pub text: String,
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

/// Server-side record of one user's attempt at a quiz.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizSession {
    pub id: SessionId,
    pub quiz_id: QuizId,
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default, deserialize_with = "deserialize_score")]
    pub score: u32,
}

// ---------------------------------------------------------------------------
// Leaderboards
// ---------------------------------------------------------------------------

/// One leaderboard row. `rank` is assigned by the backend and never computed
/// locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub user_id: UserId,
    #[serde(deserialize_with = "deserialize_score")]
    pub score: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<u32>,
}

impl LeaderboardEntry {
    pub fn new(user_id: impl Into<UserId>, score: u32) -> Self {
        Self {
            user_id: user_id.into(),
            score,
            rank: None,
        }
    }

    pub fn with_rank(mut self, rank: u32) -> Self {
        self.rank = Some(rank);
        self
    }
}

/// Scores come from a sorted-set store and are serialized as floats (`5.0`).
/// Accept any non-negative integral number; reject fractions.
fn deserialize_score<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let n = serde_json::Number::deserialize(deserializer)?;
    if let Some(v) = n.as_u64() {
        return u32::try_from(v).map_err(|_| D::Error::custom(format!("score {v} out of range")));
    }
    match n.as_f64() {
        Some(f) if f >= 0.0 && f.fract() == 0.0 && f <= f64::from(u32::MAX) => Ok(f as u32),
        _ => Err(D::Error::custom(format!(
            "score must be a non-negative integer, got {n}"
        ))),
    }
}
