// Joining a quiz creates the server-side session a machine plays through.

use quizboard_core::http::{decode, encode, Fetch, Method};
use quizboard_core::model::{QuizId, QuizSession};
use quizboard_core::protocol::{JoinRequest, JOIN_QUIZ};
use tracing::info;

use crate::machine::SessionError;

/// `POST /quizzes/join` for `quiz_id`.
pub async fn join_quiz(fetch: &dyn Fetch, quiz_id: &QuizId) -> Result<QuizSession, SessionError> {
    let failed = |source| SessionError::JoinFailed {
        quiz_id: quiz_id.clone(),
        source,
    };

    let body = encode(
        JOIN_QUIZ,
        &JoinRequest {
            quiz_id: quiz_id.clone(),
        },
    )
    .map_err(failed)?;
    let value = fetch
        .fetch(Method::POST, JOIN_QUIZ, Some(body))
        .await
        .map_err(failed)?;
    let session: QuizSession = decode(JOIN_QUIZ, value).map_err(failed)?;

    info!(quiz_id = %quiz_id, session_id = %session.id, "joined quiz");
    Ok(session)
}
