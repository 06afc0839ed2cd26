// Score submission calls made by the session machine.

use std::sync::Arc;

use async_trait::async_trait;
use quizboard_core::http::{decode, encode, Fetch, HttpError, Method};
use quizboard_core::model::{QuizId, QuizSession, SessionId};
use quizboard_core::protocol::{final_score_path, provisional_score_path, ScoreUpdate};

/// Backend writes issued while a quiz is played.
#[async_trait]
pub trait ScoreSubmissionGateway: Send + Sync {
    /// Best-effort running score after a correct answer.
    async fn push_provisional_score(&self, quiz_id: &QuizId, score: u32) -> Result<(), HttpError>;

    /// Authoritative score closing the session.
    async fn submit_final_score(
        &self,
        session_id: &SessionId,
        score: u32,
    ) -> Result<QuizSession, HttpError>;
}

/// Gateway speaking the backend's JSON API through a [`Fetch`].
#[derive(Clone)]
pub struct HttpScoreGateway {
    fetch: Arc<dyn Fetch>,
}

impl HttpScoreGateway {
    pub fn new(fetch: Arc<dyn Fetch>) -> Self {
        Self { fetch }
    }
}

#[async_trait]
impl ScoreSubmissionGateway for HttpScoreGateway {
    async fn push_provisional_score(&self, quiz_id: &QuizId, score: u32) -> Result<(), HttpError> {
        let path = provisional_score_path(quiz_id);
        let body = encode(&path, &ScoreUpdate { score })?;
        self.fetch.fetch(Method::POST, &path, Some(body)).await?;
        Ok(())
    }

    async fn submit_final_score(
        &self,
        session_id: &SessionId,
        score: u32,
    ) -> Result<QuizSession, HttpError> {
        let path = final_score_path(session_id);
        let body = encode(&path, &ScoreUpdate { score })?;
        let value = self.fetch.fetch(Method::PATCH, &path, Some(body)).await?;
        decode(&path, value)
    }
}
