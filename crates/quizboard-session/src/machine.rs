// Quiz session state machine.
//
// Loading -> Answering(0) -> ... -> Answering(n-1) -> Completed -> Submitted
//
// Grading uses the correctness flags delivered with the quiz. Each correct
// answer queues a provisional score push on a background task; `finish`
// drains that queue before sending the authoritative final score, so the
// backend never sees a provisional score after the final one.

use std::sync::Arc;

use quizboard_core::http::{decode, Fetch, HttpError, Method};
use quizboard_core::model::{AnswerId, Quiz, QuizId, QuizSession, QuestionView};
use quizboard_core::protocol::quiz_path;
use quizboard_live::LeaderboardHub;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::gateway::ScoreSubmissionGateway;
use crate::join::join_quiz;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Loading,
    /// Index of the question being answered.
    Answering(usize),
    Completed,
    Submitted,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to load quiz {quiz_id}: {source}")]
    QuizLoadFailed {
        quiz_id: QuizId,
        #[source]
        source: HttpError,
    },

    #[error("score submission failed (provisional: {provisional}): {source}")]
    ScoreSubmissionFailed {
        provisional: bool,
        #[source]
        source: HttpError,
    },

    #[error("failed to join quiz {quiz_id}: {source}")]
    JoinFailed {
        quiz_id: QuizId,
        #[source]
        source: HttpError,
    },

    #[error("answer {0} does not belong to the current question")]
    UnknownAnswer(AnswerId),

    #[error("cannot {operation} while {state:?}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },
}

/// Told when a quiz's leaderboard has changed server-side.
pub trait StaleSignal: Send + Sync {
    fn mark_stale(&self, quiz_id: &QuizId);
}

impl StaleSignal for LeaderboardHub {
    fn mark_stale(&self, quiz_id: &QuizId) {
        LeaderboardHub::mark_stale(self, quiz_id);
    }
}

/// Sequential provisional pushes for one session.
struct ProvisionalQueue {
    tx: mpsc::UnboundedSender<u32>,
    task: JoinHandle<()>,
}

impl ProvisionalQueue {
    fn spawn(gateway: Arc<dyn ScoreSubmissionGateway>, quiz_id: QuizId) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<u32>();
        let task = tokio::spawn(async move {
            while let Some(score) = rx.recv().await {
                match gateway.push_provisional_score(&quiz_id, score).await {
                    Ok(()) => debug!(quiz_id = %quiz_id, score, "provisional score pushed"),
                    Err(source) => {
                        let err = SessionError::ScoreSubmissionFailed {
                            provisional: true,
                            source,
                        };
                        warn!(quiz_id = %quiz_id, score, error = %err, "provisional score push failed");
                    }
                }
            }
        });
        Self { tx, task }
    }

    /// Wait until every queued push has been attempted.
    async fn drain(self) {
        drop(self.tx);
        if let Err(e) = self.task.await {
            warn!(error = %e, "provisional score task ended abnormally");
        }
    }
}

// ---------------------------------------------------------------------------
// QuizSessionMachine
// ---------------------------------------------------------------------------

/// Drives one user through one quiz session.
///
/// All transitions take `&mut self`, so a machine is advanced by one caller
/// at a time. `advance` spawns onto the current tokio runtime.
pub struct QuizSessionMachine {
    fetch: Arc<dyn Fetch>,
    gateway: Arc<dyn ScoreSubmissionGateway>,
    stale: Option<Arc<dyn StaleSignal>>,
    session: QuizSession,
    quiz: Option<Quiz>,
    state: SessionState,
    score: u32,
    selected: Option<AnswerId>,
    provisional: Option<ProvisionalQueue>,
}

impl QuizSessionMachine {
    /// Machine for an already joined session, in `Loading`.
    pub fn new(
        fetch: Arc<dyn Fetch>,
        gateway: Arc<dyn ScoreSubmissionGateway>,
        session: QuizSession,
    ) -> Self {
        Self {
            fetch,
            gateway,
            stale: None,
            session,
            quiz: None,
            state: SessionState::Loading,
            score: 0,
            selected: None,
            provisional: None,
        }
    }

    /// Join `quiz_id` and build a machine for the new session.
    pub async fn join(
        fetch: Arc<dyn Fetch>,
        gateway: Arc<dyn ScoreSubmissionGateway>,
        quiz_id: &QuizId,
    ) -> Result<Self, SessionError> {
        let session = join_quiz(fetch.as_ref(), quiz_id).await?;
        Ok(Self::new(fetch, gateway, session))
    }

    /// Signal the quiz's leaderboard as stale after a successful finish.
    pub fn with_stale_signal(mut self, stale: Arc<dyn StaleSignal>) -> Self {
        self.stale = Some(stale);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn score(&self) -> u32 {
        self.score
    }

    pub fn session(&self) -> &QuizSession {
        &self.session
    }

    pub fn quiz(&self) -> Option<&Quiz> {
        self.quiz.as_ref()
    }

    pub fn selected_answer(&self) -> Option<&AnswerId> {
        self.selected.as_ref()
    }

    /// The question being answered, without correctness flags.
    pub fn current_question(&self) -> Option<QuestionView> {
        match self.state {
            SessionState::Answering(index) => self
                .quiz
                .as_ref()
                .and_then(|q| q.questions.get(index))
                .map(|q| q.view()),
            _ => None,
        }
    }

    /// Fetch the quiz. On failure the machine stays in `Loading` and `load`
    /// may be called again.
    pub async fn load(&mut self) -> Result<SessionState, SessionError> {
        self.expect_state("load", |s| s == SessionState::Loading)?;

        let quiz_id = self.session.quiz_id.clone();
        let path = quiz_path(&quiz_id);
        let quiz: Quiz = match self.fetch.fetch(Method::GET, &path, None).await {
            Ok(value) => decode(&path, value),
            Err(e) => Err(e),
        }
        .map_err(|source| SessionError::QuizLoadFailed {
            quiz_id: quiz_id.clone(),
            source,
        })?;

        info!(
            quiz_id = %quiz_id,
            questions = quiz.questions.len(),
            "quiz loaded"
        );
        self.state = if quiz.questions.is_empty() {
            SessionState::Completed
        } else {
            SessionState::Answering(0)
        };
        self.quiz = Some(quiz);
        Ok(self.state)
    }

    /// Choose an answer for the current question. Replaces any earlier
    /// selection.
    pub fn select(&mut self, answer_id: AnswerId) -> Result<(), SessionError> {
        let index = self.answering_index("select")?;
        let known = self
            .quiz
            .as_ref()
            .and_then(|q| q.questions.get(index))
            .is_some_and(|q| q.has_answer(&answer_id));
        if !known {
            return Err(SessionError::UnknownAnswer(answer_id));
        }
        self.selected = Some(answer_id);
        Ok(())
    }

    /// Grade the selection and move to the next question. Without a
    /// selection nothing changes.
    pub fn advance(&mut self) -> Result<SessionState, SessionError> {
        let index = self.answering_index("advance")?;
        let Some(selected) = self.selected.take() else {
            return Ok(self.state);
        };

        let (correct, total) = match &self.quiz {
            Some(quiz) => {
                let correct = quiz
                    .questions
                    .get(index)
                    .and_then(|q| q.answers.iter().find(|a| a.id == selected))
                    .is_some_and(|a| a.is_correct);
                (correct, quiz.questions.len())
            }
            None => (false, 0),
        };

        if correct {
            self.score += 1;
            self.queue_provisional(self.score);
        }
        debug!(question = index, correct, score = self.score, "answer graded");

        self.state = if index + 1 < total {
            SessionState::Answering(index + 1)
        } else {
            SessionState::Completed
        };
        Ok(self.state)
    }

    /// Submit the final score. Outstanding provisional pushes are awaited
    /// first. On failure the machine stays `Completed` and `finish` may be
    /// retried; once `Submitted`, it returns the stored session.
    pub async fn finish(&mut self) -> Result<QuizSession, SessionError> {
        if self.state == SessionState::Submitted {
            return Ok(self.session.clone());
        }
        self.expect_state("finish", |s| s == SessionState::Completed)?;

        if let Some(queue) = self.provisional.take() {
            queue.drain().await;
        }

        let session = self
            .gateway
            .submit_final_score(&self.session.id, self.score)
            .await
            .map_err(|source| {
                let err = SessionError::ScoreSubmissionFailed {
                    provisional: false,
                    source,
                };
                error!(session_id = %self.session.id, error = %err, "final score submission failed");
                err
            })?;

        info!(
            session_id = %self.session.id,
            quiz_id = %self.session.quiz_id,
            score = self.score,
            "final score submitted"
        );
        let quiz_id = self.session.quiz_id.clone();
        self.session = session;
        if let Some(stale) = &self.stale {
            stale.mark_stale(&quiz_id);
        }
        self.state = SessionState::Submitted;
        Ok(self.session.clone())
    }

    fn queue_provisional(&mut self, score: u32) {
        let queue = self.provisional.get_or_insert_with(|| {
            ProvisionalQueue::spawn(Arc::clone(&self.gateway), self.session.quiz_id.clone())
        });
        if queue.tx.send(score).is_err() {
            warn!(score, "provisional score queue closed, push skipped");
        }
    }

    fn answering_index(&self, operation: &'static str) -> Result<usize, SessionError> {
        match self.state {
            SessionState::Answering(index) => Ok(index),
            state => Err(SessionError::InvalidState { operation, state }),
        }
    }

    fn expect_state(
        &self,
        operation: &'static str,
        allowed: impl Fn(SessionState) -> bool,
    ) -> Result<(), SessionError> {
        if allowed(self.state) {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
