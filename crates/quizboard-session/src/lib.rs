// Quiz-session scoring: joining a quiz, grading answers and submitting
// provisional and final scores.

pub mod gateway;
pub mod join;
pub mod machine;

pub use gateway::{HttpScoreGateway, ScoreSubmissionGateway};
pub use join::join_quiz;
pub use machine::{QuizSessionMachine, SessionError, SessionState, StaleSignal};
