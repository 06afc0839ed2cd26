// `quizboard play`: join a quiz, answer it from stdin and submit the score
// while the quiz's leaderboard is printed as it changes.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use quizboard_core::http::Fetch;
use quizboard_core::model::{QuestionView, QuizId};
use quizboard_live::LeaderboardHub;
use quizboard_session::{HttpScoreGateway, QuizSessionMachine, SessionState};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::info;

use crate::render;

/// How long to keep printing board updates after the final submission.
const SETTLE: Duration = Duration::from_secs(2);

pub async fn run(hub: &LeaderboardHub, fetch: Arc<dyn Fetch>, quiz_id: QuizId) -> anyhow::Result<()> {
    let mut prompt = Prompt::new();

    let gateway = Arc::new(HttpScoreGateway::new(Arc::clone(&fetch)));
    let mut machine = QuizSessionMachine::join(fetch, gateway, &quiz_id)
        .await
        .with_context(|| format!("could not join quiz {quiz_id}"))?
        .with_stale_signal(Arc::new(hub.clone()));
    println!("Joined quiz {quiz_id} (session {}).", machine.session().id);

    let _board = hub.subscribe_to_quiz(&quiz_id, |board| println!("{}", render::board(board)));

    loop {
        match machine.load().await {
            Ok(_) => break,
            Err(e) => {
                println!("{e}");
                if !prompt.confirm("Retry loading the quiz?").await? {
                    return Err(e).context("quiz not loaded");
                }
            }
        }
    }

    let total = machine.quiz().map_or(0, |q| q.questions.len());
    if let Some(quiz) = machine.quiz() {
        println!("{} ({total} questions)", quiz.name);
    }

    while let Some(question) = machine.current_question() {
        let number = match machine.state() {
            SessionState::Answering(i) => i + 1,
            _ => 0,
        };
        println!("\n{}", render::question(number, total, &question));
        ensure_answerable(&question)?;
        let choice = prompt.choose(question.answers.len()).await?;
        machine.select(question.answers[choice].id.clone())?;
        machine.advance()?;
    }

    println!("\nAll done, score {}.", machine.score());
    loop {
        match machine.finish().await {
            Ok(session) => {
                println!("Final score {} submitted.", session.score);
                break;
            }
            Err(e) => {
                println!("{e}");
                if !prompt.confirm("Retry the submission?").await? {
                    return Err(e).context("final score not submitted");
                }
            }
        }
    }

    info!(quiz_id = %quiz_id, score = machine.score(), "quiz played");
    tokio::time::sleep(SETTLE).await;
    Ok(())
}

/// A question without answers can never be advanced past.
fn ensure_answerable(question: &QuestionView) -> anyhow::Result<()> {
    if question.answers.is_empty() {
        bail!("question {} has no answers to choose from", question.id);
    }
    Ok(())
}

/// Line-oriented stdin prompts.
struct Prompt {
    lines: Lines<BufReader<Stdin>>,
}

impl Prompt {
    fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
        }
    }

    async fn ask(&mut self, text: &str) -> anyhow::Result<String> {
        print!("{text} ");
        std::io::stdout().flush()?;
        match self.lines.next_line().await? {
            Some(line) => Ok(line),
            None => bail!("input closed"),
        }
    }

    async fn confirm(&mut self, question: &str) -> anyhow::Result<bool> {
        let answer = self.ask(&format!("{question} [y/N]")).await?;
        Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
    }

    async fn choose(&mut self, count: usize) -> anyhow::Result<usize> {
        loop {
            let input = self.ask(&format!("Your answer (1-{count}):")).await?;
            match render::parse_choice(&input, count) {
                Some(index) => return Ok(index),
                None => println!("Please enter a number between 1 and {count}."),
            }
        }
    }
}
