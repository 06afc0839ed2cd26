// quizboard entry point.
//
// Startup sequence:
// 1. Parse the command line
// 2. Initialize tracing (log to file, stdout carries command output)
// 3. Load config
// 4. Build the HTTP client, SSE transport and leaderboard hub
// 5. Run the chosen command until it finishes or Ctrl+C

mod play;
mod render;
mod watch;

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use quizboard_core::config;
use quizboard_core::http::HttpClient;
use quizboard_core::model::QuizId;
use quizboard_live::{LeaderboardCache, LeaderboardHub, SseTransport, StreamOptions};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "quizboard", version, about = "Live quiz leaderboards and quiz play")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print leaderboard updates as they arrive, until Ctrl+C.
    Watch {
        /// Quiz to follow; repeat for several. Without any, follows every quiz.
        #[arg(long = "quiz", value_name = "ID")]
        quizzes: Vec<String>,
    },
    /// Join a quiz and answer its questions from the terminal.
    Play {
        #[arg(value_name = "QUIZ_ID")]
        quiz_id: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing()?;
    info!("quizboard starting up");

    let config = config::load_config().context("failed to load configuration")?;
    info!(
        base_url = %config.server.base_url,
        api_prefix = %config.server.api_prefix,
        authenticated = config.credentials.access_token.is_some(),
        "config loaded"
    );

    let client = HttpClient::from_config(&config);
    let hub = LeaderboardHub::new(
        LeaderboardCache::new(),
        Arc::new(SseTransport::new(client.clone())),
        Arc::new(client.clone()),
        StreamOptions::from_config(&config.stream),
    );

    let result = match cli.command {
        Command::Watch { quizzes } => {
            let quizzes = quizzes.into_iter().map(QuizId::new).collect();
            watch::run(&hub, quizzes).await
        }
        Command::Play { quiz_id } => play::run(&hub, Arc::new(client), QuizId::new(quiz_id)).await,
    };

    info!("quizboard shut down");
    result
}

/// Initialize tracing to log to a file (stdout is used for command output).
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::File::create(log_dir.join("quizboard.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("quizboard=info,warn")),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
