// `quizboard watch`: print leaderboard updates until Ctrl+C.

use quizboard_core::model::QuizId;
use quizboard_live::{BoardSnapshot, HubSubscription, LeaderboardHub};
use tokio::sync::mpsc;
use tracing::info;

use crate::render;

pub async fn run(hub: &LeaderboardHub, quizzes: Vec<QuizId>) -> anyhow::Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<BoardSnapshot>();
    let forward = |tx: mpsc::UnboundedSender<BoardSnapshot>| {
        move |board: &BoardSnapshot| {
            let _ = tx.send(board.clone());
        }
    };

    let subscriptions: Vec<(String, HubSubscription)> = if quizzes.is_empty() {
        println!("Following every quiz. Ctrl+C to stop.");
        vec![("all".to_string(), hub.subscribe_to_all(forward(tx.clone())))]
    } else {
        println!("Following {} quiz(zes). Ctrl+C to stop.", quizzes.len());
        quizzes
            .iter()
            .map(|q| (q.to_string(), hub.subscribe_to_quiz(q, forward(tx.clone()))))
            .collect()
    };
    drop(tx);
    info!(subscriptions = subscriptions.len(), "watching leaderboards");

    for (label, sub) in &subscriptions {
        spawn_status_printer(label.clone(), sub);
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            Some(board) = rx.recv() => println!("{}", render::board(&board)),
            _ = &mut ctrl_c => {
                info!("Ctrl+C received, stopping watch");
                break;
            }
        }
    }

    drop(subscriptions);
    Ok(())
}

/// Print a line whenever the subscription's connection changes state.
fn spawn_status_printer(label: String, sub: &HubSubscription) {
    let mut status = sub.status_watch();
    tokio::spawn(async move {
        let mut last = None;
        while status.changed().await.is_ok() {
            let current = status.borrow_and_update().clone();
            if last == Some((current.state, current.attempt)) {
                continue;
            }
            last = Some((current.state, current.attempt));
            if let Some(line) = render::status(&label, &current) {
                println!("{line}");
            }
        }
    });
}
