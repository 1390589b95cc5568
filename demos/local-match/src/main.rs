//! Two clients, one complete match, one mid-game node migration - all in
//! process, over the reference cluster.
//!
//! Run with `cargo run -p local-match`. Set `RUST_LOG=debug` to watch the
//! protocol traffic.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::info;

use noughts::prelude::*;
use noughts::testing::LocalCluster;

#[tokio::main]
async fn main() {
    noughts::telemetry::init_tracing("info,noughts=debug");

    let cluster = LocalCluster::pair("alpha", "beta");

    let alice_config = Config::new(cluster.url(0)).with_migration_delay_ms(50..=200);
    let (alice, mut alice_events) = Client::connect(
        alice_config,
        cluster.transport(),
        Arc::new(MemoryStore::new()),
    )
    .await
    .expect("alice failed to connect");
    let (bob, mut bob_events) = Client::connect(
        Config::new(cluster.url(0)),
        cluster.transport(),
        Arc::new(MemoryStore::new()),
    )
    .await
    .expect("bob failed to connect");

    establish_identity(&alice, &mut alice_events, "alice").await;
    establish_identity(&bob, &mut bob_events, "bob").await;

    alice.new_game().expect("new_game");
    let created = wait_for_game(&mut alice_events).await;
    info!(game = %created.id, "alice opened a game");

    bob.challenge(created.id.clone()).expect("challenge");
    wait_for_game(&mut alice_events).await;
    let adopted = wait_for_game(&mut bob_events).await;
    info!(game = %adopted.id, "bob joined");

    // volunteer for relocation; the next move after the timer fires will
    // carry the game to the beta node
    alice.schedule_migration().expect("schedule_migration");
    tokio::time::sleep(Duration::from_millis(250)).await;

    let (alice_result, bob_result) = tokio::join!(
        play("alice", &alice, &mut alice_events, &[0, 4, 8]),
        play("bob", &bob, &mut bob_events, &[1, 2]),
    );

    info!(?alice_result, ?bob_result, "match over");
    alice.shutdown().ok();
    bob.shutdown().ok();
}

async fn establish_identity(client: &Client, events: &mut mpsc::Receiver<Event>, name: &str) {
    loop {
        match events.recv().await.expect("event stream closed") {
            Event::IdentityRequired => client.set_player(name).expect("set_player"),
            Event::Identified(player) => {
                info!(%player, "identified");
                return;
            }
            _ => {}
        }
    }
}

async fn wait_for_game(events: &mut mpsc::Receiver<Event>) -> Game {
    loop {
        if let Event::GameStarted(game) = events.recv().await.expect("event stream closed") {
            return game;
        }
    }
}

/// Play the planned squares whenever it is our turn, narrating the rest.
async fn play(
    name: &str,
    client: &Client,
    events: &mut mpsc::Receiver<Event>,
    plan: &[u8],
) -> Outcome {
    let mut plan = plan.iter().copied();
    let mut pending = plan.next();
    loop {
        match events.recv().await.expect("event stream closed") {
            Event::BoardUpdated(view) => {
                info!(player = name, board = %render(&view), my_turn = view.my_turn);
                if view.my_turn {
                    if let Some(square) = pending {
                        client.play_square(square).expect("play_square");
                        pending = plan.next();
                    }
                }
            }
            Event::Migrated { url } => info!(player = name, %url, "migrating"),
            Event::GameStarted(game) => info!(player = name, game = %game.id, "game resumed"),
            Event::GameOver { outcome, winner } => {
                match &winner {
                    Some(winner) => info!(player = name, %winner, ?outcome, "game over"),
                    None => info!(player = name, ?outcome, "game over"),
                }
                return outcome;
            }
            _ => {}
        }
    }
}

fn render(view: &BoardView) -> String {
    (0..9u8)
        .map(|square| match view.squares.get(&square) {
            Some(mark) => mark.to_string(),
            None => ".".to_string(),
        })
        .collect::<Vec<_>>()
        .join("")
}
