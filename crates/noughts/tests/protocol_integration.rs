//! End-to-end protocol tests against the in-process reference cluster.
//!
//! Two real clients negotiate, play, resume, and migrate through the same
//! code paths a production deployment uses; only the transport is local.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use noughts::prelude::*;
use noughts::testing::LocalCluster;

// ============================================================================
// Helpers
// ============================================================================

async fn next_event(events: &mut mpsc::Receiver<Event>) -> Event {
    timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event stream closed")
}

/// Skip events until `pick` extracts a value.
async fn wait_for<T>(
    events: &mut mpsc::Receiver<Event>,
    mut pick: impl FnMut(Event) -> Option<T>,
) -> T {
    loop {
        let event = next_event(events).await;
        if let Some(value) = pick(event) {
            return value;
        }
    }
}

async fn wait_for_game_started(events: &mut mpsc::Receiver<Event>) -> Game {
    wait_for(events, |event| match event {
        Event::GameStarted(game) => Some(game),
        _ => None,
    })
    .await
}

async fn wait_for_game_over(
    events: &mut mpsc::Receiver<Event>,
) -> (Outcome, Option<Player>) {
    wait_for(events, |event| match event {
        Event::GameOver { outcome, winner } => Some((outcome, winner)),
        _ => None,
    })
    .await
}

/// Connect a fresh client and establish `name` as its identity.
async fn connect_player(
    cluster: &LocalCluster,
    config: Config,
    store: Arc<MemoryStore>,
    name: &str,
) -> (Client, mpsc::Receiver<Event>) {
    let (client, mut events) = Client::connect(config, cluster.transport(), store)
        .await
        .expect("connect failed");
    wait_for(&mut events, |event| {
        matches!(event, Event::IdentityRequired).then_some(())
    })
    .await;
    client.set_player(name).expect("set_player");
    wait_for(&mut events, |event| match event {
        Event::Identified(player) => Some(player),
        _ => None,
    })
    .await;
    (client, events)
}

/// Reconnect with a store that already remembers the identity.
async fn reconnect_player(
    cluster: &LocalCluster,
    config: Config,
    store: Arc<MemoryStore>,
) -> (Client, mpsc::Receiver<Event>) {
    let (client, mut events) = Client::connect(config, cluster.transport(), store)
        .await
        .expect("reconnect failed");
    wait_for(&mut events, |event| match event {
        Event::Identified(player) => Some(player),
        _ => None,
    })
    .await;
    (client, events)
}

/// Play the planned squares whenever the board says it is our turn, until
/// the game ends.
async fn drive_to_game_over(
    client: &Client,
    events: &mut mpsc::Receiver<Event>,
    plan: &[u8],
) -> (Outcome, Option<Player>) {
    let mut plan = plan.iter().copied();
    let mut pending = plan.next();
    loop {
        match next_event(events).await {
            Event::BoardUpdated(view) if view.my_turn => {
                if let Some(square) = pending {
                    client.play_square(square).expect("play_square");
                    pending = plan.next();
                }
            }
            Event::GameOver { outcome, winner } => return (outcome, winner),
            _ => {}
        }
    }
}

fn squares_of(pairs: &[(u8, Mark)]) -> BTreeMap<u8, Mark> {
    pairs.iter().copied().collect()
}

// ============================================================================
// Challenge handshake and full games
// ============================================================================

#[tokio::test]
async fn challenge_round_trip_leaves_equal_boards() {
    let cluster = LocalCluster::single("alpha");
    let (alice, mut alice_events) = connect_player(
        &cluster,
        Config::new(cluster.url(0)),
        Arc::new(MemoryStore::new()),
        "alice",
    )
    .await;
    let (bob, mut bob_events) = connect_player(
        &cluster,
        Config::new(cluster.url(0)),
        Arc::new(MemoryStore::new()),
        "bob",
    )
    .await;

    alice.new_game().expect("new_game");
    let created = wait_for_game_started(&mut alice_events).await;
    assert_eq!(created.owner, Player::new("alice"));
    assert!(created.moves.is_empty());

    // the broadcast offers the game to bob but never back to its owner
    let listed = wait_for(&mut bob_events, |event| match event {
        Event::GameList(list) if !list.is_empty() => Some(list),
        _ => None,
    })
    .await;
    assert_eq!(listed[0].id, created.id);

    bob.challenge(created.id.clone()).expect("challenge");
    let adopted_by_alice = wait_for_game_started(&mut alice_events).await;
    let adopted_by_bob = wait_for_game_started(&mut bob_events).await;
    assert_eq!(adopted_by_alice, adopted_by_bob);
    assert_eq!(adopted_by_bob.opponent, Some(Player::new("bob")));

    // owner opens on the center square
    alice.play_square(4).expect("play_square");
    let alice_view = wait_for(&mut alice_events, |event| match event {
        Event::BoardUpdated(view) if !view.squares.is_empty() => Some(view),
        _ => None,
    })
    .await;
    let bob_view = wait_for(&mut bob_events, |event| match event {
        Event::BoardUpdated(view) if !view.squares.is_empty() => Some(view),
        _ => None,
    })
    .await;
    assert_eq!(alice_view.squares, squares_of(&[(4, Mark::X)]));
    assert_eq!(bob_view.squares, squares_of(&[(4, Mark::X)]));
    assert!(!alice_view.my_turn);
    assert!(bob_view.my_turn);
}

#[tokio::test]
async fn full_game_reports_win_and_loss() {
    let cluster = LocalCluster::single("alpha");
    let (alice, mut alice_events) = connect_player(
        &cluster,
        Config::new(cluster.url(0)),
        Arc::new(MemoryStore::new()),
        "alice",
    )
    .await;
    let (bob, mut bob_events) = connect_player(
        &cluster,
        Config::new(cluster.url(0)),
        Arc::new(MemoryStore::new()),
        "bob",
    )
    .await;

    alice.new_game().expect("new_game");
    let created = wait_for_game_started(&mut alice_events).await;
    bob.challenge(created.id.clone()).expect("challenge");
    wait_for_game_started(&mut bob_events).await;

    // alice strikes the diagonal 0-4-8
    let (alice_result, bob_result) = tokio::join!(
        drive_to_game_over(&alice, &mut alice_events, &[0, 4, 8]),
        drive_to_game_over(&bob, &mut bob_events, &[1, 2]),
    );
    assert_eq!(alice_result, (Outcome::Won, Some(Player::new("alice"))));
    assert_eq!(bob_result, (Outcome::Lost, Some(Player::new("alice"))));
}

#[tokio::test]
async fn drawn_game_reports_draw_for_both() {
    let cluster = LocalCluster::single("alpha");
    let (alice, mut alice_events) = connect_player(
        &cluster,
        Config::new(cluster.url(0)),
        Arc::new(MemoryStore::new()),
        "alice",
    )
    .await;
    let (bob, mut bob_events) = connect_player(
        &cluster,
        Config::new(cluster.url(0)),
        Arc::new(MemoryStore::new()),
        "bob",
    )
    .await;

    alice.new_game().expect("new_game");
    let created = wait_for_game_started(&mut alice_events).await;
    bob.challenge(created.id.clone()).expect("challenge");
    wait_for_game_started(&mut bob_events).await;

    // ends with X on 0,2,5,6,7 and O on 1,3,4,8: no strike anywhere
    let (alice_result, bob_result) = tokio::join!(
        drive_to_game_over(&alice, &mut alice_events, &[0, 2, 5, 6, 7]),
        drive_to_game_over(&bob, &mut bob_events, &[1, 3, 4, 8]),
    );
    assert_eq!(alice_result, (Outcome::Draw, None));
    assert_eq!(bob_result, (Outcome::Draw, None));
}

#[tokio::test]
async fn duplicate_delivery_is_absorbed() {
    let cluster = LocalCluster::single("alpha");
    cluster.duplicate_delivery(true);
    let (alice, mut alice_events) = connect_player(
        &cluster,
        Config::new(cluster.url(0)),
        Arc::new(MemoryStore::new()),
        "alice",
    )
    .await;
    let (bob, mut bob_events) = connect_player(
        &cluster,
        Config::new(cluster.url(0)),
        Arc::new(MemoryStore::new()),
        "bob",
    )
    .await;

    alice.new_game().expect("new_game");
    let created = wait_for_game_started(&mut alice_events).await;
    bob.challenge(created.id.clone()).expect("challenge");
    wait_for_game_started(&mut bob_events).await;

    let (alice_result, bob_result) = tokio::join!(
        drive_to_game_over(&alice, &mut alice_events, &[0, 4, 8]),
        drive_to_game_over(&bob, &mut bob_events, &[1, 2]),
    );
    assert_eq!(alice_result.0, Outcome::Won);
    assert_eq!(bob_result.0, Outcome::Lost);
}

// ============================================================================
// Resumption
// ============================================================================

#[tokio::test]
async fn resume_by_player_restores_a_live_game() {
    let cluster = LocalCluster::single("alpha");
    let alice_store = Arc::new(MemoryStore::new());
    let (alice, mut alice_events) = connect_player(
        &cluster,
        Config::new(cluster.url(0)),
        Arc::clone(&alice_store),
        "alice",
    )
    .await;
    let (bob, mut bob_events) = connect_player(
        &cluster,
        Config::new(cluster.url(0)),
        Arc::new(MemoryStore::new()),
        "bob",
    )
    .await;

    alice.new_game().expect("new_game");
    let created = wait_for_game_started(&mut alice_events).await;
    bob.challenge(created.id.clone()).expect("challenge");
    wait_for_game_started(&mut bob_events).await;

    // two corroborated moves, then alice drops off
    alice.play_square(4).expect("play_square");
    wait_for(&mut bob_events, |event| match event {
        Event::BoardUpdated(view) if view.my_turn => Some(()),
        _ => None,
    })
    .await;
    bob.play_square(0).expect("play_square");
    wait_for(&mut alice_events, |event| match event {
        Event::BoardUpdated(view) if view.squares.len() == 2 => Some(()),
        _ => None,
    })
    .await;

    alice.shutdown().expect("shutdown");
    wait_for(&mut alice_events, |event| {
        matches!(event, Event::Closed).then_some(())
    })
    .await;

    // a fresh tab with the same store picks the game back up mid-flight
    let (_alice2, mut alice2_events) =
        reconnect_player(&cluster, Config::new(cluster.url(0)), alice_store).await;
    let resumed = wait_for_game_started(&mut alice2_events).await;
    assert_eq!(resumed.id, created.id);
    assert_eq!(resumed.moves.len(), 2);
    let view = wait_for(&mut alice2_events, |event| match event {
        Event::BoardUpdated(view) => Some(view),
        _ => None,
    })
    .await;
    assert_eq!(view.squares, squares_of(&[(4, Mark::X), (0, Mark::O)]));
    assert!(view.my_turn);
}

#[tokio::test]
async fn resume_by_game_id_restores_an_owned_game() {
    let cluster = LocalCluster::single("alpha");
    let store = Arc::new(MemoryStore::new());
    let config = Config::new(cluster.url(0)).with_resume(ResumeStrategy::ByGameId);

    let (alice, mut alice_events) =
        connect_player(&cluster, config.clone(), Arc::clone(&store), "alice").await;
    alice.new_game().expect("new_game");
    let created = wait_for_game_started(&mut alice_events).await;
    assert_eq!(store.game().as_ref(), Some(&created.id));

    alice.shutdown().expect("shutdown");
    wait_for(&mut alice_events, |event| {
        matches!(event, Event::Closed).then_some(())
    })
    .await;

    let (_alice2, mut alice2_events) = reconnect_player(&cluster, config, store).await;
    let resumed = wait_for_game_started(&mut alice2_events).await;
    assert_eq!(resumed.id, created.id);
}

#[tokio::test]
async fn failed_resume_falls_back_to_the_lobby() {
    let cluster = LocalCluster::single("alpha");
    let store = Arc::new(MemoryStore::new());
    store.remember(&Player::new("alice"));

    // no game exists for alice: she lands identified, with nothing adopted
    let (_alice, mut events) =
        reconnect_player(&cluster, Config::new(cluster.url(0)), store).await;
    let list = wait_for(&mut events, |event| match event {
        Event::GameList(list) => Some(list),
        _ => None,
    })
    .await;
    assert!(list.is_empty());
}

// ============================================================================
// Challenge policies
// ============================================================================

#[tokio::test]
async fn manual_policy_surfaces_rejection_and_recovers() {
    let cluster = LocalCluster::single("alpha");
    let manual = Config::new(cluster.url(0)).with_accept_policy(AcceptPolicy::Manual);
    let (alice, mut alice_events) = connect_player(
        &cluster,
        manual,
        Arc::new(MemoryStore::new()),
        "alice",
    )
    .await;
    let (bob, mut bob_events) = connect_player(
        &cluster,
        Config::new(cluster.url(0)),
        Arc::new(MemoryStore::new()),
        "bob",
    )
    .await;

    alice.new_game().expect("new_game");
    let created = wait_for_game_started(&mut alice_events).await;

    bob.challenge(created.id.clone()).expect("challenge");
    let asked = wait_for(&mut alice_events, |event| match event {
        Event::ChallengeReceived(game_id) => Some(game_id),
        _ => None,
    })
    .await;
    assert_eq!(asked, created.id);
    alice.respond_challenge(asked, false).expect("respond");

    // the rejected challenger keeps waiting, then tries again and is let in
    let relisted = wait_for(&mut bob_events, |event| match event {
        Event::GameList(list) if !list.is_empty() => Some(list),
        _ => None,
    })
    .await;
    assert_eq!(relisted[0].id, created.id);

    bob.challenge(created.id.clone()).expect("second challenge");
    let asked = wait_for(&mut alice_events, |event| match event {
        Event::ChallengeReceived(game_id) => Some(game_id),
        _ => None,
    })
    .await;
    alice.respond_challenge(asked, true).expect("respond");

    let adopted_by_alice = wait_for_game_started(&mut alice_events).await;
    let adopted_by_bob = wait_for_game_started(&mut bob_events).await;
    assert_eq!(adopted_by_alice, adopted_by_bob);
}

// ============================================================================
// Migration
// ============================================================================

#[tokio::test]
async fn migration_relocates_a_live_game() {
    let cluster = LocalCluster::pair("alpha", "beta");
    let alice_config = Config::new(cluster.url(0)).with_migration_delay_ms(1..=5);
    let (alice, mut alice_events) = connect_player(
        &cluster,
        alice_config,
        Arc::new(MemoryStore::new()),
        "alice",
    )
    .await;
    let (bob, mut bob_events) = connect_player(
        &cluster,
        Config::new(cluster.url(0)),
        Arc::new(MemoryStore::new()),
        "bob",
    )
    .await;

    alice.new_game().expect("new_game");
    let created = wait_for_game_started(&mut alice_events).await;
    bob.challenge(created.id.clone()).expect("challenge");
    wait_for_game_started(&mut bob_events).await;

    // arm the relocation; the next move carries the game to the peer node
    alice.schedule_migration().expect("schedule_migration");
    tokio::time::sleep(Duration::from_millis(100)).await;

    let watch_migration = async {
        let url = wait_for(&mut alice_events, |event| match event {
            Event::Migrated { url } => Some(url),
            _ => None,
        })
        .await;
        assert_eq!(url, "local://beta?player=alice");
        drive_to_game_over(&alice, &mut alice_events, &[4, 8]).await
    };
    let (alice_result, bob_result) = tokio::join!(
        async {
            alice.play_square(0).expect("play_square");
            watch_migration.await
        },
        drive_to_game_over(&bob, &mut bob_events, &[1, 2]),
    );

    assert_eq!(alice_result, (Outcome::Won, Some(Player::new("alice"))));
    assert_eq!(bob_result, (Outcome::Lost, Some(Player::new("alice"))));
}

// ============================================================================
// Transport boundary
// ============================================================================

#[tokio::test]
async fn handshake_with_unknown_node_fails() {
    let cluster = LocalCluster::single("alpha");
    let result = Client::connect(
        Config::new("local://nowhere"),
        cluster.transport(),
        Arc::new(MemoryStore::new()),
    )
    .await;
    assert!(matches!(result, Err(ClientError::Transport(_))));
}
