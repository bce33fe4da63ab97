//! Integration test: two peers find each other through the rendezvous
//! plane.
//!
//! 1. Alice and Bob derive the same daily meeting points independently
//! 2. Both register with the signaling server, each leaving a sealed
//!    dead drop for the other
//! 3. Bob's registration returns Alice as a live match with her relay id
//! 4. Alice receives a pushed `rendezvous_match` naming Bob
//! 5. Bob opens Alice's dead drop and reads her connection info
//!
//! No network I/O: the server state is driven directly.

use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine;
use chrono::NaiveDate;
use tokio::sync::{mpsc, Mutex};

use zajel_crypto::x25519::X25519StaticSecret;
use zajel_rendezvous::dead_drop::{open_dead_drop, package_dead_drop};
use zajel_rendezvous::meeting_point::derive_daily_points;
use zajel_server::bootstrap::BootstrapRegistry;
use zajel_server::chunk_relay::ChunkRelay;
use zajel_server::config::ServerConfig;
use zajel_server::relay_registry::RelayRegistry;
use zajel_server::rendezvous_registry::RendezvousRegistry;
use zajel_server::ws::AppState;
use zajel_types::deaddrop::DeadDropPayload;
use zajel_types::identity::StableId;
use zajel_types::signaling::{Register, RegisterRendezvous, SignalMessage};

const ALICE: &str = "A1B2C3D4E5F6G7H8";
const BOB: &str = "ABCDEF0123456789";

fn server_state() -> Arc<AppState> {
    Arc::new(AppState {
        config: ServerConfig::default(),
        bootstrap: Arc::new(BootstrapRegistry::new(
            zajel_crypto::ed25519::SigningKey::generate(),
        )),
        relay_registry: Arc::new(RelayRegistry::new()),
        rendezvous: Mutex::new(RendezvousRegistry::new()),
        chunk_relay: Arc::new(ChunkRelay::new(
            zajel_db::open_memory().expect("db"),
            64 * 1024 * 1024,
        )),
        peers: Mutex::new(HashMap::new()),
        started_at: 0,
    })
}

#[test]
fn test_daily_points_agree_and_sort_alice_first() {
    let date = NaiveDate::from_ymd_opt(2024, 1, 15).expect("date");

    // Both sides derive independently, in different argument orders.
    let from_alice = derive_daily_points(ALICE.as_bytes(), BOB.as_bytes(), date);
    let from_bob = derive_daily_points(BOB.as_bytes(), ALICE.as_bytes(), date);
    assert_eq!(from_alice, from_bob);
    assert_eq!(from_alice.len(), 3);

    // Lexicographic sort puts "A1B2…" before "ABCD…".
    assert!(ALICE.as_bytes() < BOB.as_bytes());
}

#[tokio::test]
async fn test_fresh_peers_rendezvous_via_server() {
    let state = server_state();
    let date = NaiveDate::from_ymd_opt(2024, 1, 15).expect("date");
    let tokens = derive_daily_points(ALICE.as_bytes(), BOB.as_bytes(), date);

    let alice_identity = X25519StaticSecret::random();
    let bob_identity = X25519StaticSecret::random();

    // Register both peers and wire them into the push map.
    let mut alice_conn = None;
    let mut bob_conn = None;
    for (conn, id, key) in [
        (&mut alice_conn, ALICE, &alice_identity),
        (&mut bob_conn, BOB, &bob_identity),
    ] {
        state
            .handle_message(
                conn,
                SignalMessage::Register(Register {
                    peer_id: id.into(),
                    public_key: base64::engine::general_purpose::STANDARD
                        .encode(key.public_key().to_bytes()),
                    max_connections: 10,
                }),
                1000,
            )
            .await;
    }
    let (alice_tx, mut alice_push) = mpsc::unbounded_channel();
    state.peers.lock().await.insert(ALICE.into(), alice_tx);
    let (bob_tx, _bob_push) = mpsc::unbounded_channel();
    state.peers.lock().await.insert(BOB.into(), bob_tx);

    // Alice registers first, leaving a dead drop sealed for Bob.
    let alice_drop = package_dead_drop(
        &DeadDropPayload {
            public_key: base64::engine::general_purpose::STANDARD
                .encode(alice_identity.public_key().to_bytes()),
            stable_id: StableId::from_bytes([0xA1; 8]),
            relay_id: "relay-a".into(),
            source_id: "srcALICE00000001".into(),
            ip: Some("203.0.113.1".into()),
            port: Some(40100),
            fallback_relays: vec![],
            timestamp: 1000,
        },
        &bob_identity.public_key(),
    )
    .expect("seal");

    let replies = state
        .handle_message(
            &mut alice_conn,
            SignalMessage::RegisterRendezvous(RegisterRendezvous {
                peer_id: ALICE.into(),
                daily_points: tokens.clone(),
                hourly_tokens: vec!["hr_SHARED0000000000000000A".into()],
                dead_drop: alice_drop,
                relay_id: "relay-a".into(),
            }),
            1000,
        )
        .await;
    let SignalMessage::RendezvousResult(first) = &replies[0] else {
        unreachable!("expected rendezvous_result");
    };
    assert!(first.live_matches.is_empty(), "nobody registered yet");

    // Bob registers at the same tokens.
    let bob_drop = package_dead_drop(
        &DeadDropPayload {
            public_key: base64::engine::general_purpose::STANDARD
                .encode(bob_identity.public_key().to_bytes()),
            stable_id: StableId::from_bytes([0xB0; 8]),
            relay_id: "relay-b".into(),
            source_id: "srcBOB0000000001".into(),
            ip: None,
            port: None,
            fallback_relays: vec![],
            timestamp: 1001,
        },
        &alice_identity.public_key(),
    )
    .expect("seal");

    let replies = state
        .handle_message(
            &mut bob_conn,
            SignalMessage::RegisterRendezvous(RegisterRendezvous {
                peer_id: BOB.into(),
                daily_points: tokens,
                hourly_tokens: vec!["hr_SHARED0000000000000000A".into()],
                dead_drop: bob_drop,
                relay_id: "relay-b".into(),
            }),
            1001,
        )
        .await;
    let SignalMessage::RendezvousResult(result) = &replies[0] else {
        unreachable!("expected rendezvous_result");
    };

    // Bob sees exactly one live match pointing at Alice's relay.
    assert_eq!(result.live_matches.len(), 1);
    assert_eq!(result.live_matches[0].peer_id, ALICE);
    assert_eq!(result.live_matches[0].relay_id, "relay-a");

    // And can open her dead drop.
    assert_eq!(result.dead_drops.len(), 1);
    let opened = open_dead_drop(&bob_identity, &result.dead_drops[0]).expect("open");
    assert_eq!(opened.relay_id, "relay-a");
    assert_eq!(opened.source_id, "srcALICE00000001");

    // Alice gets the hourly match push naming Bob and his relay.
    let pushed = alice_push.recv().await.expect("push");
    let SignalMessage::RendezvousMatch(matched) = pushed else {
        unreachable!("expected rendezvous_match");
    };
    assert_eq!(matched.matched.peer_id, BOB);
    assert_eq!(matched.matched.relay_id, "relay-b");
}

#[tokio::test]
async fn test_re_registration_never_returns_own_drop() {
    let state = server_state();
    let mut conn = None;
    state
        .handle_message(
            &mut conn,
            SignalMessage::Register(Register {
                peer_id: ALICE.into(),
                public_key: "cGs=".into(),
                max_connections: 10,
            }),
            1000,
        )
        .await;

    for round in 0..2u64 {
        let replies = state
            .handle_message(
                &mut conn,
                SignalMessage::RegisterRendezvous(RegisterRendezvous {
                    peer_id: ALICE.into(),
                    daily_points: vec!["day_SAMETOKEN000000000000A".into()],
                    hourly_tokens: vec![],
                    dead_drop: "ZHJvcA==".into(),
                    relay_id: "relay-a".into(),
                }),
                1000 + round,
            )
            .await;
        let SignalMessage::RendezvousResult(result) = &replies[0] else {
            unreachable!("expected rendezvous_result");
        };
        assert!(result.dead_drops.is_empty(), "own drop leaked on round {round}");
        assert!(result.live_matches.is_empty());
    }
}
