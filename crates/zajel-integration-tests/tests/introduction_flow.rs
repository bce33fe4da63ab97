//! Integration test: relay introduction and session establishment.
//!
//! 1. Alice and Bob each hold a control channel to the same relay peer
//! 2. Alice sends an introduction carrying a sealed payload only Bob can
//!    open; the relay forwards it by source id without reading it
//! 3. Both sides run the connection handshake and derive the same session
//! 4. An encrypted message flows end-to-end into Bob's typed streams
//! 5. A stale dead drop steers the connection manager onto the relay
//!    path instead of direct IP

use std::sync::Arc;

use base64::Engine;
use chrono::Utc;

use zajel_connection::manager::ConnectionManager;
use zajel_crypto::sealed;
use zajel_crypto::x25519::X25519StaticSecret;
use zajel_db::actor::PeerStoreHandle;
use zajel_relay::client::RelayClient;
use zajel_relay::forwarder::RelayForwarder;
use zajel_relay::transport::{DataChannel, MemoryFactory};
use zajel_relay::wire::RelayFrame;
use zajel_rendezvous::dead_drop::package_dead_drop;
use zajel_rendezvous::service::{
    LocalConnectionInfo, Matchmaker, ReconnectAction, RendezvousService,
};
use zajel_types::deaddrop::DeadDropPayload;
use zajel_types::identity::StableId;
use zajel_types::peer::PeerRecord;
use zajel_types::signaling::{RegisterRendezvous, RelayInfo, RendezvousResult};

fn key_b64(secret: &X25519StaticSecret) -> String {
    base64::engine::general_purpose::STANDARD.encode(secret.public_key().to_bytes())
}

#[tokio::test]
async fn test_introduction_then_session() {
    let relay = Arc::new(RelayForwarder::new());

    // Bob's control connection, raw: his client end stays observable so
    // the forwarded introduction can be read back out.
    let (bob_client_end, bob_relay_end) = zajel_relay::transport::memory_pair();
    let bob_relay_channel: Arc<dyn DataChannel> = bob_relay_end;
    bob_client_end
        .send(
            RelayFrame::RelayHandshake {
                source_id: "srcBOB0000000001".into(),
            }
            .to_bytes()
            .expect("bytes"),
        )
        .await
        .expect("send handshake");
    let frame = bob_relay_channel.recv().await.expect("bob handshake");
    relay
        .handle_frame(&bob_relay_channel, &frame)
        .await
        .expect("register bob");

    // Alice's control channel.
    let factory = MemoryFactory::new();
    let alice_relay_end = factory.link("relay-peer").await;
    let (alice_client, _alice_states) = RelayClient::new(factory, "srcALICE00000001".into());
    alice_client
        .connect_to_relays(
            &[RelayInfo {
                peer_id: "relay-peer".into(),
                public_key: "cGs=".into(),
                capacity: 10,
            }],
            101,
        )
        .await;
    let alice_channel: Arc<dyn DataChannel> = alice_relay_end;
    let frame = alice_channel.recv().await.expect("alice handshake");
    relay
        .handle_frame(&alice_channel, &frame)
        .await
        .expect("register alice");

    // Alice seals her connection info for Bob and introduces herself.
    let alice_identity = X25519StaticSecret::random();
    let bob_identity = X25519StaticSecret::random();
    let sealed_payload = sealed::seal(
        &bob_identity.public_key(),
        format!("alice:{}", key_b64(&alice_identity)).as_bytes(),
    )
    .expect("seal");

    alice_client
        .send_introduction("relay-peer", "srcBOB0000000001", sealed_payload)
        .await
        .expect("introduce");
    let frame = alice_channel.recv().await.expect("intro frame");
    relay
        .handle_frame(&alice_channel, &frame)
        .await
        .expect("forward");

    // Bob receives the forward and opens the sealed payload.
    let forwarded = bob_client_end.recv().await.expect("forwarded");
    let RelayFrame::IntroductionForward {
        from_source_id,
        payload,
    } = RelayFrame::from_bytes(&forwarded).expect("frame")
    else {
        unreachable!("expected introduction_forward");
    };
    assert_eq!(from_source_id, "srcALICE00000001");
    let opened = sealed::open(&bob_identity, &payload).expect("open");
    assert!(String::from_utf8_lossy(&opened).starts_with("alice:"));

    // Both sides handshake and exchange a message.
    let alice_id = StableId::from_bytes([0xA1; 8]);
    let bob_id = StableId::from_bytes([0xB0; 8]);

    let (alice_mgr, _alice_streams) = ConnectionManager::new(
        alice_identity.clone(),
        alice_id,
        "alice".into(),
        PeerStoreHandle::spawn(zajel_db::open_memory().expect("db")),
    );
    let (bob_mgr, mut bob_streams) = ConnectionManager::new(
        bob_identity.clone(),
        bob_id,
        "bob".into(),
        PeerStoreHandle::spawn(zajel_db::open_memory().expect("db")),
    );

    alice_mgr.add_connection("conn-bob").await.expect("add");
    bob_mgr.add_connection("conn-alice").await.expect("add");

    let alice_hello = alice_mgr.own_handshake().to_json().expect("json");
    let bob_hello = bob_mgr.own_handshake().to_json().expect("json");

    let alice_view = alice_mgr
        .process_handshake("conn-bob", &bob_hello, 1000)
        .await
        .expect("alice handshake");
    let bob_view = bob_mgr
        .process_handshake("conn-alice", &alice_hello, 1000)
        .await
        .expect("bob handshake");
    assert_eq!(alice_view.stable_id, bob_id);
    assert_eq!(bob_view.stable_id, alice_id);

    // Alice -> Bob, through the session keys, into the typed stream.
    let wire = alice_mgr
        .encrypt_for(bob_id, b"grp:hello from alice")
        .await
        .expect("encrypt");
    bob_mgr
        .handle_inbound("conn-alice", &wire)
        .await
        .expect("inbound");

    let inbound = bob_streams.group_data.try_recv().expect("routed");
    assert_eq!(inbound.body, "hello from alice");
}

struct CannedMatchmaker {
    result: RendezvousResult,
}

#[async_trait::async_trait]
impl Matchmaker for CannedMatchmaker {
    async fn register_rendezvous(
        &self,
        _registration: RegisterRendezvous,
    ) -> zajel_rendezvous::Result<RendezvousResult> {
        Ok(self.result.clone())
    }
}

#[tokio::test]
async fn test_stale_dead_drop_takes_relay_path() {
    let self_identity = X25519StaticSecret::random();
    let peer_identity = X25519StaticSecret::random();
    let now = Utc::now();

    // A dead drop two hours old, with a perfectly good IP inside.
    let stale = DeadDropPayload {
        public_key: key_b64(&peer_identity),
        stable_id: StableId::from_bytes([0x07; 8]),
        relay_id: "relay-z".into(),
        source_id: "srcPEER000000007".into(),
        ip: Some("203.0.113.77".into()),
        port: Some(40500),
        fallback_relays: vec![],
        timestamp: (now.timestamp() as u64).saturating_sub(2 * 3600),
    };
    let sealed_drop =
        package_dead_drop(&stale, &self_identity.public_key()).expect("seal");

    let service = RendezvousService::new(
        CannedMatchmaker {
            result: RendezvousResult {
                live_matches: vec![],
                dead_drops: vec![sealed_drop],
            },
        },
        self_identity,
        StableId::from_bytes([0xAA; 8]),
        LocalConnectionInfo {
            relay_id: "relay-self".into(),
            source_id: "srcSELF000000001".into(),
            ip: None,
            port: None,
            fallback_relays: vec![],
        },
    );

    let peer = PeerRecord::new(
        StableId::from_bytes([0x07; 8]),
        key_b64(&peer_identity),
        100,
    );
    let registration = service.register_for_peer(&peer, now).await.expect("register");

    // Stale means relay path — never a direct IP attempt.
    assert_eq!(registration.actions.len(), 1);
    let ReconnectAction::IntroduceViaRelay { payload } = &registration.actions[0] else {
        unreachable!("expected relay path, got {:?}", registration.actions[0]);
    };
    assert_eq!(payload.relay_id, "relay-z");
    assert_eq!(payload.source_id, "srcPEER000000007");
}
