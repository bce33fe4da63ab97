//! The WebSocket dispatcher.
//!
//! One task per connected peer. Inbound frames are parsed into
//! [`SignalMessage`]s and dispatched against the registries; every
//! handler produces an outbox of `(peer, message)` pairs that is
//! delivered through the connected-peer map. Invalid frames earn an
//! `error` reply and a WARN log — never a silent drop.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use zajel_types::signaling::{
    ErrorMessage, Registered, RendezvousMatch, RendezvousResult, SignalMessage,
};

use crate::bootstrap::BootstrapRegistry;
use crate::chunk_relay::{ChunkRelay, Outbound};
use crate::config::ServerConfig;
use crate::relay_registry::RelayRegistry;
use crate::rendezvous_registry::RendezvousRegistry;

/// Relay candidates handed out per registration.
const RELAYS_PER_REGISTRATION: usize = 10;

/// Shared server state.
pub struct AppState {
    pub config: ServerConfig,
    pub bootstrap: Arc<BootstrapRegistry>,
    pub relay_registry: Arc<RelayRegistry>,
    pub rendezvous: Mutex<RendezvousRegistry>,
    pub chunk_relay: Arc<ChunkRelay>,
    pub peers: Mutex<HashMap<String, mpsc::UnboundedSender<SignalMessage>>>,
    pub started_at: u64,
}

impl AppState {
    /// Peers currently connected.
    pub async fn online_peers(&self) -> HashSet<String> {
        self.peers.lock().await.keys().cloned().collect()
    }

    /// Deliver an outbox through the peer map. Unknown targets are
    /// dropped with a DEBUG log (the peer raced a disconnect).
    pub async fn deliver(&self, outbox: Vec<Outbound>) {
        let peers = self.peers.lock().await;
        for (target, message) in outbox {
            match peers.get(&target) {
                Some(sender) => {
                    let _ = sender.send(message);
                }
                None => debug!(peer = %target, "outbound target offline; dropping"),
            }
        }
    }

    /// Dispatch one message from `peer_id` (None until registered).
    ///
    /// Returns the messages owed back to the *sender*; messages to other
    /// peers are delivered internally.
    pub async fn handle_message(
        &self,
        peer_id: &mut Option<String>,
        message: SignalMessage,
        now: u64,
    ) -> Vec<SignalMessage> {
        match message {
            SignalMessage::Register(register) => {
                if register.peer_id.is_empty() || register.peer_id.len() > 64 {
                    return vec![error("invalid peer_id")];
                }
                self.relay_registry.register(
                    &register.peer_id,
                    &register.public_key,
                    register.max_connections,
                    now,
                );
                *peer_id = Some(register.peer_id.clone());
                let relays = self
                    .relay_registry
                    .get_available_relays(&register.peer_id, RELAYS_PER_REGISTRATION);
                vec![SignalMessage::Registered(Registered { relays })]
            }

            SignalMessage::RegisterRendezvous(registration) => {
                let Some(sender) = peer_id.clone() else {
                    return vec![error("register first")];
                };
                if registration.peer_id != sender {
                    return vec![error("peer_id mismatch")];
                }

                let dead_drop = if registration.dead_drop.is_empty() {
                    None
                } else {
                    Some(registration.dead_drop.clone())
                };

                let (daily, hourly) = {
                    let mut rendezvous = self.rendezvous.lock().await;
                    let daily = rendezvous.register_daily_points(
                        &sender,
                        &registration.daily_points,
                        dead_drop.clone(),
                        &registration.relay_id,
                        now,
                    );
                    let hourly = rendezvous.register_hourly_tokens(
                        &sender,
                        &registration.hourly_tokens,
                        dead_drop,
                        &registration.relay_id,
                        now,
                    );
                    (daily, hourly)
                };

                // Push hourly matches to the counterparties.
                let pushes: Vec<Outbound> = hourly
                    .notify
                    .into_iter()
                    .map(|(target, matched)| {
                        (
                            target,
                            SignalMessage::RendezvousMatch(RendezvousMatch { matched }),
                        )
                    })
                    .collect();
                self.deliver(pushes).await;

                let mut live_matches = daily.live_matches;
                live_matches.extend(hourly.live_matches);
                let mut dead_drops = daily.dead_drops;
                dead_drops.extend(hourly.dead_drops);
                // The same counterparty may sit at several tokens.
                live_matches.dedup_by(|a, b| a.peer_id == b.peer_id);
                dead_drops.dedup();

                vec![SignalMessage::RendezvousResult(RendezvousResult {
                    live_matches,
                    dead_drops,
                })]
            }

            SignalMessage::UpdateLoad(load) => {
                self.relay_registry
                    .update_load(&load.peer_id, load.connected_count, now);
                Vec::new()
            }

            SignalMessage::ChunkAnnounce(announce) => {
                match self.chunk_relay.handle_announce(&announce, now) {
                    Ok(outbox) => {
                        self.deliver(outbox).await;
                        Vec::new()
                    }
                    Err(e) => {
                        warn!(error = %e, "announce failed");
                        vec![error("announce failed")]
                    }
                }
            }

            SignalMessage::ChunkRequest(request) => {
                let online = self.online_peers().await;
                match self
                    .chunk_relay
                    .handle_request(&request.peer_id, &request.chunk_id, &online, now)
                {
                    Ok(outbox) => self.split_outbox(outbox, &request.peer_id).await,
                    Err(e) => {
                        warn!(error = %e, chunk = %request.chunk_id, "request failed");
                        vec![error("request failed")]
                    }
                }
            }

            SignalMessage::ChunkRequestMeta(request) => {
                match self.chunk_relay.handle_request_meta(
                    &request.peer_id,
                    &request.routing_hash,
                    request.sequence,
                    request.chunk_index,
                    now,
                ) {
                    Ok(outbox) => self.split_outbox(outbox, &request.peer_id).await,
                    Err(e) => {
                        warn!(error = %e, "meta request failed");
                        vec![error("request failed")]
                    }
                }
            }

            SignalMessage::ChunkPush(push) => match self.chunk_relay.handle_push(&push, now) {
                Ok(outbox) => self.split_outbox(outbox, &push.peer_id).await,
                Err(e) => {
                    warn!(error = %e, chunk = %push.chunk_id, "push failed");
                    vec![error("push failed")]
                }
            },

            // Server-to-client types arriving from a client are protocol
            // violations.
            other => {
                warn!(message = ?other, "client sent a server-side message");
                vec![error("unexpected message type")]
            }
        }
    }

    /// Deliver outbox entries addressed to others; return those addressed
    /// to the sender.
    async fn split_outbox(&self, outbox: Vec<Outbound>, sender: &str) -> Vec<SignalMessage> {
        let (own, others): (Vec<Outbound>, Vec<Outbound>) =
            outbox.into_iter().partition(|(target, _)| target == sender);
        self.deliver(others).await;
        own.into_iter().map(|(_, message)| message).collect()
    }

    /// Clean up after a peer disconnects. Relay removal is synchronous.
    pub async fn peer_disconnected(&self, peer_id: &str) {
        self.peers.lock().await.remove(peer_id);
        self.relay_registry.remove(peer_id);
        if let Err(e) = self.chunk_relay.peer_disconnected(peer_id) {
            warn!(peer = %peer_id, error = %e, "chunk relay cleanup failed");
        }
        info!(peer = %peer_id, "peer disconnected");
    }
}

fn error(message: &str) -> SignalMessage {
    SignalMessage::Error(ErrorMessage {
        error: message.to_string(),
    })
}

/// Build the full HTTP router: bootstrap REST, health, and `/ws`.
pub fn router(state: Arc<AppState>) -> Router {
    crate::bootstrap::router(state.bootstrap.clone())
        .route("/health", get(health).with_state(state.clone()))
        .route("/ws", get(ws_upgrade).with_state(state))
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let peers = state.peers.lock().await.len();
    Json(serde_json::json!({
        "status": "ok",
        "started_at": state.started_at,
        "connected_peers": peers,
        "relays": state.relay_registry.len(),
        "servers": state.bootstrap.len(),
    }))
}

async fn ws_upgrade(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<SignalMessage>();

    // Writer task: outbox -> socket.
    let writer = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            match message.to_json() {
                Ok(text) => {
                    if ws_tx.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "failed to serialize outbound message"),
            }
        }
    });

    let mut peer_id: Option<String> = None;

    while let Some(frame) = ws_rx.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };

        let message = match SignalMessage::from_json(&text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "invalid signaling frame");
                let _ = out_tx.send(error("invalid message"));
                continue;
            }
        };

        let had_id = peer_id.is_some();
        let replies = state.handle_message(&mut peer_id, message, unix_now()).await;

        // First successful register wires this peer into the map.
        if !had_id {
            if let Some(id) = &peer_id {
                state.peers.lock().await.insert(id.clone(), out_tx.clone());
                info!(peer = %id, "peer registered");
            }
        }

        for reply in replies {
            let _ = out_tx.send(reply);
        }
    }

    if let Some(id) = &peer_id {
        state.peer_disconnected(id).await;
    }
    writer.abort();
}

fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
