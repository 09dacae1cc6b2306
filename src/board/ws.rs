use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

use super::models::*;

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

// ── Board events ─────────────────────────────────────────────────────

/// Change notifications pushed to every connected board. Clients treat
/// them as cache invalidation hints and refetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum BoardEvent {
    ApplicationCreated {
        application: Application,
    },
    ApplicationUpdated {
        application: Application,
    },
    #[serde(rename_all = "camelCase")]
    ApplicationMoved {
        application_id: String,
        from_stage_id: String,
        to_stage_id: String,
        position: i64,
    },
    #[serde(rename_all = "camelCase")]
    ApplicationDeleted {
        application_id: String,
    },
    StageCreated {
        stage: Stage,
    },
    #[serde(rename_all = "camelCase")]
    StagesReordered {
        pipeline_id: String,
        stages: Vec<Stage>,
    },
    PipelineCreated {
        pipeline: Pipeline,
    },
}

// ── WebSocket handler ────────────────────────────────────────────────

/// WebSocket handler bound to a broadcast sender (see `server::build_router`).
pub async fn ws_handler_with_sender(
    ws: WebSocketUpgrade,
    tx: broadcast::Sender<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, tx))
}

async fn handle_socket(socket: WebSocket, tx: broadcast::Sender<String>) {
    let (sender, receiver) = socket.split();
    let rx = tx.subscribe();
    tracing::debug!(subscribers = tx.receiver_count(), "board socket connected");
    run_socket_loop(sender, receiver, rx).await;
    tracing::debug!("board socket closed");
}

// ── Keepalive ────────────────────────────────────────────────────────

/// What the socket should do when the ping timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Heartbeat {
    Ping,
    Dead,
}

/// Ping/pong bookkeeping for one connection. A ping left unanswered for
/// longer than [`PONG_TIMEOUT`] marks the peer dead.
#[derive(Debug)]
struct Keepalive {
    unanswered_since: Option<Instant>,
}

impl Keepalive {
    fn new() -> Self {
        Self {
            unanswered_since: None,
        }
    }

    fn on_tick(&mut self, now: Instant) -> Heartbeat {
        match self.unanswered_since {
            Some(sent) if now.duration_since(sent) > PONG_TIMEOUT => Heartbeat::Dead,
            Some(_) => Heartbeat::Ping,
            None => {
                self.unanswered_since = Some(now);
                Heartbeat::Ping
            }
        }
    }

    fn on_pong(&mut self) {
        self.unanswered_since = None;
    }
}

/// Pump one connection: broadcast events out, client frames in, pings on a
/// timer. Returns when either side goes away or the peer stops answering.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut rx: broadcast::Receiver<String>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + PING_INTERVAL, PING_INTERVAL);
    let mut keepalive = Keepalive::new();

    let reason = loop {
        let outgoing = tokio::select! {
            _ = ticker.tick() => match keepalive.on_tick(Instant::now()) {
                Heartbeat::Ping => Message::Ping(Vec::new().into()),
                Heartbeat::Dead => break "pong timeout",
            },
            event = rx.recv() => match event {
                Ok(json) => Message::Text(json.into()),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "board socket fell behind, events dropped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break "server shutting down",
            },
            frame = receiver.next() => match frame {
                Some(Ok(Message::Pong(_))) => {
                    keepalive.on_pong();
                    continue;
                }
                Some(Ok(Message::Close(_))) | None => break "client closed",
                Some(Err(_)) => break "read error",
                Some(Ok(_)) => continue,
            },
        };
        if sender.send(outgoing).await.is_err() {
            break "write error";
        }
    };

    tracing::debug!(reason, "board socket loop ended");
    let _ = sender.send(Message::Close(None)).await;
}

// ── Broadcast helper ─────────────────────────────────────────────────

/// Serialize and broadcast a board event. A send with no subscribers is
/// not an error.
pub fn broadcast_event(tx: &broadcast::Sender<String>, event: &BoardEvent) {
    match serde_json::to_string(event) {
        Ok(json) => {
            let _ = tx.send(json);
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize board event");
        }
    }
}
