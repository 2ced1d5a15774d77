//! # handlers
//!
//! WebSocket surface: client upgrade, the connect greeting, and the admin
//! command protocol. One handler task per client blocks on its inbound
//! stream; a companion writer task drains the client's outbound queue with a
//! bounded per-send timeout. Unicast replies travel through the same queue
//! as broadcasts, so each client sees messages in production order.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::extract::connect_info::ConnectInfo;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::broadcast::{BroadcastHandle, CLIENT_QUEUE};
use crate::config::RaceConfigPayload;
use crate::world::{now_secs, SharedWorld};

/// Outbound sends slower than this drop the client.
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone)]
pub struct AppState {
    pub world: SharedWorld,
    pub bus: BroadcastHandle,
}

// ── Admin protocol ────────────────────────────────────────────────────────────

/// One JSON object per inbound client message.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AdminCommand {
    Ping,
    AdminStart {
        group_id: Option<i64>,
        total_laps: Option<i64>,
        tag_map: Option<HashMap<String, i64>>,
        race_config: Option<RaceConfigPayload>,
    },
    Reset,
    GetStats,
    GetState,
}

// ── HTTP endpoints ────────────────────────────────────────────────────────────

/// GET /health — liveness for deployment probes.
pub async fn health_check(State(app): State<AppState>) -> axum::Json<serde_json::Value> {
    let now = now_secs();
    let uptime = {
        let w = app.world.read().await;
        (now - w.stats.start_time).max(0.0) as u64
    };
    axum::Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptimeSecs": uptime,
    }))
}

/// GET /sync — server clock for visualizer time alignment.
pub async fn time_sync() -> axum::Json<serde_json::Value> {
    axum::Json(json!({ "serverTime": (now_secs() * 1000.0) as u64 }))
}

/// GET /ws — upgrade to the broadcast/admin WebSocket.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(app): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, addr, app))
}

// ── Per-client session ────────────────────────────────────────────────────────

async fn handle_socket(socket: WebSocket, addr: SocketAddr, app: AppState) {
    let client_id = NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed);
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(CLIENT_QUEUE);

    // Greeting: connection info + current state, then join the fan-out set
    {
        let now = now_secs();
        let w = app.world.read().await;
        let _ = tx.send(w.connection_message(now)).await;
        let _ = tx.send(w.state_message(now)).await;
    }
    app.bus.join(client_id, addr.to_string(), tx.clone()).await;

    // Writer: drain the outbound queue onto the socket, time-bounded
    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            let send = tokio::time::timeout(SEND_TIMEOUT, ws_tx.send(Message::Text(text)));
            match send.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    debug!("client #{client_id} send error: {e}");
                    break;
                }
                Err(_) => {
                    warn!("client #{client_id} send timed out");
                    break;
                }
            }
        }
    });

    // Reader: admin commands until the peer goes away
    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => handle_command(&text, client_id, &app, &tx).await,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }

    app.bus.leave(client_id).await;
    writer.abort();
}

async fn handle_command(text: &str, client_id: u64, app: &AppState, tx: &mpsc::Sender<String>) {
    let cmd: AdminCommand = match serde_json::from_str(text) {
        Ok(cmd) => cmd,
        Err(e) => {
            warn!("client #{client_id}: unrecognized command: {e}");
            return;
        }
    };

    let now = now_secs();
    match cmd {
        AdminCommand::Ping => {
            let _ = tx
                .send(json!({ "type": "pong", "timestamp": now }).to_string())
                .await;
        }
        AdminCommand::AdminStart {
            group_id,
            total_laps,
            tag_map,
            race_config,
        } => {
            let armed_msg = {
                let mut w = app.world.write().await;
                let rc = w.admin_start(group_id, total_laps, tag_map.as_ref(), race_config.as_ref());
                info!(
                    "admin start from client #{client_id}: group={group_id:?} laps={} map={:?}",
                    rc.total_laps, w.tag_to_gp
                );
                w.race_armed_message(now)
            };
            app.bus.broadcast(armed_msg).await;
        }
        AdminCommand::Reset => {
            // The reset completes before its acknowledgement is enqueued
            let reset_msg = {
                let mut w = app.world.write().await;
                w.admin_reset();
                info!("race reset issued by client #{client_id}");
                w.race_reset_message(now)
            };
            app.bus.broadcast(reset_msg).await;
        }
        AdminCommand::GetStats => {
            let msg = app.world.read().await.stats_message(now);
            let _ = tx.send(msg).await;
        }
        AdminCommand::GetState => {
            let msg = app.world.read().await.state_message(now);
            let _ = tx.send(msg).await;
        }
    }
}
