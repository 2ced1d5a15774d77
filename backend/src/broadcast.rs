//! # broadcast
//!
//! Fan-out worker. A single task owns the client registry; everything else
//! (ingress, admin handlers) talks to it through [`BroadcastHandle`]. Each
//! client gets a bounded outbound queue drained by its own writer task —
//! a full queue means the client cannot keep up and it is evicted rather
//! than stalling the fan-out.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::world::SharedWorld;

/// Per-client outbound queue depth.
pub const CLIENT_QUEUE: usize = 64;
/// Command-bus depth between producers and the fan-out worker.
const BUS_QUEUE: usize = 256;

#[derive(Debug)]
pub enum BusCmd {
    Join {
        id: u64,
        addr: String,
        tx: mpsc::Sender<String>,
    },
    Leave {
        id: u64,
    },
    Broadcast {
        text: String,
    },
}

#[derive(Clone)]
pub struct BroadcastHandle {
    tx: mpsc::Sender<BusCmd>,
}

impl BroadcastHandle {
    pub async fn join(&self, id: u64, addr: String, tx: mpsc::Sender<String>) {
        let _ = self.tx.send(BusCmd::Join { id, addr, tx }).await;
    }

    pub async fn leave(&self, id: u64) {
        let _ = self.tx.send(BusCmd::Leave { id }).await;
    }

    pub async fn broadcast(&self, text: String) {
        let _ = self.tx.send(BusCmd::Broadcast { text }).await;
    }
}

pub fn channel() -> (BroadcastHandle, mpsc::Receiver<BusCmd>) {
    let (tx, rx) = mpsc::channel(BUS_QUEUE);
    (BroadcastHandle { tx }, rx)
}

struct ClientEntry {
    addr: String,
    tx: mpsc::Sender<String>,
}

/// The fan-out worker. Owns the client map; messages enqueued by one
/// producer reach every client in order.
pub async fn run_broadcast(mut rx: mpsc::Receiver<BusCmd>, world: SharedWorld) {
    let mut clients: HashMap<u64, ClientEntry> = HashMap::new();

    while let Some(cmd) = rx.recv().await {
        match cmd {
            BusCmd::Join { id, addr, tx } => {
                info!("client connected: {addr} (#{id})");
                clients.insert(id, ClientEntry { addr, tx });
                let mut w = world.write().await;
                w.stats.ws_clients = clients.len() as u64;
                w.stats.ws_clients_total += 1;
            }
            BusCmd::Leave { id } => {
                if let Some(entry) = clients.remove(&id) {
                    info!("client disconnected: {} (#{id})", entry.addr);
                }
                world.write().await.stats.ws_clients = clients.len() as u64;
            }
            BusCmd::Broadcast { text } => {
                let mut dead = Vec::new();
                for (&id, entry) in &clients {
                    if let Err(e) = entry.tx.try_send(text.clone()) {
                        warn!("dropping client {} (#{id}): {e}", entry.addr);
                        dead.push(id);
                    }
                }
                for id in dead {
                    clients.remove(&id);
                }
                let mut w = world.write().await;
                w.stats.ws_messages_sent += 1;
                w.stats.ws_clients = clients.len() as u64;
            }
        }
    }
}
