//! # ingress
//!
//! The UDP receiver loop: one dedicated task reading range datagrams from
//! tags. Each accepted packet runs the whole frame pipeline under the world
//! write lock, then hands its outbound messages to the fan-out and any
//! closed laps to the persistence sink. A bad packet never kills the loop;
//! the short receive timeout keeps shutdown responsive.

use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::broadcast::BroadcastHandle;
use crate::persistence::LapSink;
use crate::world::{now_secs, SharedWorld};

/// Receive timeout between shutdown checks.
const RECV_TIMEOUT: Duration = Duration::from_millis(100);

pub async fn run_ingress(
    socket: UdpSocket,
    world: SharedWorld,
    bus: BroadcastHandle,
    sink: LapSink,
    shutdown: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; 2048];
    info!("📡 ingress listening on UDP {:?}", socket.local_addr().ok());

    loop {
        if *shutdown.borrow() {
            break;
        }
        let received = match tokio::time::timeout(RECV_TIMEOUT, socket.recv_from(&mut buf)).await {
            Err(_) => continue, // timeout — re-check shutdown
            Ok(Err(e)) => {
                warn!("UDP recv error: {e}");
                continue;
            }
            Ok(Ok((len, _src))) => len,
        };

        let now = now_secs();
        let output = {
            let mut w = world.write().await;
            w.process_datagram(&buf[..received], now)
        };

        let Some(output) = output else {
            continue;
        };
        for record in output.closed_laps {
            sink.submit(record);
        }
        bus.broadcast(output.position_msg).await;
        if let Some(state_msg) = output.state_msg {
            bus.broadcast(state_msg).await;
        }
    }
    info!("ingress stopped");
}
