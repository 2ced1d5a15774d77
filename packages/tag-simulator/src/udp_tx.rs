//! udp_tx.rs — UDP transmitter for simulated range packets
//!
//! Sends one JSON [`RangePacket`] per car per tick to the backend's ingress
//! port. Send errors are logged and never crash the simulator.

use std::net::UdpSocket;

use tracing::{debug, warn};

use race_types::RangePacket;

pub struct UdpTransmitter {
    socket: UdpSocket,
    target: String,
}

impl UdpTransmitter {
    pub fn new(target: &str) -> Result<Self, std::io::Error> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        Ok(Self {
            socket,
            target: target.to_string(),
        })
    }

    pub fn send(&self, packet: &RangePacket) {
        let bytes = match serde_json::to_vec(packet) {
            Ok(b) => b,
            Err(e) => {
                warn!("serialize failed: {e}");
                return;
            }
        };
        match self.socket.send_to(&bytes, &self.target) {
            Ok(_) => debug!("→ {} tag {} ranges {:?}", self.target, packet.id, packet.range),
            Err(e) => warn!("send failed: {e}"),
        }
    }
}
