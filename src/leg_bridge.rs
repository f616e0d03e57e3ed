use std::sync::Arc;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

pub enum LegEvent {
    Audio(Bytes),
}

/// UDP bridge for one call leg: datagrams in become [`LegEvent::Audio`]
/// events, outbound audio goes to the fixed target address. One instance
/// per leg (telephony side, external side).
pub struct LegBridge {
    socket: Arc<UdpSocket>,
    target_addr: String,
    tx: mpsc::Sender<LegEvent>,
    buffer_size: usize,
}

impl LegBridge {
    pub async fn new(
        local_addr: &str,
        target_addr: &str,
        buffer_size: usize,
        tx: mpsc::Sender<LegEvent>,
    ) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(local_addr).await?;
        Ok(Self {
            socket: Arc::new(socket),
            target_addr: target_addr.to_string(),
            tx,
            buffer_size,
        })
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let mut buf = vec![0u8; self.buffer_size];
        loop {
            let (len, _) = self.socket.recv_from(&mut buf).await?;
            if len > 0 {
                let data = Bytes::copy_from_slice(&buf[..len]);
                if let Err(e) = self.tx.send(LegEvent::Audio(data)).await {
                    eprintln!("Failed to send leg event: {}", e);
                    break;
                }
            }
        }
        Ok(())
    }

    pub async fn send_audio(&self, data: &[u8]) -> anyhow::Result<()> {
        self.socket.send_to(data, &self.target_addr).await?;
        Ok(())
    }
}
