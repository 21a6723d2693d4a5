//! UDP reception of RTP-framed audio.

use anyhow::{Context, Result};
use opus_red_common::EncodedAudioFrame;
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

/// Largest datagram read from the socket.
const MAX_DATAGRAM_SIZE: usize = 2048;

/// UDP receiver for RTP audio frames.
pub struct RtpReceiver {
    // ---
    socket: UdpSocket,
    packets_received: u64,
    bytes_received: u64,
    packets_dropped: u64,
}

impl RtpReceiver {
    // ---
    /// Listens on all interfaces on `port`.
    ///
    /// # Errors
    ///
    /// Returns error if socket binding fails.
    pub async fn new(port: u16) -> Result<Self> {
        Self::bind(&format!("0.0.0.0:{}", port)).await
    }

    /// Listens on `addr`, e.g. `127.0.0.1:0`.
    ///
    /// # Errors
    ///
    /// Returns error if socket binding fails.
    pub async fn bind(addr: &str) -> Result<Self> {
        // ---
        let socket = UdpSocket::bind(addr)
            .await
            .with_context(|| format!("failed to bind UDP socket to {}", addr))?;

        info!("UDP socket bound to {}", socket.local_addr()?);

        Ok(Self {
            socket,
            packets_received: 0,
            bytes_received: 0,
            packets_dropped: 0,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr().context("socket has no local address")
    }

    /// Waits for the next datagram and parses it as RTP.
    ///
    /// Returns `None` for datagrams that are not valid RTP; those are logged
    /// and counted as dropped.
    ///
    /// # Errors
    ///
    /// Returns error if network reception fails.
    pub async fn receive(&mut self) -> Result<Option<EncodedAudioFrame>> {
        // ---
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

        let (len, src) = self
            .socket
            .recv_from(&mut buf)
            .await
            .context("failed to receive UDP packet")?;

        self.bytes_received += len as u64;

        match EncodedAudioFrame::from_rtp_bytes(&buf[..len]) {
            Ok(frame) => {
                self.packets_received += 1;

                if self.packets_received % 250 == 0 {
                    debug!(
                        "Received {} packets ({} bytes, {} dropped) from {} - seq={}",
                        self.packets_received,
                        self.bytes_received,
                        self.packets_dropped,
                        src,
                        frame.sequence
                    );
                }

                Ok(Some(frame))
            }
            Err(e) => {
                self.packets_dropped += 1;
                warn!("Dropped invalid packet from {}: {}", src, e);
                Ok(None)
            }
        }
    }

    /// `(packets_received, bytes_received, packets_dropped)`
    pub fn stats(&self) -> (u64, u64, u64) {
        // ---
        (
            self.packets_received,
            self.bytes_received,
            self.packets_dropped,
        )
    }
}
