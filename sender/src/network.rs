//! UDP transmission of RTP-framed audio.

use anyhow::{Context, Result};
use opus_red_common::EncodedAudioFrame;
use tokio::net::UdpSocket;
use tracing::{debug, error};

/// Sends frames as RTP packets to one remote endpoint.
///
/// Send errors are logged and swallowed; a lossy link is the normal case for
/// this sender.
pub struct RtpSender {
    // ---
    socket: UdpSocket,
    remote_addr: String,
    packets_sent: u64,
    bytes_sent: u64,
}

impl RtpSender {
    // ---
    /// Binds an ephemeral local port for sending to `remote_addr`.
    ///
    /// # Errors
    ///
    /// Returns error if socket binding fails.
    pub async fn new(remote_addr: impl Into<String>) -> Result<Self> {
        // ---
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .context("failed to bind UDP socket")?;

        debug!("UDP socket bound to {}", socket.local_addr()?);

        Ok(Self {
            socket,
            remote_addr: remote_addr.into(),
            packets_sent: 0,
            bytes_sent: 0,
        })
    }

    /// Sends one frame. Returns the number of bytes put on the wire, or 0
    /// when the send failed.
    pub async fn send(&mut self, frame: &EncodedAudioFrame) -> usize {
        // ---
        let data = frame.to_rtp_bytes();

        match self.socket.send_to(&data, &self.remote_addr).await {
            Ok(bytes) => {
                self.packets_sent += 1;
                self.bytes_sent += bytes as u64;

                if self.packets_sent % 250 == 0 {
                    debug!(
                        "Sent {} packets ({} bytes) - seq={}",
                        self.packets_sent, self.bytes_sent, frame.sequence
                    );
                }
                bytes
            }
            Err(e) => {
                error!("Failed to send packet seq={}: {}", frame.sequence, e);
                0
            }
        }
    }

    /// `(packets, bytes)` sent so far.
    pub fn stats(&self) -> (u64, u64) {
        (self.packets_sent, self.bytes_sent)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[tokio::test]
    async fn test_frame_arrives_as_rtp() {
        // ---
        let listener = UdpSocket::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr").to_string();

        let mut sender = RtpSender::new(addr).await.expect("sender");
        let frame = EncodedAudioFrame::new(9, 960, 0xABCD, 63, vec![111, 1, 2]);
        assert!(sender.send(&frame).await > 0);

        let mut buf = [0u8; 1500];
        let (len, _) = listener.recv_from(&mut buf).await.expect("recv");
        let received = EncodedAudioFrame::from_rtp_bytes(&buf[..len]).expect("parse");

        assert_eq!(received, frame);
        assert_eq!(sender.stats().0, 1);
    }
}
