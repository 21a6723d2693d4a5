//! Encoded audio frames and their RTP wire form.
//!
//! An `EncodedAudioFrame` is the unit that crosses every boundary of the
//! engine: the sender rewrites its payload into a RED packet, the receiver
//! splits it back apart. The RTP helpers are only needed by the UDP hosts;
//! the RED core never looks at RTP headers.

use anyhow::Result;

/// RTP packet version 2 (as per RFC 3550)
const RTP_VERSION: u8 = 2;

/// Size of the fixed RTP header without CSRC list or extension.
pub const RTP_HEADER_SIZE_BYTES: usize = 12;

/// One compressed audio unit.
///
/// # Protocol Details
///
/// - Sequence: increments by 1 for each packet (wraps at 65535)
/// - Timestamp: media clock in samples, increments by 960 for 20ms @ 48kHz
/// - SSRC: identity of the stream; all per-stream state is keyed by it
/// - Payload type: either the negotiated Opus type or the RED type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedAudioFrame {
    // ---
    /// Packet sequence number (receive side only)
    pub sequence: u16,

    /// RTP timestamp in sample units
    pub timestamp: u32,

    /// Synchronization source identifier
    pub ssrc: u32,

    /// Dynamic payload type (7 bits)
    pub payload_type: u8,

    /// Encoded payload, either a bare Opus packet or a RED packet
    pub payload: Vec<u8>,
}

impl EncodedAudioFrame {
    // ---
    /// Creates a new frame.
    ///
    /// `payload_type` is masked to its 7 wire bits.
    pub fn new(
        sequence: u16,
        timestamp: u32,
        ssrc: u32,
        payload_type: u8,
        payload: Vec<u8>,
    ) -> Self {
        // ---
        Self {
            sequence,
            timestamp,
            ssrc,
            payload_type: payload_type & 0x7F,
            payload,
        }
    }

    /// Serializes the frame into an RTP packet.
    ///
    /// # Wire Format
    ///
    /// ```text
    ///  0                   1                   2                   3
    ///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    /// |V=2|P|X|  CC   |M|     PT      |       sequence number         |
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    /// |                           timestamp                           |
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    /// |           synchronization source (SSRC) identifier            |
    /// +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
    /// |                           payload...                          |
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    /// ```
    pub fn to_rtp_bytes(&self) -> Vec<u8> {
        // ---
        let mut buf = Vec::with_capacity(RTP_HEADER_SIZE_BYTES + self.payload.len());

        // V=2, P=0, X=0, CC=0
        buf.push(RTP_VERSION << 6);

        // M=0, PT
        buf.push(self.payload_type & 0x7F);

        buf.extend_from_slice(&self.sequence.to_be_bytes());
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf.extend_from_slice(&self.ssrc.to_be_bytes());
        buf.extend_from_slice(&self.payload);

        buf
    }

    /// Parses an RTP packet into a frame.
    ///
    /// CSRC entries are skipped; header extensions and padding are not
    /// supported by the hosts and are rejected.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Packet is smaller than the fixed header (12 bytes)
    /// - RTP version is not 2
    /// - The extension or padding bit is set
    pub fn from_rtp_bytes(data: &[u8]) -> Result<Self> {
        // ---
        if data.len() < RTP_HEADER_SIZE_BYTES {
            anyhow::bail!("packet too small: {} bytes", data.len());
        }

        let version = (data[0] >> 6) & 0x03;
        if version != RTP_VERSION {
            anyhow::bail!("invalid RTP version: {}", version);
        }

        if data[0] & 0x30 != 0 {
            anyhow::bail!("RTP padding/extension not supported");
        }

        let csrc_count = (data[0] & 0x0F) as usize;
        let header_len = RTP_HEADER_SIZE_BYTES + 4 * csrc_count;
        if data.len() < header_len {
            anyhow::bail!(
                "packet too small for {} CSRC entries: {} bytes",
                csrc_count,
                data.len()
            );
        }

        Ok(Self {
            sequence: u16::from_be_bytes([data[2], data[3]]),
            timestamp: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            ssrc: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
            payload_type: data[1] & 0x7F,
            payload: data[header_len..].to_vec(),
        })
    }
}
