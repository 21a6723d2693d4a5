//! RFC 2198 redundant audio framing.
//!
//! A RED payload is a list of block headers followed by the block data, the
//! primary (newest) encoding always last:
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |1|   block PT  |  timestamp offset         |   block length    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |0|   block PT  |  (last header, primary encoding)
//! +-+-+-+-+-+-+-+-+
//! ```
//!
//! Offsets are 14 bits and lengths 10 bits, so a redundant block must be less
//! than 16384 samples old and shorter than 1024 bytes.

use thiserror::Error;

/// Hard ceiling on a RED packet; lengths are 10 bits.
pub const MAX_RED_PACKET_SIZE_BYTES: usize = 1024;

/// Largest audio payload the transport accepts.
pub const MAX_AUDIO_PAYLOAD_SIZE_BYTES: usize = 1000;

/// Timestamp offsets are 14 bits.
pub const MAX_RED_TIMESTAMP_OFFSET: u32 = 1 << 14;

/// Size of a non-last block header.
pub const RED_HEADER_SIZE_BYTES: usize = 4;

/// Size of the last (primary) block header.
pub const RED_LAST_HEADER_SIZE_BYTES: usize = 1;

/// 20 ms at 48 kHz.
pub const RED_PACKETIZATION_TIME: u32 = 960;

/// Redundant encodings are taken from every second packet.
pub const RED_PACKET_DISTANCE: u32 = 2;

/// Most redundant encodings carried in one packet.
pub const MAX_RED_ENCODINGS: u8 = 2;

/// How many packetization intervals back a redundant encoding can reach.
pub const RED_MAX_RECOVERY_DISTANCE: u32 = 5;

/// Errors from RED framing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RedError {
    // ---
    #[error("primary payload is empty")]
    EmptyPrimary,

    #[error("payload of {0} bytes is too large for RED")]
    PayloadTooLarge(usize),

    #[error("RED packet of {0} bytes exceeds the audio payload limit")]
    PacketTooLarge(usize),

    #[error("truncated block header at offset {offset}")]
    TruncatedHeader { offset: usize },

    #[error("primary block payload type {found}, expected {expected}")]
    UnexpectedPayloadType { expected: u8, found: u8 },

    #[error("block lengths leave no room for the primary block")]
    BlockLengthOverrun,

    #[error("no primary block header")]
    MissingPrimaryBlock,
}

/// One encoding inside a RED packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedBlock {
    // ---
    /// Set only on the primary block, which is always the final one.
    pub is_last: bool,

    pub payload_type: u8,

    /// Samples before the primary timestamp; 0 for the primary.
    pub timestamp_offset: u16,

    /// Absolute media timestamp.
    pub timestamp: u32,

    pub payload: Vec<u8>,

    /// Whether the payload carries Opus in-band FEC. Filled in by the
    /// receiver, never by [`decode`].
    pub has_fec: bool,
}

impl RedBlock {
    // ---
    pub fn is_redundant(&self) -> bool {
        !self.is_last
    }
}

/// Builds a RED packet.
///
/// # Arguments
///
/// * `primary_timestamp` - timestamp of the primary encoding
/// * `primary` - newest encoding, placed last
/// * `redundant` - `(timestamp, payload)` pairs, oldest first
/// * `payload_type` - payload type written in every block header
///
/// # Errors
///
/// Returns error if:
/// - The primary is empty or too large to fit a RED packet
/// - A redundant payload doesn't fit a 10 bit length
/// - The complete packet exceeds [`MAX_AUDIO_PAYLOAD_SIZE_BYTES`]
pub fn encode(
    primary_timestamp: u32,
    primary: &[u8],
    redundant: &[(u32, &[u8])],
    payload_type: u8,
) -> Result<Vec<u8>, RedError> {
    // ---
    if primary.is_empty() {
        return Err(RedError::EmptyPrimary);
    }
    if primary.len() >= MAX_RED_PACKET_SIZE_BYTES || primary.len() >= MAX_AUDIO_PAYLOAD_SIZE_BYTES {
        return Err(RedError::PayloadTooLarge(primary.len()));
    }

    let pt = payload_type & 0x7F;

    let blocks: Vec<(u32, &[u8])> = redundant
        .iter()
        .filter_map(|&(timestamp, payload)| {
            let offset = primary_timestamp.wrapping_sub(timestamp);
            (offset < MAX_RED_TIMESTAMP_OFFSET).then_some((offset, payload))
        })
        .collect();

    if let Some(&(_, payload)) = blocks
        .iter()
        .find(|(_, payload)| payload.len() >= MAX_RED_PACKET_SIZE_BYTES)
    {
        return Err(RedError::PayloadTooLarge(payload.len()));
    }

    let total = RED_LAST_HEADER_SIZE_BYTES
        + primary.len()
        + blocks
            .iter()
            .map(|(_, payload)| RED_HEADER_SIZE_BYTES + payload.len())
            .sum::<usize>();
    if total > MAX_AUDIO_PAYLOAD_SIZE_BYTES {
        return Err(RedError::PacketTooLarge(total));
    }

    let mut buf = Vec::with_capacity(total);

    for &(offset, payload) in &blocks {
        let len = payload.len() as u32;
        buf.push(0x80 | pt);
        buf.extend_from_slice(&(((offset << 2) | (len >> 8)) as u16).to_be_bytes());
        buf.push((len & 0xFF) as u8);
    }
    buf.push(pt);

    for (_, payload) in &blocks {
        buf.extend_from_slice(payload);
    }
    buf.extend_from_slice(primary);

    Ok(buf)
}

/// Splits a RED packet into its blocks, oldest first, primary last.
///
/// # Errors
///
/// Returns a [`RedError`] describing the first framing problem found. No
/// partial result is returned for a malformed packet.
pub fn decode(
    frame_timestamp: u32,
    data: &[u8],
    expected_primary_pt: u8,
) -> Result<Vec<RedBlock>, RedError> {
    // ---
    let mut headers: Vec<(u8, u16, usize)> = Vec::new();
    let mut pos = 0usize;
    let mut accounted = 0usize;
    let mut primary_pt = None;

    while pos < data.len() {
        let first = data[pos];

        if first & 0x80 == 0 {
            let pt = first & 0x7F;
            if pt != expected_primary_pt & 0x7F {
                return Err(RedError::UnexpectedPayloadType {
                    expected: expected_primary_pt & 0x7F,
                    found: pt,
                });
            }

            accounted += RED_LAST_HEADER_SIZE_BYTES;
            if accounted >= data.len() {
                return Err(RedError::BlockLengthOverrun);
            }
            primary_pt = Some(pt);
            pos += RED_LAST_HEADER_SIZE_BYTES;
            break;
        }

        if data.len() - pos < RED_HEADER_SIZE_BYTES {
            return Err(RedError::TruncatedHeader { offset: pos });
        }

        let offset = u16::from_be_bytes([data[pos + 1], data[pos + 2]]) >> 2;
        let len = (((data[pos + 2] & 0x03) as usize) << 8) | data[pos + 3] as usize;

        headers.push((first & 0x7F, offset, len));
        accounted += RED_HEADER_SIZE_BYTES + len;
        pos += RED_HEADER_SIZE_BYTES;
    }

    let Some(primary_pt) = primary_pt else {
        return Err(RedError::MissingPrimaryBlock);
    };

    let mut blocks = Vec::with_capacity(headers.len() + 1);

    for (pt, offset, len) in headers {
        blocks.push(RedBlock {
            is_last: false,
            payload_type: pt,
            timestamp_offset: offset,
            timestamp: frame_timestamp.wrapping_sub(offset as u32),
            payload: data[pos..pos + len].to_vec(),
            has_fec: false,
        });
        pos += len;
    }

    blocks.push(RedBlock {
        is_last: true,
        payload_type: primary_pt,
        timestamp_offset: 0,
        timestamp: frame_timestamp,
        payload: data[pos..].to_vec(),
        has_fec: false,
    });

    Ok(blocks)
}

/// Returns the primary (last) block payload of a RED packet.
///
/// # Errors
///
/// Same as [`decode`].
pub fn primary_payload(
    frame_timestamp: u32,
    data: &[u8],
    expected_primary_pt: u8,
) -> Result<Vec<u8>, RedError> {
    // ---
    let mut blocks = decode(frame_timestamp, data, expected_primary_pt)?;

    blocks
        .pop()
        .map(|block| block.payload)
        .ok_or(RedError::MissingPrimaryBlock)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    const OPUS_PT: u8 = 111;

    #[test]
    fn test_primary_only_packet() {
        // ---
        let packet = encode(960, &[0xAA, 0xBB], &[], OPUS_PT).expect("encode");
        assert_eq!(packet, vec![OPUS_PT, 0xAA, 0xBB]);

        let blocks = decode(960, &packet, OPUS_PT).expect("decode");
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].is_last);
        assert_eq!(blocks[0].timestamp, 960);
        assert_eq!(blocks[0].payload, vec![0xAA, 0xBB]);
    }

    #[test]
    fn test_header_bit_layout() {
        // ---
        let old = vec![0x11; 300];
        let packet = encode(10_000, &[0x22], &[(10_000 - 1920, &old[..])], OPUS_PT).expect("encode");

        assert_eq!(packet[0], 0x80 | OPUS_PT);
        // offset 1920 << 2 | 300 >> 8
        assert_eq!(u16::from_be_bytes([packet[1], packet[2]]), (1920 << 2) | 1);
        assert_eq!(packet[3], (300 & 0xFF) as u8);
        assert_eq!(packet[4], OPUS_PT);
        assert_eq!(packet.len(), 4 + 1 + 300 + 1);
        assert_eq!(*packet.last().expect("primary"), 0x22);
    }

    #[test]
    fn test_decode_reconstructs_blocks() {
        // ---
        let a = vec![1, 2, 3];
        let b = vec![4, 5];
        let primary = vec![6, 7, 8, 9];
        let packet = encode(6720, &primary, &[(2880, &a[..]), (4800, &b[..])], OPUS_PT).expect("encode");

        let blocks = decode(6720, &packet, OPUS_PT).expect("decode");
        assert_eq!(blocks.len(), 3);

        assert_eq!(blocks[0].timestamp, 2880);
        assert_eq!(blocks[0].timestamp_offset, 3840);
        assert_eq!(blocks[0].payload, a);
        assert!(blocks[0].is_redundant());

        assert_eq!(blocks[1].timestamp, 4800);
        assert_eq!(blocks[1].timestamp_offset, 1920);
        assert_eq!(blocks[1].payload, b);

        assert!(blocks[2].is_last);
        assert_eq!(blocks[2].payload, primary);
    }

    #[test]
    fn test_timestamp_wraparound() {
        // ---
        let old = vec![9, 9];
        let packet = encode(500, &[1], &[(500u32.wrapping_sub(1920), &old[..])], OPUS_PT).expect("encode");

        let blocks = decode(500, &packet, OPUS_PT).expect("decode");
        assert_eq!(blocks[0].timestamp, 500u32.wrapping_sub(1920));
        assert_eq!(blocks[0].timestamp_offset, 1920);
    }

    #[test]
    fn test_offset_out_of_range_is_skipped() {
        // ---
        let far = vec![1; 10];
        let near = vec![2; 10];
        let packet = encode(
            20_000,
            &[3],
            &[(20_000 - MAX_RED_TIMESTAMP_OFFSET, &far[..]), (20_000 - 960, &near[..])],
            OPUS_PT,
        )
        .expect("encode");

        let blocks = decode(20_000, &packet, OPUS_PT).expect("decode");
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].payload, near);
    }

    #[test]
    fn test_encode_rejects_bad_primary() {
        // ---
        assert_eq!(encode(0, &[], &[], OPUS_PT), Err(RedError::EmptyPrimary));
        assert_eq!(
            encode(0, &vec![0; 1000], &[], OPUS_PT),
            Err(RedError::PayloadTooLarge(1000))
        );
    }

    #[test]
    fn test_encode_rejects_oversized_packet() {
        // ---
        let old = vec![0; 500];
        assert_eq!(
            encode(1920, &vec![0; 500], &[(0, &old[..])], OPUS_PT),
            Err(RedError::PacketTooLarge(1005))
        );
    }

    #[test]
    fn test_decode_truncated_header() {
        // ---
        assert_eq!(
            decode(0, &[0x80 | OPUS_PT, 0x00], OPUS_PT),
            Err(RedError::TruncatedHeader { offset: 0 })
        );
    }

    #[test]
    fn test_decode_unexpected_primary_pt() {
        // ---
        assert_eq!(
            decode(0, &[96, 1, 2], OPUS_PT),
            Err(RedError::UnexpectedPayloadType {
                expected: OPUS_PT,
                found: 96
            })
        );
    }

    #[test]
    fn test_decode_no_primary_bytes() {
        // ---
        assert_eq!(decode(0, &[OPUS_PT], OPUS_PT), Err(RedError::BlockLengthOverrun));

        // block length claims more than is left
        let data = [0x80 | OPUS_PT, 0x00, 0x04, 0x05, OPUS_PT, 1, 2];
        assert_eq!(decode(0, &data, OPUS_PT), Err(RedError::BlockLengthOverrun));
    }

    #[test]
    fn test_decode_missing_primary() {
        // ---
        assert_eq!(decode(0, &[], OPUS_PT), Err(RedError::MissingPrimaryBlock));
        assert_eq!(
            decode(0, &[0x80 | OPUS_PT, 0x00, 0x04, 0x00], OPUS_PT),
            Err(RedError::MissingPrimaryBlock)
        );
    }

    #[test]
    fn test_primary_payload() {
        // ---
        let old = vec![1, 2];
        let packet = encode(1920, &[7, 7, 7], &[(960, &old[..])], OPUS_PT).expect("encode");

        assert_eq!(primary_payload(1920, &packet, OPUS_PT), Ok(vec![7, 7, 7]));
        assert!(primary_payload(1920, &packet, 96).is_err());
    }
}
