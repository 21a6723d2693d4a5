//! Opus packet framing (RFC 6716 section 3.2 and appendix B).
//!
//! Splits a packet into its Opus frames without decoding anything. The
//! accept/reject policy matches the reference decoder's packet parser, so a
//! packet rejected here would also be rejected by libopus.

use super::toc;
use super::OpusPacketError;

/// Largest frame any Opus packet may carry.
pub const MAX_FRAME_SIZE_BYTES: usize = 1275;

/// A code 3 packet may carry at most 120 ms of audio (at 48 kHz).
pub const MAX_PACKET_DURATION_SAMPLES: u32 = 5760;

/// Frame layout of one Opus packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPacket {
    // ---
    /// TOC byte.
    pub toc: u8,

    /// Offset of the first byte of each frame.
    pub frame_offsets: Vec<usize>,

    /// Size in bytes of each frame.
    pub frame_sizes: Vec<usize>,

    /// Offset of the first frame's data.
    pub payload_offset: usize,

    /// Total packet length including padding. Can be shorter than the input
    /// in self-delimited mode.
    pub packet_len: usize,
}

impl ParsedPacket {
    // ---
    /// Number of Opus frames.
    pub fn num_frames(&self) -> usize {
        self.frame_sizes.len()
    }

    /// `(offset, size)` pairs for each frame.
    pub fn frames(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.frame_offsets
            .iter()
            .copied()
            .zip(self.frame_sizes.iter().copied())
    }
}

/// Decodes a 1 or 2 byte frame length.
///
/// Returns `(size, bytes_consumed)`, or `None` when the input is too short
/// to hold the length.
pub fn parse_size(data: &[u8]) -> Option<(usize, usize)> {
    // ---
    match data {
        [] => None,
        [first, ..] if *first < 252 => Some((*first as usize, 1)),
        [_] => None,
        [first, second, ..] => Some((4 * *second as usize + *first as usize, 2)),
    }
}

/// Parses an Opus packet, optionally in self-delimited framing.
///
/// Self-delimited packets carry an extra length field before the frame data,
/// giving the size of the last frame (or of every frame for CBR packets).
///
/// # Errors
///
/// Returns an [`OpusPacketError`] for any packet the reference decoder would
/// reject.
pub fn parse_packet(
    data: &[u8],
    self_delimited: bool,
) -> Result<ParsedPacket, OpusPacketError> {
    // ---
    if data.is_empty() {
        return Err(OpusPacketError::Empty);
    }

    let toc = data[0];
    let mut offset = 1usize;
    let mut remaining = data.len() as isize - 1;
    let mut last_size = remaining;
    let mut padding = 0usize;
    let mut cbr = false;

    // Sizes of frames 0..n-1; the last one is filled in at the end.
    let mut sizes: Vec<isize>;

    match toc::frame_count_code(toc) {
        0 => {
            sizes = vec![0; 1];
        }
        1 => {
            sizes = vec![0; 2];
            cbr = true;

            if !self_delimited {
                if remaining & 0x1 != 0 {
                    return Err(OpusPacketError::OddCbrLength(remaining as usize));
                }
                last_size = remaining / 2;
                sizes[0] = last_size;
            }
        }
        2 => {
            sizes = vec![0; 2];

            let (size, used) = read_size(data, offset, remaining)?;
            remaining -= used as isize;
            if size as isize > remaining {
                return Err(OpusPacketError::FrameSizeOverrun {
                    size,
                    remaining: remaining.max(0) as usize,
                });
            }
            offset += used;
            sizes[0] = size as isize;
            last_size = remaining - size as isize;
        }
        _ => {
            if remaining < 1 {
                return Err(OpusPacketError::MissingFrameCount);
            }

            //  0 1 2 3 4 5 6 7
            // +-+-+-+-+-+-+-+-+
            // |v|p|     M     |
            // +-+-+-+-+-+-+-+-+
            let count_byte = data[offset];
            offset += 1;
            remaining -= 1;

            let num_frames = (count_byte & 0x3F) as usize;
            if num_frames == 0 {
                return Err(OpusPacketError::ZeroFrames);
            }

            let duration = toc::samples_per_frame(toc, 48_000) * num_frames as u32;
            if duration > MAX_PACKET_DURATION_SAMPLES {
                return Err(OpusPacketError::DurationTooLong(duration));
            }
            sizes = vec![0; num_frames];

            if count_byte & 0x40 != 0 {
                loop {
                    if remaining <= 0 {
                        return Err(OpusPacketError::PaddingOverrun);
                    }
                    let pad_byte = data[offset];
                    offset += 1;
                    remaining -= 1;

                    // 255 means 254 bytes of padding plus another count byte
                    let pad = if pad_byte == 255 { 254 } else { pad_byte as usize };
                    remaining -= pad as isize;
                    padding += pad;

                    if pad_byte != 255 {
                        break;
                    }
                }
            }

            if remaining < 0 {
                return Err(OpusPacketError::PaddingOverrun);
            }

            cbr = count_byte & 0x80 == 0;

            if !cbr {
                // VBR: M-1 explicit lengths, the last frame takes the rest
                last_size = remaining;
                for size_slot in sizes.iter_mut().take(num_frames - 1) {
                    let (size, used) = read_size(data, offset, remaining)?;
                    remaining -= used as isize;
                    if size as isize > remaining {
                        return Err(OpusPacketError::FrameSizeOverrun {
                            size,
                            remaining: remaining as usize,
                        });
                    }
                    offset += used;
                    last_size -= (used + size) as isize;
                    *size_slot = size as isize;
                }

                if last_size < 0 {
                    return Err(OpusPacketError::NegativeLastFrame);
                }
            } else if !self_delimited {
                last_size = remaining / num_frames as isize;
                if last_size * num_frames as isize != remaining {
                    return Err(OpusPacketError::UnevenCbr {
                        remaining: remaining as usize,
                        frames: num_frames,
                    });
                }
                for size_slot in sizes.iter_mut().take(num_frames - 1) {
                    *size_slot = last_size;
                }
            }
        }
    }

    let num_frames = sizes.len();

    if self_delimited {
        let (size, used) = read_size(data, offset, remaining)?;
        remaining -= used as isize;
        if size as isize > remaining {
            return Err(OpusPacketError::FrameSizeOverrun {
                size,
                remaining: remaining.max(0) as usize,
            });
        }
        offset += used;

        if cbr {
            if (size * num_frames) as isize > remaining {
                return Err(OpusPacketError::FrameSizeOverrun {
                    size: size * num_frames,
                    remaining: remaining as usize,
                });
            }
            for size_slot in sizes.iter_mut() {
                *size_slot = size as isize;
            }
        } else if (used + size) as isize > last_size {
            // last_size still includes the delimiting length bytes
            return Err(OpusPacketError::FrameSizeOverrun {
                size: used + size,
                remaining: last_size.max(0) as usize,
            });
        }
        sizes[num_frames - 1] = size as isize;
    } else {
        if last_size > MAX_FRAME_SIZE_BYTES as isize {
            return Err(OpusPacketError::FrameTooLarge(last_size as usize));
        }
        sizes[num_frames - 1] = last_size;
    }

    let payload_offset = offset;
    let mut frame_offsets = Vec::with_capacity(num_frames);
    let mut frame_sizes = Vec::with_capacity(num_frames);
    for size in sizes {
        frame_offsets.push(offset);
        frame_sizes.push(size as usize);
        offset += size as usize;
    }

    Ok(ParsedPacket {
        toc,
        frame_offsets,
        frame_sizes,
        payload_offset,
        packet_len: offset + padding,
    })
}

/// Reads a frame length from the `remaining` bytes starting at `offset`.
fn read_size(data: &[u8], offset: usize, remaining: isize) -> Result<(usize, usize), OpusPacketError> {
    // ---
    let end = offset
        .saturating_add(remaining.max(0) as usize)
        .min(data.len());
    let window = data.get(offset..end).unwrap_or(&[]);

    parse_size(window).ok_or(OpusPacketError::MissingFrameSize)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_parse_size() {
        // ---
        assert_eq!(parse_size(&[]), None);
        assert_eq!(parse_size(&[0]), Some((0, 1)));
        assert_eq!(parse_size(&[251]), Some((251, 1)));
        assert_eq!(parse_size(&[252]), None);
        assert_eq!(parse_size(&[252, 1]), Some((256, 2)));
        assert_eq!(parse_size(&[255, 255]), Some((1275, 2)));
    }

    #[test]
    fn test_code0_single_frame() {
        // ---
        let parsed = parse_packet(&[0x08, 0x80, 0x11], false).expect("valid");

        assert_eq!(parsed.num_frames(), 1);
        assert_eq!(parsed.frame_sizes, vec![2]);
        assert_eq!(parsed.frame_offsets, vec![1]);
        assert_eq!(parsed.packet_len, 3);
    }

    #[test]
    fn test_toc_only_packet_is_empty_frame() {
        // ---
        let parsed = parse_packet(&[0x00], false).expect("valid");
        assert_eq!(parsed.frame_sizes, vec![0]);
    }

    #[test]
    fn test_code1_two_equal_frames() {
        // ---
        let parsed = parse_packet(&[0x09, 1, 2, 3, 4], false).expect("valid");

        assert_eq!(parsed.frame_sizes, vec![2, 2]);
        assert_eq!(parsed.frame_offsets, vec![1, 3]);
    }

    #[test]
    fn test_code2_two_variable_frames() {
        // ---
        let parsed = parse_packet(&[0x0A, 0x01, 0xAA, 0xBB, 0xCC], false).expect("valid");

        assert_eq!(parsed.frame_sizes, vec![1, 2]);
        assert_eq!(parsed.frame_offsets, vec![2, 3]);
        assert_eq!(parsed.payload_offset, 2);
    }

    #[test]
    fn test_code3_cbr_with_padding() {
        // ---
        let data = [0x0B, 0x42, 0x01, 0xA0, 0xA1, 0xB0, 0xB1, 0x00];
        let parsed = parse_packet(&data, false).expect("valid");

        assert_eq!(parsed.frame_sizes, vec![2, 2]);
        assert_eq!(parsed.frame_offsets, vec![3, 5]);
        assert_eq!(parsed.packet_len, data.len());
    }

    #[test]
    fn test_code3_vbr() {
        // ---
        let data = [0x0B, 0x83, 0x01, 0x02, 0xA0, 0xB0, 0xB1, 0xC0, 0xC1, 0xC2];
        let parsed = parse_packet(&data, false).expect("valid");

        assert_eq!(parsed.frame_sizes, vec![1, 2, 3]);
        assert_eq!(parsed.frame_offsets, vec![4, 5, 7]);
        let header_bytes = parsed.payload_offset;
        assert_eq!(
            parsed.frame_sizes.iter().sum::<usize>() + header_bytes,
            data.len()
        );
    }

    #[test]
    fn test_invalid_packets() {
        // ---
        assert_eq!(parse_packet(&[], false), Err(OpusPacketError::Empty));
        assert_eq!(
            parse_packet(&[0x01, 0x00], false),
            Err(OpusPacketError::OddCbrLength(1))
        );
        assert_eq!(
            parse_packet(&[0x02], false),
            Err(OpusPacketError::MissingFrameSize)
        );
        assert!(matches!(
            parse_packet(&[0x02, 0x01], false),
            Err(OpusPacketError::FrameSizeOverrun { .. })
        ));
        assert_eq!(
            parse_packet(&[0x03], false),
            Err(OpusPacketError::MissingFrameCount)
        );
        assert_eq!(parse_packet(&[0x03, 0x00], false), Err(OpusPacketError::ZeroFrames));

        // 3 x 60 ms SILK frames = 180 ms
        assert_eq!(
            parse_packet(&[0x1B, 0x03], false),
            Err(OpusPacketError::DurationTooLong(8640))
        );

        // padding flag with no count byte, then a count larger than the packet
        assert_eq!(
            parse_packet(&[0x03, 0x41], false),
            Err(OpusPacketError::PaddingOverrun)
        );
        assert_eq!(
            parse_packet(&[0x03, 0x41, 0x05], false),
            Err(OpusPacketError::PaddingOverrun)
        );

        // VBR length runs past the buffer
        assert!(matches!(
            parse_packet(&[0x03, 0x82, 0x05, 0x00], false),
            Err(OpusPacketError::FrameSizeOverrun { .. })
        ));

        // VBR lengths add up to more than the data
        assert_eq!(
            parse_packet(&[0x03, 0x83, 0x01, 0x01, 0xAA], false),
            Err(OpusPacketError::NegativeLastFrame)
        );

        // CBR data doesn't split evenly
        assert!(matches!(
            parse_packet(&[0x03, 0x02, 0xAA, 0xBB, 0xCC], false),
            Err(OpusPacketError::UnevenCbr { .. })
        ));

        // single frame over 1275 bytes
        let mut oversized = vec![0u8; MAX_FRAME_SIZE_BYTES + 2];
        oversized[0] = 0x00;
        assert_eq!(
            parse_packet(&oversized, false),
            Err(OpusPacketError::FrameTooLarge(1276))
        );
    }

    #[test]
    fn test_self_delimited_code0() {
        // ---
        let data = [0x08, 0x02, 0xAA, 0xBB, 0xCC];
        let parsed = parse_packet(&data, true).expect("valid");

        assert_eq!(parsed.frame_sizes, vec![2]);
        assert_eq!(parsed.frame_offsets, vec![2]);
        // trailing byte belongs to the next packet
        assert_eq!(parsed.packet_len, 4);
    }

    #[test]
    fn test_self_delimited_cbr() {
        // ---
        let parsed = parse_packet(&[0x09, 0x02, 1, 1, 2, 2], true).expect("valid");
        assert_eq!(parsed.frame_sizes, vec![2, 2]);

        assert!(matches!(
            parse_packet(&[0x09, 0x03, 1, 1, 2, 2], true),
            Err(OpusPacketError::FrameSizeOverrun { .. })
        ));
    }

    #[test]
    fn test_self_delimited_vbr_last_frame_overrun() {
        // ---
        // code 2: first frame 2 bytes, then a delimiting length of 2 for the
        // last frame although only 2 bytes follow the first one
        assert_eq!(
            parse_packet(&[0x0A, 0x02, 0x02, 0xAA, 0xBB, 0xCC], true),
            Err(OpusPacketError::FrameSizeOverrun {
                size: 3,
                remaining: 2
            })
        );

        // a last frame of 1 byte fits
        let parsed = parse_packet(&[0x0A, 0x02, 0x01, 0xAA, 0xBB, 0xCC], true).expect("valid");
        assert_eq!(parsed.frame_sizes, vec![2, 1]);
        assert_eq!(parsed.frame_offsets, vec![3, 5]);
    }

    #[test]
    fn test_code3_padding_bounds() {
        // ---
        // 255 continues the count: 254 bytes of padding are not there
        assert_eq!(
            parse_packet(&[0x03, 0x41, 0xFF, 0x00], false),
            Err(OpusPacketError::PaddingOverrun)
        );
        assert_eq!(
            parse_packet(&[0x03, 0x41, 0xFF], false),
            Err(OpusPacketError::PaddingOverrun)
        );

        // padding that exactly consumes the rest leaves one empty frame
        let parsed = parse_packet(&[0x03, 0x41, 0x02, 0xAA, 0xBB], false).expect("valid");
        assert_eq!(parsed.frame_sizes, vec![0]);
        assert_eq!(parsed.packet_len, 5);
    }

    #[test]
    fn test_self_delimited_missing_size() {
        // ---
        assert_eq!(
            parse_packet(&[0x08], true),
            Err(OpusPacketError::MissingFrameSize)
        );
    }

    #[test]
    fn test_parse_is_pure() {
        // ---
        let data = vec![0x0B, 0x83, 0x01, 0x02, 0xA0, 0xB0, 0xB1, 0xC0, 0xC1, 0xC2];
        let copy = data.clone();

        let first = parse_packet(&data, false);
        let second = parse_packet(&data, false);

        assert_eq!(first, second);
        assert_eq!(data, copy);
    }
}
