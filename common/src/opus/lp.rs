//! SILK LP layer header bits (RFC 6716 section 4.2.3).
//!
//! The first symbols of every SILK-coded frame are one VAD flag per SILK frame
//! followed by the LBRR flag, coded with uniform probability so they can be
//! read straight out of the top bits of the frame's first byte:
//!
//! ```text
//! mono:   | 1..3 VAD bits | LBRR |
//! stereo: | 1..3 mid VAD bits | mid LBRR | 1..3 side VAD bits | side LBRR |
//! ```

use serde::{Deserialize, Serialize};

use super::parse::parse_packet;
use super::toc;

/// Voice activity signalled by a packet's SILK layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoiceActivity {
    // ---
    /// No frame had a VAD flag set.
    Inactive,

    /// At least one frame had a VAD flag set.
    Active,

    /// CELT-only or unparseable packet.
    Unknown,
}

impl VoiceActivity {
    // ---
    pub fn is_active(self) -> bool {
        self == VoiceActivity::Active
    }
}

/// Reads the VAD flags of every Opus frame in `packet`.
pub fn voice_activity(packet: &[u8]) -> VoiceActivity {
    // ---
    let Some(&toc) = packet.first() else {
        return VoiceActivity::Inactive;
    };

    if toc::is_celt_only(toc) {
        return VoiceActivity::Unknown;
    }

    let silk_frames = toc::num_silk_frames(toc) as u32;
    if silk_frames == 0 {
        return VoiceActivity::Unknown;
    }

    let Ok(parsed) = parse_packet(packet, false) else {
        return VoiceActivity::Unknown;
    };

    let stereo = toc::channels(toc) == 2;

    for (offset, size) in parsed.frames() {
        if size < 1 {
            continue;
        }
        let lp = packet[offset];

        if lp >> (8 - silk_frames) != 0 {
            return VoiceActivity::Active;
        }

        // side channel flags follow the mid LBRR bit
        if stereo && (lp << (silk_frames + 1)) >> (8 - silk_frames) != 0 {
            return VoiceActivity::Active;
        }
    }

    VoiceActivity::Inactive
}

/// Whether `packet` carries in-band FEC (LBRR) data for the previous packet.
pub fn has_fec(packet: &[u8]) -> bool {
    // ---
    let Some(&toc) = packet.first() else {
        return false;
    };

    if toc::is_celt_only(toc) {
        return false;
    }

    let Ok(parsed) = parse_packet(packet, false) else {
        return false;
    };

    let (first_offset, first_size) = match parsed.frames().next() {
        Some(frame) => frame,
        None => return false,
    };
    if first_size <= 1 {
        return false;
    }

    let silk_frames = toc::num_silk_frames(toc) as u32;
    if silk_frames == 0 {
        return false;
    }

    let lp = packet[first_offset];
    (0..toc::channels(toc) as u32).any(|ch| lp & (0x80 >> ((ch + 1) * (silk_frames + 1) - 1)) != 0)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_vad_mono() {
        // ---
        assert_eq!(voice_activity(&[0x08, 0x80, 0x11]), VoiceActivity::Active);
        assert_eq!(voice_activity(&[0x08, 0x00, 0x11]), VoiceActivity::Inactive);
        // LBRR alone is not voice
        assert_eq!(voice_activity(&[0x08, 0x40, 0x11]), VoiceActivity::Inactive);
    }

    #[test]
    fn test_vad_stereo_side_channel() {
        // ---
        // mid VAD clear, side VAD set
        assert_eq!(voice_activity(&[0x04, 0x20]), VoiceActivity::Active);
        // only the side LBRR bit set
        assert_eq!(voice_activity(&[0x04, 0x10]), VoiceActivity::Inactive);
    }

    #[test]
    fn test_vad_multiple_silk_frames() {
        // ---
        // 40 ms SILK: two VAD bits, second one set
        assert_eq!(voice_activity(&[0x10, 0x40, 0x00]), VoiceActivity::Active);
        // 60 ms SILK: three VAD bits, all clear, LBRR set
        assert_eq!(voice_activity(&[0x18, 0x10, 0x00]), VoiceActivity::Inactive);
    }

    #[test]
    fn test_vad_unknown_and_empty() {
        // ---
        assert_eq!(voice_activity(&[]), VoiceActivity::Inactive);
        assert_eq!(voice_activity(&[0xF8, 0xFF]), VoiceActivity::Unknown);
        assert_eq!(voice_activity(&[0x03]), VoiceActivity::Unknown);
        // TOC only: one empty frame
        assert_eq!(voice_activity(&[0x00]), VoiceActivity::Inactive);
    }

    #[test]
    fn test_fec_mono() {
        // ---
        assert!(has_fec(&[0x08, 0xC0, 0x11]));
        assert!(!has_fec(&[0x08, 0x80, 0x11]));
        // 40 ms: LBRR is the third bit
        assert!(has_fec(&[0x10, 0x20, 0x00]));
    }

    #[test]
    fn test_fec_stereo_side_lbrr() {
        // ---
        assert!(has_fec(&[0x0C, 0x10, 0x00]));
    }

    #[test]
    fn test_fec_stereo_multiple_silk_frames() {
        // ---
        // 40 ms stereo: | 2 VAD | LBRR | 2 VAD | LBRR | ..
        assert!(has_fec(&[0x14, 0x20, 0x00]));
        assert!(has_fec(&[0x14, 0x04, 0x00]));
        assert!(!has_fec(&[0x14, 0xD8, 0x00]));

        // 60 ms stereo: | 3 VAD | LBRR | 3 VAD | LBRR |
        assert!(has_fec(&[0x1C, 0x10, 0x00]));
        assert!(has_fec(&[0x1C, 0x01, 0x00]));
        assert!(!has_fec(&[0x1C, 0xEE, 0x00]));
    }

    #[test]
    fn test_vad_stereo_ignores_mid_lbrr() {
        // ---
        // only the mid LBRR bit set is not voice, at any frame duration
        assert_eq!(voice_activity(&[0x04, 0x40]), VoiceActivity::Inactive);
        assert_eq!(voice_activity(&[0x14, 0x20, 0x00]), VoiceActivity::Inactive);
        assert_eq!(voice_activity(&[0x1C, 0x10, 0x00]), VoiceActivity::Inactive);

        // side VAD bits right after it are
        assert_eq!(voice_activity(&[0x14, 0x08, 0x00]), VoiceActivity::Active);
        assert_eq!(voice_activity(&[0x1C, 0x02, 0x00]), VoiceActivity::Active);
    }

    #[test]
    fn test_fec_rejected_cases() {
        // ---
        assert!(!has_fec(&[]));
        // first frame too small to hold LBRR data
        assert!(!has_fec(&[0x08, 0xC0]));
        // CELT has no LBRR
        assert!(!has_fec(&[0xF8, 0xFF, 0xFF]));
        // unparseable
        assert!(!has_fec(&[0x01, 0xC0]));
    }
}
