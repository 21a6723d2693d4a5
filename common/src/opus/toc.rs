//! Opus TOC byte helpers (RFC 6716 section 3.1).
//!
//! ```text
//!  0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+
//! | config  |s| c |
//! +-+-+-+-+-+-+-+-+
//! ```

use serde::{Deserialize, Serialize};

/// Internal coding mode selected by the TOC configuration number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpusMode {
    /// Configurations 0..=11.
    Silk,

    /// Configurations 12..=15.
    Hybrid,

    /// Configurations 16..=31.
    Celt,
}

/// Configuration number (0..=31).
pub fn config(toc: u8) -> u8 {
    toc >> 3
}

/// Frame-count code (0..=3).
pub fn frame_count_code(toc: u8) -> u8 {
    toc & 0x03
}

/// Coding mode for a TOC byte.
pub fn mode(toc: u8) -> OpusMode {
    match config(toc) {
        0..=11 => OpusMode::Silk,
        12..=15 => OpusMode::Hybrid,
        _ => OpusMode::Celt,
    }
}

/// CELT-only configurations all have the top config bit set.
pub fn is_celt_only(toc: u8) -> bool {
    toc & 0x80 != 0
}

/// Number of channels signalled by the stereo bit.
pub fn channels(toc: u8) -> u8 {
    if toc & 0x04 != 0 {
        2
    } else {
        1
    }
}

/// Samples per Opus frame at `sample_rate_hz`.
///
/// The rate should be a multiple of 400 Hz for exact results.
pub fn samples_per_frame(toc: u8, sample_rate_hz: u32) -> u32 {
    // ---
    let rate = sample_rate_hz as u64;
    let samples = if is_celt_only(toc) {
        // 2.5, 5, 10, 20 ms
        let size = ((toc >> 3) & 0x03) as u32;
        (rate << size) / 400
    } else if toc & 0x60 == 0x60 {
        // Hybrid: 10 or 20 ms
        if toc & 0x08 != 0 {
            rate / 50
        } else {
            rate / 100
        }
    } else {
        // SILK: 10, 20, 40, 60 ms
        let size = ((toc >> 3) & 0x03) as u32;
        if size == 3 {
            rate * 60 / 1000
        } else {
            (rate << size) / 100
        }
    };

    samples as u32
}

/// Number of SILK frames carried in each Opus frame.
///
/// Returns 0 only for durations Opus cannot produce.
pub fn num_silk_frames(toc: u8) -> u8 {
    // ---
    let frame_ms = (samples_per_frame(toc, 48_000) / 48).max(10);

    match frame_ms {
        10 | 20 => 1,
        40 => 2,
        60 => 3,
        _ => 0,
    }
}
