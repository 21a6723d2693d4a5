use thiserror::Error;

/// Reasons an Opus packet fails to parse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OpusPacketError {
    // ---
    #[error("empty packet")]
    Empty,

    #[error("code 1 packet with odd payload length {0}")]
    OddCbrLength(usize),

    #[error("missing frame length")]
    MissingFrameSize,

    #[error("frame length {size} exceeds remaining {remaining} bytes")]
    FrameSizeOverrun { size: usize, remaining: usize },

    #[error("code 3 packet without frame count byte")]
    MissingFrameCount,

    #[error("code 3 packet with zero frames")]
    ZeroFrames,

    #[error("packet duration {0} samples exceeds 120 ms")]
    DurationTooLong(u32),

    #[error("padding runs past end of packet")]
    PaddingOverrun,

    #[error("frame lengths exceed packet size")]
    NegativeLastFrame,

    #[error("{remaining} bytes cannot be split into {frames} equal frames")]
    UnevenCbr { remaining: usize, frames: usize },

    #[error("frame of {0} bytes exceeds 1275 byte limit")]
    FrameTooLarge(usize),
}
