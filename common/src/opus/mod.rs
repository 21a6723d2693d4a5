//! Opus bitstream inspection.
//!
//! Nothing here decodes audio. The inspector only reads the TOC byte, the
//! framing and the first LP layer bits of each frame, which is enough for the
//! redundancy decisions on both ends.

mod error;
mod lp;
mod parse;
pub mod toc;

pub use error::OpusPacketError;
pub use lp::{has_fec, voice_activity, VoiceActivity};
pub use parse::{
    parse_packet, parse_size, ParsedPacket, MAX_FRAME_SIZE_BYTES, MAX_PACKET_DURATION_SAMPLES,
};
pub use toc::OpusMode;

/// Read-only view of one Opus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpusPacketDescriptor {
    // ---
    pub mode: OpusMode,
    pub num_frames: u8,
    pub frame_sizes: Vec<u16>,
    pub frame_offsets: Vec<usize>,
    pub payload_offset: usize,
    pub samples_per_frame: u32,
    pub channels: u8,
    pub has_voice_activity: VoiceActivity,
    pub has_fec: bool,
}

impl OpusPacketDescriptor {
    // ---
    /// Inspects an undelimited Opus packet.
    ///
    /// # Arguments
    ///
    /// * `packet` - Opus payload, TOC byte first
    /// * `sample_rate_hz` - rate used for `samples_per_frame`
    ///
    /// # Errors
    ///
    /// Returns the parser error when the packet framing is invalid.
    pub fn inspect(packet: &[u8], sample_rate_hz: u32) -> Result<Self, OpusPacketError> {
        // ---
        let parsed = parse_packet(packet, false)?;

        Ok(Self {
            mode: toc::mode(parsed.toc),
            num_frames: parsed.num_frames() as u8,
            frame_sizes: parsed.frame_sizes.iter().map(|&s| s as u16).collect(),
            frame_offsets: parsed.frame_offsets.clone(),
            payload_offset: parsed.payload_offset,
            samples_per_frame: toc::samples_per_frame(parsed.toc, sample_rate_hz),
            channels: toc::channels(parsed.toc),
            has_voice_activity: voice_activity(packet),
            has_fec: has_fec(packet),
        })
    }

    /// Total duration of the packet in samples.
    pub fn duration_samples(&self) -> u32 {
        self.samples_per_frame * self.num_frames as u32
    }
}

/// Whether an encoding is worth keeping for redundancy.
///
/// CELT-only packets have no VAD flags and are always kept; SILK and hybrid
/// packets are kept only while voice is active.
pub fn is_important(packet: &[u8]) -> bool {
    // ---
    match packet.first() {
        Some(&toc_byte) if toc::is_celt_only(toc_byte) => true,
        Some(_) => voice_activity(packet).is_active(),
        None => false,
    }
}
