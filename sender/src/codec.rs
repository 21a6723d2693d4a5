//! Opus encoding for the demo sender.
//!
//! The RED engine assumes 20 ms packets on a 48 kHz media clock, so the
//! encoder is fixed to that. In-band FEC is switched on so receivers have a
//! second recovery path next to RED.

use anyhow::{Context, Result};
use opus::{Application, Bitrate, Channels, Encoder};

use opus_red_common::red::RED_PACKETIZATION_TIME;

/// Media clock and sample rate.
pub const SAMPLE_RATE: u32 = 48_000;

/// 20 ms at 48 kHz.
pub const SAMPLES_PER_FRAME: usize = RED_PACKETIZATION_TIME as usize;

/// Target bitrate in bits per second.
pub const BITRATE: i32 = 32_000;

/// Largest packet libopus is asked to produce.
const MAX_PACKET_BYTES: usize = 1275;

/// Opus encoder configured for speech with in-band FEC.
///
/// # Configuration
///
/// - Sample Rate: 48kHz
/// - Channels: Mono
/// - Bitrate: 32 kbps
/// - Frame Size: 20ms (960 samples)
/// - Application: VOIP, in-band FEC on
pub struct OpusEncoderWrapper {
    // ---
    encoder: Encoder,
}

impl OpusEncoderWrapper {
    // ---
    /// Creates the encoder.
    ///
    /// # Arguments
    ///
    /// * `expected_loss_percent` - loss hint that sizes the in-band FEC
    ///
    /// # Errors
    ///
    /// Returns error if libopus rejects any of the settings.
    pub fn new(expected_loss_percent: u8) -> Result<Self> {
        // ---
        let mut encoder = Encoder::new(SAMPLE_RATE, Channels::Mono, Application::Voip)
            .context("failed to create Opus encoder")?;

        encoder
            .set_bitrate(Bitrate::Bits(BITRATE))
            .context("failed to set bitrate")?;
        encoder
            .set_inband_fec(true)
            .context("failed to enable in-band FEC")?;

        let mut wrapper = Self { encoder };
        wrapper.set_expected_loss(expected_loss_percent)?;
        Ok(wrapper)
    }

    /// Updates the loss hint; libopus only emits FEC when this is non-zero.
    pub fn set_expected_loss(&mut self, percent: u8) -> Result<()> {
        // ---
        self.encoder
            .set_packet_loss_perc(i32::from(percent.min(100)))
            .context("failed to set packet loss percentage")
    }

    /// Encodes one 20 ms frame of PCM.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Input size is not exactly SAMPLES_PER_FRAME (960)
    /// - Opus encoding fails
    pub fn encode(&mut self, pcm: &[i16]) -> Result<Vec<u8>> {
        // ---
        if pcm.len() != SAMPLES_PER_FRAME {
            anyhow::bail!(
                "invalid frame size: expected {}, got {}",
                SAMPLES_PER_FRAME,
                pcm.len()
            );
        }

        let mut output = vec![0u8; MAX_PACKET_BYTES];
        let len = self
            .encoder
            .encode(pcm, &mut output)
            .context("Opus encoding failed")?;

        output.truncate(len);
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use opus_red_common::opus::{toc, OpusPacketDescriptor};

    fn tone(offset: usize) -> Vec<i16> {
        // ---
        (0..SAMPLES_PER_FRAME)
            .map(|i| {
                let t = (offset + i) as f32 / SAMPLE_RATE as f32;
                ((t * 2.0 * std::f32::consts::PI * 440.0).sin() * 12_000.0) as i16
            })
            .collect()
    }

    #[test]
    fn test_encode_silence() {
        // ---
        let mut encoder = OpusEncoderWrapper::new(10).expect("encoder creation failed");
        let encoded = encoder
            .encode(&vec![0i16; SAMPLES_PER_FRAME])
            .expect("encode");

        assert!(!encoded.is_empty());
        assert!(encoded.len() < 100);
    }

    #[test]
    fn test_encode_invalid_frame_size() {
        // ---
        let mut encoder = OpusEncoderWrapper::new(0).expect("encoder creation failed");
        assert!(encoder.encode(&vec![0i16; 320]).is_err());
    }

    #[test]
    fn test_packets_are_20ms_and_parseable() {
        // ---
        let mut encoder = OpusEncoderWrapper::new(10).expect("encoder creation failed");

        for n in 0..5 {
            let packet = encoder.encode(&tone(n * SAMPLES_PER_FRAME)).expect("encode");
            let desc = OpusPacketDescriptor::inspect(&packet, SAMPLE_RATE).expect("valid packet");

            assert_eq!(desc.duration_samples(), SAMPLES_PER_FRAME as u32);
            assert_eq!(toc::channels(packet[0]), 1);
        }
    }
}
