//! Opus decoding for the demo receiver.
//!
//! Wraps the Opus decoder with the three ways a 20 ms slot can be filled:
//! a normal decode, a decode of the in-band FEC carried by the next packet,
//! and packet loss concealment.

use anyhow::{Context, Result};
use opus::{Channels, Decoder};

use opus_red_common::opus::MAX_PACKET_DURATION_SAMPLES;
use opus_red_common::red::RED_PACKETIZATION_TIME;

/// Media clock and sample rate.
pub const SAMPLE_RATE: u32 = 48_000;

/// 20 ms at 48 kHz.
pub const SAMPLES_PER_FRAME: usize = RED_PACKETIZATION_TIME as usize;

/// Opus decoder wrapper, mono at 48 kHz.
///
/// # Example
///
/// ```no_run
/// use red_receiver::codec::OpusDecoderWrapper;
///
/// let mut decoder = OpusDecoderWrapper::new().unwrap();
/// let pcm = decoder.conceal_loss().unwrap();
/// assert_eq!(pcm.len(), 960);
/// ```
pub struct OpusDecoderWrapper {
    // ---
    decoder: Decoder,
}

impl OpusDecoderWrapper {
    // ---
    /// Creates a new Opus decoder.
    ///
    /// # Errors
    ///
    /// Returns error if Opus decoder initialization fails.
    pub fn new() -> Result<Self> {
        // ---
        let decoder =
            Decoder::new(SAMPLE_RATE, Channels::Mono).context("failed to create Opus decoder")?;

        Ok(Self { decoder })
    }

    /// Decodes an Opus packet to PCM.
    ///
    /// Returns as many samples as the packet holds, up to 120 ms.
    ///
    /// # Errors
    ///
    /// Returns error if Opus decoding fails (corrupted data, invalid format).
    pub fn decode(&mut self, data: &[u8]) -> Result<Vec<i16>> {
        // ---
        let mut output = vec![0i16; MAX_PACKET_DURATION_SAMPLES as usize];

        let decoded = self
            .decoder
            .decode(data, &mut output, false)
            .context("Opus decoding failed")?;

        output.truncate(decoded);
        Ok(output)
    }

    /// Reconstructs the frame before `next_packet` from its in-band FEC.
    ///
    /// When `next_packet` has no FEC data the decoder falls back to
    /// concealment, so this always yields one frame.
    ///
    /// # Errors
    ///
    /// Returns error if Opus decoding fails.
    pub fn decode_fec(&mut self, next_packet: &[u8]) -> Result<Vec<i16>> {
        // ---
        let mut output = vec![0i16; SAMPLES_PER_FRAME];

        let decoded = self
            .decoder
            .decode(next_packet, &mut output, true)
            .context("Opus FEC decoding failed")?;

        check_frame_size("FEC", decoded)?;
        Ok(output)
    }

    /// Generates packet loss concealment (PLC) for one missing frame.
    ///
    /// # Errors
    ///
    /// Returns error if PLC generation fails.
    pub fn conceal_loss(&mut self) -> Result<Vec<i16>> {
        // ---
        let mut output = vec![0i16; SAMPLES_PER_FRAME];

        let decoded = self
            .decoder
            .decode(&[], &mut output, false)
            .context("Opus PLC failed")?;

        check_frame_size("PLC", decoded)?;
        Ok(output)
    }
}

fn check_frame_size(what: &str, decoded: usize) -> Result<()> {
    // ---
    if decoded != SAMPLES_PER_FRAME {
        anyhow::bail!(
            "unexpected {} frame size: expected {}, got {}",
            what,
            SAMPLES_PER_FRAME,
            decoded
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use opus::{Application, Encoder};

    fn encode_tone(encoder: &mut Encoder, phase: usize) -> Vec<u8> {
        // ---
        let pcm: Vec<i16> = (0..SAMPLES_PER_FRAME)
            .map(|i| {
                let t = (phase * SAMPLES_PER_FRAME + i) as f32 / SAMPLE_RATE as f32;
                ((t * 2.0 * std::f32::consts::PI * 300.0).sin() * 8_000.0) as i16
            })
            .collect();

        let mut encoded = vec![0u8; 1275];
        let len = encoder.encode(&pcm, &mut encoded).expect("encoding failed");
        encoded.truncate(len);
        encoded
    }

    #[test]
    fn test_decode_opus_frame() {
        // ---
        let mut encoder = Encoder::new(SAMPLE_RATE, Channels::Mono, Application::Voip)
            .expect("encoder creation failed");
        let encoded = encode_tone(&mut encoder, 0);

        let mut decoder = OpusDecoderWrapper::new().expect("decoder creation failed");
        let decoded = decoder.decode(&encoded).expect("decode");

        assert_eq!(decoded.len(), SAMPLES_PER_FRAME);
    }

    #[test]
    fn test_fec_decode_yields_one_frame() {
        // ---
        let mut encoder = Encoder::new(SAMPLE_RATE, Channels::Mono, Application::Voip)
            .expect("encoder creation failed");
        encoder.set_inband_fec(true).expect("fec");
        encoder.set_packet_loss_perc(20).expect("loss");

        let packets: Vec<Vec<u8>> = (0..5).map(|n| encode_tone(&mut encoder, n)).collect();

        let mut decoder = OpusDecoderWrapper::new().expect("decoder creation failed");
        for p in &packets[..3] {
            decoder.decode(p).expect("decode");
        }

        // packets[3] is lost; packets[4] carries its FEC
        let recovered = decoder.decode_fec(&packets[4]).expect("fec decode");
        assert_eq!(recovered.len(), SAMPLES_PER_FRAME);
        assert_eq!(decoder.decode(&packets[4]).expect("decode").len(), SAMPLES_PER_FRAME);
    }

    #[test]
    fn test_packet_loss_concealment() {
        // ---
        let mut decoder = OpusDecoderWrapper::new().expect("decoder creation failed");
        let concealed = decoder.conceal_loss().expect("plc");

        assert_eq!(concealed.len(), SAMPLES_PER_FRAME);
    }

    #[test]
    fn test_decode_invalid_data() {
        // ---
        let mut decoder = OpusDecoderWrapper::new().expect("decoder creation failed");

        // code 3 packet claiming zero frames
        let result = decoder.decode(&[0x0B, 0x00]);
        assert!(result.is_err());
    }
}
