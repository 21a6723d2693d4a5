//! PCM input for the demo sender.
//!
//! Audio is taken either from a 48 kHz WAV file or from a generated tone.
//! Multi-channel input is averaged down to mono.

use anyhow::{Context, Result};
use hound::{SampleFormat, WavReader};
use std::path::Path;
use tracing::info;

use crate::codec::{SAMPLES_PER_FRAME, SAMPLE_RATE};

/// Mono 48 kHz PCM ready for encoding.
#[derive(Debug, Clone)]
pub struct AudioData {
    // ---
    pub samples: Vec<i16>,
}

impl AudioData {
    // ---
    pub fn from_samples(samples: Vec<i16>) -> Self {
        Self { samples }
    }

    /// A sine tone, handy when no input file is given.
    pub fn tone(frequency_hz: f32, duration_secs: f32) -> Self {
        // ---
        let len = (SAMPLE_RATE as f32 * duration_secs) as usize;
        let samples = (0..len)
            .map(|i| {
                let t = i as f32 / SAMPLE_RATE as f32;
                ((t * 2.0 * std::f32::consts::PI * frequency_hz).sin() * 12_000.0) as i16
            })
            .collect();

        Self { samples }
    }

    /// 20 ms frames; the last one is zero-padded to full length.
    pub fn frames(&self) -> impl Iterator<Item = Vec<i16>> + '_ {
        // ---
        self.samples.chunks(SAMPLES_PER_FRAME).map(|chunk| {
            let mut frame = chunk.to_vec();
            frame.resize(SAMPLES_PER_FRAME, 0);
            frame
        })
    }

    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / SAMPLE_RATE as f64
    }

    pub fn frame_count(&self) -> usize {
        self.samples.len().div_ceil(SAMPLES_PER_FRAME)
    }
}

/// Reads a 48 kHz WAV file.
///
/// # Errors
///
/// Returns error if:
/// - File cannot be opened or decoded
/// - Sample rate is not 48 kHz
/// - Sample format is not 16-bit PCM or 32-bit float
pub fn read_wav<P: AsRef<Path>>(path: P) -> Result<AudioData> {
    // ---
    let path = path.as_ref();
    let mut reader = WavReader::open(path)
        .with_context(|| format!("failed to open WAV file: {}", path.display()))?;

    let spec = reader.spec();
    info!(
        "WAV format: {}Hz, {} channels, {} bits",
        spec.sample_rate, spec.channels, spec.bits_per_sample
    );

    if spec.sample_rate != SAMPLE_RATE {
        anyhow::bail!(
            "unsupported sample rate {}Hz (RED packetization needs {}Hz)",
            spec.sample_rate,
            SAMPLE_RATE
        );
    }

    let interleaved: Vec<i16> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .context("failed to read 16-bit PCM samples")?,
        (SampleFormat::Float, 32) => reader
            .samples::<f32>()
            .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16))
            .collect::<Result<Vec<_>, _>>()
            .context("failed to read 32-bit float samples")?,
        (format, bits) => {
            anyhow::bail!("unsupported WAV sample format: {:?} {}-bit", format, bits);
        }
    };

    Ok(AudioData::from_samples(downmix(
        &interleaved,
        spec.channels as usize,
    )))
}

fn downmix(interleaved: &[i16], channels: usize) -> Vec<i16> {
    // ---
    if channels <= 1 {
        return interleaved.to_vec();
    }

    interleaved
        .chunks(channels)
        .map(|frame| (frame.iter().map(|&s| s as i32).sum::<i32>() / frame.len() as i32) as i16)
        .collect()
}
