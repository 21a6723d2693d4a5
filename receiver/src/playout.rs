//! Playout with gap concealment.
//!
//! Received frames are placed into 20 ms slots and held back a fixed number
//! of slots before being decoded, so redundant blocks from later packets can
//! still fill a gap. When a slot's turn comes it is played from the best
//! source at hand:
//!
//! 1. its own primary encoding,
//! 2. a redundant RED block for its timestamp,
//! 3. the in-band FEC of the primary in the following slot,
//! 4. Opus packet loss concealment.
//!
//! Frames a little behind the playout point are discarded. A new SSRC, or a
//! jump in either direction longer than the concealment limit, restarts
//! playout at the new frame. Decoded audio can be written to a WAV file.

use anyhow::{Context, Result};
use hound::{SampleFormat, WavSpec, WavWriter};
use opus_red_common::MetricsContext;
use std::collections::VecDeque;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::codec::{OpusDecoderWrapper, SAMPLES_PER_FRAME, SAMPLE_RATE};
use crate::depacketizer::ReceivedFrame;

const FRAME: u32 = SAMPLES_PER_FRAME as u32;

/// Playout configuration.
#[derive(Debug, Clone)]
pub struct PlayoutConfig {
    // ---
    /// Slots held back before decoding
    pub delay_frames: usize,

    /// Longest gap (in frames) that is concealed; longer gaps restart playout
    /// at the new frame.
    pub max_concealed_frames: u32,
}

impl Default for PlayoutConfig {
    fn default() -> Self {
        // ---
        Self {
            delay_frames: 3,          // 60ms
            max_concealed_frames: 50, // 1s
        }
    }
}

/// Where the audio for a slot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSource {
    Primary,
    Red,
    Fec,
    Plc,
}

/// One slot of decoded audio.
#[derive(Debug, Clone)]
pub struct PlayoutFrame {
    // ---
    pub timestamp: u32,
    pub source: FrameSource,
    pub pcm: Vec<i16>,
}

/// Running playout counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlayoutStats {
    // ---
    pub decoded: u64,
    pub concealed_red: u64,
    pub concealed_fec: u64,
    pub concealed_plc: u64,
    pub late: u64,
    pub duplicates: u64,
    pub resyncs: u64,
    pub decode_errors: u64,
}

impl PlayoutStats {
    // ---
    pub fn concealed(&self) -> u64 {
        self.concealed_red + self.concealed_fec + self.concealed_plc
    }
}

#[derive(Debug)]
enum Slot {
    Missing,
    Redundant(Vec<u8>),
    Primary {
        sequence: u16,
        payload: Vec<u8>,
        has_fec: bool,
    },
}

pub struct Playout {
    // ---
    decoder: OpusDecoderWrapper,
    config: PlayoutConfig,

    /// Stream being played
    ssrc: Option<u32>,

    /// Timestamp of `slots[0]`
    next_timestamp: Option<u32>,
    slots: VecDeque<Slot>,

    wav: Option<WavWriter<BufWriter<File>>>,
    stats: PlayoutStats,
    metrics: Option<MetricsContext>,
}

impl Playout {
    // ---
    /// # Errors
    ///
    /// Returns error if the Opus decoder cannot be created.
    pub fn new(config: PlayoutConfig) -> Result<Self> {
        // ---
        Ok(Self {
            decoder: OpusDecoderWrapper::new()?,
            config,
            ssrc: None,
            next_timestamp: None,
            slots: VecDeque::new(),
            wav: None,
            stats: PlayoutStats::default(),
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: MetricsContext) -> Self {
        // ---
        self.metrics = Some(metrics);
        self
    }

    /// Writes all played audio to a 48 kHz mono 16-bit WAV file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be created.
    pub fn with_wav_output<P: AsRef<Path>>(mut self, path: P) -> Result<Self> {
        // ---
        let path = path.as_ref();
        let spec = WavSpec {
            channels: 1,
            sample_rate: SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let writer = WavWriter::create(path, spec)
            .with_context(|| format!("failed to create WAV file: {}", path.display()))?;

        info!("Writing decoded audio to {}", path.display());
        self.wav = Some(writer);
        Ok(self)
    }

    pub fn stats(&self) -> PlayoutStats {
        self.stats
    }

    /// Slots waiting to be played.
    pub fn pending(&self) -> usize {
        self.slots.len()
    }

    /// Files one received frame and plays every slot that is due.
    ///
    /// Returns the slots played, oldest first.
    ///
    /// # Errors
    ///
    /// Returns error if concealment fails or the WAV file cannot be written.
    pub fn push(&mut self, rx: &ReceivedFrame) -> Result<Vec<PlayoutFrame>> {
        // ---
        let timestamp = rx.frame.timestamp;
        let mut out = Vec::new();

        let ssrc_changed = matches!(self.ssrc, Some(ssrc) if ssrc != rx.frame.ssrc);
        self.ssrc = Some(rx.frame.ssrc);

        let next = *self.next_timestamp.get_or_insert(timestamp);
        let ahead = timestamp.wrapping_sub(next) as i32;
        let distance = ahead.unsigned_abs() as usize / SAMPLES_PER_FRAME;
        let horizon = self.slots.len().max(self.config.delay_frames);

        let index = if ssrc_changed || distance > horizon + self.config.max_concealed_frames as usize
        {
            info!(
                "ssrc=0x{:08X} ts={} is {} frames {} playout, restarting",
                rx.frame.ssrc,
                timestamp,
                distance,
                if ahead < 0 { "behind" } else { "ahead of" }
            );
            self.stats.resyncs += 1;
            out.extend(self.flush()?);
            self.next_timestamp = Some(timestamp);
            0
        } else if ahead < 0 {
            debug!("seq={} ts={} behind playout, discarded", rx.frame.sequence, timestamp);
            self.stats.late += 1;
            return Ok(out);
        } else {
            distance
        };

        if self.slots.len() <= index {
            self.slots.resize_with(index + 1, || Slot::Missing);
        }

        if matches!(self.slots[index], Slot::Primary { .. }) {
            debug!("seq={} ts={} duplicate, discarded", rx.frame.sequence, timestamp);
            self.stats.duplicates += 1;
        } else {
            self.slots[index] = Slot::Primary {
                sequence: rx.frame.sequence,
                payload: rx.primary_payload().to_vec(),
                has_fec: rx.primary_has_fec(),
            };
        }

        self.fill_from_redundant_blocks(rx);

        while self.slots.len() > self.config.delay_frames {
            if let Some(frame) = self.play_next()? {
                out.push(frame);
            }
        }

        Ok(out)
    }

    /// Plays every pending slot.
    ///
    /// # Errors
    ///
    /// Returns error if concealment fails or the WAV file cannot be written.
    pub fn flush(&mut self) -> Result<Vec<PlayoutFrame>> {
        // ---
        let mut out = Vec::with_capacity(self.slots.len());
        while let Some(frame) = self.play_next()? {
            out.push(frame);
        }
        Ok(out)
    }

    /// Plays what is pending, then closes the WAV output, if any.
    ///
    /// # Errors
    ///
    /// Returns error if the last slots cannot be played or the WAV header
    /// cannot be finalized.
    pub fn finish(mut self) -> Result<PlayoutStats> {
        // ---
        self.flush()?;
        if let Some(wav) = self.wav.take() {
            wav.finalize().context("failed to finalize WAV file")?;
        }
        Ok(self.stats)
    }

    fn fill_from_redundant_blocks(&mut self, rx: &ReceivedFrame) {
        // ---
        let Some(base) = self.next_timestamp else {
            return;
        };

        for block in rx.blocks.iter().filter(|b| b.is_redundant()) {
            let ahead = block.timestamp.wrapping_sub(base) as i32;
            if ahead < 0 {
                continue;
            }
            if let Some(slot) = self.slots.get_mut(ahead as usize / SAMPLES_PER_FRAME) {
                if matches!(slot, Slot::Missing) {
                    *slot = Slot::Redundant(block.payload.clone());
                }
            }
        }
    }

    fn play_next(&mut self) -> Result<Option<PlayoutFrame>> {
        // ---
        let Some(timestamp) = self.next_timestamp else {
            return Ok(None);
        };
        let Some(slot) = self.slots.pop_front() else {
            return Ok(None);
        };
        self.next_timestamp = Some(timestamp.wrapping_add(FRAME));

        let started = Instant::now();
        let (source, pcm) = match slot {
            Slot::Primary {
                sequence, payload, ..
            } => match self.decoder.decode(&payload) {
                Ok(pcm) if !pcm.is_empty() => (FrameSource::Primary, pcm),
                result => {
                    let reason = match result {
                        Err(e) => e.to_string(),
                        Ok(_) => "no samples".to_string(),
                    };
                    warn!("seq={} failed to decode ({}), concealing", sequence, reason);
                    self.stats.decode_errors += 1;
                    (FrameSource::Plc, self.decoder.conceal_loss()?)
                }
            },
            Slot::Redundant(payload) => match self.decoder.decode(&payload) {
                Ok(pcm) if !pcm.is_empty() => (FrameSource::Red, pcm),
                _ => {
                    debug!("ts={} redundant block unusable", timestamp);
                    self.conceal_missing(timestamp)?
                }
            },
            Slot::Missing => self.conceal_missing(timestamp)?,
        };

        self.count(source);
        if let Some(m) = &self.metrics {
            m.decode_seconds.observe(started.elapsed().as_secs_f64());
        }

        if let Some(wav) = self.wav.as_mut() {
            for &s in &pcm {
                wav.write_sample(s).context("failed to write WAV sample")?;
            }
        }

        Ok(Some(PlayoutFrame {
            timestamp,
            source,
            pcm,
        }))
    }

    /// FEC from the following slot's primary when it has some, else PLC.
    fn conceal_missing(&mut self, timestamp: u32) -> Result<(FrameSource, Vec<i16>)> {
        // ---
        if let Some(Slot::Primary {
            payload,
            has_fec: true,
            ..
        }) = self.slots.front()
        {
            match self.decoder.decode_fec(payload) {
                Ok(pcm) => return Ok((FrameSource::Fec, pcm)),
                Err(e) => debug!("ts={} FEC unusable: {}", timestamp, e),
            }
        }

        Ok((FrameSource::Plc, self.decoder.conceal_loss()?))
    }

    fn count(&mut self, source: FrameSource) {
        // ---
        match source {
            FrameSource::Primary => self.stats.decoded += 1,
            FrameSource::Red => self.stats.concealed_red += 1,
            FrameSource::Fec => self.stats.concealed_fec += 1,
            FrameSource::Plc => self.stats.concealed_plc += 1,
        }

        if let Some(m) = &self.metrics {
            match source {
                FrameSource::Primary => {}
                FrameSource::Red => m.frames_concealed_red_total.inc(),
                FrameSource::Fec => m.frames_concealed_fec_total.inc(),
                FrameSource::Plc => m.frames_concealed_plc_total.inc(),
            }
        }
    }
}
