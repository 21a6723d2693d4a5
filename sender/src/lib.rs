//! RED sender library.
//!
//! The core is [`RedSender`]: a per-stream [`RedEncoder`] driven by a
//! [`RedundancyPolicy`]. The remaining modules make up the demo host that
//! encodes audio with Opus and sends it over UDP.

pub mod audio;
pub mod codec;
pub mod encoder;
pub mod history;
pub mod network;
pub mod policy;
pub mod sim;

pub use audio::{read_wav, AudioData};
pub use codec::OpusEncoderWrapper;
pub use encoder::RedEncoder;
pub use history::{EncodingHistory, EncodingHistoryEntry};
pub use network::RtpSender;
pub use policy::{ReceiverReportSample, RedundancyPolicy, RedundancyPolicyConfig};
pub use sim::LossSimulator;

use anyhow::{Context, Result};
use opus_red_common::{ControlMessage, EncodedAudioFrame, MetricsContext, TelemetryMessage};
use tracing::{debug, info};

/// Per-stream sender transform: encoder plus loss policy.
///
/// Policy decisions are applied to the encoder as they are made, so the next
/// frame already uses them.
pub struct RedSender {
    // ---
    encoder: RedEncoder,
    policy: RedundancyPolicy,
}

impl RedSender {
    // ---
    pub fn new(opus_payload_type: u8, red_payload_type: u8, config: RedundancyPolicyConfig) -> Self {
        // ---
        let mut encoder = RedEncoder::new();
        encoder.set_payload_types(opus_payload_type, red_payload_type);

        Self {
            encoder,
            policy: RedundancyPolicy::new(config),
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsContext) -> Self {
        // ---
        self.encoder = self.encoder.with_metrics(metrics);
        self
    }

    pub fn set_payload_types(&mut self, opus: u8, red: u8) {
        self.encoder.set_payload_types(opus, red);
    }

    pub fn set_num_redundant_encodings(&mut self, n: u8) {
        self.encoder.set_num_redundant_encodings(n);
    }

    pub fn set_redundancy_enabled(&mut self, enabled: bool) {
        self.encoder.set_redundancy_enabled(enabled);
    }

    pub fn handle_message(&mut self, msg: &ControlMessage) {
        self.encoder.handle_message(msg);
    }

    /// Feeds a loss percentage through the policy.
    ///
    /// Returns the control messages that were applied.
    pub fn on_loss_observation(&mut self, loss_percent: f64, now_ms: u64) -> Vec<ControlMessage> {
        // ---
        let msgs = self.policy.on_loss_observation(loss_percent, now_ms);
        self.apply(&msgs);
        msgs
    }

    /// Feeds a receiver report through the policy.
    pub fn on_receiver_report(
        &mut self,
        sample: ReceiverReportSample,
        now_ms: u64,
    ) -> Vec<ControlMessage> {
        // ---
        let msgs = self.policy.on_receiver_report(sample, now_ms);
        self.apply(&msgs);
        msgs
    }

    /// Uplink loss seen in the receiver reports so far, in percent.
    pub fn observed_loss_percent(&self) -> f64 {
        self.policy.windowed_loss_percent()
    }

    /// Transforms one outgoing frame; `None` means drop it.
    pub fn encode_frame(&mut self, frame: EncodedAudioFrame) -> Option<EncodedAudioFrame> {
        self.encoder.encode_frame(frame)
    }

    /// Redundant encodings per packet right now; 0 while disabled.
    pub fn active_redundancy_level(&self) -> u8 {
        // ---
        if self.encoder.redundancy_enabled() {
            self.encoder.num_redundant_encodings()
        } else {
            0
        }
    }

    pub fn telemetry(&self) -> TelemetryMessage {
        // ---
        TelemetryMessage::RedundancyLevel {
            enabled: self.encoder.redundancy_enabled(),
            num_redundant_encodings: self.encoder.num_redundant_encodings(),
        }
    }

    pub fn encoder(&self) -> &RedEncoder {
        &self.encoder
    }

    fn apply(&mut self, msgs: &[ControlMessage]) {
        // ---
        for msg in msgs {
            self.encoder.handle_message(msg);
        }
    }
}

/// Demo streaming settings.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    // ---
    pub ssrc: u32,

    /// Wall-clock pacing between packets; 0 sends as fast as possible
    pub interval_ms: u64,

    /// Simulated uplink loss in percent
    pub drop_percent: f64,

    /// Seed for the loss pattern
    pub seed: Option<u64>,

    /// Media time between synthetic receiver reports
    pub report_interval_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        // ---
        Self {
            ssrc: 0,
            interval_ms: codec::SAMPLES_PER_FRAME as u64 * 1000 / codec::SAMPLE_RATE as u64,
            drop_percent: 0.0,
            seed: None,
            report_interval_ms: 1_000,
        }
    }
}

/// Streams `audio` through Opus and RED to `sender`.
///
/// Every `report_interval_ms` of media time the simulated link's counters are
/// fed back into the policy as a receiver report.
///
/// # Errors
///
/// Returns error if Opus encoding fails.
pub async fn stream_audio(
    audio: &AudioData,
    opus_encoder: &mut OpusEncoderWrapper,
    red: &mut RedSender,
    sender: &mut RtpSender,
    metrics: &MetricsContext,
    cfg: &StreamConfig,
) -> Result<()> {
    // ---
    let mut link = LossSimulator::new(cfg.drop_percent, cfg.seed);
    let mut sequence: u16 = 0;
    let mut timestamp: u32 = 0;
    let mut media_ms: u64 = 0;
    let mut next_report_ms = cfg.report_interval_ms;
    let frame_ms = codec::SAMPLES_PER_FRAME as u64 * 1000 / codec::SAMPLE_RATE as u64;
    let opus_pt = red.encoder().opus_payload_type();

    for (n, pcm) in audio.frames().enumerate() {
        let started = std::time::Instant::now();
        let payload = opus_encoder
            .encode(&pcm)
            .with_context(|| format!("failed to encode frame {}", n))?;
        metrics.encode_seconds.observe(started.elapsed().as_secs_f64());

        let frame = EncodedAudioFrame::new(sequence, timestamp, cfg.ssrc, opus_pt, payload);
        sequence = sequence.wrapping_add(1);
        timestamp = timestamp.wrapping_add(codec::SAMPLES_PER_FRAME as u32);
        media_ms += frame_ms;

        if let Some(frame) = red.encode_frame(frame) {
            if link.should_drop() {
                debug!("simulated loss of seq={}", frame.sequence);
            } else {
                let bytes = sender.send(&frame).await;
                if bytes > 0 {
                    metrics.packets_sent_total.inc();
                    metrics.bytes_sent_total.inc_by(bytes as u64);
                }
            }
        }

        if media_ms >= next_report_ms {
            next_report_ms += cfg.report_interval_ms;
            let msgs = red.on_receiver_report(link.report(media_ms), media_ms);
            if !msgs.is_empty() {
                let level = red.active_redundancy_level();
                info!("redundancy now {} ({:?})", level, msgs);
            }
            opus_encoder.set_expected_loss(red.observed_loss_percent().round() as u8)?;
        }

        if cfg.interval_ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(cfg.interval_ms)).await;
        }
    }

    let (packets, bytes) = sender.stats();
    info!(
        "Streamed {} frames ({} packets, {} bytes on the wire)",
        audio.frame_count(),
        packets,
        bytes
    );
    Ok(())
}
