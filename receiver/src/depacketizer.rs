//! Receive-side RED transform.
//!
//! Splits incoming RED frames, notes which blocks carry Opus in-band FEC and
//! feeds them to the [`LossRecoveryTracker`] of the frame's SSRC. Frames are
//! forwarded as they arrived; the split blocks ride along for the decoder.

use std::collections::HashMap;

use opus_red_common::opus;
use opus_red_common::red::{self, RedBlock, MAX_AUDIO_PAYLOAD_SIZE_BYTES};
use opus_red_common::{ControlMessage, EncodedAudioFrame, LossCounters, LossReport, MetricsContext};
use tracing::{debug, info, warn};

use crate::tracker::{LossRecoveryTracker, LossTrackerConfig};

/// A frame that made it through the receive transform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFrame {
    // ---
    /// The frame exactly as received
    pub frame: EncodedAudioFrame,

    /// Decoded RED blocks, oldest first; empty for non-RED or malformed frames
    pub blocks: Vec<RedBlock>,

    /// Set when this frame closed a report interval
    pub report: Option<LossReport>,
}

impl ReceivedFrame {
    // ---
    /// The Opus payload to hand to the decoder.
    pub fn primary_payload(&self) -> &[u8] {
        // ---
        match self.blocks.last() {
            Some(block) => &block.payload,
            None => &self.frame.payload,
        }
    }

    /// Whether the primary payload carries in-band FEC for the previous frame.
    pub fn primary_has_fec(&self) -> bool {
        // ---
        match self.blocks.last() {
            Some(block) => block.has_fec,
            None => opus::has_fec(&self.frame.payload),
        }
    }

    /// Redundant block for `timestamp`, if this frame carries one.
    pub fn redundant_block(&self, timestamp: u32) -> Option<&RedBlock> {
        // ---
        self.blocks
            .iter()
            .find(|b| b.is_redundant() && b.timestamp == timestamp)
    }
}

/// Receiver side of the RED transform.
///
/// Loss accounting is kept per SSRC, so a restarted or replaced stream starts
/// from fresh counters.
pub struct RedReceiver {
    // ---
    opus_payload_type: u8,
    red_payload_type: u8,
    tracker_config: LossTrackerConfig,
    trackers: HashMap<u32, LossRecoveryTracker>,
    last_ssrc: Option<u32>,
    metrics: Option<MetricsContext>,
}

impl RedReceiver {
    // ---
    pub fn new(opus_payload_type: u8, red_payload_type: u8) -> Self {
        Self::with_config(opus_payload_type, red_payload_type, LossTrackerConfig::default())
    }

    pub fn with_config(
        opus_payload_type: u8,
        red_payload_type: u8,
        config: LossTrackerConfig,
    ) -> Self {
        // ---
        Self {
            opus_payload_type: opus_payload_type & 0x7F,
            red_payload_type: red_payload_type & 0x7F,
            tracker_config: config,
            trackers: HashMap::new(),
            last_ssrc: None,
            metrics: None,
        }
    }

    /// Attaches a metrics context for per-frame counters.
    pub fn with_metrics(mut self, metrics: MetricsContext) -> Self {
        // ---
        self.metrics = Some(metrics);
        self
    }

    pub fn set_payload_types(&mut self, opus: u8, red: u8) {
        // ---
        self.opus_payload_type = opus & 0x7F;
        self.red_payload_type = red & 0x7F;
        info!(
            "receiver payload types set to opus={} red={}",
            self.opus_payload_type, self.red_payload_type
        );
    }

    /// Applies the payload type messages; the redundancy messages only
    /// concern senders.
    pub fn handle_message(&mut self, msg: &ControlMessage) {
        // ---
        match *msg {
            ControlMessage::OpusPayloadType(pt) => {
                self.set_payload_types(pt, self.red_payload_type)
            }
            ControlMessage::RedPayloadType(pt) => {
                self.set_payload_types(self.opus_payload_type, pt)
            }
            ControlMessage::UpdateNumRedundantEncodings(_)
            | ControlMessage::Enable
            | ControlMessage::Disable => {
                debug!("receiver ignoring {:?}", msg);
            }
        }
    }

    pub fn opus_payload_type(&self) -> u8 {
        self.opus_payload_type
    }

    pub fn red_payload_type(&self) -> u8 {
        self.red_payload_type
    }

    /// SSRC of the last RED frame accounted for.
    pub fn last_ssrc(&self) -> Option<u32> {
        self.last_ssrc
    }

    /// Counters of the stream last accounted for.
    pub fn counters(&self) -> LossCounters {
        // ---
        self.last_ssrc
            .and_then(|ssrc| self.counters_for(ssrc))
            .unwrap_or_default()
    }

    pub fn counters_for(&self, ssrc: u32) -> Option<LossCounters> {
        self.trackers.get(&ssrc).map(LossRecoveryTracker::counters)
    }

    /// Current report for `ssrc`; `None` if no RED frame of it was seen.
    pub fn snapshot(&self, ssrc: u32) -> Option<LossReport> {
        self.trackers.get(&ssrc).map(|t| t.snapshot(ssrc))
    }

    /// Current reports of every stream, by SSRC.
    pub fn reports(&self) -> Vec<LossReport> {
        // ---
        let mut reports: Vec<LossReport> = self
            .trackers
            .iter()
            .map(|(&ssrc, tracker)| tracker.snapshot(ssrc))
            .collect();
        reports.sort_by_key(|r| r.ssrc);
        reports
    }

    /// Number of streams with loss accounting.
    pub fn stream_count(&self) -> usize {
        self.trackers.len()
    }

    /// Runs one incoming frame through loss accounting.
    ///
    /// Returns `None` when the frame is over the audio payload limit and has
    /// to be dropped. Malformed RED frames are forwarded without accounting.
    pub fn receive(&mut self, frame: EncodedAudioFrame) -> Option<ReceivedFrame> {
        // ---
        if let Some(m) = &self.metrics {
            m.packets_received_total.inc();
        }

        let blocks = if frame.payload_type == self.red_payload_type {
            self.split(&frame)
        } else {
            Vec::new()
        };

        let report = match blocks.last() {
            Some(primary) => {
                if self.last_ssrc != Some(frame.ssrc) {
                    info!("accounting RED stream ssrc=0x{:08X}", frame.ssrc);
                    self.last_ssrc = Some(frame.ssrc);
                }
                let config = &self.tracker_config;
                let tracker = self
                    .trackers
                    .entry(frame.ssrc)
                    .or_insert_with(|| LossRecoveryTracker::new(config.clone()));
                tracker.process_blocks(frame.sequence, &blocks);
                tracker.maybe_report(primary.timestamp, frame.ssrc)
            }
            None => None,
        };

        if let (Some(report), Some(m)) = (&report, &self.metrics) {
            m.observe_loss_report(report);
        }

        if frame.payload.len() > MAX_AUDIO_PAYLOAD_SIZE_BYTES {
            debug!(
                "seq={} dropping {} byte frame over payload limit",
                frame.sequence,
                frame.payload.len()
            );
            if let Some(m) = &self.metrics {
                m.oversize_frames_dropped_total.inc();
            }
            return None;
        }

        Some(ReceivedFrame {
            frame,
            blocks,
            report,
        })
    }

    fn split(&self, frame: &EncodedAudioFrame) -> Vec<RedBlock> {
        // ---
        match red::decode(frame.timestamp, &frame.payload, self.opus_payload_type) {
            Ok(mut blocks) => {
                for block in &mut blocks {
                    block.has_fec = opus::has_fec(&block.payload);
                }
                if let Some(m) = &self.metrics {
                    m.red_frames_received_total.inc();
                }
                blocks
            }
            Err(e) => {
                warn!(
                    "seq={} ts={} forwarding malformed RED frame: {}",
                    frame.sequence, frame.timestamp, e
                );
                if let Some(m) = &self.metrics {
                    m.malformed_red_frames_total.inc();
                }
                Vec::new()
            }
        }
    }
}
