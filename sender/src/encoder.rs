//! Per-stream RED encoder.
//!
//! Rewrites each outgoing Opus frame into a RED packet carrying up to two
//! older encodings from the stream's own history.

use opus_red_common::opus;
use opus_red_common::red::{
    self, MAX_AUDIO_PAYLOAD_SIZE_BYTES, MAX_RED_ENCODINGS, MAX_RED_TIMESTAMP_OFFSET,
    RED_HEADER_SIZE_BYTES, RED_LAST_HEADER_SIZE_BYTES, RED_PACKETIZATION_TIME,
    RED_PACKET_DISTANCE,
};
use opus_red_common::{ControlMessage, EncodedAudioFrame, MetricsContext};
use tracing::{debug, info};

use crate::history::EncodingHistory;

/// Sender side of the RED transform.
///
/// Starts with redundancy enabled but zero redundant encodings, so frames are
/// RED-wrapped with only their primary until the policy asks for more.
pub struct RedEncoder {
    // ---
    opus_payload_type: u8,
    red_payload_type: u8,
    num_redundant_encodings: u8,
    redundancy_enabled: bool,
    history: EncodingHistory,
    metrics: Option<MetricsContext>,
}

impl Default for RedEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl RedEncoder {
    // ---
    pub fn new() -> Self {
        // ---
        Self {
            opus_payload_type: 0,
            red_payload_type: 0,
            num_redundant_encodings: 0,
            redundancy_enabled: true,
            history: EncodingHistory::default(),
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
        self.set_opus_payload_type(opus);
        self.set_red_payload_type(red);
    }

    pub fn set_opus_payload_type(&mut self, payload_type: u8) {
        // ---
        self.opus_payload_type = payload_type & 0x7F;
        info!("opus payload type set to {}", self.opus_payload_type);
    }

    pub fn set_red_payload_type(&mut self, payload_type: u8) {
        // ---
        self.red_payload_type = payload_type & 0x7F;
        info!("red payload type set to {}", self.red_payload_type);
    }

    /// Sets the redundancy level, clamped to [`MAX_RED_ENCODINGS`].
    pub fn set_num_redundant_encodings(&mut self, n: u8) {
        // ---
        self.num_redundant_encodings = n.min(MAX_RED_ENCODINGS);
        info!(
            "updated num redundant encodings to {}",
            self.num_redundant_encodings
        );
        self.observe_redundancy();
    }

    pub fn set_redundancy_enabled(&mut self, enabled: bool) {
        // ---
        self.redundancy_enabled = enabled;
        info!(
            "redundancy {}",
            if enabled { "enabled" } else { "disabled" }
        );
        self.observe_redundancy();
    }

    /// Applies a host control message.
    pub fn handle_message(&mut self, msg: &ControlMessage) {
        // ---
        match *msg {
            ControlMessage::OpusPayloadType(pt) => self.set_opus_payload_type(pt),
            ControlMessage::RedPayloadType(pt) => self.set_red_payload_type(pt),
            ControlMessage::UpdateNumRedundantEncodings(n) => self.set_num_redundant_encodings(n),
            ControlMessage::Enable => self.set_redundancy_enabled(true),
            ControlMessage::Disable => self.set_redundancy_enabled(false),
        }
    }

    pub fn num_redundant_encodings(&self) -> u8 {
        self.num_redundant_encodings
    }

    pub fn redundancy_enabled(&self) -> bool {
        self.redundancy_enabled
    }

    pub fn opus_payload_type(&self) -> u8 {
        self.opus_payload_type
    }

    pub fn red_payload_type(&self) -> u8 {
        self.red_payload_type
    }

    /// Transforms one outgoing frame.
    ///
    /// Returns `None` when the resulting payload is over the transport limit
    /// and must not be sent. Every other frame comes back, RED-encoded when
    /// possible and unchanged otherwise.
    pub fn encode_frame(&mut self, mut frame: EncodedAudioFrame) -> Option<EncodedAudioFrame> {
        // ---
        let pt = frame.payload_type;

        let primary = if pt == self.opus_payload_type {
            Some(std::mem::take(&mut frame.payload))
        } else if pt == self.red_payload_type {
            match red::primary_payload(frame.timestamp, &frame.payload, self.opus_payload_type) {
                Ok(primary) => Some(primary),
                Err(e) => {
                    debug!("ts={} not splitting RED frame: {}", frame.timestamp, e);
                    None
                }
            }
        } else {
            None
        };

        if let Some(primary) = primary {
            match self.encode(frame.timestamp, &primary) {
                Some(packet) => {
                    frame.payload = packet;
                    frame.payload_type = self.red_payload_type;
                    if let Some(m) = &self.metrics {
                        m.red_frames_encoded_total.inc();
                        m.red_payload_bytes.observe(frame.payload.len() as f64);
                    }
                }
                None => {
                    if frame.payload.is_empty() {
                        // Opus frame handed over above; put it back.
                        frame.payload = primary;
                    }
                    self.count_passthrough();
                }
            }
        } else {
            self.count_passthrough();
        }

        if frame.payload.len() > MAX_AUDIO_PAYLOAD_SIZE_BYTES {
            debug!(
                "ts={} dropping {} byte frame over payload limit",
                frame.timestamp,
                frame.payload.len()
            );
            if let Some(m) = &self.metrics {
                m.oversize_frames_dropped_total.inc();
            }
            return None;
        }

        Some(frame)
    }

    /// Builds the RED packet for `primary` and records it in the history.
    fn encode(&mut self, primary_timestamp: u32, primary: &[u8]) -> Option<Vec<u8>> {
        // ---
        if primary.is_empty() || primary.len() >= MAX_AUDIO_PAYLOAD_SIZE_BYTES {
            debug!(
                "ts={} primary of {} bytes not RED-encodable",
                primary_timestamp,
                primary.len()
            );
            return None;
        }

        let redundant = if self.redundancy_enabled {
            self.select_redundant(primary_timestamp, primary.len())
        } else {
            Vec::new()
        };

        let blocks: Vec<(u32, &[u8])> = redundant
            .iter()
            .map(|(ts, payload)| (*ts, payload.as_slice()))
            .collect();

        let packet = match red::encode(primary_timestamp, primary, &blocks, self.opus_payload_type)
        {
            Ok(packet) => packet,
            Err(e) => {
                debug!("ts={} RED encode failed: {}", primary_timestamp, e);
                return None;
            }
        };

        if let Some(m) = &self.metrics {
            m.redundant_blocks_sent_total.inc_by(blocks.len() as u64);
        }

        self.history
            .update(primary_timestamp, primary, opus::is_important(primary));

        Some(packet)
    }

    /// Picks history entries to carry, oldest first.
    ///
    /// Candidates are spaced [`RED_PACKET_DISTANCE`] packets apart. When the
    /// exact candidate is missing (not important, or never sent) the packet
    /// before it is used instead, since the candidate's own FEC may already
    /// cover it.
    fn select_redundant(&self, primary_timestamp: u32, primary_len: usize) -> Vec<(u32, Vec<u8>)> {
        // ---
        let step = RED_PACKETIZATION_TIME * RED_PACKET_DISTANCE;
        let mut bytes_available =
            MAX_AUDIO_PAYLOAD_SIZE_BYTES - primary_len - RED_LAST_HEADER_SIZE_BYTES;
        let mut selected = Vec::new();
        let mut candidate = primary_timestamp.wrapping_sub(step);

        for _ in 0..self.num_redundant_encodings {
            if primary_timestamp.wrapping_sub(candidate) >= MAX_RED_TIMESTAMP_OFFSET {
                break;
            }

            let entry = self.history.find(candidate).or_else(|| {
                self.history
                    .find(candidate.wrapping_sub(RED_PACKETIZATION_TIME))
            });

            if let Some(entry) = entry {
                let needed = RED_HEADER_SIZE_BYTES + entry.payload.len();
                if bytes_available < needed {
                    break;
                }
                bytes_available -= needed;
                selected.insert(0, (entry.timestamp, entry.payload.clone()));
            }

            candidate = candidate.wrapping_sub(step);
        }

        selected
    }

    fn count_passthrough(&self) {
        // ---
        if let Some(m) = &self.metrics {
            m.passthrough_frames_total.inc();
        }
    }

    fn observe_redundancy(&self) {
        // ---
        if let Some(m) = &self.metrics {
            m.observe_redundancy(self.redundancy_enabled, self.num_redundant_encodings);
        }
    }
}
