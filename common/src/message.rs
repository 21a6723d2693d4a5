//! Messages exchanged between the RED transforms and their hosts.
//!
//! Both enums are closed and serde-tagged so a host can relay them as JSON
//! across a worker or process boundary.

use serde::{Deserialize, Serialize};

/// Configuration pushed from the host into a sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ControlMessage {
    // ---
    OpusPayloadType(u8),
    RedPayloadType(u8),
    UpdateNumRedundantEncodings(u8),
    Enable,
    Disable,
}

/// Aggregate receive-side loss and recovery counters.
///
/// Counters go up when a loss or recovery is detected and back down when a
/// late packet corrects an earlier guess. They never go below zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LossCounters {
    // ---
    pub total_lost: u64,
    pub total_expected: u64,
    pub total_recovered_red: u64,
    pub total_recovered_fec: u64,
}

impl LossCounters {
    // ---
    /// Packets lost and not recovered by either mechanism.
    pub fn unrecovered(&self) -> u64 {
        self.total_lost
            .saturating_sub(self.total_recovered_red + self.total_recovered_fec)
    }
}

/// Immutable snapshot of one stream's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LossReport {
    // ---
    pub ssrc: u32,
    #[serde(flatten)]
    pub counters: LossCounters,
}

/// Telemetry pulled out of the transforms by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TelemetryMessage {
    // ---
    RedundantAudioStats(LossReport),
    RedundancyLevel {
        enabled: bool,
        num_redundant_encodings: u8,
    },
}

impl TelemetryMessage {
    // ---
    /// Serializes the message as a single JSON line.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_control_message_json() {
        // ---
        let json = serde_json::to_string(&ControlMessage::UpdateNumRedundantEncodings(2))
            .expect("serialize");
        assert_eq!(json, r#"{"type":"update_num_redundant_encodings","value":2}"#);

        let msg: ControlMessage = serde_json::from_str(r#"{"type":"disable"}"#).expect("parse");
        assert_eq!(msg, ControlMessage::Disable);
    }

    #[test]
    fn test_loss_report_json_is_flat() {
        // ---
        let report = LossReport {
            ssrc: 42,
            counters: LossCounters {
                total_lost: 5,
                total_expected: 7,
                total_recovered_red: 2,
                total_recovered_fec: 3,
            },
        };
        let value = serde_json::to_value(TelemetryMessage::RedundantAudioStats(report))
            .expect("serialize");

        assert_eq!(value["type"], "redundant_audio_stats");
        assert_eq!(value["ssrc"], 42);
        assert_eq!(value["total_recovered_fec"], 3);
    }

    #[test]
    fn test_unrecovered_saturates() {
        // ---
        let counters = LossCounters {
            total_lost: 1,
            total_expected: 10,
            total_recovered_red: 1,
            total_recovered_fec: 1,
        };
        assert_eq!(counters.unrecovered(), 0);
    }
}
