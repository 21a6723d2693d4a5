//! Receive-side loss and recovery accounting.
//!
//! Loss is detected from RTP sequence gaps on primary encodings. A loss
//! counts as recovered by RED when a later packet carries a redundant block
//! for its timestamp, or by FEC when the following packet's Opus payload has
//! in-band FEC for it. A primary that shows up late takes back both the loss
//! and any recovery credited for it.

use opus_red_common::red::{RedBlock, RED_PACKETIZATION_TIME};
use opus_red_common::{LossCounters, LossReport};
use tracing::debug;

use crate::window::RecentTimestampWindow;

/// Tracker tuning.
#[derive(Debug, Clone)]
pub struct LossTrackerConfig {
    // ---
    /// Primaries further than this many sequence numbers behind the newest
    /// one are ignored.
    pub max_out_of_order_distance: u16,

    /// Capacity of each timestamp window
    pub window_size: usize,

    /// Media-clock samples between loss reports
    pub report_interval: u32,

    /// Samples per packet; FEC in a packet covers the one this far back
    pub packetization_time: u32,
}

impl Default for LossTrackerConfig {
    fn default() -> Self {
        // ---
        Self {
            max_out_of_order_distance: 16,
            window_size: 21,
            report_interval: 240_000, // 5 s at 48 kHz
            packetization_time: RED_PACKETIZATION_TIME,
        }
    }
}

/// Per-stream loss and recovery counters.
///
/// Three windows of recent timestamps back the counters: primaries seen,
/// timestamps credited to RED, and timestamps credited to FEC.
#[derive(Debug, Clone)]
pub struct LossRecoveryTracker {
    // ---
    config: LossTrackerConfig,
    counters: LossCounters,
    newest_sequence: Option<u16>,
    primary_log: RecentTimestampWindow,
    red_log: RecentTimestampWindow,
    fec_log: RecentTimestampWindow,
    last_report_timestamp: Option<u32>,
}

impl Default for LossRecoveryTracker {
    fn default() -> Self {
        Self::new(LossTrackerConfig::default())
    }
}

impl LossRecoveryTracker {
    // ---
    pub fn new(config: LossTrackerConfig) -> Self {
        // ---
        let size = config.window_size;
        Self {
            config,
            counters: LossCounters::default(),
            newest_sequence: None,
            primary_log: RecentTimestampWindow::new(size),
            red_log: RecentTimestampWindow::new(size),
            fec_log: RecentTimestampWindow::new(size),
            last_report_timestamp: None,
        }
    }

    /// Accounts for a primary encoding.
    ///
    /// Returns false when the packet is too far behind the newest sequence
    /// number to be accounted for.
    pub fn record_primary(&mut self, sequence: u16, timestamp: u32) -> bool {
        // ---
        let Some(newest) = self.newest_sequence else {
            self.counters.total_expected = 1;
            self.newest_sequence = Some(sequence);
            self.primary_log.add(timestamp);
            return true;
        };

        let diff = sequence.wrapping_sub(newest) as i16;
        if i32::from(diff) < -i32::from(self.config.max_out_of_order_distance) {
            debug!("ignoring primary seq={} ({} behind)", sequence, diff.unsigned_abs());
            return false;
        }

        if diff < 0 {
            if !self.primary_log.contains(timestamp) {
                self.counters.total_lost = self.counters.total_lost.saturating_sub(1);
                self.primary_log.add(timestamp);
                self.remove_from_recovery_windows(timestamp);
            }
        } else if diff > 1 {
            self.counters.total_lost += (diff - 1) as u64;
        }

        if diff > 0 {
            self.counters.total_expected += diff as u64;
            self.newest_sequence = Some(sequence);
            self.primary_log.add(timestamp);
        }

        true
    }

    /// Credits a redundant block to RED recovery.
    ///
    /// A RED credit replaces an FEC credit for the same timestamp.
    pub fn record_red(&mut self, timestamp: u32) {
        // ---
        if self.counters.total_lost == 0 || self.primary_log.contains(timestamp) {
            return;
        }

        if !self.red_log.contains(timestamp) {
            self.counters.total_recovered_red += 1;
            self.red_log.add(timestamp);
        }

        if self.fec_log.remove(timestamp) {
            self.counters.total_recovered_fec = self.counters.total_recovered_fec.saturating_sub(1);
        }
    }

    /// Credits the packet before `timestamp` to FEC recovery, for an encoding
    /// at `timestamp` that carries in-band FEC.
    pub fn record_fec(&mut self, timestamp: u32) {
        // ---
        if self.counters.total_lost == 0 {
            return;
        }

        let fec_timestamp = timestamp.wrapping_sub(self.config.packetization_time);
        if self.primary_log.contains(fec_timestamp)
            || self.red_log.contains(fec_timestamp)
            || self.fec_log.contains(fec_timestamp)
        {
            return;
        }

        self.counters.total_recovered_fec += 1;
        self.fec_log.add(fec_timestamp);
    }

    /// Accounts for every block of one received RED packet.
    ///
    /// `blocks` is in wire order (oldest first, primary last). They are
    /// processed primary first, then the redundant blocks newest to oldest.
    pub fn process_blocks(&mut self, sequence: u16, blocks: &[RedBlock]) {
        // ---
        for block in blocks.iter().rev() {
            if block.is_last && !self.record_primary(sequence, block.timestamp) {
                continue;
            }

            if block.is_redundant() {
                self.record_red(block.timestamp);
            }

            if block.has_fec {
                self.record_fec(block.timestamp);
            }
        }
    }

    pub fn counters(&self) -> LossCounters {
        self.counters
    }

    pub fn snapshot(&self, ssrc: u32) -> LossReport {
        // ---
        LossReport {
            ssrc,
            counters: self.counters,
        }
    }

    /// Returns a report when a report interval of media time has passed since
    /// the last one. The first call always reports.
    pub fn maybe_report(&mut self, timestamp: u32, ssrc: u32) -> Option<LossReport> {
        // ---
        if let Some(last) = self.last_report_timestamp {
            if timestamp.wrapping_sub(last) < self.config.report_interval {
                return None;
            }
        }

        self.last_report_timestamp = Some(timestamp);
        Some(self.snapshot(ssrc))
    }

    fn remove_from_recovery_windows(&mut self, timestamp: u32) {
        // ---
        if self.red_log.remove(timestamp) {
            self.counters.total_recovered_red = self.counters.total_recovered_red.saturating_sub(1);
        }
        if self.fec_log.remove(timestamp) {
            self.counters.total_recovered_fec = self.counters.total_recovered_fec.saturating_sub(1);
        }
    }
}
