//! Periodic reception summary for the receiver host.
//!
//! Complements the media-clock loss reports with wall-clock rates and the
//! playout concealment counts.

use opus_red_common::LossCounters;
use std::time::{Duration, Instant};
use tracing::info;

use crate::playout::PlayoutStats;

/// Host-side reception counters.
#[derive(Debug, Clone)]
pub struct ReceiverStats {
    // ---
    /// Frames accepted from the network
    pub frames_received: u64,

    /// Frames that were split as RED
    pub red_frames: u64,

    /// Frames dropped for exceeding the payload limit
    pub frames_dropped: u64,

    /// Start time for rate calculations
    start_time: Instant,

    /// Last time stats were logged
    last_log_time: Instant,

    /// Interval between periodic logs
    log_interval: Duration,
}

impl ReceiverStats {
    // ---
    pub fn new(log_interval: Duration) -> Self {
        // ---
        let now = Instant::now();
        Self {
            frames_received: 0,
            red_frames: 0,
            frames_dropped: 0,
            start_time: now,
            last_log_time: now,
            log_interval,
        }
    }

    pub fn record_frame(&mut self, was_red: bool) {
        // ---
        self.frames_received += 1;
        if was_red {
            self.red_frames += 1;
        }
    }

    pub fn record_dropped(&mut self) {
        self.frames_dropped += 1;
    }

    /// Share of expected packets that never arrived, in percent.
    pub fn loss_percentage(counters: &LossCounters) -> f64 {
        // ---
        if counters.total_expected == 0 {
            0.0
        } else {
            counters.total_lost as f64 * 100.0 / counters.total_expected as f64
        }
    }

    /// Share of lost packets recovered by RED or FEC, in percent.
    pub fn recovery_percentage(counters: &LossCounters) -> f64 {
        // ---
        if counters.total_lost == 0 {
            0.0
        } else {
            let recovered = counters.total_recovered_red + counters.total_recovered_fec;
            (recovered.min(counters.total_lost) as f64 * 100.0) / counters.total_lost as f64
        }
    }

    pub fn frames_per_second(&self) -> f64 {
        // ---
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            0.0
        } else {
            self.frames_received as f64 / elapsed
        }
    }

    pub fn runtime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Logs statistics if the interval has elapsed.
    pub fn maybe_log(&mut self, counters: &LossCounters, playout: &PlayoutStats) {
        // ---
        if self.last_log_time.elapsed() >= self.log_interval {
            self.log(counters, playout);
            self.last_log_time = Instant::now();
        }
    }

    pub fn log(&self, counters: &LossCounters, playout: &PlayoutStats) {
        // ---
        info!(
            "RX Stats: {} frames ({:.2} f/s, {} RED, {} dropped), {:.2}% loss, {:.2}% recovered, concealed red={} fec={} plc={}, {} late",
            self.frames_received,
            self.frames_per_second(),
            self.red_frames,
            self.frames_dropped,
            Self::loss_percentage(counters),
            Self::recovery_percentage(counters),
            playout.concealed_red,
            playout.concealed_fec,
            playout.concealed_plc,
            playout.late
        );
    }
}

impl Default for ReceiverStats {
    fn default() -> Self {
        // ---
        Self::new(Duration::from_secs(5))
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_frame_counts() {
        // ---
        let mut stats = ReceiverStats::default();
        stats.record_frame(true);
        stats.record_frame(false);
        stats.record_dropped();

        assert_eq!(stats.frames_received, 2);
        assert_eq!(stats.red_frames, 1);
        assert_eq!(stats.frames_dropped, 1);
    }

    #[test]
    fn test_loss_and_recovery_percentages() {
        // ---
        let counters = LossCounters {
            total_lost: 5,
            total_expected: 20,
            total_recovered_red: 2,
            total_recovered_fec: 2,
        };

        assert_eq!(ReceiverStats::loss_percentage(&counters), 25.0);
        assert_eq!(ReceiverStats::recovery_percentage(&counters), 80.0);
    }

    #[test]
    fn test_percentages_without_traffic() {
        // ---
        let counters = LossCounters::default();
        assert_eq!(ReceiverStats::loss_percentage(&counters), 0.0);
        assert_eq!(ReceiverStats::recovery_percentage(&counters), 0.0);
    }
}
