//! Loss-driven redundancy policy.
//!
//! Fed with uplink loss (either a ready percentage or cumulative receiver
//! report counters), the policy decides how many redundant encodings the
//! encoder should carry and when redundancy must be switched off entirely.
//! Decisions come back as [`ControlMessage`]s for the host to route.

use std::collections::VecDeque;

use opus_red_common::ControlMessage;
use tracing::{debug, info};

/// Timing knobs for [`RedundancyPolicy`].
#[derive(Debug, Clone)]
pub struct RedundancyPolicyConfig {
    // ---
    /// Short loss evaluation window (fast reaction to rising loss)
    pub short_window_ms: u64,

    /// Long loss evaluation window (slow reaction to falling loss)
    pub long_window_ms: u64,

    /// Minimum time before the level may be lowered again
    pub hold_down_ms: u64,

    /// Minimum time redundancy stays off after being disabled
    pub min_off_ms: u64,

    /// Quiet period without extreme loss required to re-enable
    pub recovery_ms: u64,

    /// Receiver report samples kept for windowed loss
    pub max_report_history: usize,
}

impl Default for RedundancyPolicyConfig {
    fn default() -> Self {
        // ---
        Self {
            short_window_ms: 5_000,
            long_window_ms: 15_000,
            hold_down_ms: 5 * 60 * 1000,
            min_off_ms: 15_000,
            recovery_ms: 60 * 1000,
            max_report_history: 20,
        }
    }
}

/// Cumulative send/loss counters from one transport receiver report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiverReportSample {
    // ---
    /// When the report was received, in milliseconds
    pub timestamp_ms: u64,
    pub packets_sent: u64,
    pub packets_lost: u64,
}

/// Maps a loss percentage to `(redundant encodings, force disable)`.
///
/// | loss      | encodings |
/// |-----------|-----------|
/// | <= 8 %    | 0         |
/// | <= 18 %   | 1         |
/// | <= 75 %   | 2         |
/// | > 75 %    | 0, disable|
pub fn redundancy_level_for_loss(loss_percent: f64) -> (u8, bool) {
    // ---
    if loss_percent <= 8.0 {
        (0, false)
    } else if loss_percent <= 18.0 {
        (1, false)
    } else if loss_percent <= 75.0 {
        (2, false)
    } else {
        (0, true)
    }
}

/// Sender redundancy state machine.
#[derive(Debug, Clone)]
pub struct RedundancyPolicy {
    // ---
    config: RedundancyPolicyConfig,
    enabled: bool,
    current_num_redundant_encodings: u8,
    last_hold_down_start_ms: u64,
    last_turn_off_ms: u64,
    last_high_loss_event_ms: u64,
    reports: VecDeque<ReceiverReportSample>,
}

impl Default for RedundancyPolicy {
    fn default() -> Self {
        Self::new(RedundancyPolicyConfig::default())
    }
}

impl RedundancyPolicy {
    // ---
    pub fn new(config: RedundancyPolicyConfig) -> Self {
        // ---
        let reports = VecDeque::with_capacity(config.max_report_history + 1);
        Self {
            config,
            enabled: true,
            current_num_redundant_encodings: 0,
            last_hold_down_start_ms: 0,
            last_turn_off_ms: 0,
            last_high_loss_event_ms: 0,
            reports,
        }
    }

    pub fn num_redundant_encodings(&self) -> u8 {
        self.current_num_redundant_encodings
    }

    pub fn redundancy_enabled(&self) -> bool {
        self.enabled
    }

    /// Consumes a receiver report and runs the policy on the windowed loss.
    ///
    /// Reports are only recorded when both the report time and the packets
    /// sent moved forward, so the loss ratio never divides by zero.
    pub fn on_receiver_report(
        &mut self,
        sample: ReceiverReportSample,
        now_ms: u64,
    ) -> Vec<ControlMessage> {
        // ---
        let advanced = match self.reports.back() {
            None => true,
            Some(last) => {
                sample.timestamp_ms > last.timestamp_ms && sample.packets_sent > last.packets_sent
            }
        };
        if advanced {
            self.reports.push_back(sample);
        }
        if self.reports.len() > self.config.max_report_history {
            self.reports.pop_front();
        }

        let loss = self.windowed_loss_percent();
        self.on_loss_observation(loss, now_ms)
    }

    /// Loss over the recorded receiver reports, the larger of the short and
    /// long window. The larger window raises the level quickly and lowers it
    /// slowly.
    pub fn windowed_loss_percent(&self) -> f64 {
        // ---
        self.loss_percent(self.config.short_window_ms)
            .max(self.loss_percent(self.config.long_window_ms))
    }

    /// Loss over the newest report and the first one at least `window_ms`
    /// older, in percent. Zero when history is too short.
    pub fn loss_percent(&self, window_ms: u64) -> f64 {
        // ---
        let Some(latest) = self.reports.back() else {
            return 0.0;
        };
        if self.reports.len() < 2 {
            return 0.0;
        }

        let baseline = self
            .reports
            .iter()
            .rev()
            .skip(1)
            .find(|r| latest.timestamp_ms.saturating_sub(r.timestamp_ms) >= window_ms);

        match baseline {
            Some(old) => {
                let lost = latest.packets_lost as f64 - old.packets_lost as f64;
                let sent = latest.packets_sent as f64 - old.packets_sent as f64;
                if sent <= 0.0 {
                    return 0.0;
                }
                (100.0 * lost / sent).clamp(0.0, 100.0)
            }
            None => 0.0,
        }
    }

    /// Runs the policy on one loss observation.
    ///
    /// Returns the messages the encoder needs, in order; empty when nothing
    /// changes.
    pub fn on_loss_observation(&mut self, loss_percent: f64, now_ms: u64) -> Vec<ControlMessage> {
        // ---
        let mut out = Vec::new();
        let (level, turn_off) = redundancy_level_for_loss(loss_percent);

        if turn_off {
            self.last_high_loss_event_ms = now_ms;
            if self.enabled {
                self.enabled = false;
                self.last_turn_off_ms = now_ms;
                info!("loss {:.1}% too high, disabling redundancy", loss_percent);
                out.push(ControlMessage::Disable);
            }
            return out;
        }

        if !self.enabled {
            let since_off = now_ms.saturating_sub(self.last_turn_off_ms);
            let since_high_loss = now_ms.saturating_sub(self.last_high_loss_event_ms);

            if since_off < self.config.min_off_ms || since_high_loss < self.config.recovery_ms {
                debug!(
                    "redundancy stays off ({}ms since off, {}ms since high loss)",
                    since_off, since_high_loss
                );
                return out;
            }

            self.enabled = true;
            info!("loss {:.1}% recovered, enabling redundancy", loss_percent);
            out.push(ControlMessage::Enable);
            self.maybe_reset_hold_down(now_ms);
        }

        if self.should_update(now_ms, level) {
            info!(
                "updated redundant encodings to {} (packet loss: {:.1}%)",
                level, loss_percent
            );
            out.push(ControlMessage::UpdateNumRedundantEncodings(level));
        }

        out
    }

    /// Direct level update from a loss percentage, bypassing hold-down and
    /// the on/off valve.
    pub fn update_num_redundant_encodings(&mut self, loss_percent: f64) -> Option<ControlMessage> {
        // ---
        let (level, _) = redundancy_level_for_loss(loss_percent);
        if level == self.current_num_redundant_encodings {
            return None;
        }

        self.current_num_redundant_encodings = level;
        info!(
            "updated redundant encodings to {} (packet loss: {:.1}%)",
            level, loss_percent
        );
        Some(ControlMessage::UpdateNumRedundantEncodings(level))
    }

    fn should_update(&mut self, now_ms: u64, level: u8) -> bool {
        // ---
        if level == self.current_num_redundant_encodings {
            self.maybe_reset_hold_down(now_ms);
            return false;
        }

        let held = now_ms.saturating_sub(self.last_hold_down_start_ms);
        if level < self.current_num_redundant_encodings && held < self.config.hold_down_ms {
            debug!(
                "hold-down active: {}s / {}s",
                held / 1000,
                self.config.hold_down_ms / 1000
            );
            return false;
        }

        self.current_num_redundant_encodings = level;
        self.maybe_reset_hold_down(now_ms);
        true
    }

    fn maybe_reset_hold_down(&mut self, now_ms: u64) {
        // ---
        if self.current_num_redundant_encodings > 0 {
            self.last_hold_down_start_ms = now_ms;
        }
    }
}
