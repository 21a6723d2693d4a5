//! Simulated uplink loss for the demo sender.
//!
//! Drops packets at random and keeps the cumulative counters a transport
//! receiver report would carry, so the redundancy policy can be exercised
//! without a real RTCP path.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::policy::ReceiverReportSample;

pub struct LossSimulator {
    // ---
    rng: StdRng,
    drop_probability: f64,
    packets_sent: u64,
    packets_lost: u64,
}

impl LossSimulator {
    // ---
    /// `drop_percent` is clamped to [0, 100]; NaN means no loss. A fixed
    /// `seed` makes the drop pattern reproducible.
    pub fn new(drop_percent: f64, seed: Option<u64>) -> Self {
        // ---
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            rng,
            drop_probability: drop_probability(drop_percent),
            packets_sent: 0,
            packets_lost: 0,
        }
    }

    /// Accounts for one packet and decides whether the link loses it.
    pub fn should_drop(&mut self) -> bool {
        // ---
        self.packets_sent += 1;
        let dropped = self.rng.gen_bool(self.drop_probability);
        if dropped {
            self.packets_lost += 1;
        }
        dropped
    }

    pub fn set_drop_percent(&mut self, drop_percent: f64) {
        self.drop_probability = drop_probability(drop_percent);
    }

    /// Cumulative counters as of `timestamp_ms`.
    pub fn report(&self, timestamp_ms: u64) -> ReceiverReportSample {
        // ---
        ReceiverReportSample {
            timestamp_ms,
            packets_sent: self.packets_sent,
            packets_lost: self.packets_lost,
        }
    }
}

fn drop_probability(drop_percent: f64) -> f64 {
    // ---
    if drop_percent.is_nan() {
        return 0.0;
    }
    drop_percent.clamp(0.0, 100.0) / 100.0
}
