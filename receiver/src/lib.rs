//! RED receiver library.
//!
//! The core is [`RedReceiver`], which splits RED frames and keeps the
//! [`LossRecoveryTracker`] counters. The remaining modules make up the demo
//! host that receives RTP over UDP, decodes with Opus and conceals gaps.

pub mod codec;
pub mod depacketizer;
pub mod network;
pub mod playout;
pub mod stats;
pub mod tracker;
pub mod window;

pub use codec::OpusDecoderWrapper;
pub use depacketizer::{ReceivedFrame, RedReceiver};
pub use network::RtpReceiver;
pub use playout::{FrameSource, Playout, PlayoutConfig, PlayoutFrame, PlayoutStats};
pub use stats::ReceiverStats;
pub use tracker::{LossRecoveryTracker, LossTrackerConfig};
pub use window::RecentTimestampWindow;

use anyhow::Result;
use opus_red_common::frame::RTP_HEADER_SIZE_BYTES;
use opus_red_common::{EncodedAudioFrame, LossReport, MetricsContext, TelemetryMessage};
use std::time::Duration;
use tracing::info;

/// Receive loop settings.
#[derive(Debug, Clone)]
pub struct ReceiveConfig {
    // ---
    /// Stop after this long without a datagram; `None` runs forever
    pub idle_timeout: Option<Duration>,

    /// Wall-clock interval of the reception summary log
    pub stats_interval: Duration,
}

impl Default for ReceiveConfig {
    fn default() -> Self {
        // ---
        Self {
            idle_timeout: None,
            stats_interval: Duration::from_secs(5),
        }
    }
}

/// Runs one frame through the RED transform and playout.
///
/// Returns the loss report when this frame closed a report interval. Reports
/// are also logged as JSON telemetry.
///
/// # Errors
///
/// Returns error if playout fails.
pub fn handle_frame(
    red: &mut RedReceiver,
    playout: &mut Playout,
    stats: &mut ReceiverStats,
    frame: EncodedAudioFrame,
) -> Result<Option<LossReport>> {
    // ---
    let Some(rx) = red.receive(frame) else {
        stats.record_dropped();
        return Ok(None);
    };

    stats.record_frame(!rx.blocks.is_empty());
    playout.push(&rx)?;

    if let Some(report) = rx.report {
        info!("{}", TelemetryMessage::RedundantAudioStats(report).to_json()?);
    }
    Ok(rx.report)
}

/// Receives, accounts for and plays frames until the idle timeout fires.
///
/// # Errors
///
/// Returns error if network reception or playout fails.
pub async fn receive_loop(
    receiver: &mut RtpReceiver,
    red: &mut RedReceiver,
    playout: &mut Playout,
    metrics: &MetricsContext,
    cfg: &ReceiveConfig,
) -> Result<ReceiverStats> {
    // ---
    let mut stats = ReceiverStats::new(cfg.stats_interval);

    loop {
        let received = match cfg.idle_timeout {
            Some(idle) => match tokio::time::timeout(idle, receiver.receive()).await {
                Ok(result) => result?,
                Err(_) => {
                    info!("No packets for {:?}, stopping", idle);
                    break;
                }
            },
            None => receiver.receive().await?,
        };

        // Invalid packet, already logged by receiver
        let Some(frame) = received else {
            continue;
        };

        metrics
            .bytes_received_total
            .inc_by((RTP_HEADER_SIZE_BYTES + frame.payload.len()) as u64);

        handle_frame(red, playout, &mut stats, frame)?;
        stats.maybe_log(&red.counters(), &playout.stats());
    }

    stats.log(&red.counters(), &playout.stats());
    Ok(stats)
}
