//! RED receiver - CLI binary.
//!
//! Receives RTP over UDP, accounts for loss and RED/FEC recovery, decodes
//! with Opus and optionally writes the concealed audio to a WAV file.

use anyhow::{Context, Result};
use clap::Parser;
use std::time::Duration;
use tracing::info;

use opus_red_common::{init_tracing, ColorWhen, MetricsContext, MetricsServerConfig, TelemetryMessage};
use red_receiver::{receive_loop, Playout, PlayoutConfig, ReceiveConfig, RedReceiver, RtpReceiver};

/// RED receiver - receive Opus with RFC 2198 redundancy and report recovery
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    // ---
    /// Port to listen on
    #[arg(short, long, default_value = "5004")]
    port: u16,

    /// Write decoded audio to this WAV file
    #[arg(short, long)]
    output: Option<String>,

    /// Opus payload type
    #[arg(long, default_value = "111")]
    opus_pt: u8,

    /// RED payload type
    #[arg(long, default_value = "63")]
    red_pt: u8,

    /// Stop after this many seconds without packets (0 runs forever)
    #[arg(long, default_value = "0")]
    idle_timeout_secs: u64,

    /// Frames held back before decoding so later RED blocks can fill gaps
    #[arg(long, default_value = "3")]
    playout_delay_frames: usize,

    /// Longest gap in frames that is concealed before playout restarts
    #[arg(long, default_value = "50")]
    max_concealed_frames: u32,

    /// Prometheus metrics bind address (serves `GET /metrics`).
    #[arg(long, default_value = "127.0.0.1:9200")]
    metrics_bind: String,

    /// Coloring
    #[arg(long, value_enum, default_value = "auto")]
    color: ColorWhen,
}

/// Capture version number from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    let args = Args::parse();
    init_tracing(args.color)?;

    info!("Starting RED receiver v{VERSION}");
    info!("Listening on port: {}", args.port);
    info!("Payload types: opus={} red={}", args.opus_pt, args.red_pt);
    info!("Metrics bind: {}", args.metrics_bind);

    let metrics = MetricsContext::new("receiver")?;
    let metrics_bind = args.metrics_bind.parse().context("invalid metrics bind")?;
    let _metrics_task = metrics.spawn_metrics_server(MetricsServerConfig::new(metrics_bind));

    let mut receiver = RtpReceiver::new(args.port)
        .await
        .context("failed to create receiver")?;
    let mut red = RedReceiver::new(args.opus_pt, args.red_pt).with_metrics(metrics.clone());

    let mut playout = Playout::new(PlayoutConfig {
        delay_frames: args.playout_delay_frames,
        max_concealed_frames: args.max_concealed_frames,
    })
    .context("failed to create playout")?
    .with_metrics(metrics.clone());
    if let Some(path) = &args.output {
        playout = playout.with_wav_output(path)?;
    }

    let cfg = ReceiveConfig {
        idle_timeout: (args.idle_timeout_secs > 0)
            .then(|| Duration::from_secs(args.idle_timeout_secs)),
        ..ReceiveConfig::default()
    };

    info!("Ready to receive audio...");

    let stats = receive_loop(&mut receiver, &mut red, &mut playout, &metrics, &cfg).await?;
    let playout_stats = playout.finish()?;

    info!(
        "Received {} frames in {:.1}s, concealed {} slots",
        stats.frames_received,
        stats.runtime().as_secs_f64(),
        playout_stats.concealed()
    );
    for report in red.reports() {
        let report = TelemetryMessage::RedundantAudioStats(report);
        info!("Final loss report: {}", report.to_json()?);
    }

    Ok(())
}
