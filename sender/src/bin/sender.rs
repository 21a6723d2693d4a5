//! RED sender - CLI binary.
//!
//! Encodes a WAV file (or a test tone) with Opus, wraps every packet in RED
//! and sends it as RTP over UDP.

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use opus_red_common::{init_tracing, ColorWhen, MetricsContext, MetricsServerConfig};
use red_sender::{
    read_wav, stream_audio, AudioData, OpusEncoderWrapper, RedSender, RedundancyPolicyConfig,
    RtpSender, StreamConfig,
};

/// RED sender - stream Opus with RFC 2198 redundancy over RTP
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    // ---
    /// Input audio file (48 kHz WAV). A 440 Hz tone is sent when omitted.
    #[arg(short, long)]
    input: Option<String>,

    /// Tone duration in seconds when no input file is given
    #[arg(long, default_value = "10")]
    tone_secs: f32,

    /// Remote address (IP:port) to send to
    #[arg(short, long, default_value = "127.0.0.1:5004")]
    remote: String,

    /// Packet transmission interval in milliseconds
    #[arg(short = 't', long, default_value = "20")]
    interval_ms: u64,

    /// Opus payload type
    #[arg(long, default_value = "111")]
    opus_pt: u8,

    /// RED payload type
    #[arg(long, default_value = "63")]
    red_pt: u8,

    /// Simulated uplink loss in percent (0-100)
    #[arg(long, default_value = "0", value_parser = parse_percent)]
    drop_percent: f64,

    /// Seed for the simulated loss pattern
    #[arg(long)]
    seed: Option<u64>,

    /// Media time between synthetic receiver reports (ms)
    #[arg(long, default_value = "1000")]
    report_interval_ms: u64,

    /// Prometheus metrics bind address (serves `GET /metrics`).
    #[arg(long, default_value = "127.0.0.1:9100")]
    metrics_bind: String,

    /// Coloring
    #[arg(long, value_enum, default_value = "auto")]
    color: ColorWhen,
}

fn parse_percent(s: &str) -> Result<f64, String> {
    // ---
    let value: f64 = s.parse().map_err(|e| format!("{e}"))?;
    if !(0.0..=100.0).contains(&value) {
        return Err(format!("{value} is not a percentage between 0 and 100"));
    }
    Ok(value)
}

/// Capture version number from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    let args = Args::parse();

    init_tracing(args.color)?;

    info!("Starting RED sender v{VERSION}");
    info!("Remote address: {}", args.remote);
    info!("Payload types: opus={} red={}", args.opus_pt, args.red_pt);
    info!("Simulated loss: {}%", args.drop_percent);

    let metrics = MetricsContext::new("sender")?;
    let metrics_bind = args.metrics_bind.parse().context("invalid metrics bind")?;
    let _metrics_task = metrics.spawn_metrics_server(MetricsServerConfig::new(metrics_bind));

    let audio = match args.input.clone() {
        Some(path) => tokio::task::spawn_blocking(move || read_wav(path))
            .await
            .context("audio reading task failed")??,
        None => AudioData::tone(440.0, args.tone_secs),
    };

    info!(
        "Loaded {:.2}s of audio ({} frames)",
        audio.duration_secs(),
        audio.frame_count()
    );

    let mut opus_encoder = OpusEncoderWrapper::new(args.drop_percent.round() as u8)
        .context("failed to create encoder")?;
    let mut red = RedSender::new(args.opus_pt, args.red_pt, RedundancyPolicyConfig::default())
        .with_metrics(metrics.clone());
    let mut sender = RtpSender::new(&args.remote)
        .await
        .context("failed to create sender")?;

    let cfg = StreamConfig {
        ssrc: rand::random::<u32>(),
        interval_ms: args.interval_ms,
        drop_percent: args.drop_percent,
        seed: args.seed,
        report_interval_ms: args.report_interval_ms,
    };
    info!("Session SSRC: 0x{:08X}", cfg.ssrc);

    stream_audio(
        &audio,
        &mut opus_encoder,
        &mut red,
        &mut sender,
        &metrics,
        &cfg,
    )
    .await?;

    info!("Final state: {}", red.telemetry().to_json()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_drop_percent_must_be_a_percentage() {
        // ---
        assert_eq!(parse_percent("12.5"), Ok(12.5));
        assert_eq!(parse_percent("100"), Ok(100.0));
        assert!(parse_percent("NaN").is_err());
        assert!(parse_percent("inf").is_err());
        assert!(parse_percent("-1").is_err());
        assert!(parse_percent("lots").is_err());

        let args = Args::try_parse_from(["red-sender", "--drop-percent", "NaN"]);
        assert!(args.is_err());
    }
}
