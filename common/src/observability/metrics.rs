//! Prometheus metrics (Rust `prometheus` crate).
//!
//! One `MetricsContext` per process. The RED transforms take an optional
//! context so the core stays usable without a registry.

use anyhow::Result;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::message::LossReport;

/// Configuration for the built-in Prometheus scrape endpoint.
#[derive(Debug, Clone)]
pub struct MetricsServerConfig {
    // ---
    /// Address to bind, e.g. `127.0.0.1:9100`.
    pub bind: SocketAddr,
}

impl MetricsServerConfig {
    // ---
    pub fn new(bind: SocketAddr) -> Self {
        // ---
        Self { bind }
    }
}

/// Prometheus registry plus the RED engine's metric handles.
#[derive(Clone)]
pub struct MetricsContext {
    // ---
    registry: Registry,

    // Sender transform
    pub red_frames_encoded_total: IntCounter,
    pub passthrough_frames_total: IntCounter,
    pub redundant_blocks_sent_total: IntCounter,
    pub oversize_frames_dropped_total: IntCounter,
    pub redundancy_level: IntGauge,
    pub redundancy_enabled: IntGauge,

    // Receiver transform
    pub red_frames_received_total: IntCounter,
    pub malformed_red_frames_total: IntCounter,
    pub audio_packets_lost: IntGauge,
    pub audio_packets_expected: IntGauge,
    pub audio_packets_recovered_red: IntGauge,
    pub audio_packets_recovered_fec: IntGauge,

    // Playout concealment
    pub frames_concealed_red_total: IntCounter,
    pub frames_concealed_fec_total: IntCounter,
    pub frames_concealed_plc_total: IntCounter,

    // Network
    pub packets_sent_total: IntCounter,
    pub packets_received_total: IntCounter,
    pub bytes_sent_total: IntCounter,
    pub bytes_received_total: IntCounter,

    pub red_payload_bytes: Histogram,
    pub encode_seconds: Histogram,
    pub decode_seconds: Histogram,
}

fn counter(name: &str, help: &str) -> Result<IntCounter> {
    Ok(IntCounter::with_opts(Opts::new(name, help))?)
}

fn gauge(name: &str, help: &str) -> Result<IntGauge> {
    Ok(IntGauge::with_opts(Opts::new(name, help))?)
}

impl MetricsContext {
    // ---
    /// Create a new registry and register the standard metrics.
    ///
    /// `process_name` is applied as a constant label (`process=<name>`).
    pub fn new(process_name: &str) -> Result<Self> {
        // ---
        let registry = Registry::new_custom(
            Some("opus_red".into()),
            Some(prometheus::labels! { "process".to_string() => process_name.to_string() }),
        )?;

        let ctx = Self {
            red_frames_encoded_total: counter(
                "red_frames_encoded_total",
                "Frames rewritten into RED packets",
            )?,
            passthrough_frames_total: counter(
                "passthrough_frames_total",
                "Frames forwarded without RED processing",
            )?,
            redundant_blocks_sent_total: counter(
                "redundant_blocks_sent_total",
                "Redundant encodings attached to outgoing packets",
            )?,
            oversize_frames_dropped_total: counter(
                "oversize_frames_dropped_total",
                "Frames dropped for exceeding the audio payload limit",
            )?,
            redundancy_level: gauge(
                "redundancy_level",
                "Current number of redundant encodings per packet",
            )?,
            redundancy_enabled: gauge("redundancy_enabled", "1 while redundancy is enabled")?,

            red_frames_received_total: counter(
                "red_frames_received_total",
                "RED frames received and split",
            )?,
            malformed_red_frames_total: counter(
                "malformed_red_frames_total",
                "RED frames that failed to split",
            )?,
            audio_packets_lost: gauge("audio_packets_lost", "Audio packets detected as lost")?,
            audio_packets_expected: gauge("audio_packets_expected", "Audio packets expected")?,
            audio_packets_recovered_red: gauge(
                "audio_packets_recovered_red",
                "Lost audio packets recovered from redundant blocks",
            )?,
            audio_packets_recovered_fec: gauge(
                "audio_packets_recovered_fec",
                "Lost audio packets recovered from Opus in-band FEC",
            )?,

            frames_concealed_red_total: counter(
                "frames_concealed_red_total",
                "Playout gaps filled from a redundant block",
            )?,
            frames_concealed_fec_total: counter(
                "frames_concealed_fec_total",
                "Playout gaps filled from Opus in-band FEC",
            )?,
            frames_concealed_plc_total: counter(
                "frames_concealed_plc_total",
                "Playout gaps filled by packet loss concealment",
            )?,

            packets_sent_total: counter("rtp_packets_sent_total", "Total RTP packets sent")?,
            packets_received_total: counter(
                "rtp_packets_received_total",
                "Total RTP packets received",
            )?,
            bytes_sent_total: counter("rtp_bytes_sent_total", "Total RTP payload bytes sent")?,
            bytes_received_total: counter(
                "rtp_bytes_received_total",
                "Total RTP payload bytes received",
            )?,

            red_payload_bytes: Histogram::with_opts(
                HistogramOpts::new("red_payload_bytes", "Size of encoded RED payloads in bytes")
                    .buckets(vec![50.0, 100.0, 200.0, 400.0, 600.0, 800.0, 1000.0]),
            )?,
            encode_seconds: Histogram::with_opts(HistogramOpts::new(
                "opus_encode_seconds",
                "Opus encode duration in seconds",
            ))?,
            decode_seconds: Histogram::with_opts(HistogramOpts::new(
                "opus_decode_seconds",
                "Opus decode duration in seconds",
            ))?,

            registry,
        };

        ctx.register_all()?;
        Ok(ctx)
    }

    fn register_all(&self) -> Result<()> {
        // ---
        let counters = [
            &self.red_frames_encoded_total,
            &self.passthrough_frames_total,
            &self.redundant_blocks_sent_total,
            &self.oversize_frames_dropped_total,
            &self.red_frames_received_total,
            &self.malformed_red_frames_total,
            &self.frames_concealed_red_total,
            &self.frames_concealed_fec_total,
            &self.frames_concealed_plc_total,
            &self.packets_sent_total,
            &self.packets_received_total,
            &self.bytes_sent_total,
            &self.bytes_received_total,
        ];
        for c in counters {
            self.registry.register(Box::new(c.clone()))?;
        }

        let gauges = [
            &self.redundancy_level,
            &self.redundancy_enabled,
            &self.audio_packets_lost,
            &self.audio_packets_expected,
            &self.audio_packets_recovered_red,
            &self.audio_packets_recovered_fec,
        ];
        for g in gauges {
            self.registry.register(Box::new(g.clone()))?;
        }

        for h in [&self.red_payload_bytes, &self.encode_seconds, &self.decode_seconds] {
            self.registry.register(Box::new(h.clone()))?;
        }

        Ok(())
    }

    /// Mirrors a receiver loss report into the gauges.
    pub fn observe_loss_report(&self, report: &LossReport) {
        // ---
        let c = &report.counters;
        self.audio_packets_lost.set(c.total_lost as i64);
        self.audio_packets_expected.set(c.total_expected as i64);
        self.audio_packets_recovered_red.set(c.total_recovered_red as i64);
        self.audio_packets_recovered_fec.set(c.total_recovered_fec as i64);
    }

    /// Mirrors the sender's redundancy state into the gauges.
    pub fn observe_redundancy(&self, enabled: bool, num_redundant_encodings: u8) {
        // ---
        self.redundancy_enabled.set(enabled as i64);
        self.redundancy_level.set(num_redundant_encodings as i64);
    }

    /// Gather metric families from this registry.
    pub fn gather(&self) -> Vec<prometheus::proto::MetricFamily> {
        // ---
        self.registry.gather()
    }

    /// Spawns a minimal HTTP server that serves `GET /metrics`.
    pub fn spawn_metrics_server(&self, cfg: MetricsServerConfig) -> JoinHandle<Result<()>> {
        // ---
        let registry = Arc::new(self.registry.clone());
        tokio::spawn(async move {
            // ---
            let make_svc = make_service_fn(move |_conn| {
                let registry = Arc::clone(&registry);
                async move {
                    Ok::<_, hyper::Error>(service_fn(move |req| {
                        let registry = Arc::clone(&registry);
                        async move { handle_metrics_request(req, registry).await }
                    }))
                }
            });

            tracing::info!("Serving metrics on http://{}/metrics", cfg.bind);
            Server::bind(&cfg.bind)
                .serve(make_svc)
                .await
                .map_err(|e| anyhow::anyhow!(e))?;
            Ok(())
        })
    }
}

async fn handle_metrics_request(
    req: Request<Body>,
    registry: Arc<Registry>,
) -> Result<Response<Body>, hyper::Error> {
    // ---
    if req.method() != Method::GET || req.uri().path() != "/metrics" {
        let mut resp = Response::new(Body::from("not found"));
        *resp.status_mut() = StatusCode::NOT_FOUND;
        return Ok(resp);
    }

    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&registry.gather(), &mut buffer) {
        let mut resp = Response::new(Body::from(format!("encode error: {e}")));
        *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        return Ok(resp);
    }

    let mut resp = Response::new(Body::from(buffer));
    resp.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("text/plain; version=0.0.4"),
    );
    Ok(resp)
}
