//! Opus RED building blocks shared between sender and receiver.
//!
//! - [`opus`]: bitstream inspection (TOC, framing, VAD and FEC bits)
//! - [`red`]: RFC 2198 block framing
//! - [`frame`]: the encoded audio frame passed through both transforms
//! - [`message`]: control and telemetry messages exchanged with hosts

pub mod cli;
pub mod frame;
pub mod message;
pub mod observability;
pub mod opus;
pub mod red;

pub use cli::ColorWhen;
pub use frame::EncodedAudioFrame;
pub use message::{ControlMessage, LossCounters, LossReport, TelemetryMessage};
pub use observability::{init_tracing, MetricsContext, MetricsServerConfig};
pub use red::{RedBlock, RedError};
