//! # glide-transport
//!
//! Reliable, ordered, low-latency message transport over UDP for screen
//! mirroring on WiFi links.
//!
//! A KCP-style ARQ engine (fragmentation, selective ACK, RTT-driven
//! retransmission, fast resend, AIMD window) sits on an optional XOR
//! forward-error-correction layer, driven by a two-thread socket transport.
//!
//! ## Crate structure
//!
//! - [`wire`] — 24-byte segment header, command codes, FEC header
//! - [`pool`] — Slab-based segment arena with buffer recycling
//! - [`rtt`] — Smoothed RTT / RTO estimator
//! - [`congestion`] — Slow start and AIMD congestion window
//! - [`engine`] — The ARQ state machine
//! - [`fec`] — XOR parity encoder / decoder
//! - [`transport`] — Socket driver: scheduler thread and receive pump
//! - [`config`] — Construction-time configuration and TOML loading
//! - [`error`] — Error types
//! - [`stats`] — Serialisable counters

pub mod config;
pub mod congestion;
pub mod engine;
pub mod error;
pub mod fec;
pub mod pool;
pub mod rtt;
pub mod stats;
pub mod transport;
pub mod wire;

pub use config::{EngineConfig, FecConfig, Mode, TransportConfig};
pub use engine::ReliabilityEngine;
pub use error::{ProtocolError, RecvError, SendError, TransportError};
pub use fec::FecCodec;
pub use transport::{DatagramSocket, DatagramTransport, TransportListener};
