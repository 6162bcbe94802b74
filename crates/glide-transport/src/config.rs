//! # Configuration
//!
//! Construction-time settings for the engine, the FEC layer, and the socket
//! driver. Nothing here is renegotiated with the peer; both ends must be
//! configured alike.
//!
//! All structs deserialize with `#[serde(default)]`, so a TOML file only
//! needs the keys it changes:
//!
//! ```toml
//! remote = "192.168.1.20:5000"
//!
//! [engine]
//! conv = 0x11223344
//! mode = "fast"
//! recv_window = 512
//!
//! [fec]
//! enabled = true
//! group_size = 10
//! ```

use std::net::SocketAddr;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::rtt::RTO_MIN;
use crate::wire::{FEC_HEADER_LEN, FEC_LENGTH_PREFIX, FEC_MAX_GROUP, SEGMENT_HEADER_LEN};

// ─── Well-known values ───────────────────────────────────────────────────────

/// Conversation id of the video stream.
pub const CONV_VIDEO: u32 = 0x1122_3344;
/// Conversation id of the control channel.
pub const CONV_CONTROL: u32 = 0x2233_4455;

pub const DEFAULT_MTU: usize = 1400;
pub const DEFAULT_SEND_WINDOW: u32 = 32;
pub const DEFAULT_RECV_WINDOW: u32 = 128;
pub const DEFAULT_DEAD_LINK: u32 = 20;
pub const DEFAULT_POOL_CAPACITY: usize = 256;
/// Kernel receive buffer requested by `bind`; absorbs video bursts.
pub const DEFAULT_RECV_BUFFER_BYTES: usize = 2 * 1024 * 1024;
pub const DEFAULT_SEND_BUFFER_BYTES: usize = 1024 * 1024;

/// Smallest MTU that leaves room for a header, FEC overhead, and payload.
pub const MIN_MTU: usize = 50;
/// Largest UDP payload over IPv4.
pub const MAX_MTU: usize = 65_507;

/// Bytes the FEC layer adds in front of (and accumulates alongside) each
/// engine datagram.
pub const FEC_OVERHEAD: usize = FEC_HEADER_LEN + FEC_LENGTH_PREFIX;

// ─── Mode ────────────────────────────────────────────────────────────────────

/// Retransmission aggressiveness preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Conservative RTO floor, congestion control on.
    #[default]
    Default,
    /// Same timers as `Default` without congestion control.
    Normal,
    /// Low-delay RTO backoff, fast resend after 2 skips, no congestion control.
    Fast,
}

/// Settings one [`Mode`] bundles together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeParams {
    /// 0 = off, 1 = halved backoff, 2 = halved backoff from the estimator's RTO.
    pub nodelay: u8,
    pub interval_ms: u32,
    /// Skipped-ACK count that triggers fast retransmit; 0 disables it.
    pub fast_resend: u32,
    pub congestion_control: bool,
    pub min_rto_ms: u32,
}

impl Mode {
    pub fn params(self) -> ModeParams {
        match self {
            Mode::Default => ModeParams {
                nodelay: 0,
                interval_ms: 10,
                fast_resend: 0,
                congestion_control: true,
                min_rto_ms: RTO_MIN,
            },
            Mode::Normal => ModeParams {
                nodelay: 0,
                interval_ms: 10,
                fast_resend: 0,
                congestion_control: false,
                min_rto_ms: RTO_MIN,
            },
            Mode::Fast => ModeParams {
                nodelay: 2,
                interval_ms: 10,
                fast_resend: 2,
                congestion_control: false,
                min_rto_ms: 10,
            },
        }
    }
}

// ─── Engine ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Conversation id; both ends must agree.
    pub conv: u32,
    /// Largest datagram the engine emits (before FEC wrapping).
    pub mtu: usize,
    /// Segments allowed in flight.
    pub send_window: u32,
    /// Out-of-order and ordered receive capacity, in segments.
    pub recv_window: u32,
    pub mode: Mode,
    /// Overrides the mode's RTO floor.
    pub min_rto_ms: Option<u32>,
    /// Overrides the mode's flush interval.
    pub interval_ms: Option<u32>,
    /// Transmissions of one segment beyond which the link is declared dead.
    pub dead_link: u32,
    /// Coalesce sends into a byte stream instead of preserving boundaries.
    pub stream: bool,
    /// Segment buffers kept for reuse.
    pub pool_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            conv: CONV_VIDEO,
            mtu: DEFAULT_MTU,
            send_window: DEFAULT_SEND_WINDOW,
            recv_window: DEFAULT_RECV_WINDOW,
            mode: Mode::Default,
            min_rto_ms: None,
            interval_ms: None,
            dead_link: DEFAULT_DEAD_LINK,
            stream: false,
            pool_capacity: DEFAULT_POOL_CAPACITY,
        }
    }
}

impl EngineConfig {
    pub fn with_conv(conv: u32) -> Self {
        EngineConfig {
            conv,
            ..Default::default()
        }
    }

    /// Mode parameters with the explicit overrides applied.
    pub fn effective_params(&self) -> ModeParams {
        let mut params = self.mode.params();
        if let Some(rto) = self.min_rto_ms {
            params.min_rto_ms = rto;
        }
        if let Some(interval) = self.interval_ms {
            params.interval_ms = interval;
        }
        params
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_MTU..=MAX_MTU).contains(&self.mtu) {
            return Err(ConfigError::Mtu(self.mtu));
        }
        if self.send_window == 0 || self.send_window > u16::MAX as u32 {
            return Err(ConfigError::Window("send"));
        }
        if self.recv_window == 0 || self.recv_window > u16::MAX as u32 {
            return Err(ConfigError::Window("receive"));
        }
        if self.dead_link == 0 {
            return Err(ConfigError::DeadLink);
        }
        Ok(())
    }
}

/// Window size for a target bitrate, assuming 150 ms of buffering and
/// `mtu - 24` byte segments. Clamped to `[128, 2048]`.
pub fn window_for_bitrate(bitrate_bps: u64, mtu: usize) -> u32 {
    let segment = mtu.saturating_sub(SEGMENT_HEADER_LEN).max(1) as u64;
    let buffered_bytes = bitrate_bps / 8 * 150 / 1000;
    (buffered_bytes / segment).clamp(128, 2048) as u32
}

// ─── FEC ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FecConfig {
    pub enabled: bool,
    /// Data packets per parity packet.
    pub group_size: u8,
}

impl Default for FecConfig {
    fn default() -> Self {
        FecConfig {
            enabled: false,
            group_size: 10,
        }
    }
}

impl FecConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && !(2..=FEC_MAX_GROUP).contains(&self.group_size) {
            return Err(ConfigError::FecGroupSize(self.group_size));
        }
        Ok(())
    }
}

// ─── Transport ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub engine: EngineConfig,
    pub fec: FecConfig,
    /// Peer address. When absent the transport replies to whoever sends
    /// the first datagram.
    pub remote: Option<SocketAddr>,
    /// How long the receive pump blocks before rechecking for shutdown.
    pub recv_poll_ms: u64,
    /// `SO_RCVBUF` requested at bind; 0 keeps the OS default.
    pub recv_buffer_bytes: usize,
    /// `SO_SNDBUF` requested at bind; 0 keeps the OS default.
    pub send_buffer_bytes: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            engine: EngineConfig::default(),
            fec: FecConfig::default(),
            remote: None,
            recv_poll_ms: 50,
            recv_buffer_bytes: DEFAULT_RECV_BUFFER_BYTES,
            send_buffer_bytes: DEFAULT_SEND_BUFFER_BYTES,
        }
    }
}

impl TransportConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine.validate()?;
        self.fec.validate()?;
        if self.recv_poll_ms == 0 {
            return Err(ConfigError::Parse("recv_poll_ms must be non-zero".into()));
        }
        Ok(())
    }

    /// Bytes reserved per datagram for the FEC layer.
    pub fn fec_overhead(&self) -> usize {
        if self.fec.enabled {
            FEC_OVERHEAD
        } else {
            0
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: TransportConfig =
            toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("parsing {}", path.display()))
    }
}
