//! # Transport Statistics
//!
//! Plain counters for each layer, serialisable to JSON for logs and the
//! simulator report.

use serde::Serialize;

// ─── Engine Stats ────────────────────────────────────────────────────────────

/// Reliability engine counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineStats {
    /// Messages accepted by `send`.
    pub messages_sent: u64,
    /// Data segments put on the wire for the first time.
    pub segments_sent: u64,
    /// Retransmissions triggered by an elapsed deadline.
    pub timeout_retransmits: u64,
    /// Retransmissions triggered by skipped ACKs.
    pub fast_retransmits: u64,
    /// ACK segments emitted.
    pub acks_sent: u64,
    /// Window probes and window reports emitted.
    pub probes_sent: u64,
    /// Datagrams handed to the output queue.
    pub datagrams_out: u64,
    /// Data segments parsed from input, duplicates included.
    pub segments_received: u64,
    /// Data segments discarded as already delivered or already buffered.
    pub duplicate_segments: u64,
    /// Data segments at or beyond `rcv_nxt + rcv_wnd`, discarded unacknowledged.
    pub out_of_window_segments: u64,
    /// Input bursts abandoned on a parse error.
    pub protocol_errors: u64,
    /// Complete messages handed to the application.
    pub messages_delivered: u64,
    pub bytes_delivered: u64,
}

impl EngineStats {
    /// Retransmissions per first transmission.
    pub fn retransmit_ratio(&self) -> f64 {
        if self.segments_sent == 0 {
            0.0
        } else {
            (self.timeout_retransmits + self.fast_retransmits) as f64 / self.segments_sent as f64
        }
    }
}

// ─── FEC Stats ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize)]
pub struct FecStats {
    pub data_packets_sent: u64,
    pub parity_packets_sent: u64,
    pub data_packets_received: u64,
    pub parity_packets_received: u64,
    /// Payloads rebuilt from parity.
    pub recovered: u64,
    /// Packets dropped as structurally invalid.
    pub malformed: u64,
    /// Data packets already delivered once.
    pub duplicates: u64,
    /// Groups evicted from the tracking ring before they completed.
    pub evicted_incomplete: u64,
}

impl FecStats {
    /// Parity bytes on the wire per data packet.
    pub fn overhead_ratio(&self) -> f64 {
        if self.data_packets_sent == 0 {
            0.0
        } else {
            self.parity_packets_sent as f64 / self.data_packets_sent as f64
        }
    }
}

// ─── Transport Stats ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize)]
pub struct TransportStats {
    pub datagrams_sent: u64,
    pub datagrams_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// Datagrams the socket refused to send.
    pub send_errors: u64,
    /// Inbound datagrams the engine rejected.
    pub input_errors: u64,
    pub messages_delivered: u64,
    pub engine: EngineStats,
    pub fec: Option<FecStats>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratios_handle_empty_counters() {
        assert_eq!(EngineStats::default().retransmit_ratio(), 0.0);
        assert_eq!(FecStats::default().overhead_ratio(), 0.0);
    }

    #[test]
    fn transport_stats_serialize() {
        let stats = TransportStats {
            datagrams_sent: 3,
            fec: Some(FecStats::default()),
            ..Default::default()
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["datagrams_sent"], 3);
        assert_eq!(json["engine"]["acks_sent"], 0);
        assert!(json["fec"].is_object());
    }
}
