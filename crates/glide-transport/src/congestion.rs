//! # Congestion Window
//!
//! Segment-counted AIMD window in the classic ARQ style:
//!
//! ```text
//!   ack advances una ──▶ cwnd < ssthresh ? cwnd += 1            (slow start)
//!                                        : incr += mss²/incr + mss/16,
//!                                          cwnd grows once incr covers it
//!   timeout / fast retransmit ──▶ ssthresh = max(cwnd/2, 2), cwnd = max(cwnd/2, 1)
//! ```
//!
//! The window is always kept within `[1, max(min(send_window, remote_window), 1)]`.

/// Initial slow-start threshold in segments.
pub const THRESH_INIT: u32 = 2;
/// Floor for the slow-start threshold after a loss.
pub const THRESH_MIN: u32 = 2;

/// Why the window is being cut.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossSignal {
    /// A segment's retransmit deadline elapsed.
    Timeout,
    /// A segment was skipped by enough later ACKs.
    FastRetransmit,
}

#[derive(Debug, Clone)]
pub struct CongestionWindow {
    cwnd: u32,
    ssthresh: u32,
    /// Byte accumulator driving additive increase.
    incr: u32,
    mss: u32,
    enabled: bool,
    /// Losses seen, by signal.
    timeouts: u64,
    fast_retransmits: u64,
}

impl CongestionWindow {
    pub fn new(mss: u32, enabled: bool) -> Self {
        CongestionWindow {
            cwnd: 1,
            ssthresh: THRESH_INIT,
            incr: mss,
            mss,
            enabled,
            timeouts: 0,
            fast_retransmits: 0,
        }
    }

    /// Grow after an ACK that advanced the unacknowledged base.
    pub fn on_ack_advance(&mut self, send_window: u32, remote_window: u32) {
        if self.cwnd >= remote_window {
            self.clamp(send_window, remote_window);
            return;
        }
        let mss = self.mss.max(1);
        if self.cwnd < self.ssthresh {
            self.cwnd += 1;
            self.incr = self.incr.saturating_add(mss);
        } else {
            self.incr = self.incr.max(mss);
            self.incr = self
                .incr
                .saturating_add(mss * mss / self.incr + mss / 16);
            if (self.cwnd + 1).saturating_mul(mss) <= self.incr {
                self.cwnd = self.incr.div_ceil(mss);
            }
        }
        self.clamp(send_window, remote_window);
    }

    /// Multiplicative decrease.
    pub fn on_loss(&mut self, signal: LossSignal) {
        match signal {
            LossSignal::Timeout => self.timeouts += 1,
            LossSignal::FastRetransmit => self.fast_retransmits += 1,
        }
        self.ssthresh = (self.cwnd / 2).max(THRESH_MIN);
        self.cwnd = (self.cwnd / 2).max(1);
        self.incr = self.cwnd.saturating_mul(self.mss);
    }

    /// Keep the window inside `[1, max(min(send, remote), 1)]`.
    pub fn clamp(&mut self, send_window: u32, remote_window: u32) {
        let ceiling = send_window.min(remote_window).max(1);
        if self.cwnd > ceiling {
            self.cwnd = ceiling;
            self.incr = ceiling.saturating_mul(self.mss);
        }
        self.cwnd = self.cwnd.max(1);
    }

    /// Segments that may be in flight, given the other two window limits.
    pub fn limit(&self, send_window: u32, remote_window: u32) -> u32 {
        let base = send_window.min(remote_window);
        if self.enabled {
            base.min(self.cwnd)
        } else {
            base
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn cwnd(&self) -> u32 {
        self.cwnd
    }

    pub fn ssthresh(&self) -> u32 {
        self.ssthresh
    }

    pub fn timeouts(&self) -> u64 {
        self.timeouts
    }

    pub fn fast_retransmits(&self) -> u64 {
        self.fast_retransmits
    }
}
