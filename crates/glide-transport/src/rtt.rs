//! # RTT Estimator
//!
//! Integer-millisecond smoothed RTT / RTT variance tracker feeding the
//! retransmission timeout. Samples come from the timestamp each ACK echoes.
//!
//! ```text
//!   first sample:  srtt = rtt, rttvar = rtt / 2
//!   afterwards:    rttvar = (3·rttvar + |srtt − rtt|) / 4
//!                  srtt   = max((7·srtt + rtt) / 8, 1)
//!   rto = clamp(srtt + max(interval, 4·rttvar), min_rto, RTO_MAX)
//! ```

/// Initial RTO before any sample arrives.
pub const RTO_DEFAULT: u32 = 200;
/// RTO floor with no-delay off.
pub const RTO_MIN: u32 = 100;
/// RTO floor with no-delay on.
pub const RTO_NODELAY: u32 = 30;
/// Ceiling for both the estimator and per-segment backoff.
pub const RTO_MAX: u32 = 60_000;

#[derive(Debug, Clone)]
pub struct RttEstimator {
    srtt: u32,
    rttvar: u32,
    rto: u32,
    min_rto: u32,
    min_rtt: u32,
    max_rtt: u32,
    sample_count: u64,
}

impl RttEstimator {
    pub fn new(min_rto: u32) -> Self {
        RttEstimator {
            srtt: 0,
            rttvar: 0,
            rto: RTO_DEFAULT,
            min_rto,
            min_rtt: u32::MAX,
            max_rtt: 0,
            sample_count: 0,
        }
    }

    /// Fold one RTT sample (ms) into the estimate. `interval` is the flush
    /// period, which bounds how finely the timer can resolve a deadline.
    pub fn on_sample(&mut self, rtt: u32, interval: u32) {
        self.sample_count += 1;
        self.min_rtt = self.min_rtt.min(rtt);
        self.max_rtt = self.max_rtt.max(rtt);

        if self.sample_count == 1 {
            self.srtt = rtt;
            self.rttvar = rtt / 2;
        } else {
            let delta = self.srtt.abs_diff(rtt) as u64;
            self.rttvar = ((3 * self.rttvar as u64 + delta) / 4) as u32;
            self.srtt = ((7 * self.srtt as u64 + rtt as u64) / 8).max(1) as u32;
        }

        let rto = self
            .srtt
            .saturating_add(interval.max(self.rttvar.saturating_mul(4)));
        self.rto = rto.clamp(self.min_rto, RTO_MAX);
    }

    pub fn set_min_rto(&mut self, min_rto: u32) {
        self.min_rto = min_rto;
    }

    pub fn srtt(&self) -> u32 {
        self.srtt
    }

    pub fn rttvar(&self) -> u32 {
        self.rttvar
    }

    pub fn rto(&self) -> u32 {
        self.rto
    }

    pub fn min_rto(&self) -> u32 {
        self.min_rto
    }

    /// Smallest sample seen, `None` before the first.
    pub fn min_rtt(&self) -> Option<u32> {
        (self.sample_count > 0).then_some(self.min_rtt)
    }

    pub fn max_rtt(&self) -> u32 {
        self.max_rtt
    }

    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new(RTO_MIN)
    }
}
