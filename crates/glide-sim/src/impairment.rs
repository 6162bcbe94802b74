//! Seeded link impairment in virtual time.
//!
//! An [`ImpairedLink`] stands in for one direction of a UDP path. Packets
//! pushed at virtual time `now` are dropped, duplicated, held back past
//! later traffic, or delayed according to an [`ImpairmentConfig`], and come
//! out of [`ImpairedLink::poll`] once their delivery time is reached.
//!
//! Every packet consumes the same number of random draws whatever happens
//! to it, and redundant traffic (FEC parity) draws from its own stream. Two
//! runs with the same seed therefore see identical fates for the primary
//! traffic whether or not FEC is switched on.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::RngExt as _;
use rand::SeedableRng;
use serde::Serialize;

/// Seed offset for the redundant-traffic stream.
const REDUNDANT_STREAM: u64 = 0x9E37_79B9_7F4A_7C15;
/// Extra hold applied to a reordered packet on top of its normal delay.
const REORDER_HOLD_MS: u32 = 20;

/// Impairment parameters for one link direction.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImpairmentConfig {
    pub loss_percent: f32,
    pub duplicate_percent: f32,
    pub reorder_percent: f32,
    pub delay_ms: u32,
    pub jitter_ms: u32,
}

impl ImpairmentConfig {
    /// Uniform loss only.
    pub fn lossy(loss_percent: f32) -> Self {
        ImpairmentConfig {
            loss_percent,
            ..Default::default()
        }
    }
}

/// Which random stream a packet draws its fate from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    Primary,
    Redundant,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LinkStats {
    pub offered: u64,
    pub dropped: u64,
    pub duplicated: u64,
    pub reordered: u64,
    pub delivered: u64,
}

struct InFlight {
    due: u32,
    order: u64,
    packet: Bytes,
}

// Min-heap on (due, order).
impl Ord for InFlight {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.order.cmp(&self.order))
    }
}

impl PartialOrd for InFlight {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for InFlight {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.order == other.order
    }
}

impl Eq for InFlight {}

pub struct ImpairedLink {
    config: ImpairmentConfig,
    primary: StdRng,
    redundant: StdRng,
    queue: BinaryHeap<InFlight>,
    order: u64,
    stats: LinkStats,
}

impl ImpairedLink {
    pub fn new(config: ImpairmentConfig, seed: u64) -> Self {
        ImpairedLink {
            config,
            primary: StdRng::seed_from_u64(seed),
            redundant: StdRng::seed_from_u64(seed ^ REDUNDANT_STREAM),
            queue: BinaryHeap::new(),
            order: 0,
            stats: LinkStats::default(),
        }
    }

    /// Offer one packet to the link at virtual time `now`.
    pub fn push(&mut self, now: u32, packet: Bytes, lane: Lane) {
        let rng = match lane {
            Lane::Primary => &mut self.primary,
            Lane::Redundant => &mut self.redundant,
        };
        let loss_roll = rng.random::<f64>() * 100.0;
        let duplicate_roll = rng.random::<f64>() * 100.0;
        let reorder_roll = rng.random::<f64>() * 100.0;
        let jitter_roll = rng.random::<f64>();

        self.stats.offered += 1;
        if loss_roll < self.config.loss_percent as f64 {
            self.stats.dropped += 1;
            return;
        }

        let jitter = (jitter_roll * (self.config.jitter_ms + 1) as f64) as u32;
        let mut due = now + self.config.delay_ms + jitter.min(self.config.jitter_ms);
        if reorder_roll < self.config.reorder_percent as f64 {
            due += self.config.jitter_ms + REORDER_HOLD_MS;
            self.stats.reordered += 1;
        }

        if duplicate_roll < self.config.duplicate_percent as f64 {
            self.stats.duplicated += 1;
            self.enqueue(due + 1, packet.clone());
        }
        self.enqueue(due, packet);
    }

    fn enqueue(&mut self, due: u32, packet: Bytes) {
        self.queue.push(InFlight {
            due,
            order: self.order,
            packet,
        });
        self.order += 1;
    }

    /// Move every packet due by `now` into `out`, earliest first.
    pub fn poll(&mut self, now: u32, out: &mut Vec<Bytes>) {
        while self.queue.peek().is_some_and(|p| p.due <= now) {
            if let Some(p) = self.queue.pop() {
                self.stats.delivered += 1;
                out.push(p.packet);
            }
        }
    }

    pub fn in_flight(&self) -> usize {
        self.queue.len()
    }

    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(link: &mut ImpairedLink, now: u32) -> Vec<Bytes> {
        let mut out = Vec::new();
        link.poll(now, &mut out);
        out
    }

    #[test]
    fn clean_link_preserves_order_and_delay() {
        let mut link = ImpairedLink::new(
            ImpairmentConfig {
                delay_ms: 15,
                ..Default::default()
            },
            1,
        );
        for i in 0..5u8 {
            link.push(0, Bytes::from(vec![i]), Lane::Primary);
        }
        assert!(drain(&mut link, 14).is_empty());
        let got: Vec<u8> = drain(&mut link, 15).iter().map(|b| b[0]).collect();
        assert_eq!(got, vec![0, 1, 2, 3, 4]);
        assert_eq!(link.in_flight(), 0);
    }

    #[test]
    fn total_loss_drops_everything() {
        let mut link = ImpairedLink::new(ImpairmentConfig::lossy(100.0), 9);
        for _ in 0..100 {
            link.push(0, Bytes::from_static(b"x"), Lane::Primary);
        }
        assert!(drain(&mut link, 1_000).is_empty());
        assert_eq!(link.stats().dropped, 100);
    }

    #[test]
    fn redundant_lane_leaves_primary_fates_unchanged() {
        let config = ImpairmentConfig::lossy(30.0);
        let mut plain = ImpairedLink::new(config.clone(), 42);
        let mut mixed = ImpairedLink::new(config, 42);

        for i in 0..200u32 {
            let packet = Bytes::from(i.to_be_bytes().to_vec());
            plain.push(i, packet.clone(), Lane::Primary);
            mixed.push(i, packet, Lane::Primary);
            if i % 3 == 0 {
                mixed.push(i, Bytes::from_static(b"parity"), Lane::Redundant);
            }
        }
        let primary_only = |v: Vec<Bytes>| -> Vec<Bytes> {
            v.into_iter().filter(|b| b.len() == 4).collect()
        };
        assert_eq!(
            primary_only(drain(&mut plain, 1_000)),
            primary_only(drain(&mut mixed, 1_000))
        );
    }

    #[test]
    fn reordered_packets_arrive_late() {
        let mut link = ImpairedLink::new(
            ImpairmentConfig {
                reorder_percent: 100.0,
                ..Default::default()
            },
            3,
        );
        link.push(0, Bytes::from_static(b"held"), Lane::Primary);
        assert!(drain(&mut link, REORDER_HOLD_MS - 1).is_empty());
        assert_eq!(drain(&mut link, REORDER_HOLD_MS).len(), 1);
        assert_eq!(link.stats().reordered, 1);
    }
}
