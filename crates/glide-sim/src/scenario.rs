use anyhow::{ensure, Context};
use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, info};

use glide_transport::config::{EngineConfig, Mode, FEC_OVERHEAD};
use glide_transport::fec::FecCodec;
use glide_transport::stats::{EngineStats, FecStats};
use glide_transport::wire::{FecHeader, FecKind};
use glide_transport::ReliabilityEngine;

use crate::impairment::{ImpairedLink, ImpairmentConfig, Lane, LinkStats};

/// One deterministic transfer from endpoint A to endpoint B.
#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    pub seed: u64,
    /// Applied to both directions; the reverse path gets its own seed.
    pub impairment: ImpairmentConfig,
    pub engine: EngineConfig,
    /// `Some(k)` wraps both directions in XOR FEC with groups of `k`.
    pub fec_group_size: Option<u8>,
    pub messages: usize,
    pub message_size: usize,
    /// Virtual time after which the run is abandoned.
    pub time_limit_ms: u32,
    pub tick_ms: u32,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        ScenarioConfig {
            seed: 1,
            impairment: ImpairmentConfig::default(),
            engine: EngineConfig {
                mode: Mode::Fast,
                ..Default::default()
            },
            fec_group_size: None,
            messages: 200,
            message_size: 1_000,
            time_limit_ms: 600_000,
            tick_ms: 10,
        }
    }
}

/// Outcome of one scenario run.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub seed: u64,
    pub fec_group_size: Option<u8>,
    pub impairment: ImpairmentConfig,
    pub messages_sent: usize,
    pub messages_delivered: usize,
    /// Every delivered message matched the one sent at the same position.
    pub in_order: bool,
    pub completed: bool,
    pub dead_link: bool,
    pub elapsed_ms: u32,
    /// Engine datagrams A handed to the link layer.
    pub datagrams_emitted: u64,
    /// Engine datagrams that reached B's engine, FEC recoveries included.
    pub datagrams_arrived: u64,
    /// Share of A's engine datagrams that never reached B's engine.
    pub effective_loss: f64,
    pub forward: LinkStats,
    pub reverse: LinkStats,
    pub sender: EngineStats,
    pub receiver: EngineStats,
    pub sender_fec: Option<FecStats>,
    pub receiver_fec: Option<FecStats>,
}

/// Loss seen above the FEC layer for a fixed open-loop packet stream.
#[derive(Debug, Clone, Serialize)]
pub struct LossProbe {
    pub fec_group_size: Option<u8>,
    pub offered: u64,
    pub arrived: u64,
    pub recovered: u64,
    pub effective_loss: f64,
}

fn loss_ratio(sent: u64, arrived: u64) -> f64 {
    if sent == 0 {
        return 0.0;
    }
    (1.0 - arrived as f64 / sent as f64).max(0.0)
}

/// Parity packets travel on the redundant lane; everything else is primary.
fn lane_of(packet: &[u8]) -> Lane {
    match FecHeader::decode(&mut &packet[..]) {
        Ok(header) if header.kind == FecKind::Parity => Lane::Redundant,
        _ => Lane::Primary,
    }
}

fn message(index: usize, size: usize) -> Bytes {
    (0..size)
        .map(|j| (index as u8).wrapping_mul(29) ^ (j as u8))
        .collect::<Vec<u8>>()
        .into()
}

// ─── Endpoint ────────────────────────────────────────────────────────────────

struct Endpoint {
    engine: ReliabilityEngine,
    fec: Option<FecCodec>,
    emitted: u64,
    arrived: u64,
    scratch: Vec<Bytes>,
}

impl Endpoint {
    fn new(engine: &EngineConfig, fec_group_size: Option<u8>) -> Self {
        let overhead = if fec_group_size.is_some() { FEC_OVERHEAD } else { 0 };
        Endpoint {
            engine: ReliabilityEngine::with_overhead(engine, overhead),
            fec: fec_group_size.map(FecCodec::new),
            emitted: 0,
            arrived: 0,
            scratch: Vec::new(),
        }
    }

    fn transmit(&mut self, now: u32, link: &mut ImpairedLink) {
        let Endpoint {
            engine,
            fec,
            emitted,
            scratch,
            ..
        } = self;
        for datagram in engine.drain_output() {
            *emitted += 1;
            match fec {
                Some(codec) => {
                    scratch.clear();
                    if codec.encode(&datagram, scratch).is_err() {
                        continue;
                    }
                    for packet in scratch.drain(..) {
                        let lane = lane_of(&packet);
                        link.push(now, packet, lane);
                    }
                }
                None => link.push(now, datagram, Lane::Primary),
            }
        }
    }

    fn receive(&mut self, packets: &[Bytes]) {
        for packet in packets {
            match &mut self.fec {
                Some(codec) => {
                    self.scratch.clear();
                    let _ = codec.decode(packet, &mut self.scratch);
                    for datagram in self.scratch.drain(..) {
                        self.arrived += 1;
                        let _ = self.engine.input(&datagram);
                    }
                }
                None => {
                    self.arrived += 1;
                    let _ = self.engine.input(packet);
                }
            }
        }
    }
}

// ─── Runs ────────────────────────────────────────────────────────────────────

/// Drive A → B until every message is delivered, the link dies, or the
/// time limit passes.
pub fn run(config: &ScenarioConfig) -> anyhow::Result<ScenarioReport> {
    config.engine.validate().context("engine config")?;
    ensure!(config.tick_ms > 0, "tick_ms must be non-zero");

    let mut a = Endpoint::new(&config.engine, config.fec_group_size);
    let mut b = Endpoint::new(&config.engine, config.fec_group_size);
    let mut forward = ImpairedLink::new(config.impairment.clone(), config.seed);
    let mut reverse = ImpairedLink::new(config.impairment.clone(), !config.seed);

    let messages: Vec<Bytes> = (0..config.messages)
        .map(|i| message(i, config.message_size))
        .collect();
    for m in &messages {
        a.engine
            .send(m)
            .with_context(|| format!("queueing a {} byte message", m.len()))?;
    }

    let mut delivered = 0usize;
    let mut in_order = true;
    let mut batch = Vec::new();
    let mut now = 0u32;

    loop {
        a.engine.update(now);
        a.transmit(now, &mut forward);
        forward.poll(now, &mut batch);
        b.receive(&batch);
        batch.clear();

        while let Ok(m) = b.engine.recv() {
            if messages.get(delivered) != Some(&m) {
                in_order = false;
            }
            delivered += 1;
        }

        b.engine.update(now);
        b.transmit(now, &mut reverse);
        reverse.poll(now, &mut batch);
        a.receive(&batch);
        batch.clear();

        if delivered >= messages.len() || a.engine.is_dead_link() || now >= config.time_limit_ms {
            break;
        }
        now += config.tick_ms;
    }

    let completed = delivered == messages.len() && in_order;
    let report = ScenarioReport {
        seed: config.seed,
        fec_group_size: config.fec_group_size,
        impairment: config.impairment.clone(),
        messages_sent: messages.len(),
        messages_delivered: delivered,
        in_order,
        completed,
        dead_link: a.engine.is_dead_link(),
        elapsed_ms: now,
        datagrams_emitted: a.emitted,
        datagrams_arrived: b.arrived,
        effective_loss: loss_ratio(a.emitted, b.arrived),
        forward: forward.stats().clone(),
        reverse: reverse.stats().clone(),
        sender: a.engine.stats().clone(),
        receiver: b.engine.stats().clone(),
        sender_fec: a.fec.as_ref().map(FecCodec::stats),
        receiver_fec: b.fec.as_ref().map(FecCodec::stats),
    };
    info!(
        seed = report.seed,
        fec = ?report.fec_group_size,
        delivered = report.messages_delivered,
        elapsed_ms = report.elapsed_ms,
        effective_loss = report.effective_loss,
        "scenario finished"
    );
    Ok(report)
}

/// Push `packets` engine-sized payloads one-way through a link with the
/// given impairment and count how many come out above FEC.
///
/// The stream is open-loop, so runs with and without FEC offer exactly the
/// same primary packets and, for a given seed, lose exactly the same ones.
pub fn probe_effective_loss(
    seed: u64,
    impairment: &ImpairmentConfig,
    fec_group_size: Option<u8>,
    packets: usize,
) -> LossProbe {
    let mut link = ImpairedLink::new(impairment.clone(), seed);
    let mut encoder = fec_group_size.map(FecCodec::new);
    let mut decoder = fec_group_size.map(FecCodec::new);
    let mut wrapped = Vec::new();
    let mut batch = Vec::new();
    let mut arrived = 0u64;

    let mut now = 0u32;
    for i in 0..packets {
        let payload = message(i, 200 + (i * 53) % 1_100);
        match &mut encoder {
            Some(codec) => {
                wrapped.clear();
                if codec.encode(&payload, &mut wrapped).is_err() {
                    continue;
                }
                for packet in wrapped.drain(..) {
                    let lane = lane_of(&packet);
                    link.push(now, packet, lane);
                }
            }
            None => link.push(now, payload, Lane::Primary),
        }

        link.poll(now, &mut batch);
        for packet in batch.drain(..) {
            match &mut decoder {
                Some(codec) => {
                    wrapped.clear();
                    let _ = codec.decode(&packet, &mut wrapped);
                    arrived += wrapped.len() as u64;
                }
                None => arrived += 1,
            }
        }
        now += 1;
    }

    let recovered = decoder.as_ref().map_or(0, |c| c.stats().recovered);
    debug!(?fec_group_size, packets, arrived, recovered, "loss probe finished");
    LossProbe {
        fec_group_size,
        offered: packets as u64,
        arrived,
        recovered,
        effective_loss: loss_ratio(packets as u64, arrived),
    }
}
