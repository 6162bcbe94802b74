//! # Reliability Engine
//!
//! Pure logic, no I/O and no clock of its own. The caller supplies
//! millisecond timestamps to [`ReliabilityEngine::update`] /
//! [`ReliabilityEngine::flush`], feeds inbound datagrams to
//! [`ReliabilityEngine::input`], and collects outbound datagrams from
//! [`ReliabilityEngine::drain_output`].
//!
//! ## Segment flow
//!
//! ```text
//!   send() ──▶ snd_queue ──flush()──▶ snd_buf ──ACK/una──▶ pool
//!                                       │
//!                                  timeout / fast resend
//!
//!   input() ──▶ rcv_buf (out of order) ──contiguous──▶ rcv_queue ──recv()──▶ app
//! ```
//!
//! Every segment lives in the [`SegmentPool`]; the four queues only hold
//! handles, so moving between them never copies payload.
//!
//! ## Flush order
//!
//! ACKs first, then window probe / window report, then data (new and
//! retransmitted), packed back to back into datagrams of at most `mtu`
//! bytes.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use tracing::{debug, error, trace};

use crate::config::{EngineConfig, Mode, DEFAULT_RECV_WINDOW};
use crate::congestion::{CongestionWindow, LossSignal};
use crate::error::{ProtocolError, RecvError, SendError};
use crate::pool::{SegmentHandle, SegmentPool};
use crate::rtt::{RttEstimator, RTO_MAX};
use crate::stats::EngineStats;
use crate::wire::{seq_before, seq_diff, Command, SegmentHeader, SEGMENT_HEADER_LEN};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Wait before the first window probe once the peer advertises zero.
pub const PROBE_INIT: u32 = 7_000;
/// Ceiling for the probe backoff.
pub const PROBE_LIMIT: u32 = 120_000;
/// A segment is fast-retransmitted only while its transmit count is at most this.
pub const FAST_LIMIT: u32 = 5;
/// `update` resynchronises its schedule when the clock jumps further than this.
const SLEW_LIMIT: i32 = 10_000;
/// Most fragments one message may span (`frg` is a `u8` counting down to 0).
pub const MAX_FRAGMENTS: usize = u8::MAX as usize + 1;

// ─── Datagram Assembly ───────────────────────────────────────────────────────

/// Packs encoded segments into MTU-bounded datagrams.
struct Datagrams {
    buffer: BytesMut,
    ready: VecDeque<Bytes>,
    mtu: usize,
    emitted: u64,
}

impl Datagrams {
    fn new(mtu: usize) -> Self {
        Datagrams {
            buffer: BytesMut::with_capacity(mtu),
            ready: VecDeque::new(),
            mtu,
            emitted: 0,
        }
    }

    fn push(&mut self, header: &SegmentHeader, payload: &[u8]) {
        let need = SEGMENT_HEADER_LEN + payload.len();
        if !self.buffer.is_empty() && self.buffer.len() + need > self.mtu {
            self.finish();
        }
        header.encode(&mut self.buffer);
        self.buffer.extend_from_slice(payload);
    }

    fn finish(&mut self) {
        if !self.buffer.is_empty() {
            self.ready.push_back(self.buffer.split().freeze());
            self.emitted += 1;
            self.buffer.reserve(self.mtu);
        }
    }
}

// ─── Engine ──────────────────────────────────────────────────────────────────

/// ARQ state machine for one conversation.
pub struct ReliabilityEngine {
    conv: u32,
    mtu: usize,
    mss: usize,
    dead: bool,

    snd_una: u32,
    snd_nxt: u32,
    rcv_nxt: u32,

    snd_wnd: u32,
    rcv_wnd: u32,
    rmt_wnd: u32,

    rtt: RttEstimator,
    cwnd: CongestionWindow,

    current: u32,
    interval: u32,
    ts_flush: u32,
    updated: bool,

    ts_probe: u32,
    probe_wait: u32,
    probe_ask: bool,
    probe_tell: bool,

    nodelay: u8,
    fast_resend: u32,
    dead_link: u32,
    stream: bool,

    snd_queue: VecDeque<SegmentHandle>,
    snd_buf: VecDeque<SegmentHandle>,
    rcv_buf: VecDeque<SegmentHandle>,
    rcv_queue: VecDeque<SegmentHandle>,
    /// Pending `(sn, ts)` acknowledgments.
    acklist: Vec<(u32, u32)>,

    pool: SegmentPool,
    out: Datagrams,
    stats: EngineStats,
}

impl ReliabilityEngine {
    /// Engine whose datagrams use the full configured MTU.
    pub fn new(config: &EngineConfig) -> Self {
        Self::with_overhead(config, 0)
    }

    /// Engine that leaves `overhead` bytes of every datagram to a wrapping
    /// layer (the FEC header and length prefix).
    pub fn with_overhead(config: &EngineConfig, overhead: usize) -> Self {
        let mtu = config.mtu.saturating_sub(overhead).max(SEGMENT_HEADER_LEN + 1);
        let mss = mtu - SEGMENT_HEADER_LEN;
        let params = config.effective_params();

        ReliabilityEngine {
            conv: config.conv,
            mtu,
            mss,
            dead: false,

            snd_una: 0,
            snd_nxt: 0,
            rcv_nxt: 0,

            snd_wnd: config.send_window.max(1),
            rcv_wnd: config.recv_window.max(1),
            rmt_wnd: DEFAULT_RECV_WINDOW,

            rtt: RttEstimator::new(params.min_rto_ms),
            cwnd: CongestionWindow::new(mss as u32, params.congestion_control),

            current: 0,
            interval: params.interval_ms.clamp(1, 5_000),
            ts_flush: 0,
            updated: false,

            ts_probe: 0,
            probe_wait: 0,
            probe_ask: false,
            probe_tell: false,

            nodelay: params.nodelay,
            fast_resend: params.fast_resend,
            dead_link: config.dead_link.max(1),
            stream: config.stream,

            snd_queue: VecDeque::new(),
            snd_buf: VecDeque::new(),
            rcv_buf: VecDeque::new(),
            rcv_queue: VecDeque::new(),
            acklist: Vec::new(),

            pool: SegmentPool::new(config.pool_capacity, mss),
            out: Datagrams::new(mtu),
            stats: EngineStats::default(),
        }
    }

    /// Apply a mode preset: no-delay level, interval, fast resend, congestion
    /// control, and RTO floor change together.
    pub fn set_mode(&mut self, mode: Mode) {
        let params = mode.params();
        self.nodelay = params.nodelay;
        self.interval = params.interval_ms.clamp(1, 5_000);
        self.fast_resend = params.fast_resend;
        self.cwnd.set_enabled(params.congestion_control);
        self.rtt.set_min_rto(params.min_rto_ms);
    }

    pub fn set_min_rto(&mut self, min_rto_ms: u32) {
        self.rtt.set_min_rto(min_rto_ms);
    }

    /// Start both directions at `sn` instead of 0.
    #[cfg(test)]
    fn seed_sequence(&mut self, sn: u32) {
        self.snd_una = sn;
        self.snd_nxt = sn;
        self.rcv_nxt = sn;
    }

    // ─── Application side ────────────────────────────────────────────────

    /// Queue a message, fragmenting it into `ceil(len / mss)` segments.
    pub fn send(&mut self, data: &[u8]) -> Result<(), SendError> {
        if self.dead {
            return Err(SendError::DeadLink);
        }
        if data.is_empty() {
            return Err(SendError::Empty);
        }

        // Stream mode tops up the unsent tail segment before fragmenting.
        let tail_room = match self.snd_queue.back() {
            Some(tail) if self.stream => self.mss.saturating_sub(self.pool.get(tail).len()),
            _ => 0,
        };
        let (head, rest) = data.split_at(tail_room.min(data.len()));

        let count = rest.len().div_ceil(self.mss);
        if count >= self.rcv_wnd as usize || count > MAX_FRAGMENTS {
            return Err(SendError::Capacity {
                fragments: count,
                window: self.rcv_wnd as usize,
            });
        }

        if let Some(tail) = self.snd_queue.back().filter(|_| !head.is_empty()) {
            self.pool.get_mut(tail).data.extend_from_slice(head);
        }
        for (i, chunk) in rest.chunks(self.mss).enumerate() {
            let handle = self.pool.acquire_with(chunk);
            self.pool.get_mut(&handle).frg = if self.stream {
                0
            } else {
                (count - i - 1) as u8
            };
            self.snd_queue.push_back(handle);
        }
        self.stats.messages_sent += 1;
        Ok(())
    }

    /// Size of the next complete message, without consuming it.
    pub fn peek_size(&self) -> Result<usize, RecvError> {
        let front = self.rcv_queue.front().ok_or(RecvError::NotReady)?;
        let first = self.pool.get(front);
        if first.frg == 0 {
            return Ok(first.len());
        }
        if self.rcv_queue.len() < first.frg as usize + 1 {
            return Err(RecvError::NotReady);
        }
        let mut size = 0;
        for handle in &self.rcv_queue {
            let seg = self.pool.get(handle);
            size += seg.len();
            if seg.frg == 0 {
                break;
            }
        }
        Ok(size)
    }

    /// Copy the next complete message into `buf`, returning its length.
    pub fn recv_into(&mut self, buf: &mut [u8]) -> Result<usize, RecvError> {
        let size = self.peek_size()?;
        if size > buf.len() {
            return Err(RecvError::BufferTooSmall { needed: size });
        }
        let mut offset = 0;
        self.take_message(|chunk| {
            buf[offset..offset + chunk.len()].copy_from_slice(chunk);
            offset += chunk.len();
        });
        Ok(size)
    }

    /// Take the next complete message as an owned buffer.
    pub fn recv(&mut self) -> Result<Bytes, RecvError> {
        let size = self.peek_size()?;
        let mut message = BytesMut::with_capacity(size);
        self.take_message(|chunk| message.extend_from_slice(chunk));
        Ok(message.freeze())
    }

    /// Pop one message's fragments off `rcv_queue`, then refill the queue
    /// and schedule a window report if it just drained out of "full".
    fn take_message(&mut self, mut sink: impl FnMut(&[u8])) {
        let recover = self.rcv_queue.len() >= self.rcv_wnd as usize;

        let mut bytes = 0;
        while let Some(handle) = self.rcv_queue.pop_front() {
            let seg = self.pool.get(&handle);
            let last = seg.frg == 0;
            bytes += seg.len();
            sink(&seg.data);
            self.pool.release(handle);
            if last {
                break;
            }
        }
        self.stats.messages_delivered += 1;
        self.stats.bytes_delivered += bytes as u64;

        self.move_to_queue();

        if recover && self.rcv_queue.len() < self.rcv_wnd as usize {
            self.probe_tell = true;
        }
    }

    /// Segments queued or in flight.
    pub fn wait_send(&self) -> usize {
        self.snd_buf.len() + self.snd_queue.len()
    }

    // ─── Network side ────────────────────────────────────────────────────

    /// Process one inbound datagram.
    ///
    /// Parsing stops at the first malformed or foreign segment; whatever was
    /// processed before it stays applied, and the error is returned.
    pub fn input(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        let prev_una = self.snd_una;
        let mut max_ack: Option<u32> = None;

        let result = self.input_segments(data, &mut max_ack);

        if let Some(sn) = max_ack {
            self.parse_fast_ack(sn);
        }
        if seq_diff(self.snd_una, prev_una) > 0 {
            self.cwnd.on_ack_advance(self.snd_wnd, self.rmt_wnd);
        }
        self.cwnd.clamp(self.snd_wnd, self.rmt_wnd);

        if let Err(e) = &result {
            self.stats.protocol_errors += 1;
            debug!(conv = self.conv, error = %e, "dropping rest of inbound datagram");
        }
        result
    }

    fn input_segments(
        &mut self,
        data: &[u8],
        max_ack: &mut Option<u32>,
    ) -> Result<(), ProtocolError> {
        let mut buf = data;
        if buf.is_empty() {
            return Err(ProtocolError::TruncatedHeader { remaining: 0 });
        }

        while !buf.is_empty() {
            let header = SegmentHeader::decode(&mut buf)?;
            if header.conv != self.conv {
                return Err(ProtocolError::ConversationMismatch {
                    expected: self.conv,
                    got: header.conv,
                });
            }
            let (payload, rest) = buf.split_at(header.len as usize);
            buf = rest;

            self.rmt_wnd = header.wnd as u32;
            self.parse_una(header.una);
            self.shrink_buf();

            match header.cmd {
                Command::Ack => {
                    let rtt = seq_diff(self.current, header.ts);
                    if rtt >= 0 {
                        self.rtt.on_sample(rtt as u32, self.interval);
                    }
                    self.parse_ack(header.sn);
                    self.shrink_buf();
                    let newer = max_ack.map_or(true, |sn| seq_diff(header.sn, sn) > 0);
                    if newer {
                        *max_ack = Some(header.sn);
                    }
                }
                Command::Push => {
                    self.stats.segments_received += 1;
                    if seq_before(header.sn, self.rcv_nxt.wrapping_add(self.rcv_wnd)) {
                        self.acklist.push((header.sn, header.ts));
                        if seq_before(header.sn, self.rcv_nxt) {
                            self.stats.duplicate_segments += 1;
                        } else {
                            self.parse_data(&header, payload);
                        }
                    } else {
                        self.stats.out_of_window_segments += 1;
                    }
                }
                Command::WindowProbe => self.probe_tell = true,
                Command::WindowReport => {}
            }
        }
        Ok(())
    }

    /// Drop every in-flight segment the peer has cumulatively acknowledged.
    fn parse_una(&mut self, una: u32) {
        while let Some(front) = self.snd_buf.front() {
            if !seq_before(self.pool.get(front).sn, una) {
                break;
            }
            if let Some(handle) = self.snd_buf.pop_front() {
                self.pool.release(handle);
            }
        }
    }

    fn parse_ack(&mut self, sn: u32) {
        if seq_before(sn, self.snd_una) || !seq_before(sn, self.snd_nxt) {
            return;
        }
        let mut hit = None;
        for (i, handle) in self.snd_buf.iter().enumerate() {
            let seg_sn = self.pool.get(handle).sn;
            if seg_sn == sn {
                hit = Some(i);
                break;
            }
            if seq_before(sn, seg_sn) {
                break;
            }
        }
        if let Some(handle) = hit.and_then(|i| self.snd_buf.remove(i)) {
            self.pool.release(handle);
        }
    }

    /// Count a skip on every in-flight segment older than the newest ACK.
    fn parse_fast_ack(&mut self, sn: u32) {
        if seq_before(sn, self.snd_una) || !seq_before(sn, self.snd_nxt) {
            return;
        }
        for handle in &self.snd_buf {
            let seg = self.pool.get_mut(handle);
            if seq_before(sn, seg.sn) {
                break;
            }
            if seg.sn != sn {
                seg.fast_ack += 1;
            }
        }
    }

    fn shrink_buf(&mut self) {
        self.snd_una = match self.snd_buf.front() {
            Some(handle) => self.pool.get(handle).sn,
            None => self.snd_nxt,
        };
    }

    /// Insert a data segment into `rcv_buf` in sequence order, ignoring
    /// duplicates, then promote any contiguous run.
    fn parse_data(&mut self, header: &SegmentHeader, payload: &[u8]) {
        let sn = header.sn;
        if !seq_before(sn, self.rcv_nxt.wrapping_add(self.rcv_wnd)) {
            self.stats.out_of_window_segments += 1;
            return;
        }
        if seq_before(sn, self.rcv_nxt) {
            self.stats.duplicate_segments += 1;
            return;
        }

        let mut insert_at = self.rcv_buf.len();
        let mut repeat = false;
        for (i, handle) in self.rcv_buf.iter().enumerate().rev() {
            let seg_sn = self.pool.get(handle).sn;
            if seg_sn == sn {
                repeat = true;
                break;
            }
            if seq_diff(sn, seg_sn) > 0 {
                insert_at = i + 1;
                break;
            }
            insert_at = i;
        }

        if repeat {
            self.stats.duplicate_segments += 1;
        } else {
            let handle = self.pool.acquire_with(payload);
            let seg = self.pool.get_mut(&handle);
            seg.conv = header.conv;
            seg.cmd = header.cmd;
            seg.frg = header.frg;
            seg.wnd = header.wnd;
            seg.ts = header.ts;
            seg.sn = header.sn;
            seg.una = header.una;
            self.rcv_buf.insert(insert_at, handle);
        }

        self.move_to_queue();
    }

    /// Promote the contiguous head of `rcv_buf` into `rcv_queue`.
    fn move_to_queue(&mut self) {
        while self.rcv_queue.len() < self.rcv_wnd as usize {
            let sn = match self.rcv_buf.front() {
                Some(handle) => self.pool.get(handle).sn,
                None => break,
            };
            if sn != self.rcv_nxt {
                break;
            }
            if let Some(handle) = self.rcv_buf.pop_front() {
                self.rcv_queue.push_back(handle);
                self.rcv_nxt = self.rcv_nxt.wrapping_add(1);
            }
        }
    }

    fn wnd_unused(&self) -> u16 {
        let used = self.rcv_queue.len() as u32;
        self.rcv_wnd.saturating_sub(used).min(u16::MAX as u32) as u16
    }

    // ─── Timers ──────────────────────────────────────────────────────────

    /// Advance the clock and flush if the interval has elapsed.
    pub fn update(&mut self, now: u32) {
        self.current = now;
        if !self.updated {
            self.updated = true;
            self.ts_flush = now;
        }

        let mut slap = seq_diff(now, self.ts_flush);
        if !(-SLEW_LIMIT..SLEW_LIMIT).contains(&slap) {
            self.ts_flush = now;
            slap = 0;
        }

        if slap >= 0 {
            self.ts_flush = self.ts_flush.wrapping_add(self.interval);
            if seq_diff(now, self.ts_flush) >= 0 {
                self.ts_flush = now.wrapping_add(self.interval);
            }
            self.flush(now);
        }
    }

    /// When `update` next needs to run. Returns `now` if something is
    /// already due; never later than one interval ahead.
    pub fn check(&self, now: u32) -> u32 {
        if !self.updated {
            return now;
        }

        let mut ts_flush = self.ts_flush;
        if !(-SLEW_LIMIT..SLEW_LIMIT).contains(&seq_diff(now, ts_flush)) {
            ts_flush = now;
        }
        if seq_diff(now, ts_flush) >= 0 {
            return now;
        }

        let mut next = seq_diff(ts_flush, now) as u32;
        for handle in &self.snd_buf {
            let diff = seq_diff(self.pool.get(handle).resend_ts, now);
            if diff <= 0 {
                return now;
            }
            next = next.min(diff as u32);
        }
        now.wrapping_add(next.min(self.interval))
    }

    /// Emit everything pending at time `now`: ACKs, probes, then data.
    pub fn flush(&mut self, now: u32) {
        self.current = now;
        let conv = self.conv;
        let wnd = self.wnd_unused();
        let una = self.rcv_nxt;
        let control = move |cmd, sn, ts| SegmentHeader {
            conv,
            cmd,
            frg: 0,
            wnd,
            ts,
            sn,
            una,
            len: 0,
        };

        // ACKs
        for (sn, ts) in self.acklist.drain(..) {
            self.out.push(&control(Command::Ack, sn, ts), &[]);
            self.stats.acks_sent += 1;
        }

        // Window probing while the peer advertises zero.
        if self.rmt_wnd == 0 {
            if self.probe_wait == 0 {
                self.probe_wait = PROBE_INIT;
                self.ts_probe = now.wrapping_add(self.probe_wait);
            } else if seq_diff(now, self.ts_probe) >= 0 {
                self.probe_wait = self.probe_wait.max(PROBE_INIT);
                self.probe_wait += self.probe_wait / 2;
                self.probe_wait = self.probe_wait.min(PROBE_LIMIT);
                self.ts_probe = now.wrapping_add(self.probe_wait);
                self.probe_ask = true;
            }
        } else {
            self.ts_probe = 0;
            self.probe_wait = 0;
        }
        if self.probe_ask {
            self.out.push(&control(Command::WindowProbe, 0, 0), &[]);
            self.stats.probes_sent += 1;
        }
        if self.probe_tell {
            self.out.push(&control(Command::WindowReport, 0, 0), &[]);
            self.stats.probes_sent += 1;
        }
        self.probe_ask = false;
        self.probe_tell = false;

        // Admit queued segments up to the effective window.
        let limit = self.cwnd.limit(self.snd_wnd, self.rmt_wnd);
        let rx_rto = self.rtt.rto();
        while seq_before(self.snd_nxt, self.snd_una.wrapping_add(limit)) {
            let Some(handle) = self.snd_queue.pop_front() else {
                break;
            };
            let seg = self.pool.get_mut(&handle);
            seg.conv = conv;
            seg.cmd = Command::Push;
            seg.wnd = wnd;
            seg.ts = now;
            seg.sn = self.snd_nxt;
            seg.una = una;
            seg.resend_ts = now;
            seg.rto = rx_rto;
            seg.fast_ack = 0;
            seg.xmit = 0;
            self.snd_nxt = self.snd_nxt.wrapping_add(1);
            self.snd_buf.push_back(handle);
        }

        // Transmit new segments, expired ones, and fast-resend candidates.
        let resend = if self.fast_resend > 0 {
            self.fast_resend
        } else {
            u32::MAX
        };
        let rto_min = if self.nodelay == 0 { rx_rto >> 3 } else { 0 };
        let mut lost = false;
        let mut fast = false;
        let mut exhausted = None;

        for handle in &self.snd_buf {
            let seg = self.pool.get_mut(handle);
            let mut need_send = false;

            if seg.xmit == 0 {
                need_send = true;
                seg.xmit = 1;
                seg.rto = rx_rto;
                seg.resend_ts = now.wrapping_add(seg.rto).wrapping_add(rto_min);
                self.stats.segments_sent += 1;
            } else if seq_diff(now, seg.resend_ts) >= 0 {
                need_send = true;
                seg.xmit += 1;
                if self.nodelay == 0 {
                    seg.rto += seg.rto.max(rx_rto);
                } else {
                    let step = if self.nodelay < 2 { seg.rto } else { rx_rto };
                    seg.rto += step / 2;
                }
                seg.rto = seg.rto.min(RTO_MAX);
                seg.resend_ts = now.wrapping_add(seg.rto);
                lost = true;
                self.stats.timeout_retransmits += 1;
            } else if seg.fast_ack >= resend && seg.xmit <= FAST_LIMIT {
                need_send = true;
                seg.xmit += 1;
                seg.fast_ack = 0;
                seg.resend_ts = now.wrapping_add(seg.rto);
                fast = true;
                self.stats.fast_retransmits += 1;
            }

            if need_send {
                seg.ts = now;
                seg.wnd = wnd;
                seg.una = una;
                let header = SegmentHeader {
                    conv,
                    cmd: Command::Push,
                    frg: seg.frg,
                    wnd,
                    ts: now,
                    sn: seg.sn,
                    una,
                    len: seg.data.len() as u32,
                };
                self.out.push(&header, &seg.data);
                if seg.xmit > self.dead_link {
                    exhausted = Some((seg.sn, seg.xmit));
                }
            }
        }
        self.out.finish();
        self.stats.datagrams_out = self.out.emitted;

        if let Some((sn, xmit)) = exhausted {
            if !self.dead {
                self.dead = true;
                error!(conv, sn, xmit, "dead link: retransmit ceiling exceeded");
            }
        }

        if lost {
            self.cwnd.on_loss(LossSignal::Timeout);
        } else if fast {
            self.cwnd.on_loss(LossSignal::FastRetransmit);
        }
        self.cwnd.clamp(self.snd_wnd, self.rmt_wnd);

        if lost || fast {
            trace!(
                conv,
                cwnd = self.cwnd.cwnd(),
                ssthresh = self.cwnd.ssthresh(),
                rto = rx_rto,
                "loss detected"
            );
        }
    }

    /// Datagrams produced by the last flushes, oldest first.
    pub fn drain_output(&mut self) -> impl Iterator<Item = Bytes> + '_ {
        self.out.ready.drain(..)
    }

    pub fn output_len(&self) -> usize {
        self.out.ready.len()
    }

    // ─── Accessors ───────────────────────────────────────────────────────

    pub fn conv(&self) -> u32 {
        self.conv
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    pub fn mss(&self) -> usize {
        self.mss
    }

    /// Terminal: once set, the engine refuses new sends for good.
    pub fn is_dead_link(&self) -> bool {
        self.dead
    }

    pub fn srtt(&self) -> u32 {
        self.rtt.srtt()
    }

    pub fn rto(&self) -> u32 {
        self.rtt.rto()
    }

    pub fn cwnd(&self) -> u32 {
        self.cwnd.cwnd()
    }

    pub fn ssthresh(&self) -> u32 {
        self.cwnd.ssthresh()
    }

    pub fn remote_window(&self) -> u32 {
        self.rmt_wnd
    }

    pub fn send_window(&self) -> u32 {
        self.snd_wnd
    }

    pub fn recv_window(&self) -> u32 {
        self.rcv_wnd
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }

    /// Next sequence number expected from the peer.
    pub fn rcv_nxt(&self) -> u32 {
        self.rcv_nxt
    }

    /// Oldest unacknowledged outbound sequence number.
    pub fn snd_una(&self) -> u32 {
        self.snd_una
    }

    /// Segments received in order and not yet read by the application.
    pub fn recv_queue_len(&self) -> usize {
        self.rcv_queue.len()
    }

    /// Segments held out of order waiting for a gap to fill.
    pub fn recv_buffer_len(&self) -> usize {
        self.rcv_buf.len()
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(mode: Mode) -> ReliabilityEngine {
        ReliabilityEngine::new(&EngineConfig {
            mode,
            ..EngineConfig::with_conv(0x1122_3344)
        })
    }

    /// Move every pending datagram from `from` into `to`.
    fn deliver(from: &mut ReliabilityEngine, to: &mut ReliabilityEngine) -> usize {
        let datagrams: Vec<Bytes> = from.drain_output().collect();
        for d in &datagrams {
            to.input(d).unwrap();
        }
        datagrams.len()
    }

    #[test]
    fn empty_send_rejected() {
        let mut e = engine(Mode::Default);
        assert_eq!(e.send(b""), Err(SendError::Empty));
        assert_eq!(e.wait_send(), 0);
    }

    #[test]
    fn fragments_count_down_to_zero() {
        let mut e = engine(Mode::Normal);
        let mss = e.mss();
        e.send(&vec![7u8; mss * 3]).unwrap();
        assert_eq!(e.wait_send(), 3);
        let frgs: Vec<u8> = e
            .snd_queue
            .iter()
            .map(|h| e.pool.get(h).frg)
            .collect();
        assert_eq!(frgs, vec![2, 1, 0]);
    }

    #[test]
    fn single_exchange_acks_and_frees_buffers() {
        let mut a = engine(Mode::Fast);
        let mut b = engine(Mode::Fast);
        a.send(b"hello").unwrap();
        a.flush(0);
        assert_eq!(deliver(&mut a, &mut b), 1);
        assert_eq!(b.recv().unwrap(), Bytes::from_static(b"hello"));

        b.flush(5);
        a.flush(5);
        deliver(&mut b, &mut a);
        assert_eq!(a.wait_send(), 0);
        assert_eq!(a.srtt(), 5);
        assert_eq!(a.pool.live(), 0);
    }

    #[test]
    fn recv_into_checks_buffer() {
        let mut a = engine(Mode::Fast);
        let mut b = engine(Mode::Fast);
        a.send(&[1u8; 100]).unwrap();
        a.flush(0);
        deliver(&mut a, &mut b);

        let mut small = [0u8; 10];
        assert_eq!(
            b.recv_into(&mut small),
            Err(RecvError::BufferTooSmall { needed: 100 })
        );
        let mut big = [0u8; 200];
        assert_eq!(b.recv_into(&mut big), Ok(100));
        assert_eq!(b.recv_into(&mut big), Err(RecvError::NotReady));
    }

    #[test]
    fn incomplete_message_not_ready() {
        let mut a = engine(Mode::Fast);
        let mut b = engine(Mode::Fast);
        let mss = a.mss();
        a.send(&vec![3u8; mss * 2]).unwrap();
        a.flush(0);
        let datagrams: Vec<Bytes> = a.drain_output().collect();
        // Both fragments fit two MTU-sized datagrams; deliver only the second.
        assert_eq!(datagrams.len(), 2);
        b.input(&datagrams[1]).unwrap();
        assert_eq!(b.peek_size(), Err(RecvError::NotReady));
        assert_eq!(b.recv_buffer_len(), 1);
        b.input(&datagrams[0]).unwrap();
        assert_eq!(b.peek_size(), Ok(mss * 2));
    }

    #[test]
    fn conversation_mismatch_is_reported() {
        let mut a = engine(Mode::Fast);
        let mut b = ReliabilityEngine::new(&EngineConfig::with_conv(0x2233_4455));
        a.send(b"x").unwrap();
        a.flush(0);
        let d: Vec<Bytes> = a.drain_output().collect();
        assert_eq!(
            b.input(&d[0]),
            Err(ProtocolError::ConversationMismatch {
                expected: 0x2233_4455,
                got: 0x1122_3344
            })
        );
        assert_eq!(b.stats().protocol_errors, 1);
        assert_eq!(b.recv(), Err(RecvError::NotReady));
    }

    #[test]
    fn timeout_retransmits_and_backs_off() {
        let mut a = engine(Mode::Default);
        a.send(b"lost").unwrap();
        a.update(0);
        let _ = a.drain_output().count();
        let first_deadline = a.check(1);
        assert!(first_deadline > 1);

        // Nothing acknowledged: keep ticking until a retransmit happens.
        let mut now = 0;
        while a.stats().timeout_retransmits == 0 {
            now += 10;
            a.update(now);
        }
        assert!(now >= 200);
        assert_eq!(a.cwnd(), 1);
    }

    #[test]
    fn stream_mode_coalesces_tail() {
        let mut e = ReliabilityEngine::new(&EngineConfig {
            stream: true,
            ..Default::default()
        });
        e.send(b"abc").unwrap();
        e.send(b"def").unwrap();
        assert_eq!(e.wait_send(), 1);
        let seg = e.pool.get(&e.snd_queue[0]);
        assert_eq!(&seg.data[..], b"abcdef");
        assert_eq!(seg.frg, 0);
    }

    #[test]
    fn check_is_bounded_by_interval() {
        let mut e = engine(Mode::Fast);
        assert_eq!(e.check(100), 100);
        e.update(100);
        let next = e.check(101);
        assert!(next > 101 && next <= 101 + e.interval());
    }

    #[test]
    fn set_mode_switches_bundle() {
        let mut e = engine(Mode::Default);
        assert!(e.cwnd.enabled());
        e.set_mode(Mode::Fast);
        assert!(!e.cwnd.enabled());
        assert_eq!(e.fast_resend, 2);
        assert_eq!(e.nodelay, 2);
        assert_eq!(e.rtt.min_rto(), 10);
        e.set_min_rto(25);
        assert_eq!(e.rtt.min_rto(), 25);
    }

    #[test]
    fn segments_past_window_are_not_duplicates() {
        let mut b = engine(Mode::Fast);
        let mut far = BytesMut::new();
        SegmentHeader {
            conv: 0x1122_3344,
            cmd: Command::Push,
            frg: 0,
            wnd: 128,
            ts: 0,
            sn: b.recv_window() + 5,
            una: 0,
            len: 1,
        }
        .encode(&mut far);
        far.extend_from_slice(b"x");

        b.input(&far).unwrap();
        assert_eq!(b.stats().out_of_window_segments, 1);
        assert_eq!(b.stats().duplicate_segments, 0);
        assert_eq!(b.recv_buffer_len(), 0);
        b.flush(0);
        assert_eq!(b.stats().acks_sent, 0);
    }

    #[test]
    fn sequence_numbers_wrap_through_zero() {
        let start = u32::MAX - 3;
        let mut a = engine(Mode::Fast);
        let mut b = engine(Mode::Fast);
        a.seed_sequence(start);
        b.seed_sequence(start);
        let mss = a.mss();

        // Four two-fragment messages: sn MAX-3 ..= MAX, then 0 ..= 3.
        let messages: Vec<Vec<u8>> = (0..4u8).map(|i| vec![i; mss * 2]).collect();
        for m in &messages {
            a.send(m).unwrap();
        }
        a.flush(0);
        let mut datagrams: Vec<Bytes> = a.drain_output().collect();
        assert_eq!(datagrams.len(), 8);

        // Lose sn MAX-1 and deliver the rest newest first.
        datagrams.remove(2);
        for d in datagrams.iter().rev() {
            b.input(d).unwrap();
        }
        assert_eq!(b.recv().unwrap(), Bytes::from(messages[0].clone()));
        assert_eq!(b.recv(), Err(RecvError::NotReady));
        assert_eq!(b.rcv_nxt(), u32::MAX - 1);
        assert_eq!(b.recv_buffer_len(), 5);

        b.flush(5);
        deliver(&mut b, &mut a);
        assert_eq!(a.snd_una(), u32::MAX - 1);
        assert_eq!(a.wait_send(), 1);

        a.flush(1_000);
        assert_eq!(a.stats().timeout_retransmits, 1);
        assert_eq!(deliver(&mut a, &mut b), 1);
        for m in &messages[1..] {
            assert_eq!(b.recv().unwrap(), Bytes::from(m.clone()));
        }
        assert_eq!(b.rcv_nxt(), 4);

        b.flush(1_005);
        deliver(&mut b, &mut a);
        assert_eq!(a.wait_send(), 0);
        assert_eq!(a.snd_una(), 4);
        assert_eq!(a.pool.live(), 0);
        assert_eq!(b.stats().duplicate_segments, 0);
    }

    #[test]
    fn clock_jump_resets_schedule() {
        let mut e = engine(Mode::Fast);
        e.update(0);
        e.update(50_000);
        assert_eq!(e.check(50_000), 50_000 + e.interval());
    }
}
