//! # XOR Forward Error Correction
//!
//! Single-parity FEC underneath the reliability engine. Every `group_size`
//! outbound datagrams are followed by one parity packet; the receiver can
//! rebuild any one missing member of a group without waiting for ARQ.
//!
//! ## Parity
//!
//! Each member contributes `len (u16 BE) ++ payload` to a running XOR, so a
//! rebuilt payload carries its own length:
//!
//! ```text
//!   parity = ⊕ᵢ ( [len_i]₂ ‖ payload_i ‖ 0… )      length = maxᵢ(len_i + 2)
//!   missing = parity ⊕ (⊕_{j≠missing} [len_j]₂ ‖ payload_j)
//! ```
//!
//! ## Decoder
//!
//! Data packets are passed up the moment they arrive; recovery only ever
//! adds the one packet that did not. Groups are tracked in a fixed ring of
//! [`GROUP_RING_SLOTS`] slots; a new group id takes the oldest slot.
//! Structurally invalid packets are counted, logged at debug, and dropped.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, trace};

use crate::error::FecError;
use crate::stats::FecStats;
use crate::wire::{FecHeader, FecKind, FEC_HEADER_LEN, FEC_LENGTH_PREFIX, FEC_MAX_GROUP};

/// Concurrent groups the decoder keeps state for.
pub const GROUP_RING_SLOTS: usize = 4;

/// Largest payload whose prefixed parity contribution still fits `u16`.
pub const MAX_FEC_PAYLOAD: usize = u16::MAX as usize - FEC_LENGTH_PREFIX;

/// XOR `src` into `dst` starting at `offset`, growing `dst` with zeros.
fn xor_into(dst: &mut BytesMut, offset: usize, src: &[u8]) {
    let end = offset + src.len();
    if dst.len() < end {
        dst.resize(end, 0);
    }
    for (d, s) in dst[offset..end].iter_mut().zip(src) {
        *d ^= s;
    }
}

/// Fold one member's `len ++ payload` contribution into a parity buffer.
fn accumulate(parity: &mut BytesMut, payload: &[u8]) {
    xor_into(parity, 0, &(payload.len() as u16).to_be_bytes());
    xor_into(parity, FEC_LENGTH_PREFIX, payload);
}

// ─── Encoder ─────────────────────────────────────────────────────────────────

pub struct FecEncoder {
    group_size: u8,
    group_id: u8,
    index: u8,
    parity: BytesMut,
    data_sent: u64,
    parity_sent: u64,
}

impl FecEncoder {
    /// `group_size` is clamped to `1..=32`.
    pub fn new(group_size: u8) -> Self {
        FecEncoder {
            group_size: group_size.clamp(1, FEC_MAX_GROUP),
            group_id: 0,
            index: 0,
            parity: BytesMut::new(),
            data_sent: 0,
            parity_sent: 0,
        }
    }

    /// Wrap one payload, appending the data packet (and the parity packet
    /// when this closes a group) to `out`.
    pub fn encode(&mut self, payload: &[u8], out: &mut Vec<Bytes>) -> Result<(), FecError> {
        if payload.is_empty() {
            return Err(FecError::Length {
                declared: 0,
                available: 0,
            });
        }
        if payload.len() > MAX_FEC_PAYLOAD {
            return Err(FecError::Oversized(payload.len()));
        }

        let mut packet = BytesMut::with_capacity(FEC_HEADER_LEN + payload.len());
        FecHeader {
            kind: FecKind::Data,
            group_id: self.group_id,
            index: self.index,
            group_size: self.group_size,
            original_len: payload.len() as u16,
        }
        .encode(&mut packet);
        packet.put_slice(payload);
        out.push(packet.freeze());
        self.data_sent += 1;

        accumulate(&mut self.parity, payload);
        self.index += 1;

        if self.index == self.group_size {
            let mut packet = BytesMut::with_capacity(FEC_HEADER_LEN + self.parity.len());
            FecHeader {
                kind: FecKind::Parity,
                group_id: self.group_id,
                index: self.group_size,
                group_size: self.group_size,
                original_len: self.parity.len() as u16,
            }
            .encode(&mut packet);
            packet.put_slice(&self.parity);
            out.push(packet.freeze());
            self.parity_sent += 1;

            self.parity.clear();
            self.index = 0;
            self.group_id = self.group_id.wrapping_add(1);
        }
        Ok(())
    }

    pub fn group_size(&self) -> u8 {
        self.group_size
    }

    /// Members already sent in the open group.
    pub fn pending(&self) -> u8 {
        self.index
    }
}

// ─── Decoder ─────────────────────────────────────────────────────────────────

#[derive(Default)]
struct GroupSlot {
    active: bool,
    group_id: u8,
    group_size: u8,
    /// Bit `i` set once member `i` is held (received or rebuilt).
    received: u32,
    payloads: Vec<Option<Bytes>>,
    parity: Option<Bytes>,
    recovered: bool,
}

impl GroupSlot {
    fn reset(&mut self, group_id: u8, group_size: u8) {
        self.active = true;
        self.group_id = group_id;
        self.group_size = group_size;
        self.received = 0;
        self.payloads.clear();
        self.payloads.resize(group_size as usize, None);
        self.parity = None;
        self.recovered = false;
    }

    fn full_mask(&self) -> u32 {
        if self.group_size >= 32 {
            u32::MAX
        } else {
            (1u32 << self.group_size) - 1
        }
    }

    fn is_complete(&self) -> bool {
        self.received == self.full_mask()
    }

    /// Rebuild the single missing member, if exactly one is missing and the
    /// parity packet is here.
    fn try_recover(&mut self) -> Option<Result<Bytes, FecError>> {
        if self.recovered || self.received.count_ones() + 1 != self.group_size as u32 {
            return None;
        }
        let parity = self.parity.as_ref()?;
        let missing = (!self.received & self.full_mask()).trailing_zeros() as usize;

        let mut buf = BytesMut::from(&parity[..]);
        for payload in self.payloads.iter().flatten() {
            accumulate(&mut buf, payload);
        }
        self.recovered = true;

        if buf.len() < FEC_LENGTH_PREFIX {
            return Some(Err(FecError::Truncated(buf.len())));
        }
        let len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
        let available = buf.len() - FEC_LENGTH_PREFIX;
        if len == 0 || len > available {
            return Some(Err(FecError::Length {
                declared: len,
                available,
            }));
        }
        let payload = buf.split_off(FEC_LENGTH_PREFIX).freeze().slice(..len);

        self.received |= 1 << missing;
        self.payloads[missing] = Some(payload.clone());
        Some(Ok(payload))
    }
}

pub struct FecDecoder {
    slots: [GroupSlot; GROUP_RING_SLOTS],
    /// Slot the next new group id takes.
    next: usize,
    stats: FecStats,
}

impl FecDecoder {
    pub fn new() -> Self {
        FecDecoder {
            slots: Default::default(),
            next: 0,
            stats: FecStats::default(),
        }
    }

    /// Unwrap one inbound packet. Data payloads go to `out` immediately;
    /// a payload rebuilt from parity follows it.
    pub fn decode(&mut self, packet: &[u8], out: &mut Vec<Bytes>) -> Result<(), FecError> {
        let result = self.decode_inner(packet, out);
        if let Err(e) = &result {
            self.stats.malformed += 1;
            debug!(error = %e, len = packet.len(), "dropping FEC packet");
        }
        result
    }

    fn decode_inner(&mut self, packet: &[u8], out: &mut Vec<Bytes>) -> Result<(), FecError> {
        let mut cursor = packet;
        let header = FecHeader::decode(&mut cursor)?;
        let body = &cursor[..header.original_len as usize];

        let slot = self.slot_for(header.group_id, header.group_size)?;
        let slot = &mut self.slots[slot];

        match header.kind {
            FecKind::Data => {
                let bit = 1u32 << header.index;
                if slot.received & bit != 0 {
                    self.stats.duplicates += 1;
                    return Ok(());
                }
                let payload = Bytes::copy_from_slice(body);
                slot.received |= bit;
                slot.payloads[header.index as usize] = Some(payload.clone());
                self.stats.data_packets_received += 1;
                out.push(payload);
            }
            FecKind::Parity => {
                if slot.parity.is_some() {
                    self.stats.duplicates += 1;
                    return Ok(());
                }
                slot.parity = Some(Bytes::copy_from_slice(body));
                self.stats.parity_packets_received += 1;
            }
        }

        match slot.try_recover() {
            Some(Ok(payload)) => {
                self.stats.recovered += 1;
                trace!(
                    group_id = header.group_id,
                    len = payload.len(),
                    "recovered packet from parity"
                );
                out.push(payload);
                Ok(())
            }
            Some(Err(e)) => Err(e),
            None => Ok(()),
        }
    }

    /// Index of the slot tracking `group_id`, recycling the oldest slot
    /// for an id not seen yet.
    fn slot_for(&mut self, group_id: u8, group_size: u8) -> Result<usize, FecError> {
        if let Some(i) = self
            .slots
            .iter()
            .position(|s| s.active && s.group_id == group_id)
        {
            let expected = self.slots[i].group_size;
            if expected != group_size {
                return Err(FecError::GroupMismatch {
                    group_id,
                    expected,
                    got: group_size,
                });
            }
            return Ok(i);
        }

        let i = self.next;
        self.next = (self.next + 1) % GROUP_RING_SLOTS;
        let slot = &mut self.slots[i];
        if slot.active && !slot.is_complete() && !slot.recovered {
            self.stats.evicted_incomplete += 1;
        }
        slot.reset(group_id, group_size);
        Ok(i)
    }

    pub fn stats(&self) -> &FecStats {
        &self.stats
    }
}

impl Default for FecDecoder {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Codec ───────────────────────────────────────────────────────────────────

/// Encoder and decoder for one link direction pair.
pub struct FecCodec {
    encoder: FecEncoder,
    decoder: FecDecoder,
}

impl FecCodec {
    pub fn new(group_size: u8) -> Self {
        FecCodec {
            encoder: FecEncoder::new(group_size),
            decoder: FecDecoder::new(),
        }
    }

    pub fn encode(&mut self, payload: &[u8], out: &mut Vec<Bytes>) -> Result<(), FecError> {
        self.encoder.encode(payload, out)
    }

    pub fn decode(&mut self, packet: &[u8], out: &mut Vec<Bytes>) -> Result<(), FecError> {
        self.decoder.decode(packet, out)
    }

    pub fn stats(&self) -> FecStats {
        FecStats {
            data_packets_sent: self.encoder.data_sent,
            parity_packets_sent: self.encoder.parity_sent,
            ..self.decoder.stats().clone()
        }
    }
}
