//! # Glide Wire Format
//!
//! Two fixed-size headers, both bit-exact with the peer implementation.
//!
//! ## Segment Header (24 bytes, little-endian)
//!
//! ```text
//!  0               4   5   6       8               12
//! +---------------+---+---+-------+---------------+
//! |     conv      |cmd|frg|  wnd  |      ts       |
//! +---------------+---+---+-------+---------------+
//! |      sn       |      una      |      len      |
//! +---------------+---------------+---------------+
//!  12              16              20              24
//! ```
//!
//! Followed by `len` payload bytes. Several segments may be packed back to
//! back in one datagram.
//!
//! ## FEC Header (6 bytes)
//!
//! ```text
//! +------+---------+-------+-----------+------------------+
//! | type | groupId | index | groupSize | originalLen (BE) |
//! +------+---------+-------+-----------+------------------+
//! ```
//!
//! `originalLen` is big-endian, matching the peer's FEC codec.

use bytes::{Buf, BufMut};

use crate::error::{FecError, ProtocolError};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Encoded size of a segment header.
pub const SEGMENT_HEADER_LEN: usize = 24;

/// Encoded size of an FEC header.
pub const FEC_HEADER_LEN: usize = 6;

/// Length prefix XORed into the parity accumulator ahead of each payload.
pub const FEC_LENGTH_PREFIX: usize = 2;

/// Largest FEC group the codec accepts (one bit per member in a `u32`).
pub const FEC_MAX_GROUP: u8 = 32;

// ─── Sequence Arithmetic ─────────────────────────────────────────────────────

/// Signed distance `a - b` in 32-bit sequence space.
///
/// Positive when `a` is ahead of `b`, correct across wraparound as long as
/// the two are within 2^31 of each other.
#[inline]
pub fn seq_diff(a: u32, b: u32) -> i32 {
    a.wrapping_sub(b) as i32
}

/// `a` strictly precedes `b` in sequence space.
#[inline]
pub fn seq_before(a: u32, b: u32) -> bool {
    seq_diff(a, b) < 0
}

// ─── Command ─────────────────────────────────────────────────────────────────

/// Segment command byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// Carries payload.
    Push = 81,
    /// Acknowledges one `sn`, echoing its timestamp.
    Ack = 82,
    /// Asks the peer to report its receive window.
    WindowProbe = 83,
    /// Reports this side's receive window.
    WindowReport = 84,
}

impl Command {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            81 => Some(Command::Push),
            82 => Some(Command::Ack),
            83 => Some(Command::WindowProbe),
            84 => Some(Command::WindowReport),
            _ => None,
        }
    }
}

// ─── Segment Header ──────────────────────────────────────────────────────────

/// Decoded segment header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    pub conv: u32,
    pub cmd: Command,
    /// Fragments still to follow in this message; 0 marks the last one.
    pub frg: u8,
    /// Sender's free receive window, in segments.
    pub wnd: u16,
    /// Millisecond timestamp (echoed back in ACKs).
    pub ts: u32,
    pub sn: u32,
    /// Sender's next expected inbound sequence number.
    pub una: u32,
    pub len: u32,
}

impl SegmentHeader {
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.conv);
        buf.put_u8(self.cmd as u8);
        buf.put_u8(self.frg);
        buf.put_u16_le(self.wnd);
        buf.put_u32_le(self.ts);
        buf.put_u32_le(self.sn);
        buf.put_u32_le(self.una);
        buf.put_u32_le(self.len);
    }

    /// Decode one header and check that its payload is present in `buf`.
    ///
    /// On success `buf` is positioned at the start of the payload. The
    /// conversation id is returned as read; matching it is the caller's job.
    pub fn decode(buf: &mut impl Buf) -> Result<Self, ProtocolError> {
        if buf.remaining() < SEGMENT_HEADER_LEN {
            return Err(ProtocolError::TruncatedHeader {
                remaining: buf.remaining(),
            });
        }

        let conv = buf.get_u32_le();
        let cmd_byte = buf.get_u8();
        let frg = buf.get_u8();
        let wnd = buf.get_u16_le();
        let ts = buf.get_u32_le();
        let sn = buf.get_u32_le();
        let una = buf.get_u32_le();
        let len = buf.get_u32_le();

        if len as usize > buf.remaining() {
            return Err(ProtocolError::TruncatedPayload {
                declared: len as usize,
                remaining: buf.remaining(),
            });
        }
        let cmd = Command::from_byte(cmd_byte).ok_or(ProtocolError::UnknownCommand(cmd_byte))?;

        Ok(SegmentHeader {
            conv,
            cmd,
            frg,
            wnd,
            ts,
            sn,
            una,
            len,
        })
    }
}

// ─── FEC Header ──────────────────────────────────────────────────────────────

/// Whether an FEC-wrapped packet carries source data or group parity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FecKind {
    Data = 0x01,
    Parity = 0x02,
}

impl FecKind {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(FecKind::Data),
            0x02 => Some(FecKind::Parity),
            _ => None,
        }
    }
}

/// Header prefixed to every FEC-wrapped packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FecHeader {
    pub kind: FecKind,
    /// Group counter, wraps at 256.
    pub group_id: u8,
    /// Position in the group; parity packets carry `group_size`.
    pub index: u8,
    pub group_size: u8,
    /// Payload length for data, accumulated parity length for parity.
    pub original_len: u16,
}

impl FecHeader {
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.kind as u8);
        buf.put_u8(self.group_id);
        buf.put_u8(self.index);
        buf.put_u8(self.group_size);
        buf.put_u16(self.original_len);
    }

    /// Decode and structurally validate a header.
    ///
    /// Checks the type byte, the group-size range, the index against the
    /// group size, and that `original_len` fits in the remaining payload.
    pub fn decode(buf: &mut impl Buf) -> Result<Self, FecError> {
        if buf.remaining() < FEC_HEADER_LEN {
            return Err(FecError::Truncated(buf.remaining()));
        }
        let kind_byte = buf.get_u8();
        let group_id = buf.get_u8();
        let index = buf.get_u8();
        let group_size = buf.get_u8();
        let original_len = buf.get_u16();

        let kind = FecKind::from_byte(kind_byte).ok_or(FecError::UnknownType(kind_byte))?;
        if group_size == 0 || group_size > FEC_MAX_GROUP {
            return Err(FecError::GroupSize(group_size));
        }
        let index_ok = match kind {
            FecKind::Data => index < group_size,
            FecKind::Parity => index == group_size,
        };
        if !index_ok {
            return Err(FecError::Index { index, group_size });
        }
        if original_len == 0 || original_len as usize > buf.remaining() {
            return Err(FecError::Length {
                declared: original_len as usize,
                available: buf.remaining(),
            });
        }

        Ok(FecHeader {
            kind,
            group_id,
            index,
            group_size,
            original_len,
        })
    }
}
