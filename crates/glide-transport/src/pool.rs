//! # Segment Pool
//!
//! Slab arena holding every live [`Segment`]. Queues inside the engine store
//! [`SegmentHandle`]s, never segments, so moving a segment between the send
//! queue, the in-flight buffer, and the receive buffers is an index move.
//!
//! Payload buffers are recycled: releasing a segment clears its `BytesMut`
//! and parks it on a spare list (bounded by the pool capacity) so the next
//! acquire reuses the allocation instead of touching the heap.

use bytes::BytesMut;
use slab::Slab;

use crate::wire::Command;

// ─── Segment ─────────────────────────────────────────────────────────────────

/// One ARQ segment plus its retransmission bookkeeping.
#[derive(Debug)]
pub struct Segment {
    pub conv: u32,
    pub cmd: Command,
    pub frg: u8,
    pub wnd: u16,
    pub ts: u32,
    pub sn: u32,
    pub una: u32,
    /// Time at which this segment is due for retransmission.
    pub resend_ts: u32,
    /// Per-segment retransmission timeout in ms.
    pub rto: u32,
    /// ACKs seen for later sequence numbers while this one stayed unacked.
    pub fast_ack: u32,
    /// Number of times this segment has been put on the wire.
    pub xmit: u32,
    pub data: BytesMut,
}

impl Segment {
    fn with_buffer(data: BytesMut) -> Self {
        Segment {
            conv: 0,
            cmd: Command::Push,
            frg: 0,
            wnd: 0,
            ts: 0,
            sn: 0,
            una: 0,
            resend_ts: 0,
            rto: 0,
            fast_ack: 0,
            xmit: 0,
            data,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

// ─── SegmentHandle ───────────────────────────────────────────────────────────

/// Owning reference to a segment in the pool.
///
/// Deliberately neither `Copy` nor `Clone`: whichever queue holds the handle
/// owns the segment, and handing it to another queue moves it.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct SegmentHandle(usize);

// ─── SegmentPool ─────────────────────────────────────────────────────────────

pub struct SegmentPool {
    segments: Slab<Segment>,
    spare: Vec<BytesMut>,
    /// Spare buffers retained for reuse.
    capacity: usize,
    /// Initial capacity of fresh payload buffers.
    buffer_size: usize,
}

impl SegmentPool {
    /// Create a pool that recycles up to `capacity` buffers of `buffer_size`
    /// bytes. The slab itself grows on demand; only recycling is bounded.
    pub fn new(capacity: usize, buffer_size: usize) -> Self {
        SegmentPool {
            segments: Slab::with_capacity(capacity),
            spare: Vec::with_capacity(capacity),
            capacity,
            buffer_size,
        }
    }

    /// Take a fresh segment with an empty payload buffer.
    pub fn acquire(&mut self) -> SegmentHandle {
        let data = self
            .spare
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(self.buffer_size));
        SegmentHandle(self.segments.insert(Segment::with_buffer(data)))
    }

    /// Take a segment whose payload is a copy of `payload`.
    pub fn acquire_with(&mut self, payload: &[u8]) -> SegmentHandle {
        let handle = self.acquire();
        self.segments[handle.0].data.extend_from_slice(payload);
        handle
    }

    /// Return a segment to the pool, recycling its buffer.
    pub fn release(&mut self, handle: SegmentHandle) {
        let mut segment = self.segments.remove(handle.0);
        if self.spare.len() < self.capacity {
            segment.data.clear();
            self.spare.push(segment.data);
        }
    }

    pub fn get(&self, handle: &SegmentHandle) -> &Segment {
        &self.segments[handle.0]
    }

    pub fn get_mut(&mut self, handle: &SegmentHandle) -> &mut Segment {
        &mut self.segments[handle.0]
    }

    /// Segments currently checked out.
    pub fn live(&self) -> usize {
        self.segments.len()
    }

    /// Buffers parked for reuse.
    pub fn spare(&self) -> usize {
        self.spare.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
