//! # Error Types
//!
//! Every failure the transport can report is a value, never a panic. The
//! split mirrors how callers are expected to react:
//!
//! - [`ProtocolError`] — malformed or foreign input; the offending burst is
//!   abandoned and the engine carries on.
//! - [`SendError`] — the message was not queued; the caller decides whether
//!   to re-fragment, retry, or tear down.
//! - [`RecvError`] — nothing to hand out yet, or the caller's buffer is short.
//! - [`FecError`] — a redundancy packet was structurally invalid and dropped.
//! - [`TransportError`] — socket-level failures and lifecycle misuse.

use std::io;

use thiserror::Error;

// ─── Protocol ────────────────────────────────────────────────────────────────

/// Inbound datagram could not be parsed; the rest of the burst is skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("conversation mismatch: expected {expected:#010x}, got {got:#010x}")]
    ConversationMismatch { expected: u32, got: u32 },
    #[error("truncated header: {remaining} bytes left, need 24")]
    TruncatedHeader { remaining: usize },
    #[error("declared payload length {declared} exceeds remaining {remaining} bytes")]
    TruncatedPayload { declared: usize, remaining: usize },
    #[error("unknown command byte {0}")]
    UnknownCommand(u8),
}

// ─── Send / Recv ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("refusing to send an empty message")]
    Empty,
    /// The message needs at least as many fragments as the receive window
    /// holds, so it could never be reassembled.
    #[error("message needs {fragments} fragments, receive window is {window}")]
    Capacity { fragments: usize, window: usize },
    #[error("link declared dead")]
    DeadLink,
    #[error("transport closed")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecvError {
    #[error("no complete message available")]
    NotReady,
    #[error("buffer too small: message is {needed} bytes")]
    BufferTooSmall { needed: usize },
}

// ─── FEC ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FecError {
    #[error("packet shorter than FEC header ({0} bytes)")]
    Truncated(usize),
    #[error("unknown FEC packet type {0:#04x}")]
    UnknownType(u8),
    #[error("group size {0} out of range 1..=32")]
    GroupSize(u8),
    #[error("index {index} invalid for group size {group_size}")]
    Index { index: u8, group_size: u8 },
    #[error("declared length {declared} inconsistent with {available} payload bytes")]
    Length { declared: usize, available: usize },
    #[error("group {group_id} size changed from {expected} to {got}")]
    GroupMismatch { group_id: u8, expected: u8, got: u8 },
    #[error("payload of {0} bytes exceeds FEC packet limit")]
    Oversized(usize),
}

// ─── Config ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("mtu {0} out of range 50..=65507")]
    Mtu(usize),
    #[error("{0} window out of range 1..=65535")]
    Window(&'static str),
    #[error("FEC group size {0} out of range 2..=32")]
    FecGroupSize(u8),
    #[error("dead link threshold must be non-zero")]
    DeadLink,
    #[error("invalid config: {0}")]
    Parse(String),
}

// ─── Transport ───────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Send(#[from] SendError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("transport already started")]
    AlreadyStarted,
    #[error("no remote address known yet")]
    NoRemote,
}
