//! Deterministic network simulation for glide-transport.
//!
//! Runs two reliability engines against each other through seeded,
//! virtual-time links that drop, duplicate, delay, and reorder datagrams.
//! No sockets and no wall clock, so every run is reproducible from its seed.

pub mod impairment;
pub mod scenario;
