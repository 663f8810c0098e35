//! # wildcat-transport
//!
//! Wildcat: a reliable, loss-tolerant byte-stream transport over an
//! unreliable, unordered, corrupting datagram tunnel.
//!
//! A miniature selective-repeat ARQ protocol on 16-bit wrapping sequence
//! numbers — CRC-trailed frames, sliding transmission/reception windows,
//! cumulative + selective acknowledgment, timer-driven retransmission —
//! with one twist over strict TCP-style reliability: the receiver may
//! permanently skip a bounded number of missing packets to keep its
//! empirical delivery ratio above an operator-configured floor.
//!
//! ## Crate structure
//!
//! - [`seq`] — 16-bit modular sequence arithmetic
//! - [`wire`] — data/ack frame codecs and the shared checksum
//! - [`pool`] — slab-based in-flight frame pool with deadlines
//! - [`sender`] — sender window state machine
//! - [`receiver`] — receiver window state machine + loss-budget skip
//! - [`peer`] — tunnel/sink boundary traits and the concurrent peers
//! - [`stats`] — per-role counters

pub mod peer;
pub mod pool;
pub mod receiver;
pub mod sender;
pub mod seq;
pub mod stats;
pub mod wire;
