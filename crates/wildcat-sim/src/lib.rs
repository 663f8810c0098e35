//! Network simulation toolkit for integration testing.
//!
//! Provides a deterministic, seeded impairment model for the tunnel
//! boundary (loss, duplication, corruption, reordering) and an in-process
//! duplex harness wiring a Wildcat sender peer to a receiver peer, so full
//! timer-driven protocol runs can be exercised without sockets.

pub mod harness;
pub mod link;
