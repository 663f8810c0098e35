//! # Transport Statistics
//!
//! Counter structs for both window roles, JSON-serializable for harness
//! inspection. Permanent skips are first-class here: deliberate loss is a
//! designed outcome that test harnesses must be able to observe, not a
//! hidden fault.

use serde::Serialize;

// ─── Sender Stats ───────────────────────────────────────────────────────────

/// Aggregate sender-side statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SenderStats {
    /// Data frames dispatched for the first time.
    pub packets_sent: u64,
    /// Payload bytes dispatched (original transmissions only).
    pub bytes_sent: u64,
    /// Frames confirmed by cumulative or selective acknowledgment.
    pub packets_acked: u64,
    /// Timer-driven resends.
    pub retransmissions: u64,
    /// Payloads parked in the pending queue because the window was full.
    pub queued: u64,
    /// Payloads rejected because the pending queue was at capacity.
    pub rejected: u64,
    /// Ack frames dropped for failing the checksum.
    pub invalid_acks: u64,
}

impl SenderStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fraction of dispatched frames confirmed so far.
    pub fn ack_ratio(&self) -> f64 {
        if self.packets_sent == 0 {
            0.0
        } else {
            self.packets_acked as f64 / self.packets_sent as f64
        }
    }
}

// ─── Receiver Stats ─────────────────────────────────────────────────────────

/// Aggregate receiver-side statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReceiverStats {
    /// Valid data frames accepted for inspection (includes duplicates).
    pub packets_received: u64,
    /// Payload bytes across accepted frames.
    pub bytes_received: u64,
    /// Frames dropped for failing the checksum.
    pub corrupted: u64,
    /// Frames dropped for falling outside the receive window.
    pub out_of_window: u64,
    /// Accepted frames that overwrote an already-buffered sequence.
    pub duplicates: u64,
    /// Payloads committed to the delivery sink.
    pub delivered: u64,
    /// Sequences permanently abandoned under the loss budget.
    pub skipped: u64,
    /// Ack frames emitted.
    pub acks_sent: u64,
}

impl ReceiverStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empirical delivery ratio: committed / (committed + skipped).
    /// 1.0 until the first sequence is resolved either way.
    pub fn delivered_ratio(&self) -> f64 {
        let resolved = self.delivered + self.skipped;
        if resolved == 0 {
            1.0
        } else {
            self.delivered as f64 / resolved as f64
        }
    }
}
