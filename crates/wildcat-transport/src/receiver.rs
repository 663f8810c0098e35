//! # Receiver Window
//!
//! Pure logic — no I/O, no threads. Accepts raw frames from the tunnel,
//! validates and window-checks them, buffers out-of-order arrivals, drains
//! contiguous runs to the delivery sink, and — distinguishing Wildcat from
//! strict TCP-style reliability — may permanently abandon a bounded number
//! of missing sequences to keep the empirical delivery ratio above the
//! configured floor rather than stalling on a gap forever.
//!
//! Commits and acks are emitted as [`ReceiverEvent`]s for the runtime to
//! drain; every accepted frame produces exactly one ack reflecting the
//! post-processing state.

use bytes::Bytes;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::seq;
use crate::stats::ReceiverStats;
use crate::wire::{ack_bitmap_len, frame_is_valid, set_bitmap_bit, AckPacket, DataPacket};

// ─── Configuration ──────────────────────────────────────────────────────────

/// Receiver configuration parameters.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Sequences the reassembly buffer accepts ahead of the base. Must match
    /// the sender's window and stay in `1..32768`.
    pub window_size: u16,
    /// Loss tolerance in percent, `0..=100`. Zero means strict in-order
    /// delivery; higher values let the receiver skip missing sequences while
    /// the delivered/attempted ratio stays at or above `100 - this`.
    pub allowed_loss_percent: u8,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        ReceiverConfig {
            window_size: 32,
            allowed_loss_percent: 0,
        }
    }
}

// ─── Events ─────────────────────────────────────────────────────────────────

/// Events the receiver generates for the runtime layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiverEvent {
    /// A payload is committed — hand it to the delivery sink, in this order.
    Deliver(Bytes),
    /// An encoded ack frame — hand it to the tunnel.
    Ack(Bytes),
}

// ─── Receiver Window ────────────────────────────────────────────────────────

/// Receiver protocol state machine.
pub struct ReceiverWindow {
    config: ReceiverConfig,
    /// Next expected in-order sequence number.
    base: u16,
    /// Out-of-order arrivals within the window, sparse.
    buffer: HashMap<u16, Bytes>,
    /// Payloads committed over the session, input to the loss budget.
    success_count: u64,
    /// Sequences permanently abandoned over the session.
    fail_count: u64,
    events: Vec<ReceiverEvent>,
    stats: ReceiverStats,
}

impl ReceiverWindow {
    /// Create a receiver expecting sequence number 0 first.
    pub fn new(config: ReceiverConfig) -> Self {
        Self::with_initial_base(config, 0)
    }

    /// Create a receiver whose window starts at `base`. The peer sender must
    /// be constructed with the same initial sequence.
    pub fn with_initial_base(config: ReceiverConfig, base: u16) -> Self {
        assert!(
            config.window_size > 0 && config.window_size < seq::HALF_RANGE,
            "window_size must be in 1..32768"
        );
        assert!(
            config.allowed_loss_percent <= 100,
            "allowed_loss_percent must be 0..=100"
        );
        ReceiverWindow {
            config,
            base,
            buffer: HashMap::new(),
            success_count: 0,
            fail_count: 0,
            events: Vec::new(),
            stats: ReceiverStats::default(),
        }
    }

    /// Process a raw frame from the tunnel.
    ///
    /// Corrupt and out-of-window frames are dropped silently — no ack is
    /// produced for them, and the sender's timer is the recovery path.
    pub fn on_packet(&mut self, frame: &[u8]) {
        if !frame_is_valid(frame) {
            self.stats.corrupted += 1;
            debug!("dropping corrupt data frame");
            return;
        }
        let pkt = match DataPacket::decode(frame) {
            Some(pkt) => pkt,
            None => {
                self.stats.corrupted += 1;
                return;
            }
        };

        if !seq::in_window(self.base, pkt.seq, self.config.window_size) {
            // Rejects stale retransmits behind the window and anything too
            // far ahead, in one forward-distance check.
            self.stats.out_of_window += 1;
            debug!(seq = pkt.seq, base = self.base, "dropping frame outside the receive window");
            return;
        }

        self.stats.packets_received += 1;
        self.stats.bytes_received += pkt.payload.len() as u64;
        if self.buffer.insert(pkt.seq, pkt.payload).is_some() {
            self.stats.duplicates += 1;
        }

        self.process_window();

        let ack = self.build_ack();
        self.stats.acks_sent += 1;
        self.events.push(ReceiverEvent::Ack(ack));
    }

    /// Drain accumulated events, in commit order.
    pub fn drain_events(&mut self) -> impl Iterator<Item = ReceiverEvent> + '_ {
        self.events.drain(..)
    }

    // ─── Accessors ──────────────────────────────────────────────────────

    /// Next expected in-order sequence number.
    pub fn base(&self) -> u16 {
        self.base
    }

    /// Out-of-order payloads currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Payloads committed so far.
    pub fn delivered(&self) -> u64 {
        self.success_count
    }

    /// Sequences permanently abandoned so far.
    pub fn skipped(&self) -> u64 {
        self.fail_count
    }

    /// Empirical delivery ratio over everything resolved so far.
    pub fn delivered_ratio(&self) -> f64 {
        self.stats.delivered_ratio()
    }

    pub fn stats(&self) -> &ReceiverStats {
        &self.stats
    }

    // ─── Delivery State Machine ─────────────────────────────────────────

    /// Advance the delivery frontier as far as the buffer and the loss
    /// budget allow.
    ///
    /// Phase 1 drains the contiguous run at `base`. Phase 2 looks up to
    /// `max_skippable()` sequences ahead for a buffered frame; finding one
    /// at offset `i` permanently abandons the `i` missing sequences before
    /// it, commits it, and starts over — the jump may have exposed a new
    /// contiguous run or a further skip.
    fn process_window(&mut self) {
        loop {
            while let Some(payload) = self.buffer.remove(&self.base) {
                self.commit(payload);
                self.base = self.base.wrapping_add(1);
            }

            let budget = self.max_skippable();
            let mut advanced = false;
            for i in 1..=budget {
                let probe = self.base.wrapping_add(i);
                if let Some(payload) = self.buffer.remove(&probe) {
                    warn!(
                        missing = i,
                        base = self.base,
                        "abandoning missing sequences under the loss budget"
                    );
                    self.fail_count += u64::from(i);
                    self.stats.skipped += u64::from(i);
                    self.commit(payload);
                    self.base = probe.wrapping_add(1);
                    advanced = true;
                    break;
                }
            }
            if !advanced {
                break;
            }
        }
    }

    /// The largest number of additional failures the running delivery ratio
    /// can absorb while staying above the configured floor.
    ///
    /// This is the monotonic budget check from the protocol definition,
    /// evaluated against session-lifetime totals, with two bounds the
    /// literal formula needs: the probe never reaches past the window (the
    /// buffer cannot hold anything further out), and at a floor of zero the
    /// uncapped loop would never terminate.
    fn max_skippable(&self) -> u16 {
        let floor = f64::from(100 - u16::from(self.config.allowed_loss_percent)) / 100.0;
        let success = self.success_count as f64;
        let mut count: u16 = 0;
        while count < self.config.window_size {
            let attempted = (self.success_count + self.fail_count + u64::from(count) + 1) as f64;
            if success / attempted > floor {
                count += 1;
            } else {
                break;
            }
        }
        count
    }

    fn commit(&mut self, payload: Bytes) {
        self.success_count += 1;
        self.stats.delivered += 1;
        self.events.push(ReceiverEvent::Deliver(payload));
    }

    /// Encode an ack for the current base and buffer contents. Bitmap bit
    /// `i` is a pure offset from `base`, independent of wraparound.
    fn build_ack(&self) -> Bytes {
        let mut bitmap = vec![0u8; ack_bitmap_len(self.config.window_size)];
        for i in 0..self.config.window_size {
            if self.buffer.contains_key(&self.base.wrapping_add(i)) {
                set_bitmap_bit(&mut bitmap, i);
            }
        }
        AckPacket::new(self.base, Bytes::from(bitmap)).encode().freeze()
    }
}
