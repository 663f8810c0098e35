//! # Sender Window
//!
//! Pure logic — no I/O, no threads. Accepts application payloads, assigns
//! 16-bit wrapping sequence numbers, frames and checksums them, tracks the
//! in-flight set against the receiver's advertised window, interprets
//! cumulative + selective acknowledgments, and re-queues frames whose
//! retransmission deadline has passed. Outbound frames accumulate in a queue
//! the runtime drains to the tunnel.
//!
//! ## Responsibilities
//!
//! 1. **Admission**: a payload enters the window only while its sequence
//!    number falls inside `[receiver_base, receiver_base + window_size)`;
//!    otherwise it waits in a bounded FIFO queue
//! 2. **Framing**: sequence assignment + wire encoding
//! 3. **Ack processing**: advance on the cumulative base, retire individual
//!    sequences from the selective bitmap, then drain the pending queue
//! 4. **Retransmission**: unbounded fixed-interval retry, no backoff — the
//!    loss budget lives on the receiver side, not here
//!
//! The sender never blocks: admission failure queues, queue exhaustion is
//! reported as backpressure.

use bytes::Bytes;
use quanta::Instant;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::pool::{InflightFrame, RetransmitHandle, RetransmitPool};
use crate::seq;
use crate::stats::SenderStats;
use crate::wire::{frame_is_valid, AckPacket, DataPacket};

// ─── Configuration ──────────────────────────────────────────────────────────

/// Sender configuration parameters.
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Frames that may be outstanding at once. Must be in `1..32768` so the
    /// half-range sequence comparison stays sound.
    pub window_size: u16,
    /// Fixed per-frame retransmission interval.
    pub retransmit_timeout: Duration,
    /// Payloads the pending queue holds before `submit` signals backpressure.
    pub max_queued: usize,
}

impl Default for SenderConfig {
    fn default() -> Self {
        SenderConfig {
            window_size: 32,
            retransmit_timeout: Duration::from_millis(500),
            max_queued: 1024,
        }
    }
}

// ─── Submit Outcome ─────────────────────────────────────────────────────────

/// What happened to a payload handed to [`SenderWindow::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Dispatched immediately under this sequence number.
    Sent(u16),
    /// Window full — parked in the pending queue, sent once space frees.
    Queued,
    /// Pending queue at capacity — payload dropped, caller must retry.
    QueueFull,
}

// ─── Sender Window ──────────────────────────────────────────────────────────

/// Sender protocol state machine.
pub struct SenderWindow {
    config: SenderConfig,
    /// Next sequence number to assign, monotonic mod 2^16.
    next_seq: u16,
    /// Last known receiver cumulative base.
    receiver_base: u16,
    pool: RetransmitPool,
    /// Sequence → pool handle for ack-driven retirement.
    inflight: HashMap<u16, RetransmitHandle>,
    /// Payloads awaiting window space, FIFO.
    queue: VecDeque<Bytes>,
    /// Wire frames ready for the tunnel.
    outbound: VecDeque<Bytes>,
    stats: SenderStats,
}

impl SenderWindow {
    /// Create a sender starting at sequence number 0.
    pub fn new(config: SenderConfig) -> Self {
        Self::with_initial_sequence(config, 0)
    }

    /// Create a sender whose sequence space begins at `start`. The peer
    /// receiver must be constructed with the same initial base.
    pub fn with_initial_sequence(config: SenderConfig, start: u16) -> Self {
        assert!(
            config.window_size > 0 && config.window_size < seq::HALF_RANGE,
            "window_size must be in 1..32768"
        );
        assert!(
            config.retransmit_timeout > Duration::ZERO,
            "retransmit_timeout must be positive"
        );
        let pool = RetransmitPool::new(config.window_size as usize);
        SenderWindow {
            config,
            next_seq: start,
            receiver_base: start,
            pool,
            inflight: HashMap::new(),
            queue: VecDeque::new(),
            outbound: VecDeque::new(),
            stats: SenderStats::default(),
        }
    }

    /// Submit a payload for transmission. Never blocks: a full window parks
    /// the payload in the pending queue, a full queue rejects it.
    pub fn submit(&mut self, payload: Bytes, now: Instant) -> SubmitOutcome {
        if self.is_full() {
            if self.queue.len() >= self.config.max_queued {
                self.stats.rejected += 1;
                warn!(queued = self.queue.len(), "pending queue full, rejecting payload");
                return SubmitOutcome::QueueFull;
            }
            self.queue.push_back(payload);
            self.stats.queued += 1;
            return SubmitOutcome::Queued;
        }
        SubmitOutcome::Sent(self.dispatch(payload, now))
    }

    /// Whether the next unsent sequence number would fall outside the
    /// receiver's advertised window.
    pub fn is_full(&self) -> bool {
        let limit = self.receiver_base.wrapping_add(self.config.window_size);
        !seq::is_ahead(limit, self.next_seq)
    }

    /// Process an acknowledgment frame from the tunnel.
    ///
    /// Corrupt frames are dropped with no state change — indistinguishable
    /// from a lost ack, and the retransmission timer is the recovery path.
    /// Bitmap bits naming untracked sequences are ignored; late and
    /// duplicate acks are expected under retransmission.
    pub fn on_ack(&mut self, frame: &[u8], now: Instant) {
        if !frame_is_valid(frame) {
            self.stats.invalid_acks += 1;
            debug!("dropping corrupt ack frame");
            return;
        }
        let ack = match AckPacket::decode(frame) {
            Some(ack) => ack,
            None => {
                self.stats.invalid_acks += 1;
                return;
            }
        };

        // Cumulative advance: everything before the new base is resolved at
        // the receiver — delivered or permanently skipped — so its timers
        // are cancelled whether or not an individual ack ever arrived.
        if seq::is_ahead(ack.base, self.receiver_base) {
            let mut s = self.receiver_base;
            while s != ack.base {
                self.retire(s);
                s = s.wrapping_add(1);
            }
            self.receiver_base = ack.base;
        }

        // Selective bits: recover frames that reached the receiver out of
        // order even when the ack that first reported them was lost.
        for i in ack.set_offsets(self.config.window_size) {
            self.retire(ack.base.wrapping_add(i));
        }

        self.drain_queue(now);
    }

    /// Re-send every frame whose deadline has passed and re-arm it.
    /// Returns the number of frames queued for retransmission.
    pub fn poll_retransmits(&mut self, now: Instant) -> usize {
        let deadline = now + self.config.retransmit_timeout;
        let mut resent = 0;
        for handle in self.pool.due(now) {
            // Membership in the pool is re-checked here by construction: a
            // sequence retired since the sweep began yields no frame.
            if let Some(frame) = self.pool.rearm(handle, deadline) {
                trace!("retransmitting frame");
                self.outbound.push_back(frame);
                self.stats.retransmissions += 1;
                resent += 1;
            }
        }
        resent
    }

    /// Hand accumulated wire frames to the caller for transmission.
    pub fn drain_outbound(&mut self) -> impl Iterator<Item = Bytes> + '_ {
        self.outbound.drain(..)
    }

    // ─── Accessors ──────────────────────────────────────────────────────

    /// Frames sent but not yet confirmed.
    pub fn in_flight(&self) -> usize {
        self.inflight.len()
    }

    /// Payloads parked awaiting window space.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Next sequence number that will be assigned.
    pub fn next_sequence(&self) -> u16 {
        self.next_seq
    }

    /// Last cumulative base reported by the receiver.
    pub fn receiver_base(&self) -> u16 {
        self.receiver_base
    }

    pub fn stats(&self) -> &SenderStats {
        &self.stats
    }

    // ─── Internal ───────────────────────────────────────────────────────

    /// Assign the next sequence number, frame the payload, arm its
    /// retransmission deadline, and queue the frame for the tunnel.
    fn dispatch(&mut self, payload: Bytes, now: Instant) -> u16 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);

        let payload_len = payload.len() as u64;
        let frame = DataPacket::new(seq, payload).encode().freeze();

        let entry = InflightFrame {
            seq,
            frame: frame.clone(),
            deadline: now + self.config.retransmit_timeout,
            retries: 0,
        };
        // Admission keeps the in-flight count within the window, which is
        // exactly the pool's capacity.
        if let Some(handle) = self.pool.insert(entry) {
            self.inflight.insert(seq, handle);
        }

        self.stats.packets_sent += 1;
        self.stats.bytes_sent += payload_len;
        trace!(seq, "dispatching data frame");
        self.outbound.push_back(frame);
        seq
    }

    /// Confirm a sequence: drop it from the in-flight set and cancel its
    /// retransmission. Unknown sequences are a no-op.
    fn retire(&mut self, seq: u16) {
        if let Some(handle) = self.inflight.remove(&seq) {
            self.pool.remove(handle);
            self.stats.packets_acked += 1;
        }
    }

    /// Promote queued payloads while the window has room, oldest first.
    fn drain_queue(&mut self, now: Instant) {
        while !self.is_full() {
            match self.queue.pop_front() {
                Some(payload) => {
                    self.dispatch(payload, now);
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{ack_bitmap_len, set_bitmap_bit};

    fn test_config(window: u16) -> SenderConfig {
        SenderConfig {
            window_size: window,
            retransmit_timeout: Duration::from_millis(500),
            max_queued: 8,
        }
    }

    /// Helper: a valid ack frame for the given base and set offsets.
    fn make_ack(window: u16, base: u16, offsets: &[u16]) -> Bytes {
        let mut bitmap = vec![0u8; ack_bitmap_len(window)];
        for &i in offsets {
            set_bitmap_bit(&mut bitmap, i);
        }
        AckPacket::new(base, Bytes::from(bitmap)).encode().freeze()
    }

    fn payload(tag: u8) -> Bytes {
        Bytes::from(vec![tag; 16])
    }

    // ─── Submission & Admission ─────────────────────────────────────────

    #[test]
    fn submit_assigns_monotonic_sequences() {
        let now = Instant::now();
        let mut tx = SenderWindow::new(test_config(8));
        for i in 0..4u8 {
            assert_eq!(tx.submit(payload(i), now), SubmitOutcome::Sent(i as u16));
        }
        assert_eq!(tx.next_sequence(), 4);
        assert_eq!(tx.in_flight(), 4);

        let frames: Vec<Bytes> = tx.drain_outbound().collect();
        assert_eq!(frames.len(), 4);
        for (i, f) in frames.iter().enumerate() {
            assert!(frame_is_valid(f));
            assert_eq!(DataPacket::decode(f).unwrap().seq, i as u16);
        }
    }

    #[test]
    fn submit_queues_when_window_full() {
        let now = Instant::now();
        let mut tx = SenderWindow::new(test_config(2));
        assert_eq!(tx.submit(payload(0), now), SubmitOutcome::Sent(0));
        assert_eq!(tx.submit(payload(1), now), SubmitOutcome::Sent(1));
        assert!(tx.is_full());

        assert_eq!(tx.submit(payload(2), now), SubmitOutcome::Queued);
        assert_eq!(tx.queued(), 1);
        // Nothing beyond the two admitted frames left the window.
        assert_eq!(tx.drain_outbound().count(), 2);
    }

    #[test]
    fn submit_rejects_when_queue_full() {
        let now = Instant::now();
        let mut tx = SenderWindow::new(SenderConfig {
            max_queued: 1,
            ..test_config(1)
        });
        tx.submit(payload(0), now);
        assert_eq!(tx.submit(payload(1), now), SubmitOutcome::Queued);
        assert_eq!(tx.submit(payload(2), now), SubmitOutcome::QueueFull);
        assert_eq!(tx.stats().rejected, 1);
    }

    // ─── Ack Processing ─────────────────────────────────────────────────

    #[test]
    fn cumulative_ack_retires_and_advances() {
        let now = Instant::now();
        let mut tx = SenderWindow::new(test_config(4));
        for i in 0..4u8 {
            tx.submit(payload(i), now);
        }
        tx.drain_outbound().for_each(drop);

        tx.on_ack(&make_ack(4, 3, &[]), now);
        assert_eq!(tx.receiver_base(), 3);
        assert_eq!(tx.in_flight(), 1); // seq 3 still out
        assert_eq!(tx.stats().packets_acked, 3);
    }

    #[test]
    fn selective_bits_retire_individual_frames() {
        let now = Instant::now();
        let mut tx = SenderWindow::new(test_config(8));
        for i in 0..5u8 {
            tx.submit(payload(i), now);
        }
        tx.drain_outbound().for_each(drop);

        // Receiver still waits on 0 but has buffered 2 and 4.
        tx.on_ack(&make_ack(8, 0, &[2, 4]), now);
        assert_eq!(tx.receiver_base(), 0);
        assert_eq!(tx.in_flight(), 3); // 0, 1, 3 remain
    }

    #[test]
    fn corrupt_ack_is_ignored() {
        let now = Instant::now();
        let mut tx = SenderWindow::new(test_config(4));
        tx.submit(payload(0), now);
        tx.drain_outbound().for_each(drop);

        let mut ack = make_ack(4, 1, &[]).to_vec();
        ack[0] ^= 0x40;
        tx.on_ack(&ack, now);
        assert_eq!(tx.in_flight(), 1);
        assert_eq!(tx.receiver_base(), 0);
        assert_eq!(tx.stats().invalid_acks, 1);
    }

    #[test]
    fn stale_ack_does_not_move_base_backwards() {
        let now = Instant::now();
        let mut tx = SenderWindow::new(test_config(4));
        for i in 0..3u8 {
            tx.submit(payload(i), now);
        }
        tx.drain_outbound().for_each(drop);

        tx.on_ack(&make_ack(4, 3, &[]), now);
        assert_eq!(tx.receiver_base(), 3);

        // A late ack from before the advance changes nothing.
        tx.on_ack(&make_ack(4, 1, &[]), now);
        assert_eq!(tx.receiver_base(), 3);
    }

    #[test]
    fn ack_for_untracked_sequence_is_ignored() {
        let now = Instant::now();
        let mut tx = SenderWindow::new(test_config(8));
        tx.submit(payload(0), now);
        tx.drain_outbound().for_each(drop);

        // Bits for sequences never sent.
        tx.on_ack(&make_ack(8, 0, &[5, 6]), now);
        assert_eq!(tx.in_flight(), 1);
        assert_eq!(tx.stats().packets_acked, 0);
    }

    // ─── Queue Drain ────────────────────────────────────────────────────

    #[test]
    fn queued_payloads_drain_fifo_after_ack() {
        let now = Instant::now();
        let mut tx = SenderWindow::new(test_config(2));
        for i in 0..5u8 {
            tx.submit(payload(i), now);
        }
        assert_eq!(tx.queued(), 3);
        tx.drain_outbound().for_each(drop);

        // Receiver consumed 0 and 1: window slides by two, two queued
        // payloads go out in submission order.
        tx.on_ack(&make_ack(2, 2, &[]), now);
        assert_eq!(tx.queued(), 1);

        let frames: Vec<Bytes> = tx.drain_outbound().collect();
        let seqs: Vec<u16> = frames
            .iter()
            .map(|f| DataPacket::decode(f).unwrap().seq)
            .collect();
        assert_eq!(seqs, vec![2, 3]);
        let bodies: Vec<u8> = frames
            .iter()
            .map(|f| DataPacket::decode(f).unwrap().payload[0])
            .collect();
        assert_eq!(bodies, vec![2, 3]);
    }

    // ─── Retransmission ─────────────────────────────────────────────────

    #[test]
    fn timeout_resends_same_bytes() {
        let now = Instant::now();
        let mut tx = SenderWindow::new(test_config(4));
        tx.submit(payload(7), now);
        let original: Vec<Bytes> = tx.drain_outbound().collect();

        assert_eq!(tx.poll_retransmits(now), 0, "deadline not reached yet");

        let later = now + Duration::from_millis(600);
        assert_eq!(tx.poll_retransmits(later), 1);
        let resent: Vec<Bytes> = tx.drain_outbound().collect();
        assert_eq!(resent, original);
        assert_eq!(tx.stats().retransmissions, 1);
    }

    #[test]
    fn retry_is_unbounded() {
        let mut now = Instant::now();
        let mut tx = SenderWindow::new(test_config(4));
        tx.submit(payload(0), now);
        tx.drain_outbound().for_each(drop);

        for _ in 0..10 {
            now = now + Duration::from_millis(600);
            assert_eq!(tx.poll_retransmits(now), 1);
            tx.drain_outbound().for_each(drop);
        }
        assert_eq!(tx.stats().retransmissions, 10);
    }

    #[test]
    fn ack_cancels_pending_retransmission() {
        let now = Instant::now();
        let mut tx = SenderWindow::new(test_config(4));
        tx.submit(payload(0), now);
        tx.submit(payload(1), now);
        tx.drain_outbound().for_each(drop);

        tx.on_ack(&make_ack(4, 0, &[1]), now); // selective bit for seq 1

        let far = now + Duration::from_secs(10);
        assert_eq!(tx.poll_retransmits(far), 1, "only seq 0 may fire");
        let frames: Vec<Bytes> = tx.drain_outbound().collect();
        assert_eq!(DataPacket::decode(&frames[0]).unwrap().seq, 0);
    }

    // ─── Wraparound ─────────────────────────────────────────────────────

    #[test]
    fn admission_survives_sequence_wraparound() {
        let now = Instant::now();
        let mut tx = SenderWindow::with_initial_sequence(test_config(4), 65534);
        for i in 0..4u8 {
            assert!(matches!(tx.submit(payload(i), now), SubmitOutcome::Sent(_)));
        }
        assert_eq!(tx.next_sequence(), 2); // wrapped past 65535
        assert!(tx.is_full());
        assert_eq!(tx.submit(payload(9), now), SubmitOutcome::Queued);

        // Base advances across the wrap boundary.
        tx.on_ack(&make_ack(4, 1, &[]), now);
        assert_eq!(tx.receiver_base(), 1);
        assert_eq!(tx.in_flight(), 2); // 1 and the queued payload at 2
        assert_eq!(tx.queued(), 0);
    }
}
