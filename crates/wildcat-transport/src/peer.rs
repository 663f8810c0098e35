//! # Peer Runtime
//!
//! Wires the pure window state machines to the outside world. The tunnel
//! and the delivery sink are the repository's only external collaborators,
//! modelled as traits here; everything behind them (sockets, simulated
//! impairment, application consumers) lives outside the core.
//!
//! Each peer serializes all mutation of its window under one mutex. Two
//! activities touch the sender's state: inbound acks and the retransmission
//! ticker, a dedicated thread that sweeps deadlines at a quarter of the
//! retransmission timeout. The sweep re-checks in-flight membership under
//! the lock, so cancelling an acknowledged frame always wins the race
//! against a concurrently expiring timer. Tunnel sends happen after the
//! lock is released — frames are collected under the lock, transmitted
//! outside it.
//!
//! Teardown stops the ticker before the window state can be dropped, so no
//! timer fires into a destroyed peer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::anyhow;
use bytes::Bytes;
use quanta::Instant;

use crate::receiver::{ReceiverConfig, ReceiverEvent, ReceiverWindow};
use crate::sender::{SenderConfig, SenderWindow, SubmitOutcome};
use crate::stats::{ReceiverStats, SenderStats};

// ─── Boundary Traits ────────────────────────────────────────────────────────

/// The unreliable channel. `send` is best-effort fire-and-forget: the frame
/// may be dropped, duplicated, reordered, or corrupted in transit, and the
/// call itself never reports delivery.
pub trait Tunnel: Send + Sync {
    fn send(&self, frame: &[u8]);
}

/// The application-facing delivery sink. `commit` is invoked exactly once
/// per payload that is delivered in order or accepted under the loss
/// budget, in commit order; permanently skipped payloads never reach it.
pub trait DeliverySink: Send {
    fn commit(&mut self, payload: Bytes);
}

// ─── Sender Peer ────────────────────────────────────────────────────────────

/// Concurrent sender: a [`SenderWindow`] guarded by a mutex plus the
/// retransmission ticker thread.
pub struct SenderPeer {
    window: Arc<Mutex<SenderWindow>>,
    tunnel: Arc<dyn Tunnel>,
    shutdown: Arc<AtomicBool>,
    ticker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl SenderPeer {
    pub fn new(config: SenderConfig, tunnel: Arc<dyn Tunnel>) -> Self {
        let tick = config.retransmit_timeout / 4;
        let window = Arc::new(Mutex::new(SenderWindow::new(config)));
        let shutdown = Arc::new(AtomicBool::new(false));

        let ticker_window = window.clone();
        let ticker_tunnel = tunnel.clone();
        let ticker_shutdown = shutdown.clone();
        let ticker = thread::Builder::new()
            .name("wildcat-sender-ticker".into())
            .spawn(move || {
                while !ticker_shutdown.load(Ordering::Relaxed) {
                    thread::sleep(tick);
                    let frames: Vec<Bytes> = {
                        let mut window = ticker_window.lock().unwrap();
                        window.poll_retransmits(Instant::now());
                        window.drain_outbound().collect()
                    };
                    for frame in frames {
                        ticker_tunnel.send(&frame);
                    }
                }
            })
            .expect("failed to spawn wildcat sender ticker");

        SenderPeer {
            window,
            tunnel,
            shutdown,
            ticker: Mutex::new(Some(ticker)),
        }
    }

    /// Submit a payload. Never blocks on network conditions: a full window
    /// queues, a full queue reports backpressure.
    pub fn submit(&self, payload: Bytes) -> SubmitOutcome {
        let (outcome, frames) = {
            let mut window = self.window.lock().unwrap();
            let outcome = window.submit(payload, Instant::now());
            let frames: Vec<Bytes> = window.drain_outbound().collect();
            (outcome, frames)
        };
        for frame in frames {
            self.tunnel.send(&frame);
        }
        outcome
    }

    /// Feed an ack frame surfaced by the tunnel. Window advancement may
    /// release queued payloads, which are sent before this returns.
    pub fn on_ack(&self, frame: &[u8]) {
        let frames: Vec<Bytes> = {
            let mut window = self.window.lock().unwrap();
            window.on_ack(frame, Instant::now());
            window.drain_outbound().collect()
        };
        for frame in frames {
            self.tunnel.send(&frame);
        }
    }

    /// Frames sent but not yet confirmed.
    pub fn in_flight(&self) -> usize {
        self.window.lock().unwrap().in_flight()
    }

    /// Payloads parked awaiting window space.
    pub fn queued(&self) -> usize {
        self.window.lock().unwrap().queued()
    }

    /// Nothing outstanding and nothing queued.
    pub fn is_idle(&self) -> bool {
        let window = self.window.lock().unwrap();
        window.in_flight() == 0 && window.queued() == 0
    }

    pub fn stats(&self) -> SenderStats {
        self.window.lock().unwrap().stats().clone()
    }

    /// Stop the ticker and wait for it to exit. Idempotent; also runs on
    /// drop. After this no retransmission can fire.
    pub fn shutdown(&self) -> anyhow::Result<()> {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.ticker.lock().unwrap().take() {
            handle
                .join()
                .map_err(|_| anyhow!("sender ticker thread panicked"))?;
        }
        Ok(())
    }
}

impl Drop for SenderPeer {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

// ─── Receiver Peer ──────────────────────────────────────────────────────────

struct ReceiverShared {
    window: ReceiverWindow,
    sink: Box<dyn DeliverySink>,
}

/// Concurrent receiver: a [`ReceiverWindow`] and its delivery sink behind
/// one mutex. Commits run under the lock — their order is part of the
/// contract — while ack frames are sent after it is released. The receiver
/// owns no timers, so teardown is just dropping it.
pub struct ReceiverPeer {
    shared: Mutex<ReceiverShared>,
    tunnel: Arc<dyn Tunnel>,
}

impl ReceiverPeer {
    pub fn new(config: ReceiverConfig, tunnel: Arc<dyn Tunnel>, sink: Box<dyn DeliverySink>) -> Self {
        ReceiverPeer {
            shared: Mutex::new(ReceiverShared {
                window: ReceiverWindow::new(config),
                sink,
            }),
            tunnel,
        }
    }

    /// Feed a data frame surfaced by the tunnel. Committed payloads reach
    /// the sink before this returns; the resulting ack (if any) is sent on
    /// the way out.
    pub fn on_packet(&self, frame: &[u8]) {
        let acks: Vec<Bytes> = {
            let mut shared = self.shared.lock().unwrap();
            shared.window.on_packet(frame);
            let events: Vec<ReceiverEvent> = shared.window.drain_events().collect();
            let mut acks = Vec::new();
            for event in events {
                match event {
                    ReceiverEvent::Deliver(payload) => shared.sink.commit(payload),
                    ReceiverEvent::Ack(frame) => acks.push(frame),
                }
            }
            acks
        };
        for ack in acks {
            self.tunnel.send(&ack);
        }
    }

    /// Next expected in-order sequence number.
    pub fn base(&self) -> u16 {
        self.shared.lock().unwrap().window.base()
    }

    /// Payloads committed so far.
    pub fn delivered(&self) -> u64 {
        self.shared.lock().unwrap().window.delivered()
    }

    /// Sequences permanently abandoned so far.
    pub fn skipped(&self) -> u64 {
        self.shared.lock().unwrap().window.skipped()
    }

    pub fn stats(&self) -> ReceiverStats {
        self.shared.lock().unwrap().window.stats().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{AckPacket, DataPacket};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    /// Tunnel that records every frame it is asked to send.
    #[derive(Default)]
    struct RecordingTunnel {
        frames: StdMutex<Vec<Bytes>>,
    }

    impl RecordingTunnel {
        fn frames(&self) -> Vec<Bytes> {
            self.frames.lock().unwrap().clone()
        }
    }

    impl Tunnel for RecordingTunnel {
        fn send(&self, frame: &[u8]) {
            self.frames.lock().unwrap().push(Bytes::copy_from_slice(frame));
        }
    }

    #[derive(Clone, Default)]
    struct VecSink {
        committed: Arc<StdMutex<Vec<Bytes>>>,
    }

    impl DeliverySink for VecSink {
        fn commit(&mut self, payload: Bytes) {
            self.committed.lock().unwrap().push(payload);
        }
    }

    fn short_timeout_config() -> SenderConfig {
        SenderConfig {
            window_size: 4,
            retransmit_timeout: Duration::from_millis(40),
            max_queued: 16,
        }
    }

    #[test]
    fn submit_reaches_the_tunnel() {
        let tunnel = Arc::new(RecordingTunnel::default());
        let peer = SenderPeer::new(short_timeout_config(), tunnel.clone());

        peer.submit(Bytes::from_static(b"hello"));
        let frames = tunnel.frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(DataPacket::decode(&frames[0]).unwrap().payload, &b"hello"[..]);
        peer.shutdown().unwrap();
    }

    #[test]
    fn ticker_retransmits_unacked_frames() {
        let tunnel = Arc::new(RecordingTunnel::default());
        let peer = SenderPeer::new(short_timeout_config(), tunnel.clone());

        peer.submit(Bytes::from_static(b"again"));
        thread::sleep(Duration::from_millis(200));
        peer.shutdown().unwrap();

        let frames = tunnel.frames();
        assert!(
            frames.len() >= 2,
            "expected at least one retransmission, saw {} sends",
            frames.len()
        );
        assert!(frames.iter().all(|f| f == &frames[0]), "resends are identical bytes");
    }

    #[test]
    fn ack_stops_the_ticker_resending() {
        let tunnel = Arc::new(RecordingTunnel::default());
        let peer = SenderPeer::new(short_timeout_config(), tunnel.clone());

        peer.submit(Bytes::from_static(b"once"));
        let ack = AckPacket::new(1, Bytes::from_static(&[0])).encode().freeze();
        peer.on_ack(&ack);
        assert!(peer.is_idle());

        let sends_after_ack = tunnel.frames().len();
        thread::sleep(Duration::from_millis(200));
        assert_eq!(
            tunnel.frames().len(),
            sends_after_ack,
            "no retransmission after the ack, even past several timeouts"
        );
        peer.shutdown().unwrap();
    }

    #[test]
    fn shutdown_is_idempotent_and_joins() {
        let tunnel = Arc::new(RecordingTunnel::default());
        let peer = SenderPeer::new(short_timeout_config(), tunnel);
        peer.shutdown().unwrap();
        peer.shutdown().unwrap();
    }

    #[test]
    fn receiver_peer_commits_and_acks() {
        let tunnel = Arc::new(RecordingTunnel::default());
        let sink = VecSink::default();
        let peer = ReceiverPeer::new(
            ReceiverConfig {
                window_size: 4,
                allowed_loss_percent: 0,
            },
            tunnel.clone(),
            Box::new(sink.clone()),
        );

        let frame = DataPacket::new(0, Bytes::from_static(b"payload")).encode();
        peer.on_packet(&frame);

        assert_eq!(sink.committed.lock().unwrap().as_slice(), &[Bytes::from_static(b"payload")]);
        let acks = tunnel.frames();
        assert_eq!(acks.len(), 1);
        assert_eq!(AckPacket::decode(&acks[0]).unwrap().base, 1);
        assert_eq!(peer.delivered(), 1);
    }
}
