//! In-process duplex harness.
//!
//! Wires a [`SenderPeer`] and a [`ReceiverPeer`] back to back through two
//! impaired links — data one way, acks the other — with a pump thread per
//! direction. Payloads go in through [`Harness::submit`]; the committed
//! stream comes out of a [`RecordingSink`], which is the only place
//! correctness is externally observable.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use bytes::Bytes;
use crossbeam_channel::RecvTimeoutError;
use wildcat_transport::peer::{DeliverySink, ReceiverPeer, SenderPeer};
use wildcat_transport::receiver::ReceiverConfig;
use wildcat_transport::sender::{SenderConfig, SubmitOutcome};
use wildcat_transport::stats::{ReceiverStats, SenderStats};

use crate::link::{ImpairmentConfig, LossyLink};

// ─── Recording Sink ─────────────────────────────────────────────────────────

/// Delivery sink that records every committed payload, in commit order.
/// Cloneable — keep one handle for assertions, give the other to the peer.
#[derive(Clone, Default)]
pub struct RecordingSink {
    committed: Arc<Mutex<Vec<Bytes>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the committed stream so far.
    pub fn committed(&self) -> Vec<Bytes> {
        self.committed.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.committed.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DeliverySink for RecordingSink {
    fn commit(&mut self, payload: Bytes) {
        self.committed.lock().unwrap().push(payload);
    }
}

// ─── Harness ────────────────────────────────────────────────────────────────

const PUMP_IDLE: Duration = Duration::from_millis(5);

/// A sender and receiver joined by impaired links, with live timers.
pub struct Harness {
    sender: Arc<SenderPeer>,
    receiver: Arc<ReceiverPeer>,
    sink: RecordingSink,
    data_link: Arc<LossyLink>,
    ack_link: Arc<LossyLink>,
    stop: Arc<AtomicBool>,
    pumps: Vec<thread::JoinHandle<()>>,
}

impl Harness {
    /// Build the duplex pair. `forward` impairs data frames, `reverse`
    /// impairs acks.
    pub fn new(
        sender_config: SenderConfig,
        receiver_config: ReceiverConfig,
        forward: ImpairmentConfig,
        reverse: ImpairmentConfig,
    ) -> Self {
        let (data_link, data_rx) = LossyLink::new(forward);
        let (ack_link, ack_rx) = LossyLink::new(reverse);

        let sink = RecordingSink::new();
        let receiver = Arc::new(ReceiverPeer::new(
            receiver_config,
            ack_link.clone(),
            Box::new(sink.clone()),
        ));
        let sender = Arc::new(SenderPeer::new(sender_config, data_link.clone()));

        let stop = Arc::new(AtomicBool::new(false));
        let mut pumps = Vec::new();

        let rx_peer = receiver.clone();
        let rx_stop = stop.clone();
        pumps.push(
            thread::Builder::new()
                .name("wildcat-sim-data-pump".into())
                .spawn(move || loop {
                    match data_rx.recv_timeout(PUMP_IDLE) {
                        Ok(frame) => rx_peer.on_packet(&frame),
                        Err(RecvTimeoutError::Timeout) => {
                            if rx_stop.load(Ordering::Relaxed) {
                                break;
                            }
                        }
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                })
                .expect("failed to spawn data pump"),
        );

        let tx_peer = sender.clone();
        let tx_stop = stop.clone();
        pumps.push(
            thread::Builder::new()
                .name("wildcat-sim-ack-pump".into())
                .spawn(move || loop {
                    match ack_rx.recv_timeout(PUMP_IDLE) {
                        Ok(frame) => tx_peer.on_ack(&frame),
                        Err(RecvTimeoutError::Timeout) => {
                            if tx_stop.load(Ordering::Relaxed) {
                                break;
                            }
                        }
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                })
                .expect("failed to spawn ack pump"),
        );

        Harness {
            sender,
            receiver,
            sink,
            data_link,
            ack_link,
            stop,
            pumps,
        }
    }

    pub fn submit(&self, payload: Bytes) -> SubmitOutcome {
        self.sender.submit(payload)
    }

    /// Block until the sink holds `count` payloads or the deadline passes.
    /// Returns whether the count was reached.
    pub fn wait_for_commits(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.sink.len() >= count {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        self.sink.len() >= count
    }

    /// Block until the sender has nothing in flight and nothing queued, or
    /// the deadline passes.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.sender.is_idle() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        self.sender.is_idle()
    }

    /// Release any frames the links still hold back for reordering.
    pub fn flush_links(&self) {
        self.data_link.flush();
        self.ack_link.flush();
    }

    pub fn committed(&self) -> Vec<Bytes> {
        self.sink.committed()
    }

    pub fn sender_stats(&self) -> SenderStats {
        self.sender.stats()
    }

    pub fn receiver_stats(&self) -> ReceiverStats {
        self.receiver.stats()
    }

    pub fn skipped(&self) -> u64 {
        self.receiver.skipped()
    }

    /// Ordered teardown: stop the sender's timers first so nothing fires
    /// into the links while the pumps drain out.
    pub fn shutdown(mut self) -> anyhow::Result<()> {
        self.sender.shutdown()?;
        self.stop.store(true, Ordering::Relaxed);
        for pump in self.pumps.drain(..) {
            pump.join().map_err(|_| anyhow!("pump thread panicked"))?;
        }
        Ok(())
    }
}
