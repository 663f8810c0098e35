//! Impaired in-process links.
//!
//! A [`LossyLink`] stands in for the unreliable channel: frames pushed into
//! its [`Tunnel::send`] may be dropped, duplicated, bit-flipped, or swapped
//! with a neighbour before landing on the delivery channel. All impairment
//! decisions come from a seeded RNG, so a given seed reproduces the exact
//! same fault sequence.

use bytes::Bytes;
use crossbeam_channel::{unbounded, Receiver, Sender};
use rand::rngs::StdRng;
use rand::Rng;
use rand::RngExt as _;
use rand::SeedableRng;
use std::sync::{Arc, Mutex};
use tracing::trace;
use wildcat_transport::peer::Tunnel;

/// Probabilities for each impairment applied to a frame in transit.
#[derive(Debug, Clone)]
pub struct ImpairmentConfig {
    /// RNG seed; one seed, one fault sequence.
    pub seed: u64,
    /// Chance a frame vanishes entirely.
    pub loss: f64,
    /// Chance a frame arrives twice.
    pub duplicate: f64,
    /// Chance a single random bit of the frame flips.
    pub corrupt: f64,
    /// Chance a frame is held back and swapped with the next one through.
    pub reorder: f64,
}

impl Default for ImpairmentConfig {
    fn default() -> Self {
        ImpairmentConfig {
            seed: 0,
            loss: 0.0,
            duplicate: 0.0,
            corrupt: 0.0,
            reorder: 0.0,
        }
    }
}

struct LinkState {
    rng: StdRng,
    held: Option<Bytes>,
}

/// A unidirectional impaired link. The sending half implements [`Tunnel`];
/// the receiving half is a plain channel the harness pumps.
pub struct LossyLink {
    config: ImpairmentConfig,
    tx: Sender<Bytes>,
    state: Mutex<LinkState>,
}

impl LossyLink {
    /// Build a link, returning its tunnel half and delivery channel.
    pub fn new(config: ImpairmentConfig) -> (Arc<Self>, Receiver<Bytes>) {
        let (tx, rx) = unbounded();
        let state = LinkState {
            rng: StdRng::seed_from_u64(config.seed),
            held: None,
        };
        (
            Arc::new(LossyLink {
                config,
                tx,
                state: Mutex::new(state),
            }),
            rx,
        )
    }

    /// Release a frame still held back for reordering, if any. Call when a
    /// scenario ends so nothing stays stuck in the link.
    pub fn flush(&self) {
        let held = self.state.lock().unwrap().held.take();
        if let Some(frame) = held {
            let _ = self.tx.send(frame);
        }
    }
}

impl Tunnel for LossyLink {
    fn send(&self, frame: &[u8]) {
        let mut state = self.state.lock().unwrap();

        if state.rng.random::<f64>() < self.config.loss {
            trace!(len = frame.len(), "link dropped a frame");
            return;
        }

        let mut frame = Bytes::copy_from_slice(frame);
        if !frame.is_empty() && state.rng.random::<f64>() < self.config.corrupt {
            let mut bytes = frame.to_vec();
            let bit = state.rng.random_range(0..bytes.len() * 8);
            bytes[bit / 8] ^= 1 << (bit % 8);
            frame = Bytes::from(bytes);
            trace!(bit, "link flipped a bit");
        }

        if state.rng.random::<f64>() < self.config.reorder {
            // Hold this frame; whatever was already held goes out instead.
            if let Some(prev) = state.held.replace(frame) {
                let _ = self.tx.send(prev);
            }
            return;
        }

        let duplicate = state.rng.random::<f64>() < self.config.duplicate;
        let _ = self.tx.send(frame.clone());
        if let Some(prev) = state.held.take() {
            // The held frame lands after its successor — the swap.
            let _ = self.tx.send(prev);
        }
        if duplicate {
            trace!("link duplicated a frame");
            let _ = self.tx.send(frame);
        }
    }
}
