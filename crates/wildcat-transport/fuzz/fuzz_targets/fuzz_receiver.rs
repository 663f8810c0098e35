#![no_main]

use libfuzzer_sys::fuzz_target;
use wildcat_transport::receiver::{ReceiverConfig, ReceiverWindow};

/// Feed arbitrary byte chunks straight into the receiver state machine.
///
/// Whatever arrives — corrupt frames, stale sequences, hostile bitmap-sized
/// garbage — the receiver must not panic, and its base must only ever move
/// forward through the window.
fuzz_target!(|data: &[u8]| {
    let mut rx = ReceiverWindow::new(ReceiverConfig {
        window_size: 64,
        allowed_loss_percent: 25,
    });

    let mut chunks = 0u64;
    for chunk in data.chunks(21) {
        rx.on_packet(chunk);
        rx.drain_events().for_each(drop);
        chunks += 1;
    }

    // Every commit is backed by exactly one buffered arrival.
    assert!(rx.delivered() <= chunks);
});
