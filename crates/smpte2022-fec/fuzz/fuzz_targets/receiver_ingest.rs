#![no_main]

use libfuzzer_sys::fuzz_target;
use smpte2022_fec::receiver::{FecReceiver, ReceiverConfig};

/// Fuzz the receiver state machine with a stream of arbitrary datagrams.
///
/// The input is split into datagrams by a leading length byte. The first
/// byte picks the delay. This exercises validation, cross-linking, cascade
/// recovery, output and cleanup; any bookkeeping fault shows up as a panic.
fuzz_target!(|data: &[u8]| {
    let Some((&delay, mut rest)) = data.split_first() else {
        return;
    };
    let config = ReceiverConfig {
        delay: usize::from(delay % 64),
        require_mp2t: delay & 0x80 == 0,
        ..Default::default()
    };
    let mut rx = FecReceiver::new(config, Vec::new());

    while let Some((&len, tail)) = rest.split_first() {
        let len = usize::from(len).min(tail.len());
        let (datagram, next) = tail.split_at(len);
        rest = next;

        let _ = rx.put_datagram(datagram);
        if !rx.is_startup() && datagram.first() == Some(&0xFF) {
            let _ = rx.cleanup();
        }
    }

    let _ = rx.flush();
    let _ = rx.to_string();
});
