#![no_main]

use libfuzzer_sys::fuzz_target;
use smpte2022_fec::FecPacket;
use smpte2022_fec::wait::FecWait;

/// Fuzz the FEC header decoder and the missing-packet tracker built on it.
///
/// Neither may panic on garbage input.
fuzz_target!(|data: &[u8]| {
    let fec = FecPacket::decode(data);
    let _ = fec.errors();
    let _ = fec.protected_sequences().count();

    if fec.is_valid() {
        if let Ok(mut wait) = FecWait::new(fec) {
            let seqs: Vec<u16> = wait.protected_sequences().collect();
            for seq in seqs {
                let _ = wait.set_missing(seq);
            }
            let _ = wait.missing_sequence(1);
            let _ = wait.missing_sequences().count();
        }
    }
});
