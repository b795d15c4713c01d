#![no_main]

use libfuzzer_sys::fuzz_target;
use smpte2022_fec::RtpPacket;

/// Fuzz the RTP decoder with arbitrary bytes.
///
/// Decoding must never panic; a packet that validates must re-encode to a
/// datagram that decodes to the same header and payload.
fuzz_target!(|data: &[u8]| {
    let packet = RtpPacket::decode(data);
    assert_eq!(packet.is_valid(), packet.errors().is_empty());

    if packet.is_valid() && !packet.extension && !packet.padding {
        let again = RtpPacket::decode(&packet.encode());
        assert_eq!(again, packet);
    }
});
