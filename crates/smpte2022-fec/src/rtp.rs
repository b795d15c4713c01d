//! # RTP Packets
//!
//! RFC 3550 fixed header, CSRC list, skipped header extension and padding.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|X|  CC   |M|     PT      |       sequence number         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           timestamp                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |           synchronization source (SSRC) identifier            |
//! +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
//! |            contributing source (CSRC) identifiers             |
//! |                             ....                              |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Decoding never fails outright: a malformed buffer yields a packet whose
//! [`RtpPacket::errors`] is non-empty.

use std::cmp::Ordering;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

// ─── Constants ───────────────────────────────────────────────────────────────

/// The only RTP version accepted.
pub const RTP_VERSION: u8 = 2;

/// Size of the fixed header, without CSRCs.
pub const RTP_HEADER_LEN: usize = 12;

/// Largest CSRC count the 4-bit CC field can carry.
pub const MAX_CSRC: usize = 15;

/// Static payload type of MPEG2 transport streams (RFC 3551).
pub const MP2T_PAYLOAD_TYPE: u8 = 33;

/// RTP clock rate of MPEG2 transport streams.
pub const MP2T_CLOCK_RATE: u32 = 90_000;

/// Size of one MPEG2 transport stream packet.
pub const MP2T_PACKET_LEN: usize = 188;

// ─── Validation ──────────────────────────────────────────────────────────────

/// Reasons an RTP packet is unusable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RtpError {
    #[error("buffer of {len} bytes is too short for the RTP header")]
    Truncated { len: usize },

    #[error("RTP version must be 2, got {0}")]
    Version(u8),

    #[error("padding flagged but the padding length is invalid")]
    PaddingLength,

    #[error("header extension runs past the end of the packet")]
    ExtensionLength,

    #[error("RTP packet has no payload")]
    EmptyPayload,
}

// ─── Packet ──────────────────────────────────────────────────────────────────

/// An RTP packet with its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    pub version: u8,
    /// Padding flag as received. Padding is stripped from `payload`.
    pub padding: bool,
    /// Extension flag as received. Extension contents are skipped.
    pub extension: bool,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub csrc: Vec<u32>,
    pub payload: Bytes,
    decode_error: Option<RtpError>,
}

impl RtpPacket {
    /// Build a version-2 packet with no CSRCs.
    pub fn new(sequence: u16, timestamp: u32, payload_type: u8, payload: impl Into<Bytes>) -> Self {
        RtpPacket {
            version: RTP_VERSION,
            padding: false,
            extension: false,
            marker: false,
            payload_type: payload_type & 0x7F,
            sequence,
            timestamp,
            ssrc: 0,
            csrc: Vec::new(),
            payload: payload.into(),
            decode_error: None,
        }
    }

    /// Build an MPEG2-TS packet (payload type 33).
    pub fn new_mp2t(sequence: u16, timestamp: u32, payload: impl Into<Bytes>) -> Self {
        Self::new(sequence, timestamp, MP2T_PAYLOAD_TYPE, payload)
    }

    fn empty() -> Self {
        RtpPacket {
            version: 0,
            padding: false,
            extension: false,
            marker: false,
            payload_type: 0,
            sequence: 0,
            timestamp: 0,
            ssrc: 0,
            csrc: Vec::new(),
            payload: Bytes::new(),
            decode_error: None,
        }
    }

    /// Decode a packet from the wire.
    ///
    /// Parsing stops at the first structural problem; the fields read so
    /// far are kept and the reason is reported by [`RtpPacket::errors`].
    pub fn decode(data: &[u8]) -> Self {
        let mut packet = RtpPacket::empty();
        if data.len() < RTP_HEADER_LEN {
            packet.decode_error = Some(RtpError::Truncated { len: data.len() });
            return packet;
        }

        let flags = data[0];
        packet.version = flags >> 6;
        if packet.version != RTP_VERSION {
            return packet;
        }
        packet.padding = (flags >> 5) & 1 == 1;
        packet.extension = (flags >> 4) & 1 == 1;
        let csrc_count = (flags & 0x0F) as usize;

        // Padding length is the last byte and counts itself.
        let mut end = data.len();
        if packet.padding {
            let pad = data[end - 1] as usize;
            if pad == 0 || end < RTP_HEADER_LEN + pad {
                packet.decode_error = Some(RtpError::PaddingLength);
                return packet;
            }
            end -= pad;
        }

        let mut buf = &data[1..end];
        let second = buf.get_u8();
        packet.marker = second >> 7 == 1;
        packet.payload_type = second & 0x7F;
        packet.sequence = buf.get_u16();
        packet.timestamp = buf.get_u32();
        packet.ssrc = buf.get_u32();

        if buf.remaining() < csrc_count * 4 {
            packet.decode_error = Some(RtpError::Truncated { len: data.len() });
            return packet;
        }
        packet.csrc = (0..csrc_count).map(|_| buf.get_u32()).collect();

        if packet.extension {
            if buf.remaining() < 4 {
                packet.decode_error = Some(RtpError::ExtensionLength);
                return packet;
            }
            buf.advance(2);
            let words = buf.get_u16() as usize;
            if buf.remaining() < words * 4 {
                packet.decode_error = Some(RtpError::ExtensionLength);
                return packet;
            }
            buf.advance(words * 4);
        }

        packet.payload = Bytes::copy_from_slice(buf);
        packet
    }

    /// Every reason this packet is unusable. Empty means valid.
    pub fn errors(&self) -> Vec<RtpError> {
        let mut errors = Vec::new();
        if let Some(e) = &self.decode_error {
            errors.push(e.clone());
        }
        if self.version != RTP_VERSION {
            errors.push(RtpError::Version(self.version));
        }
        if self.payload.is_empty() && self.decode_error.is_none() {
            errors.push(RtpError::EmptyPayload);
        }
        errors
    }

    pub fn is_valid(&self) -> bool {
        self.decode_error.is_none() && self.version == RTP_VERSION && !self.payload.is_empty()
    }

    /// Valid and carrying an MPEG2 transport stream.
    pub fn is_valid_mp2t(&self) -> bool {
        self.is_valid() && self.payload_type == MP2T_PAYLOAD_TYPE
    }

    /// RTP clock rate for known payload types.
    pub fn clock_rate(&self) -> Option<u32> {
        (self.payload_type == MP2T_PAYLOAD_TYPE).then_some(MP2T_CLOCK_RATE)
    }

    /// Timestamp in seconds, when the clock rate is known.
    pub fn time(&self) -> Option<f64> {
        self.clock_rate()
            .map(|rate| self.timestamp as f64 / rate as f64)
    }

    /// Order by sequence number alone.
    pub fn cmp_sequence(&self, other: &Self) -> Ordering {
        self.sequence.cmp(&other.sequence)
    }

    /// Wire size produced by [`RtpPacket::encode`].
    pub fn encoded_len(&self) -> usize {
        RTP_HEADER_LEN + self.csrc.len().min(MAX_CSRC) * 4 + self.payload.len()
    }

    /// Serialize header, CSRCs and payload. No extension or padding is
    /// written, whatever the flags say.
    pub fn encode(&self) -> BytesMut {
        let csrc = &self.csrc[..self.csrc.len().min(MAX_CSRC)];
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u8(((self.version & 0x03) << 6) | csrc.len() as u8);
        buf.put_u8((u8::from(self.marker) << 7) | (self.payload_type & 0x7F));
        buf.put_u16(self.sequence);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
        for id in csrc {
            buf.put_u32(*id);
        }
        buf.put_slice(&self.payload);
        buf
    }
}
