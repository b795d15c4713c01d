//! # SMPTE 2022-1 FEC Packets
//!
//! The FEC header (RFC 2733 with the SMPTE 2022-1 extension) sits at the
//! start of the payload of an RTP packet with payload type 96:
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |      SNBase low bits          |        Length recovery        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |E| PT recovery |                    Mask                       |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                          TS recovery                          |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |N|D|type |index|    Offset     |      NA       |SNBase ext bits|
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! A column FEC packet protects `NA` media packets spaced `Offset` apart
//! (one column of an L×D matrix); a row FEC packet protects `NA`
//! consecutive media packets.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::error::FecError;
use crate::rtp::{RtpError, RtpPacket};
use crate::seq;

// ─── Constants ───────────────────────────────────────────────────────────────

/// FEC header size inside the RTP payload.
pub const FEC_HEADER_LEN: usize = 16;

/// Dynamic payload type carrying FEC packets.
pub const FEC_PAYLOAD_TYPE: u8 = 96;

/// Largest number of matrix columns (L).
pub const MAX_L: u8 = 50;

/// Smallest number of matrix rows (D) for column FEC.
pub const MIN_D: u8 = 4;

/// Largest number of matrix rows (D).
pub const MAX_D: u8 = 50;

/// Largest matrix size L×D.
pub const MAX_MATRIX: usize = 256;

// ─── Header Enums ────────────────────────────────────────────────────────────

/// Which matrix line a FEC packet protects. Encoded in the D bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Column,
    Row,
}

impl Direction {
    fn bit(self) -> u8 {
        match self {
            Direction::Column => 0,
            Direction::Row => 1,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Column => "column",
            Direction::Row => "row",
        })
    }
}

/// The 3-bit type field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    Xor,
    Hamming,
    ReedSolomon,
    Reserved(u8),
}

impl Algorithm {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x07 {
            0 => Algorithm::Xor,
            1 => Algorithm::Hamming,
            2 => Algorithm::ReedSolomon,
            other => Algorithm::Reserved(other),
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            Algorithm::Xor => 0,
            Algorithm::Hamming => 1,
            Algorithm::ReedSolomon => 2,
            Algorithm::Reserved(bits) => bits & 0x07,
        }
    }
}

// ─── Validation ──────────────────────────────────────────────────────────────

/// Reasons a FEC packet is unusable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FecValidationError {
    #[error("carrier RTP packet is invalid: {0}")]
    Rtp(RtpError),

    #[error("payload type must be 96, got {0}")]
    PayloadType(u8),

    #[error("FEC payload of {len} bytes is shorter than the FEC header")]
    Truncated { len: usize },

    #[error("extended flag must be set")]
    NotExtended,

    #[error("mask must be 0, got {0:#08x}")]
    Mask(u32),

    #[error("N flag must be cleared")]
    NFlag,

    #[error("algorithm must be XOR, got {0:?}")]
    Algorithm(Algorithm),

    #[error("index must be 0, got {0}")]
    Index(u8),

    #[error("recovery payload is empty")]
    EmptyPayload,

    #[error("L = {0} not in [1, 50]")]
    L(u8),

    #[error("D = {0} not in [4, 50]")]
    D(u8),

    #[error("L x D = {0} exceeds 256")]
    MatrixSize(usize),
}

// ─── FEC Packet ──────────────────────────────────────────────────────────────

/// A decoded or freshly computed FEC packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FecPacket {
    /// Sequence number of the FEC packet itself.
    pub sequence: u16,
    pub algorithm: Algorithm,
    pub direction: Direction,
    /// 24-bit base sequence number of the protected media packets.
    pub snbase: u32,
    /// Stride between protected sequence numbers.
    pub offset: u8,
    /// Number of protected media packets.
    pub na: u8,
    pub payload_type_recovery: u8,
    pub timestamp_recovery: u32,
    pub length_recovery: u16,
    /// XOR of the protected payloads, as long as the longest of them.
    pub payload_recovery: Bytes,
    pub index: u8,
    /// 24-bit mask, must be 0.
    pub mask: u32,
    pub extended: bool,
    pub n: bool,
    decode_errors: Vec<FecValidationError>,
}

impl FecPacket {
    fn empty(sequence: u16) -> Self {
        FecPacket {
            sequence,
            algorithm: Algorithm::Xor,
            direction: Direction::Column,
            snbase: 0,
            offset: 0,
            na: 0,
            payload_type_recovery: 0,
            timestamp_recovery: 0,
            length_recovery: 0,
            payload_recovery: Bytes::new(),
            index: 0,
            mask: 0,
            extended: false,
            n: false,
            decode_errors: Vec::new(),
        }
    }

    /// Decode an RTP datagram carrying a FEC packet.
    pub fn decode(data: &[u8]) -> Self {
        Self::from_rtp(&RtpPacket::decode(data))
    }

    /// Interpret the payload of an already decoded RTP packet.
    ///
    /// An invalid carrier, a payload type other than 96 or a payload too
    /// short for the header stops parsing. Any other non-conformance is
    /// only reported by [`FecPacket::errors`].
    pub fn from_rtp(rtp: &RtpPacket) -> Self {
        let mut fec = FecPacket::empty(rtp.sequence);

        let rtp_errors = rtp.errors();
        if !rtp_errors.is_empty() {
            fec.decode_errors = rtp_errors.into_iter().map(FecValidationError::Rtp).collect();
            return fec;
        }
        if rtp.payload_type != FEC_PAYLOAD_TYPE {
            fec.decode_errors
                .push(FecValidationError::PayloadType(rtp.payload_type));
            return fec;
        }
        if rtp.payload.len() < FEC_HEADER_LEN {
            fec.decode_errors.push(FecValidationError::Truncated {
                len: rtp.payload.len(),
            });
            return fec;
        }

        let mut buf = &rtp.payload[..FEC_HEADER_LEN];
        let snbase_low = buf.get_u16();
        fec.length_recovery = buf.get_u16();
        let e_pt = buf.get_u8();
        fec.extended = e_pt >> 7 == 1;
        fec.payload_type_recovery = e_pt & 0x7F;
        fec.mask = buf.get_uint(3) as u32;
        fec.timestamp_recovery = buf.get_u32();
        let flags = buf.get_u8();
        fec.n = flags >> 7 == 1;
        fec.direction = if (flags >> 6) & 1 == 1 {
            Direction::Row
        } else {
            Direction::Column
        };
        fec.algorithm = Algorithm::from_bits(flags >> 3);
        fec.index = flags & 0x07;
        fec.offset = buf.get_u8();
        fec.na = buf.get_u8();
        fec.snbase = (u32::from(buf.get_u8()) << 16) | u32::from(snbase_low);
        fec.payload_recovery = rtp.payload.slice(FEC_HEADER_LEN..);
        fec
    }

    /// Build the XOR FEC packet protecting `packets`.
    ///
    /// A column packet needs exactly `d` media packets `l` apart, a row
    /// packet exactly `l` consecutive ones. Input order does not matter,
    /// and a set crossing sequence 65535 → 0 is accepted.
    pub fn compute(
        sequence: u16,
        algorithm: Algorithm,
        direction: Direction,
        l: u8,
        d: u8,
        packets: &[RtpPacket],
    ) -> Result<Self, FecError> {
        if algorithm != Algorithm::Xor {
            return Err(FecError::UnsupportedAlgorithm(algorithm));
        }
        let (offset, na) = match direction {
            Direction::Column => (l, d),
            Direction::Row => (1, l),
        };
        if offset == 0 || na == 0 {
            return Err(FecError::Geometry {
                l: l as usize,
                d: d as usize,
            });
        }
        if packets.len() != na as usize {
            return Err(FecError::PacketCount {
                direction,
                expected: na as usize,
                actual: packets.len(),
            });
        }

        let mut sorted: Vec<&RtpPacket> = packets.iter().collect();
        sorted.sort_by(|a, b| a.cmp_sequence(b));
        if let Some(first) = seq::ring_first(sorted.iter().map(|p| p.sequence)) {
            let start = sorted
                .iter()
                .position(|p| p.sequence == first)
                .unwrap_or(0);
            sorted.rotate_left(start);
        }

        let snbase = sorted[0].sequence;
        let size = sorted.iter().map(|p| p.payload.len()).max().unwrap_or(0);
        let mut recovery = BytesMut::zeroed(size);
        let mut pt = 0u8;
        let mut ts = 0u32;
        let mut len = 0u16;

        for (i, packet) in sorted.iter().enumerate() {
            if !packet.is_valid_mp2t() {
                return Err(FecError::NotMpeg2Ts {
                    sequence: packet.sequence,
                });
            }
            let expected = snbase.wrapping_add((i as u16).wrapping_mul(u16::from(offset)));
            if packet.sequence != expected {
                return Err(FecError::BadSequenceSpacing {
                    sequence: packet.sequence,
                    expected,
                });
            }
            pt ^= packet.payload_type;
            ts ^= packet.timestamp;
            len ^= packet.payload.len() as u16;
            xor_into(&mut recovery, &packet.payload);
        }

        Ok(FecPacket {
            sequence,
            algorithm,
            direction,
            snbase: u32::from(snbase),
            offset,
            na,
            payload_type_recovery: pt & 0x7F,
            timestamp_recovery: ts,
            length_recovery: len,
            payload_recovery: recovery.freeze(),
            index: 0,
            mask: 0,
            extended: true,
            n: false,
            decode_errors: Vec::new(),
        })
    }

    /// Every reason this packet is unusable. Empty means valid.
    pub fn errors(&self) -> Vec<FecValidationError> {
        if !self.decode_errors.is_empty() {
            return self.decode_errors.clone();
        }

        let mut errors = Vec::new();
        if !self.extended {
            errors.push(FecValidationError::NotExtended);
        }
        if self.mask != 0 {
            errors.push(FecValidationError::Mask(self.mask));
        }
        if self.n {
            errors.push(FecValidationError::NFlag);
        }
        if self.algorithm != Algorithm::Xor {
            errors.push(FecValidationError::Algorithm(self.algorithm));
        }
        if self.index != 0 {
            errors.push(FecValidationError::Index(self.index));
        }
        if self.payload_recovery.is_empty() {
            errors.push(FecValidationError::EmptyPayload);
        }
        let l = self.l();
        if !(1..=MAX_L).contains(&l) {
            errors.push(FecValidationError::L(l));
        }
        if self.direction == Direction::Column {
            let d = self.d();
            let size = l as usize * d as usize;
            if size > MAX_MATRIX {
                errors.push(FecValidationError::MatrixSize(size));
            }
            if !(MIN_D..=MAX_D).contains(&d) {
                errors.push(FecValidationError::D(d));
            }
        }
        errors
    }

    pub fn is_valid(&self) -> bool {
        self.errors().is_empty()
    }

    /// Matrix columns. Known from both directions.
    pub fn l(&self) -> u8 {
        match self.direction {
            Direction::Column => self.offset,
            Direction::Row => self.na,
        }
    }

    /// Matrix rows. A row packet cannot tell, so it reports 0.
    pub fn d(&self) -> u8 {
        match self.direction {
            Direction::Column => self.na,
            Direction::Row => 0,
        }
    }

    /// Low 16 bits of `snbase`, the part that lives in the RTP ring.
    pub fn snbase_low(&self) -> u16 {
        self.snbase as u16
    }

    /// Sequence numbers of the protected media packets, `snbase` first.
    pub fn protected_sequences(&self) -> impl Iterator<Item = u16> {
        let base = self.snbase_low();
        let step = u16::from(self.offset);
        (0..u16::from(self.na)).map(move |i| base.wrapping_add(i.wrapping_mul(step)))
    }

    /// FEC header followed by the recovery payload.
    pub fn encode_payload(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(FEC_HEADER_LEN + self.payload_recovery.len());
        buf.put_u16(self.snbase as u16);
        buf.put_u16(self.length_recovery);
        buf.put_u8((u8::from(self.extended) << 7) | (self.payload_type_recovery & 0x7F));
        buf.put_uint(u64::from(self.mask & 0x00FF_FFFF), 3);
        buf.put_u32(self.timestamp_recovery);
        buf.put_u8(
            (u8::from(self.n) << 7)
                | (self.direction.bit() << 6)
                | (self.algorithm.bits() << 3)
                | (self.index & 0x07),
        );
        buf.put_u8(self.offset);
        buf.put_u8(self.na);
        buf.put_u8((self.snbase >> 16) as u8);
        buf.put_slice(&self.payload_recovery);
        buf
    }

    /// The RTP packet carrying this FEC packet.
    pub fn to_rtp(&self, timestamp: u32) -> RtpPacket {
        RtpPacket::new(
            self.sequence,
            timestamp,
            FEC_PAYLOAD_TYPE,
            self.encode_payload().freeze(),
        )
    }

    /// Full RTP datagram carrying this FEC packet.
    pub fn encode(&self, timestamp: u32) -> BytesMut {
        self.to_rtp(timestamp).encode()
    }
}

/// XOR `src` into the head of `dst`; bytes past the shorter length are
/// left alone.
#[inline]
pub(crate) fn xor_into(dst: &mut [u8], src: &[u8]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d ^= *s;
    }
}
