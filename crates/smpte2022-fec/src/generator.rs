//! # FEC Generator
//!
//! Sender side of SMPTE 2022-1. Media packets are laid out row by row in an
//! L×D matrix; every completed row yields a row FEC packet and every
//! completed matrix yields L column FEC packets.
//!
//! ## Responsibilities
//!
//! 1. **Matrix fill**: accept consecutive MPEG2-TS media packets
//! 2. **Row FEC**: XOR of the last L packets, emitted as each row completes
//! 3. **Column FEC**: XOR of every L-th packet, emitted when the matrix is full
//! 4. **Resync**: a sequence discontinuity drops the partial matrix
//!
//! Like the receiver, the generator does no I/O: callers wrap the returned
//! [`FecPacket`]s with [`FecPacket::to_rtp`] and send them on the column and
//! row streams.

use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::error::FecError;
use crate::fec::{Algorithm, Direction, FecPacket, MAX_D, MAX_L, MAX_MATRIX, MIN_D};
use crate::rtp::RtpPacket;

/// Check an L×D matrix against the SMPTE 2022-1 limits.
pub fn validate_geometry(l: u8, d: u8) -> Result<(), FecError> {
    let size = usize::from(l) * usize::from(d);
    if !(1..=MAX_L).contains(&l) || !(MIN_D..=MAX_D).contains(&d) || size > MAX_MATRIX {
        return Err(FecError::Geometry {
            l: usize::from(l),
            d: usize::from(d),
        });
    }
    Ok(())
}

// ─── Events ─────────────────────────────────────────────────────────────────

/// Output of [`FecGenerator::put_media`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratorEvent {
    Column(FecPacket),
    Row(FecPacket),
    /// The media sequence jumped; the partial matrix was discarded.
    Reset { expected: u16, received: u16 },
}

impl GeneratorEvent {
    /// The generated FEC packet, if any.
    pub fn fec(&self) -> Option<&FecPacket> {
        match self {
            GeneratorEvent::Column(fec) | GeneratorEvent::Row(fec) => Some(fec),
            GeneratorEvent::Reset { .. } => None,
        }
    }
}

// ─── Stats ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize)]
pub struct GeneratorStats {
    /// Media packets placed in a matrix.
    pub media_received: u64,
    /// Media packets skipped by validation.
    pub media_invalid: u64,
    pub col_sent: u64,
    pub row_sent: u64,
    /// Partial matrices discarded after a sequence jump.
    pub resets: u64,
}

// ─── Generator ──────────────────────────────────────────────────────────────

pub struct FecGenerator {
    l: u8,
    d: u8,
    /// Current matrix, row-major, consecutive sequence numbers.
    matrix: Vec<RtpPacket>,
    col_sequence: u16,
    row_sequence: u16,
    stats: GeneratorStats,
}

impl FecGenerator {
    /// Create a generator for `l` columns and `d` rows.
    pub fn new(l: u8, d: u8) -> Result<Self, FecError> {
        validate_geometry(l, d)?;
        Ok(FecGenerator {
            l,
            d,
            matrix: Vec::with_capacity(usize::from(l) * usize::from(d)),
            col_sequence: 0,
            row_sequence: 0,
            stats: GeneratorStats::default(),
        })
    }

    /// Start the column and row FEC streams at the given RTP sequences.
    pub fn with_sequences(mut self, col_sequence: u16, row_sequence: u16) -> Self {
        self.col_sequence = col_sequence;
        self.row_sequence = row_sequence;
        self
    }

    pub fn matrix(&self) -> (u8, u8) {
        (self.l, self.d)
    }

    pub fn stats(&self) -> &GeneratorStats {
        &self.stats
    }

    /// Media packets in the current, incomplete matrix.
    pub fn pending(&self) -> usize {
        self.matrix.len()
    }

    /// Sequence the next media packet should carry, once one has been seen.
    pub fn expected_sequence(&self) -> Option<u16> {
        self.matrix.last().map(|p| p.sequence.wrapping_add(1))
    }

    /// Feed the next media packet.
    ///
    /// Invalid or non-MPEG2-TS packets are counted and rejected without
    /// touching the matrix.
    pub fn put_media(&mut self, packet: RtpPacket) -> Result<Vec<GeneratorEvent>, FecError> {
        if !packet.is_valid_mp2t() {
            self.stats.media_invalid += 1;
            debug!(seq = packet.sequence, "media packet skipped by FEC generator");
            let reasons = packet.errors();
            return Err(if reasons.is_empty() {
                FecError::NotMpeg2Ts {
                    sequence: packet.sequence,
                }
            } else {
                FecError::InvalidMedia {
                    sequence: packet.sequence,
                    reasons,
                }
            });
        }

        let mut events = Vec::new();
        if let Some(expected) = self.expected_sequence() {
            if packet.sequence != expected {
                warn!(
                    expected,
                    received = packet.sequence,
                    dropped = self.matrix.len(),
                    "media sequence discontinuity, FEC matrix reset"
                );
                self.matrix.clear();
                self.stats.resets += 1;
                events.push(GeneratorEvent::Reset {
                    expected,
                    received: packet.sequence,
                });
            }
        }

        trace!(seq = packet.sequence, slot = self.matrix.len(), "media packet in FEC matrix");
        self.stats.media_received += 1;
        self.matrix.push(packet);

        let l = usize::from(self.l);
        if self.matrix.len() % l == 0 {
            let row = &self.matrix[self.matrix.len() - l..];
            let fec = FecPacket::compute(
                self.row_sequence,
                Algorithm::Xor,
                Direction::Row,
                self.l,
                self.d,
                row,
            )?;
            self.row_sequence = self.row_sequence.wrapping_add(1);
            self.stats.row_sent += 1;
            events.push(GeneratorEvent::Row(fec));
        }

        if self.matrix.len() == l * usize::from(self.d) {
            for column in 0..l {
                let packets: Vec<RtpPacket> =
                    self.matrix.iter().skip(column).step_by(l).cloned().collect();
                let fec = FecPacket::compute(
                    self.col_sequence,
                    Algorithm::Xor,
                    Direction::Column,
                    self.l,
                    self.d,
                    &packets,
                )?;
                self.col_sequence = self.col_sequence.wrapping_add(1);
                self.stats.col_sent += 1;
                events.push(GeneratorEvent::Column(fec));
            }
            debug!(
                snbase = self.matrix[0].sequence,
                l = self.l,
                d = self.d,
                "FEC matrix complete"
            );
            self.matrix.clear();
        }

        Ok(events)
    }
}
