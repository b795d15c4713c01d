//! # Pending FEC Packets and Cross-Links
//!
//! A [`FecWait`] is a buffered FEC packet plus the set of protected media
//! packets it is still waiting for. A [`FecCross`] records, for one missing
//! media packet, which column and which row FEC packet could rebuild it.

use crate::bitfield::{BitField, BitOrder};
use crate::error::FecError;
use crate::fec::{Direction, FecPacket};

// ─── FecWait ─────────────────────────────────────────────────────────────────

/// A FEC packet with live missing-packet tracking.
///
/// Bit `j` of the missing set stands for media packet
/// `snbase + j * offset`.
#[derive(Debug, Clone)]
pub struct FecWait {
    packet: FecPacket,
    missing_count: usize,
    missing: BitField,
}

impl FecWait {
    /// Start tracking `packet` with nothing missing.
    ///
    /// Fails if the packet protects more media packets than can be tracked,
    /// or has a zero stride (a row packet's offset is not otherwise checked).
    pub fn new(packet: FecPacket) -> Result<Self, FecError> {
        if packet.offset == 0 || packet.na as usize > BitField::BITS {
            return Err(FecError::Geometry {
                l: packet.l() as usize,
                d: packet.na as usize,
            });
        }
        Ok(FecWait {
            packet,
            missing_count: 0,
            missing: BitField::new(),
        })
    }

    /// Decode a FEC datagram and start tracking it.
    pub fn decode(data: &[u8]) -> Result<Self, FecError> {
        Self::new(FecPacket::decode(data))
    }

    pub fn packet(&self) -> &FecPacket {
        &self.packet
    }

    pub fn into_packet(self) -> FecPacket {
        self.packet
    }

    pub fn sequence(&self) -> u16 {
        self.packet.sequence
    }

    pub fn direction(&self) -> Direction {
        self.packet.direction
    }

    pub fn snbase(&self) -> u16 {
        self.packet.snbase_low()
    }

    pub fn offset(&self) -> u8 {
        self.packet.offset
    }

    pub fn na(&self) -> u8 {
        self.packet.na
    }

    pub fn protected_sequences(&self) -> impl Iterator<Item = u16> {
        self.packet.protected_sequences()
    }

    pub fn missing_count(&self) -> usize {
        self.missing_count
    }

    /// Matrix offset `j` of media sequence `seq`.
    ///
    /// `seq - snbase` (mod 2^16) must be a multiple of `offset` and the
    /// quotient must be below `na`.
    pub fn compute_j(&self, seq: u16) -> Result<usize, FecError> {
        let misaligned = || FecError::Misaligned {
            sequence: seq,
            snbase: self.snbase(),
            offset: self.offset(),
            na: self.na(),
        };
        let offset = usize::from(self.offset());
        if offset == 0 {
            return Err(misaligned());
        }
        let delta = usize::from(seq.wrapping_sub(self.snbase()));
        if delta % offset != 0 {
            return Err(misaligned());
        }
        let j = delta / offset;
        if j >= usize::from(self.na()) {
            return Err(misaligned());
        }
        Ok(j)
    }

    /// Mark media `seq` as missing. Returns its matrix offset.
    pub fn set_missing(&mut self, seq: u16) -> Result<usize, FecError> {
        let j = self.compute_j(seq)?;
        if !self.missing.get(j) {
            self.missing.set(j, true);
            self.missing_count += 1;
        }
        Ok(j)
    }

    /// Mark media `seq` as present again. Returns its matrix offset.
    pub fn set_recovered(&mut self, seq: u16) -> Result<usize, FecError> {
        let j = self.compute_j(seq)?;
        if self.missing.get(j) {
            self.missing.set(j, false);
            self.missing_count -= 1;
        }
        Ok(j)
    }

    /// Media sequence of the `rank`-th missing packet (1-indexed, lowest
    /// matrix offset first).
    pub fn missing_sequence(&self, rank: usize) -> Result<u16, FecError> {
        let out_of_range = FecError::MissingRank {
            rank,
            count: self.missing_count,
        };
        if rank == 0 || rank > self.missing_count {
            return Err(out_of_range);
        }
        let j = self
            .missing
            .nth_one(rank, BitOrder::LsbFirst)
            .ok_or(out_of_range)?;
        Ok(self.sequence_at(j))
    }

    /// All missing media sequences, lowest matrix offset first.
    pub fn missing_sequences(&self) -> impl Iterator<Item = u16> + '_ {
        self.missing.ones().map(|j| self.sequence_at(j))
    }

    fn sequence_at(&self, j: usize) -> u16 {
        self.snbase()
            .wrapping_add((j as u16).wrapping_mul(u16::from(self.offset())))
    }
}

// ─── FecCross ────────────────────────────────────────────────────────────────

/// Column and row FEC packets able to rebuild one missing media packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FecCross {
    pub col_sequence: Option<u16>,
    pub row_sequence: Option<u16>,
}

impl FecCross {
    pub fn link(&self, direction: Direction) -> Option<u16> {
        match direction {
            Direction::Column => self.col_sequence,
            Direction::Row => self.row_sequence,
        }
    }

    pub fn link_mut(&mut self, direction: Direction) -> &mut Option<u16> {
        match direction {
            Direction::Column => &mut self.col_sequence,
            Direction::Row => &mut self.row_sequence,
        }
    }

    /// Both links unset.
    pub fn is_empty(&self) -> bool {
        self.col_sequence.is_none() && self.row_sequence.is_none()
    }

    /// Set links as `(direction, fec sequence)` pairs, column first.
    pub fn links(&self) -> impl Iterator<Item = (Direction, u16)> {
        let col = self.col_sequence.map(|s| (Direction::Column, s));
        let row = self.row_sequence.map(|s| (Direction::Row, s));
        col.into_iter().chain(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fec::Algorithm;
    use crate::rtp::RtpPacket;

    fn column_wait(snbase: u16, offset: u8, na: u8) -> FecWait {
        let packets: Vec<_> = (0..na as u16)
            .map(|i| {
                RtpPacket::new_mp2t(
                    snbase.wrapping_add(i * offset as u16),
                    0,
                    vec![i as u8; 188],
                )
            })
            .collect();
        let fec = FecPacket::compute(0, Algorithm::Xor, Direction::Column, offset, na, &packets)
            .unwrap();
        FecWait::new(fec).unwrap()
    }

    // ─── Missing Tracking ───────────────────────────────────────────────

    #[test]
    fn missing_round_trip_across_wrap() {
        let mut wait = column_wait(65530, 3, 10);

        assert_eq!(wait.set_missing(3).unwrap(), 3);
        assert_eq!(wait.missing_count(), 1);
        assert_eq!(wait.missing_sequence(1).unwrap(), 3);
        assert_eq!(wait.set_recovered(3).unwrap(), 3);
        assert_eq!(wait.missing_count(), 0);

        assert_eq!(wait.set_missing(6).unwrap(), 4);
        assert_eq!(wait.set_missing(65530).unwrap(), 0);
        assert_eq!(wait.set_missing(65533).unwrap(), 1);
        assert_eq!(wait.set_missing(65533).unwrap(), 1);
        assert_eq!(wait.missing_count(), 3);

        assert_eq!(wait.missing_sequence(1).unwrap(), 65530);
        assert_eq!(wait.missing_sequence(2).unwrap(), 65533);
        assert_eq!(wait.missing_sequence(3).unwrap(), 6);
        assert_eq!(
            wait.missing_sequences().collect::<Vec<_>>(),
            vec![65530, 65533, 6]
        );

        assert_eq!(wait.set_recovered(6).unwrap(), 4);
        assert_eq!(wait.set_recovered(6).unwrap(), 4);
        assert_eq!(wait.missing_count(), 2);
    }

    #[test]
    fn misaligned_sequence_is_rejected() {
        let mut wait = column_wait(65530, 3, 10);
        assert!(matches!(
            wait.set_missing(65532),
            Err(FecError::Misaligned {
                sequence: 65532,
                snbase: 65530,
                offset: 3,
                na: 10
            })
        ));
        assert_eq!(wait.missing_count(), 0);
    }

    #[test]
    fn sequence_past_last_protected_is_rejected() {
        let wait = column_wait(100, 2, 4);
        assert_eq!(wait.compute_j(106).unwrap(), 3);
        assert!(wait.compute_j(108).is_err());
    }

    #[test]
    fn missing_rank_bounds() {
        let mut wait = column_wait(0, 1, 4);
        wait.set_missing(2).unwrap();
        assert!(matches!(
            wait.missing_sequence(0),
            Err(FecError::MissingRank { rank: 0, count: 1 })
        ));
        assert!(wait.missing_sequence(2).is_err());
    }

    #[test]
    fn too_many_protected_packets() {
        let mut fec = column_wait(0, 1, 4).into_packet();
        fec.na = 65;
        assert!(matches!(FecWait::new(fec), Err(FecError::Geometry { .. })));
    }

    #[test]
    fn zero_stride_is_rejected() {
        let mut fec = column_wait(0, 1, 4).into_packet();
        fec.direction = Direction::Row;
        fec.offset = 0;
        assert!(fec.is_valid());
        assert!(matches!(FecWait::new(fec), Err(FecError::Geometry { .. })));
    }

    #[test]
    fn decode_wraps_a_fec_datagram() {
        let wire = column_wait(65530, 3, 10).into_packet().encode(0);
        let wait = FecWait::decode(&wire).unwrap();
        assert_eq!(wait.direction(), Direction::Column);
        assert_eq!((wait.snbase(), wait.offset(), wait.na()), (65530, 3, 10));
        assert_eq!(wait.missing_count(), 0);

        // Nothing decoded leaves a zero stride.
        assert!(matches!(FecWait::decode(&[]), Err(FecError::Geometry { .. })));
    }

    #[test]
    fn delegates_packet_fields() {
        let wait = column_wait(500, 5, 6);
        assert_eq!(wait.direction(), Direction::Column);
        assert_eq!(wait.snbase(), 500);
        assert_eq!((wait.offset(), wait.na()), (5, 6));
        assert_eq!(wait.protected_sequences().last(), Some(525));
    }

    // ─── Cross ──────────────────────────────────────────────────────────

    #[test]
    fn cross_links() {
        let mut cross = FecCross::default();
        assert!(cross.is_empty());

        *cross.link_mut(Direction::Row) = Some(42);
        assert_eq!(cross.link(Direction::Row), Some(42));
        assert_eq!(cross.link(Direction::Column), None);
        assert!(!cross.is_empty());

        cross.col_sequence = Some(7);
        assert_eq!(
            cross.links().collect::<Vec<_>>(),
            vec![(Direction::Column, 7), (Direction::Row, 42)]
        );
    }
}
