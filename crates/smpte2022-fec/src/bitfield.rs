//! Fixed 64-bit vector used to track missing matrix offsets.

use std::fmt;

/// Scan direction for [`BitField::nth_one`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitOrder {
    /// Position 0 first.
    LsbFirst,
    /// Position 63 first.
    MsbFirst,
}

/// A 64-bit bit vector with positional access.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct BitField(u64);

impl BitField {
    /// Number of addressable positions.
    pub const BITS: usize = 64;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bits(bits: u64) -> Self {
        BitField(bits)
    }

    pub fn bits(&self) -> u64 {
        self.0
    }

    /// Value at `pos`.
    ///
    /// # Panics
    ///
    /// Panics if `pos >= 64`.
    pub fn get(&self, pos: usize) -> bool {
        assert!(pos < Self::BITS, "bit position {pos} out of range");
        self.0 & (1u64 << pos) != 0
    }

    /// Set or clear the bit at `pos`.
    ///
    /// # Panics
    ///
    /// Panics if `pos >= 64`.
    pub fn set(&mut self, pos: usize, value: bool) {
        assert!(pos < Self::BITS, "bit position {pos} out of range");
        if value {
            self.0 |= 1u64 << pos;
        } else {
            self.0 &= !(1u64 << pos);
        }
    }

    pub fn count_ones(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Position of the `rank`-th set bit (1-indexed) in the given scan order.
    pub fn nth_one(&self, rank: usize, order: BitOrder) -> Option<usize> {
        if rank == 0 || rank > self.count_ones() {
            return None;
        }
        let mut rest = self.0;
        for _ in 1..rank {
            match order {
                BitOrder::LsbFirst => rest &= rest - 1,
                BitOrder::MsbFirst => rest &= !(1u64 << (63 - rest.leading_zeros())),
            }
        }
        Some(match order {
            BitOrder::LsbFirst => rest.trailing_zeros() as usize,
            BitOrder::MsbFirst => 63 - rest.leading_zeros() as usize,
        })
    }

    /// Iterator over set positions, lowest first.
    pub fn ones(&self) -> impl Iterator<Item = usize> {
        let mut rest = self.0;
        std::iter::from_fn(move || {
            if rest == 0 {
                return None;
            }
            let pos = rest.trailing_zeros() as usize;
            rest &= rest - 1;
            Some(pos)
        })
    }
}

impl fmt::Debug for BitField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BitField({:#066b})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get() {
        let mut bits = BitField::new();
        bits.set(0, true);
        bits.set(63, true);
        assert!(bits.get(0));
        assert!(bits.get(63));
        assert!(!bits.get(1));
        assert_eq!(bits.count_ones(), 2);

        bits.set(0, false);
        assert!(!bits.get(0));
        assert_eq!(bits.count_ones(), 1);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn get_out_of_range_panics() {
        BitField::new().get(64);
    }

    #[test]
    fn nth_one_both_directions() {
        let bits = BitField::from_bits(0b1010_0110);
        assert_eq!(bits.nth_one(1, BitOrder::LsbFirst), Some(1));
        assert_eq!(bits.nth_one(2, BitOrder::LsbFirst), Some(2));
        assert_eq!(bits.nth_one(3, BitOrder::LsbFirst), Some(5));
        assert_eq!(bits.nth_one(4, BitOrder::LsbFirst), Some(7));
        assert_eq!(bits.nth_one(5, BitOrder::LsbFirst), None);

        assert_eq!(bits.nth_one(1, BitOrder::MsbFirst), Some(7));
        assert_eq!(bits.nth_one(2, BitOrder::MsbFirst), Some(5));
        assert_eq!(bits.nth_one(4, BitOrder::MsbFirst), Some(1));
    }

    #[test]
    fn nth_one_rank_zero_is_none() {
        assert_eq!(BitField::from_bits(1).nth_one(0, BitOrder::LsbFirst), None);
    }

    #[test]
    fn ones_iterates_low_to_high() {
        let bits = BitField::from_bits((1 << 40) | (1 << 3) | 1);
        assert_eq!(bits.ones().collect::<Vec<_>>(), vec![0, 3, 40]);
    }
}
