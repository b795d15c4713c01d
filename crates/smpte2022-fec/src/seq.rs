//! # Sequence Number Ring
//!
//! RTP sequence numbers live in a 16-bit ring. Every interval or ordering
//! question the receiver asks goes through the helpers below so that a
//! stream crossing 65535 → 0 behaves exactly like one that does not.

/// Half of the ring. A sequence further than this ahead of a reference
/// point is considered to be behind it.
pub const SEQ_HALF: u16 = 0x8000;

/// Whether `value` lies on the forward arc from `start` to `end`, both
/// inclusive.
///
/// When `end` is numerically below `start` the arc wraps through 0.
pub fn validity_window(value: u16, start: u16, end: u16) -> bool {
    if end >= start {
        value >= start && value <= end
    } else {
        value >= start || value <= end
    }
}

/// Forward distance from `from` to `to` on the ring.
#[inline]
pub fn distance(from: u16, to: u16) -> u16 {
    to.wrapping_sub(from)
}

/// Whether `seq` is strictly ahead of `reference` (less than half a ring
/// away in the forward direction).
#[inline]
pub fn is_ahead(seq: u16, reference: u16) -> bool {
    let d = distance(reference, seq);
    d != 0 && d < SEQ_HALF
}

/// Ring-aware lowest element of a sorted set of sequence numbers.
///
/// The set is read as points on the ring and the result is the element
/// that follows the widest gap. For a set that does not straddle the wrap
/// point this is simply the numeric minimum; for `{65534, 65535, 0, 1}` it
/// is 65534.
pub fn ring_first<I>(sorted: I) -> Option<u16>
where
    I: IntoIterator<Item = u16>,
    I::IntoIter: Clone,
{
    let iter = sorted.into_iter();
    let first = iter.clone().next()?;
    let last = iter.clone().last()?;

    // The closing gap runs from the numeric maximum back around to the minimum.
    let mut best = first;
    let mut widest = distance(last, first);
    let mut prev = first;
    for seq in iter.skip(1) {
        let gap = distance(prev, seq);
        if gap > widest {
            widest = gap;
            best = seq;
        }
        prev = seq;
    }
    Some(best)
}
