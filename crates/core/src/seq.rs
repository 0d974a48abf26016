//! Wrapping 12-bit sequence numbers.
//!
//! Every segment carries a sequence number modulo 4096. Ordering between two
//! numbers is only meaningful when they are less than half the space apart;
//! `distance` is the forward distance, and `is_before`/`is_after` compare
//! within that half window.

use std::fmt;

/// Width of a sequence number on the wire.
pub const SEQ_BITS: usize = 12;

/// Size of the sequence number space.
pub const SEQ_MODULUS: u16 = 1 << SEQ_BITS;

/// Largest forward distance still treated as "ahead".
pub const HALF_WINDOW: u16 = SEQ_MODULUS / 2;

/// A sequence number in `0..4096` with wrapping arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SeqNum(u16);

impl SeqNum {
    pub const ZERO: SeqNum = SeqNum(0);

    /// Wrap `value` into the sequence space.
    pub fn new(value: u32) -> Self {
        SeqNum((value % SEQ_MODULUS as u32) as u16)
    }

    pub fn value(self) -> u16 {
        self.0
    }

    pub fn next(self) -> Self {
        self.add(1)
    }

    pub fn add(self, n: u32) -> Self {
        SeqNum::new(self.0 as u32 + n % SEQ_MODULUS as u32)
    }

    pub fn sub(self, n: u32) -> Self {
        let n = (n % SEQ_MODULUS as u32) as u16;
        SeqNum((self.0 + SEQ_MODULUS - n) % SEQ_MODULUS)
    }

    /// Forward distance from `self` to `later`, in `0..4096`.
    pub fn distance(self, later: SeqNum) -> u16 {
        (later.0 + SEQ_MODULUS - self.0) % SEQ_MODULUS
    }

    /// True if `self` comes strictly before `other` within half the space.
    pub fn is_before(self, other: SeqNum) -> bool {
        let d = self.distance(other);
        d != 0 && d < HALF_WINDOW
    }

    /// True if `self` comes strictly after `other` within half the space.
    pub fn is_after(self, other: SeqNum) -> bool {
        other.is_before(self)
    }
}

impl fmt::Display for SeqNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u16> for SeqNum {
    fn from(value: u16) -> Self {
        SeqNum::new(value as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wraps_at_4096() {
        assert_eq!(SeqNum::new(4095).next(), SeqNum::ZERO);
        assert_eq!(SeqNum::new(4100).value(), 4);
        assert_eq!(SeqNum::new(2).sub(5).value(), 4093);
        assert_eq!(SeqNum::new(4090).add(10).value(), 4);
    }

    #[test]
    fn test_distance_across_wrap() {
        assert_eq!(SeqNum::new(4094).distance(SeqNum::new(3)), 5);
        assert_eq!(SeqNum::new(3).distance(SeqNum::new(4094)), 4091);
        assert_eq!(SeqNum::new(7).distance(SeqNum::new(7)), 0);
    }

    #[test]
    fn test_ordering_within_half_window() {
        let a = SeqNum::new(4090);
        let b = SeqNum::new(10);
        assert!(a.is_before(b));
        assert!(b.is_after(a));
        assert!(!b.is_before(a));
        assert!(!a.is_before(a));

        // Exactly half apart is neither before nor after.
        let c = SeqNum::new(2048);
        assert!(!SeqNum::ZERO.is_before(c));
        assert!(!c.is_before(SeqNum::ZERO));
    }
}
