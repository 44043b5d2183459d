//! Arithmetic on an n-bit cyclic sequence space.
//!
//! Sequence and ack numbers live in `[0, 2^n)` with `n <= 8` and wrap on
//! overflow, so ordinary integer comparison is meaningless: with n = 3,
//! segment 1 comes *after* segment 7. Every comparison in the sender and
//! receiver goes through the windowed predicates here.

/// The cyclic sequence space `[0, 2^n)`.
///
/// The modulus is a runtime parameter (the `n_bits` CLI argument), so the
/// helpers live on a value instead of being free functions over a
/// fixed-width integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeqSpace {
    modulus: u16,
}

impl SeqSpace {
    pub fn new(n_bits: u8) -> Self {
        assert!((1..=8).contains(&n_bits), "sequence space needs 1..=8 bits");

        SeqSpace {
            modulus: 1 << n_bits,
        }
    }

    /// Number of distinct sequence numbers, `M = 2^n`.
    pub fn modulus(&self) -> u16 {
        self.modulus
    }

    /// The sequence number following `s`.
    pub fn next(&self, s: u8) -> u8 {
        self.add(s, 1)
    }

    /// `(s + n) mod M`.
    pub fn add(&self, s: u8, n: u16) -> u8 {
        ((s as u16 + n) % self.modulus) as u8
    }

    /// Forward modular distance from `from` to `to`: `(to - from) mod M`.
    pub fn distance(&self, to: u8, from: u8) -> u8 {
        ((to as u16 + self.modulus - from as u16) % self.modulus) as u8
    }

    /// Whether `s` lies in the window of `width` numbers starting at `left`.
    pub fn in_window(&self, s: u8, left: u8, width: u16) -> bool {
        (self.distance(s, left) as u16) < width
    }
}
