//! K-mer encoding: 2-bit mapping, rolling reverse complement, canonicalization.
//!
//! Conventions
//! - Codes are **LSB-aligned**: a k-mer occupies the lower `2k` bits, first
//!   base in the highest pair.
//! - The canonical k-mer is the numerically **larger** of the forward code and
//!   its reverse complement.
//! - The backing integer is selected through [`KmerWord`]: `u64` for k <= 31,
//!   `u128` for k <= 63.

use std::fmt::Debug;
use std::hash::Hash;

/// 256-entry LUT: ASCII → 2-bit (A=0, C=1, G=2, T=3), 0xFF for anything else.
pub static MAP_LUT: [u8; 256] = {
    const X: u8 = 0xFF;
    let mut t = [X; 256];
    t[b'A' as usize] = 0;
    t[b'a' as usize] = 0;
    t[b'C' as usize] = 1;
    t[b'c' as usize] = 1;
    t[b'G' as usize] = 2;
    t[b'g' as usize] = 2;
    t[b'T' as usize] = 3;
    t[b't' as usize] = 3;
    t
};

/// 2-bit encoding via LUT: A=00, C=01, G=10, T=11. `None` for a break character.
#[inline]
pub fn map_base(b: u8) -> Option<u8> {
    let v = MAP_LUT[b as usize];
    if v <= 3 { Some(v) } else { None }
}

/// Unsigned integer wide enough to hold a packed k-mer.
pub trait KmerWord:
    Copy + Default + Eq + Ord + Hash + Debug + Send + Sync + 'static
{
    /// Largest k this width can hold (one pair of bits is kept spare).
    const MAX_K: usize;

    /// Mask covering the lower `2k` bits.
    fn mask(k: usize) -> Self;

    /// Shift in a base on the forward strand.
    fn push_forward(self, code: u8, mask: Self) -> Self;

    /// Shift in the complement of a base on the reverse strand; `top_shift`
    /// is `2k - 2`.
    fn push_reverse(self, code: u8, top_shift: u32) -> Self;

    /// Append one 6-bit digit of the compact k-mer table encoding.
    fn push_digit(self, digit: u8) -> Self;

    /// 2-bit code of the base `pair` pairs above the least significant one.
    fn pair_at(self, pair: usize) -> u8;
}

macro_rules! impl_kmer_word {
    ($t:ty) => {
        impl KmerWord for $t {
            const MAX_K: usize = (<$t>::BITS as usize) / 2 - 1;

            #[inline]
            fn mask(k: usize) -> Self {
                debug_assert!(k <= Self::MAX_K);
                ((1 as $t) << (2 * k)) - 1
            }

            #[inline]
            fn push_forward(self, code: u8, mask: Self) -> Self {
                ((self << 2) & mask) | code as $t
            }

            #[inline]
            fn push_reverse(self, code: u8, top_shift: u32) -> Self {
                (self >> 2) | (((3 - code) as $t) << top_shift)
            }

            #[inline]
            fn push_digit(self, digit: u8) -> Self {
                (self << 6).wrapping_add(digit as $t)
            }

            #[inline]
            fn pair_at(self, pair: usize) -> u8 {
                ((self >> (2 * pair)) & 0b11) as u8
            }
        }
    };
}

impl_kmer_word!(u64);
impl_kmer_word!(u128);

/// Encode a k-mer window to an LSB-aligned code. `None` if too long or a
/// break character is present.
#[inline]
pub fn encode_kmer<W: KmerWord>(window: &[u8]) -> Option<W> {
    let k = window.len();
    if k == 0 || k > W::MAX_K {
        return None;
    }
    let mask = W::mask(k);
    let mut code = W::default();
    for &b in window {
        code = code.push_forward(map_base(b)?, mask);
    }
    Some(code)
}

/// Reverse-complement an LSB-aligned code (lower `2k` bits used).
#[inline]
pub fn revcomp<W: KmerWord>(code: W, k: usize) -> W {
    debug_assert!(k <= W::MAX_K);
    let top_shift = (2 * k - 2) as u32;
    let mut rc = W::default();
    for i in 0..k {
        rc = rc.push_reverse(code.pair_at(k - 1 - i), top_shift);
    }
    rc
}

/// Canonical form of an LSB-aligned code: the larger of the code and its
/// reverse complement.
#[inline]
pub fn canonical<W: KmerWord>(code: W, k: usize) -> W {
    code.max(revcomp(code, k))
}

/// Decode the compact text-digit key used by k-mer tables: each character is
/// one 6-bit digit offset from `'0'`, at most 30 digits, terminated by a tab.
pub fn decode_compact<W: KmerWord>(field: &[u8]) -> W {
    let mut value = W::default();
    for &c in field.iter().take(30) {
        if c == b'\t' {
            break;
        }
        value = value.push_digit(c.wrapping_sub(b'0'));
    }
    value
}

/// Render the lower `2k` bits of a code as bases.
pub fn kmer_to_string<W: KmerWord>(code: W, k: usize) -> String {
    (0..k)
        .rev()
        .map(|pair| b"ACGT"[code.pair_at(pair) as usize] as char)
        .collect()
}

/// Rolling forward/reverse-complement window over a base stream.
///
/// A break character zeroes both values and requires `k` fresh valid bases
/// before the next complete k-mer.
#[derive(Clone, Debug)]
pub struct RollingKmer<W: KmerWord> {
    k: usize,
    mask: W,
    top_shift: u32,
    forward: W,
    reverse: W,
    streak: usize,
}

impl<W: KmerWord> RollingKmer<W> {
    /// Panics if `k` is zero or does not fit `W`.
    pub fn new(k: usize) -> Self {
        assert!(k > 0 && k <= W::MAX_K, "k must be 1..={}", W::MAX_K);
        Self {
            k,
            mask: W::mask(k),
            top_shift: (2 * k - 2) as u32,
            forward: W::default(),
            reverse: W::default(),
            streak: 0,
        }
    }

    #[inline]
    pub fn k(&self) -> usize {
        self.k
    }

    /// Feed one character. Returns the canonical k-mer once at least `k`
    /// consecutive valid bases have been seen since the last reset.
    #[inline]
    pub fn push(&mut self, base: u8) -> Option<W> {
        match map_base(base) {
            Some(code) => {
                self.forward = self.forward.push_forward(code, self.mask);
                self.reverse = self.reverse.push_reverse(code, self.top_shift);
                self.streak = self.streak.saturating_add(1);
                if self.streak >= self.k {
                    Some(self.canonical())
                } else {
                    None
                }
            }
            None => {
                self.reset();
                None
            }
        }
    }

    /// Forget the current window.
    #[inline]
    pub fn reset(&mut self) {
        self.forward = W::default();
        self.reverse = W::default();
        self.streak = 0;
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.streak >= self.k
    }

    #[inline]
    pub fn forward(&self) -> W {
        self.forward
    }

    #[inline]
    pub fn reverse(&self) -> W {
        self.reverse
    }

    #[inline]
    pub fn canonical(&self) -> W {
        self.forward.max(self.reverse)
    }
}
