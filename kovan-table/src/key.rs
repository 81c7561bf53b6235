//! Composite keys.
//!
//! A [`CompositeKey`] is a fixed 192-bit identifier (three 64-bit words)
//! built from 32, 64, 128 or 160 bits of caller data, plus a 64-bit
//! placement scalar folded from the populated words.
//!
//! The folded scalar only decides which bucket a key lands in. Two keys are
//! equal only when all three stored words match, so scalar collisions are
//! harmless. The fold is a non-cryptographic multiplicative hash and must not
//! be relied on for anything security relevant.

use core::fmt;
use core::hash::{Hash, Hasher};

/// 64-bit golden ratio multiplier used for multiplicative hashing.
pub const GOLDEN64: u64 = 0x61C8_8646_80B5_83EB;

/// Number of 64-bit words stored in a key.
pub const KEY_WORDS: usize = 3;

/// Multiplicative hash of one 64-bit word.
#[inline(always)]
pub const fn mix64(word: u64) -> u64 {
    word.wrapping_mul(GOLDEN64)
}

/// Width of the raw input a key was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyWidth {
    /// 32-bit input, one word.
    U32,
    /// 64-bit input, one word.
    U64,
    /// 128-bit input, two words.
    U128,
    /// 160-bit input, three words.
    U160,
}

impl KeyWidth {
    /// Number of words populated (and folded) for this width.
    #[inline]
    pub const fn words(self) -> usize {
        match self {
            KeyWidth::U32 | KeyWidth::U64 => 1,
            KeyWidth::U128 => 2,
            KeyWidth::U160 => 3,
        }
    }
}

/// Immutable 192-bit table key.
#[derive(Clone, Copy)]
pub struct CompositeKey {
    words: [u64; KEY_WORDS],
    folded: u64,
    width: KeyWidth,
}

impl CompositeKey {
    #[inline(always)]
    fn fold(words: [u64; KEY_WORDS], width: KeyWidth) -> Self {
        let folded = words[..width.words()]
            .iter()
            .fold(0u64, |acc, &w| acc ^ mix64(w));

        Self {
            words,
            folded,
            width,
        }
    }

    /// Builds a key from a 32-bit value.
    #[inline]
    pub fn from_u32(value: u32) -> Self {
        Self::fold([value as u64, 0, 0], KeyWidth::U32)
    }

    /// Builds a key from a 64-bit value.
    #[inline]
    pub fn from_u64(value: u64) -> Self {
        Self::fold([value, 0, 0], KeyWidth::U64)
    }

    /// Builds a key from a 128-bit value split in two words.
    #[inline]
    pub fn from_u128(lo: u64, hi: u64) -> Self {
        Self::fold([lo, hi, 0], KeyWidth::U128)
    }

    /// Builds a key from a native `u128`, low half first.
    #[inline]
    pub fn from_u128_value(value: u128) -> Self {
        Self::from_u128(value as u64, (value >> 64) as u64)
    }

    /// Builds a key from 160 bits: two words plus a trailing 32-bit value.
    ///
    /// Typical use is an address pair plus a port or tunnel id.
    #[inline]
    pub fn from_u160(lo: u64, hi: u64, extra: u32) -> Self {
        Self::fold([lo, hi, extra as u64], KeyWidth::U160)
    }

    /// Raw stored words.
    #[inline]
    pub fn words(&self) -> [u64; KEY_WORDS] {
        self.words
    }

    /// Folded placement scalar.
    #[inline]
    pub fn folded(&self) -> u64 {
        self.folded
    }

    /// Width of the input this key was built from.
    #[inline]
    pub fn width(&self) -> KeyWidth {
        self.width
    }
}

// Equality covers the stored words only. Width is informational: a u32 and a
// u64 key holding the same number occupy identical storage.
impl PartialEq for CompositeKey {
    #[inline(always)]
    fn eq(&self, other: &Self) -> bool {
        self.words == other.words
    }
}

impl Eq for CompositeKey {}

impl Hash for CompositeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.words.hash(state);
    }
}

impl fmt::Debug for CompositeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeKey")
            .field("width", &self.width)
            .field("words", &self.words)
            .field("folded", &format_args!("{:#018x}", self.folded))
            .finish()
    }
}

impl From<u32> for CompositeKey {
    fn from(value: u32) -> Self {
        Self::from_u32(value)
    }
}

impl From<u64> for CompositeKey {
    fn from(value: u64) -> Self {
        Self::from_u64(value)
    }
}

impl From<u128> for CompositeKey {
    fn from(value: u128) -> Self {
        Self::from_u128_value(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_word_fold() {
        let key = CompositeKey::from_u64(77);
        assert_eq!(key.folded(), mix64(77));
        assert_eq!(key.words(), [77, 0, 0]);
        assert_eq!(key.width(), KeyWidth::U64);
    }

    #[test]
    fn test_multi_word_fold() {
        let key = CompositeKey::from_u128(177, 277);
        assert_eq!(key.folded(), mix64(177) ^ mix64(277));

        let key = CompositeKey::from_u160(177, 277, 7);
        assert_eq!(key.folded(), mix64(177) ^ mix64(277) ^ mix64(7));
        assert_eq!(key.words(), [177, 277, 7]);
    }

    #[test]
    fn test_deterministic() {
        assert_eq!(
            CompositeKey::from_u160(1, 2, 3).folded(),
            CompositeKey::from_u160(1, 2, 3).folded()
        );
        assert_eq!(CompositeKey::from_u32(9), CompositeKey::from_u32(9));
    }

    #[test]
    fn test_equality_ignores_folded_collisions() {
        // Fold is XOR of per-word hashes, so swapping words collides.
        let a = CompositeKey::from_u128(1, 2);
        let b = CompositeKey::from_u128(2, 1);
        assert_eq!(a.folded(), b.folded());
        assert_ne!(a, b);
    }

    #[test]
    fn test_u32_and_u64_share_storage() {
        assert_eq!(CompositeKey::from_u32(7), CompositeKey::from_u64(7));
        assert_eq!(CompositeKey::from(7u32).folded(), mix64(7));
    }

    #[test]
    fn test_u128_value_split() {
        let v: u128 = (5u128 << 64) | 9;
        assert_eq!(CompositeKey::from(v), CompositeKey::from_u128(9, 5));
    }
}
