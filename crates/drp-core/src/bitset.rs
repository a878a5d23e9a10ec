//! Fixed-capacity bit vector used as the per-vertex reachability index.
//!
//! Capacity is rounded up to whole 32-bit words. Binary operations on sets
//! of different capacity operate over the shorter word range and produce a
//! set with the capacity of `self`.

use serde::{Deserialize, Serialize};

const WORD_BITS: usize = 32;

/// A fixed-size set of bit positions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BitSet {
    data: Vec<u32>,
}

impl BitSet {
    /// Create an all-zero bitset able to hold at least `size` bits.
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0; size.div_ceil(WORD_BITS)],
        }
    }

    /// Rebuild a bitset from its little-endian byte encoding.
    ///
    /// Trailing bytes that do not fill a whole word are zero-padded.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let data = bytes
            .chunks(4)
            .map(|chunk| {
                let mut word = [0_u8; 4];
                word[..chunk.len()].copy_from_slice(chunk);
                u32::from_le_bytes(word)
            })
            .collect();
        Self { data }
    }

    /// Little-endian byte encoding, four bytes per word.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.data.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    /// Number of addressable bits.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.data.len() * WORD_BITS
    }

    /// Clear every bit.
    pub fn clear(&mut self) {
        self.data.fill(0);
    }

    /// Set or clear the bit at `index`. Out-of-range indices are ignored.
    pub fn set(&mut self, index: usize, value: bool) {
        let Some(word) = self.data.get_mut(index / WORD_BITS) else {
            return;
        };
        let mask = 1_u32 << (index % WORD_BITS);
        if value {
            *word |= mask;
        } else {
            *word &= !mask;
        }
    }

    /// Read the bit at `index`. Out-of-range indices read as unset.
    #[must_use]
    pub fn get(&self, index: usize) -> bool {
        self.data
            .get(index / WORD_BITS)
            .is_some_and(|word| word & (1 << (index % WORD_BITS)) != 0)
    }

    /// Toggle the bit at `index`.
    pub fn flip(&mut self, index: usize) {
        if let Some(word) = self.data.get_mut(index / WORD_BITS) {
            *word ^= 1 << (index % WORD_BITS);
        }
    }

    /// Number of set bits.
    #[must_use]
    pub fn count_ones(&self) -> usize {
        self.data.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Positions of all set bits, ascending.
    pub fn ones(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.capacity()).filter(|&i| self.get(i))
    }

    #[must_use]
    pub fn and(&self, other: &Self) -> Self {
        self.zip_with(other, |a, b| a & b, Some(0))
    }

    #[must_use]
    pub fn or(&self, other: &Self) -> Self {
        self.zip_with(other, |a, b| a | b, None)
    }

    #[must_use]
    pub fn xor(&self, other: &Self) -> Self {
        self.zip_with(other, |a, b| a ^ b, None)
    }

    #[must_use]
    pub fn not(&self) -> Self {
        Self {
            data: self.data.iter().map(|w| !w).collect(),
        }
    }

    /// Combine word-by-word. Words of `self` beyond `other` either keep
    /// their value (`fill == None`) or are replaced by `fill`.
    fn zip_with(&self, other: &Self, op: impl Fn(u32, u32) -> u32, fill: Option<u32>) -> Self {
        let data = self
            .data
            .iter()
            .enumerate()
            .map(|(i, &a)| match other.data.get(i) {
                Some(&b) => op(a, b),
                None => fill.unwrap_or(a),
            })
            .collect();
        Self { data }
    }
}
