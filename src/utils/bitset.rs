//! A compact set of cache entry indices.
//!
//! The eviction engine collects its victims here while walking the LRU list
//! and then drains them in ascending index order, which lets freed blocks
//! next to each other form one contiguous run.
//!
//! # Example
//!
//! ```rust,ignore
//! use ovlcache::utils::BitSet;
//!
//! let mut victims = BitSet::new(16);
//! victims.insert(9);
//! victims.insert(2);
//!
//! assert_eq!(victims.iter().collect::<Vec<_>>(), vec![2, 9]);
//! ```

/// A bit vector over entry indices.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct BitSet {
    /// The bits, stored as a vector of words.
    words: Vec<u64>,
    /// Capacity in bits.
    len: usize,
}

impl BitSet {
    /// Creates a new empty bit set with the given capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            words: vec![0; capacity.div_ceil(64)],
            len: capacity,
        }
    }

    /// Sets the bit at the given index.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not below the capacity.
    pub fn insert(&mut self, index: usize) {
        assert!(index < self.len, "index out of bounds");
        self.words[index / 64] |= 1u64 << (index % 64);
    }

    /// Returns an iterator over the indices of set bits, in ascending order.
    pub fn iter(&self) -> BitSetIter<'_> {
        BitSetIter {
            set: self,
            word_idx: 0,
            pending: self.words.first().copied().unwrap_or(0),
        }
    }
}

impl std::fmt::Debug for BitSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// Iterator over the set bits in a `BitSet`.
pub struct BitSetIter<'a> {
    set: &'a BitSet,
    word_idx: usize,
    /// Bits of the current word not yet yielded
    pending: u64,
}

impl Iterator for BitSetIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.pending != 0 {
                let bit = self.pending.trailing_zeros() as usize;
                self.pending &= self.pending - 1;
                return Some(self.word_idx * 64 + bit);
            }
            self.word_idx += 1;
            self.pending = *self.set.words.get(self.word_idx)?;
        }
    }
}
