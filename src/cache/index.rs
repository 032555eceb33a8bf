//! Width of the LRU link fields.
//!
//! Every cache entry stores the index of its LRU neighbours. Small caches use
//! one byte per link, larger ones two or four; the largest value of the
//! chosen width is the "no neighbour" sentinel, so a profile can address one
//! entry less than its range.

use std::fmt;

/// Index width selected for a given number of cache entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum IndexProfile {
    /// `u8` links, at most 255 entries
    Narrow,
    /// `u16` links, at most 65535 entries
    Medium,
    /// `u32` links
    Wide,
}

impl IndexProfile {
    /// Picks the narrowest profile able to link `entries` cache entries.
    #[must_use]
    pub fn for_entries(entries: usize) -> Self {
        if entries <= <u8 as LruIndex>::MAX_ENTRIES {
            IndexProfile::Narrow
        } else if entries <= <u16 as LruIndex>::MAX_ENTRIES {
            IndexProfile::Medium
        } else {
            IndexProfile::Wide
        }
    }
}

/// An integer type usable as an LRU link.
pub trait LruIndex: Copy + Eq + fmt::Debug + Send + Sync + 'static {
    /// The "no neighbour" sentinel.
    const NONE: Self;
    /// Number of entries addressable without hitting the sentinel.
    const MAX_ENTRIES: usize;
    /// Profile implemented by this type.
    const PROFILE: IndexProfile;

    /// Converts an entry index. The caller guarantees `index < MAX_ENTRIES`.
    fn from_index(index: usize) -> Self;

    /// Returns the entry index, or `None` for the sentinel.
    fn index(self) -> Option<usize>;
}

macro_rules! impl_lru_index {
    ($ty:ty, $profile:expr) => {
        impl LruIndex for $ty {
            const NONE: Self = <$ty>::MAX;
            const MAX_ENTRIES: usize = <$ty>::MAX as usize;
            const PROFILE: IndexProfile = $profile;

            #[inline]
            fn from_index(index: usize) -> Self {
                index as $ty
            }

            #[inline]
            fn index(self) -> Option<usize> {
                (self != Self::NONE).then_some(self as usize)
            }
        }
    };
}

impl_lru_index!(u8, IndexProfile::Narrow);
impl_lru_index!(u16, IndexProfile::Medium);
impl_lru_index!(u32, IndexProfile::Wide);
