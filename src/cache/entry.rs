//! Cache entries and their packed property byte.

use std::fmt;

use bitflags::bitflags;

use crate::{cache::LruIndex, token::OverlayToken};

const SIZE_SHIFT: u8 = 2;
const SIZE_MASK: u8 = 0x0F;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// Flag bits of an entry's property byte
    pub struct EntryFlags: u8 {
        /// Pinned by the application through the lock manager
        const EVICT_LOCK = 0x01;
        /// The block holds a data overlay and must not be relocated
        const DATA = 0x02;
        /// Pinned while its bytes are being loaded
        const LOAD_LOCK = 0x40;
    }
}

impl EntryFlags {
    /// Any flag that keeps a block out of eviction and compaction
    pub const ANY_LOCK: EntryFlags = EntryFlags::EVICT_LOCK.union(EntryFlags::LOAD_LOCK);
}

/// The packed property byte of a cache entry.
///
/// Bit 0 eviction lock, bit 1 data, bits 2..=5 size in minimum-group units,
/// bit 6 load lock, bit 7 reserved.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryProperties(u8);

impl EntryProperties {
    /// Properties of a free one-unit entry.
    pub const INIT: EntryProperties = EntryProperties(1 << SIZE_SHIFT);

    /// Builds properties from a size and flags.
    ///
    /// Sizes above 15 units are truncated to the field width.
    #[must_use]
    pub fn new(size_units: u8, flags: EntryFlags) -> Self {
        EntryProperties(((size_units & SIZE_MASK) << SIZE_SHIFT) | flags.bits())
    }

    /// Returns the raw property byte
    #[must_use]
    pub const fn raw(&self) -> u8 {
        self.0
    }

    /// Returns the block size in minimum-group units
    #[must_use]
    pub const fn size_units(&self) -> u8 {
        (self.0 >> SIZE_SHIFT) & SIZE_MASK
    }

    /// Returns the flag bits
    #[must_use]
    pub fn flags(&self) -> EntryFlags {
        EntryFlags::from_bits_truncate(self.0)
    }

    /// Returns true if either lock bit is set
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.flags().intersects(EntryFlags::ANY_LOCK)
    }

    /// Returns true if the data bit is set
    #[must_use]
    pub fn is_data(&self) -> bool {
        self.flags().contains(EntryFlags::DATA)
    }

    pub(crate) fn set(&mut self, flags: EntryFlags, value: bool) {
        if value {
            self.0 |= flags.bits();
        } else {
            self.0 &= !flags.bits();
        }
    }
}

impl From<u8> for EntryProperties {
    fn from(value: u8) -> Self {
        EntryProperties(value)
    }
}

impl fmt::Debug for EntryProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EntryProperties(0x{:02x}, size: {}, flags: {:?})",
            self.0,
            self.size_units(),
            self.flags()
        )
    }
}

/// One slot of the cache slot table.
///
/// Only the first entry of a block, the block head, carries a meaningful
/// size and token; the entries it covers are left in their free state.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CacheEntry<I: LruIndex> {
    pub(crate) prev: I,
    pub(crate) next: I,
    pub(crate) properties: EntryProperties,
    pub(crate) token: OverlayToken,
}

impl<I: LruIndex> CacheEntry<I> {
    /// A free, unlinked, one-unit entry.
    #[must_use]
    pub fn free() -> Self {
        Self {
            prev: I::NONE,
            next: I::NONE,
            properties: EntryProperties::INIT,
            token: OverlayToken::FREE,
        }
    }

    /// Less recently used neighbour
    #[must_use]
    pub fn prev(&self) -> Option<usize> {
        self.prev.index()
    }

    /// More recently used neighbour
    #[must_use]
    pub fn next(&self) -> Option<usize> {
        self.next.index()
    }

    /// The property byte
    #[must_use]
    pub fn properties(&self) -> EntryProperties {
        self.properties
    }

    /// The resident token, [`OverlayToken::FREE`] for a free block
    #[must_use]
    pub fn token(&self) -> OverlayToken {
        self.token
    }

    /// Block size in minimum-group units
    #[must_use]
    pub fn size_units(&self) -> usize {
        usize::from(self.properties.size_units())
    }

    /// Returns true if the block holds a group
    #[must_use]
    pub fn is_resident(&self) -> bool {
        self.token.is_overlay()
    }

    /// Returns true if the block is free
    #[must_use]
    pub fn is_free(&self) -> bool {
        !self.is_resident()
    }
}

impl<I: LruIndex> fmt::Debug for CacheEntry<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("prev", &self.prev())
            .field("next", &self.next())
            .field("properties", &self.properties)
            .field("token", &self.token)
            .finish()
    }
}

/// A run of entries backing one block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct EntryRange {
    /// Index of the block head
    pub start: usize,
    /// Number of entries in the block
    pub units: usize,
}

impl EntryRange {
    /// Index one past the last entry of the block
    #[must_use]
    pub fn end(&self) -> usize {
        self.start + self.units
    }

    /// Byte range of the block inside the cache window
    #[must_use]
    pub fn byte_range(&self, min_group_size: u32) -> std::ops::Range<usize> {
        let unit = min_group_size as usize;
        self.start * unit..self.end() * unit
    }
}
