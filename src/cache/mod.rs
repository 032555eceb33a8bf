//! The cache slot table and the algorithms that manage it.
//!
//! - [`ControlBlock`] owns the entry array and the LRU list
//! - `allocator` places groups, falling back to eviction and compaction
//! - `eviction` picks strict-LRU victims, skipping locked blocks
//! - `defrag` compacts the cache area when free space is fragmented
//!
//! None of these touch the critical section; the engine holds it around
//! every call into this module.

pub(crate) mod allocator;
mod control;
pub(crate) mod defrag;
mod entry;
pub(crate) mod eviction;
mod index;

pub use control::{Blocks, ControlBlock, ResetType};
pub use defrag::Relocation;
pub use entry::{CacheEntry, EntryFlags, EntryProperties, EntryRange};
pub use index::{IndexProfile, LruIndex};
