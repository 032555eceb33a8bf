//! The cache control block: entry array plus LRU list.
//!
//! The cache window is split into `num_entries` entries of one minimum group
//! each. The last few entries hold the lookup tables and never take part in
//! caching; the rest form the *cache area*. Inside the cache area every entry
//! belongs to exactly one block, resident or free, and every block head is
//! linked into a single LRU list:
//!
//! ```text
//!  lru ─► [free] ◄─► [free] ◄─► [g 7] ◄─► [g 3 locked] ◄─► [g 9] ◄─ mru
//! ```
//!
//! Free blocks gather at the LRU end, so the eviction walk consumes them
//! first. Locked blocks stay linked and are skipped by the walk.

use strum::Display;

use crate::{
    cache::{CacheEntry, EntryFlags, EntryProperties, EntryRange, LruIndex},
    config::MAX_GROUP_UNITS,
    token::OverlayToken,
};

/// What [`crate::Engine::reset`] clears.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum ResetType {
    /// Evict every group, keep the lookup tables
    Cache,
    /// Evict every group and drop the lookup tables
    All,
}

/// The cache slot table.
pub struct ControlBlock<I: LruIndex> {
    entries: Vec<CacheEntry<I>>,
    lru: I,
    mru: I,
    /// First entry reserved for the lookup tables
    last_entry: usize,
    tables_loaded: bool,
    multigroup_offset: Option<u16>,
}

impl<I: LruIndex> ControlBlock<I> {
    /// Creates a control block with every cache-area entry free.
    pub(crate) fn new(num_entries: usize, table_entries: usize, multigroup_offset: Option<u16>) -> Self {
        let mut control = Self {
            entries: vec![CacheEntry::free(); num_entries],
            lru: I::NONE,
            mru: I::NONE,
            last_entry: num_entries.saturating_sub(table_entries),
            tables_loaded: false,
            multigroup_offset,
        };
        control.reset(ResetType::All);
        control
    }

    /// Frees every block; [`ResetType::All`] also drops the tables.
    pub(crate) fn reset(&mut self, kind: ResetType) {
        let end = match kind {
            ResetType::Cache => self.last_entry,
            ResetType::All => {
                self.tables_loaded = false;
                self.entries.len()
            }
        };
        self.entries[..end].fill(CacheEntry::free());

        let last = self.last_entry;
        for (idx, entry) in self.entries[..last].iter_mut().enumerate() {
            entry.prev = idx.checked_sub(1).map_or(I::NONE, I::from_index);
            entry.next = if idx + 1 < last {
                I::from_index(idx + 1)
            } else {
                I::NONE
            };
        }
        self.lru = if last > 0 { I::from_index(0) } else { I::NONE };
        self.mru = last.checked_sub(1).map_or(I::NONE, I::from_index);
    }

    /// All entries, tables included
    #[must_use]
    pub fn entries(&self) -> &[CacheEntry<I>] {
        &self.entries
    }

    /// The entry at `index`
    #[must_use]
    pub fn entry(&self, index: usize) -> Option<&CacheEntry<I>> {
        self.entries.get(index)
    }

    /// Least recently used block head
    #[must_use]
    pub fn lru_head(&self) -> Option<usize> {
        self.lru.index()
    }

    /// Most recently used block head
    #[must_use]
    pub fn mru_tail(&self) -> Option<usize> {
        self.mru.index()
    }

    /// Index of the first entry holding the lookup tables
    #[must_use]
    pub fn first_table_entry(&self) -> usize {
        self.last_entry
    }

    /// Whether the lookup tables are resident
    #[must_use]
    pub fn tables_loaded(&self) -> bool {
        self.tables_loaded
    }

    /// Start of the multi-group table in 16-bit words
    #[must_use]
    pub fn multigroup_offset(&self) -> Option<u16> {
        self.multigroup_offset
    }

    /// Iterates block heads of the cache area in index order.
    pub fn blocks(&self) -> Blocks<'_, I> {
        Blocks {
            control: self,
            next: 0,
        }
    }

    /// Block heads from least to most recently used.
    #[must_use]
    pub fn lru_order(&self) -> Vec<usize> {
        let mut order = Vec::new();
        let mut cursor = self.lru_head();
        while let Some(idx) = cursor {
            order.push(idx);
            if order.len() > self.entries.len() {
                break;
            }
            cursor = self.entries[idx].next();
        }
        order
    }

    /// Total units held by free blocks.
    #[must_use]
    pub fn free_units(&self) -> usize {
        self.blocks()
            .filter(|(_, entry)| entry.is_free())
            .map(|(_, entry)| entry.size_units())
            .sum()
    }

    /// Finds the block holding `group_id` in cache `cache_id`.
    #[must_use]
    pub fn search(&self, group_id: u16, cache_id: u8) -> Option<usize> {
        self.blocks()
            .find(|(_, entry)| {
                entry.is_resident()
                    && entry.token.group_id() == group_id
                    && entry.token.cache_id() == cache_id
            })
            .map(|(idx, _)| idx)
    }

    /// Returns the block holding the group named by `token`.
    ///
    /// Does not touch the LRU list. A multi-group token is matched on its
    /// fields as they stand, so callers pass the instance they look for.
    #[must_use]
    pub fn resolve(&self, token: OverlayToken) -> Option<EntryRange> {
        let start = self.search(token.group_id(), token.cache_id())?;
        Some(EntryRange {
            start,
            units: self.entries[start].size_units(),
        })
    }

    pub(crate) fn set_flag(&mut self, index: usize, flags: EntryFlags, value: bool) {
        self.entries[index].properties.set(flags, value);
    }

    pub(crate) fn mark_tables_loaded(&mut self) {
        let head = &mut self.entries[self.last_entry];
        head.token = OverlayToken::TABLES;
        head.properties = EntryProperties::new(0, EntryFlags::LOAD_LOCK);
        self.tables_loaded = true;
    }

    /// Turns `units` entries starting at `start` into one free block head.
    ///
    /// LRU links of the head are left alone.
    pub(crate) fn make_free(&mut self, start: usize, units: usize) {
        let head = &mut self.entries[start];
        head.token = OverlayToken::FREE;
        head.properties = EntryProperties::new(units as u8, EntryFlags::empty());
        self.clear_covered(start, units);
    }

    /// Turns `units` entries starting at `start` into a block owned by `token`.
    pub(crate) fn occupy(&mut self, start: usize, units: usize, token: OverlayToken, flags: EntryFlags) {
        let head = &mut self.entries[start];
        head.token = token;
        head.properties = EntryProperties::new(units as u8, flags);
        self.clear_covered(start, units);
    }

    fn clear_covered(&mut self, start: usize, units: usize) {
        for entry in &mut self.entries[start + 1..start + units] {
            *entry = CacheEntry::free();
        }
    }

    /// Frees `[start, end)` as free blocks of at most 15 units linked at the
    /// LRU end.
    pub(crate) fn free_span(&mut self, start: usize, end: usize) {
        let mut cursor = start;
        while cursor < end {
            let units = (end - cursor).min(MAX_GROUP_UNITS as usize);
            self.make_free(cursor, units);
            self.push_lru(cursor);
            cursor += units;
        }
    }

    /// Evicts the block at `index`, keeping its size, and moves it to the
    /// LRU end.
    pub(crate) fn release(&mut self, index: usize) {
        let units = self.entries[index].size_units();
        self.make_free(index, units);
        self.unlink(index);
        self.push_lru(index);
    }

    fn is_linked(&self, index: usize) -> bool {
        let entry = &self.entries[index];
        entry.prev != I::NONE || entry.next != I::NONE || self.lru.index() == Some(index)
    }

    /// Removes a block head from the LRU list.
    pub(crate) fn unlink(&mut self, index: usize) {
        if !self.is_linked(index) {
            return;
        }
        let (prev, next) = (self.entries[index].prev, self.entries[index].next);
        match prev.index() {
            Some(p) => self.entries[p].next = next,
            None => self.lru = next,
        }
        match next.index() {
            Some(n) => self.entries[n].prev = prev,
            None => self.mru = prev,
        }
        self.entries[index].prev = I::NONE;
        self.entries[index].next = I::NONE;
    }

    /// Links an unlinked block head at the MRU end.
    pub(crate) fn push_mru(&mut self, index: usize) {
        let link = I::from_index(index);
        self.entries[index].prev = self.mru;
        self.entries[index].next = I::NONE;
        match self.mru.index() {
            Some(tail) => self.entries[tail].next = link,
            None => self.lru = link,
        }
        self.mru = link;
    }

    /// Links an unlinked block head at the LRU end.
    pub(crate) fn push_lru(&mut self, index: usize) {
        let link = I::from_index(index);
        self.entries[index].prev = I::NONE;
        self.entries[index].next = self.lru;
        match self.lru.index() {
            Some(head) => self.entries[head].prev = link,
            None => self.mru = link,
        }
        self.lru = link;
    }

    /// Marks a block head as most recently used.
    pub(crate) fn touch(&mut self, index: usize) {
        if self.mru.index() != Some(index) {
            self.unlink(index);
            self.push_mru(index);
        }
    }

    /// Moves a block head from `from` to the unlinked entry `to`, keeping
    /// its position in the LRU list. `from` is left free and unlinked.
    pub(crate) fn move_head(&mut self, from: usize, to: usize) {
        if from == to {
            return;
        }
        let moved = self.entries[from];
        let link = I::from_index(to);
        match moved.prev.index() {
            Some(p) => self.entries[p].next = link,
            None => self.lru = link,
        }
        match moved.next.index() {
            Some(n) => self.entries[n].prev = link,
            None => self.mru = link,
        }
        self.entries[from] = CacheEntry::free();
        self.entries[to] = moved;
        let units = moved.size_units();
        self.clear_covered(to, units);
    }

    /// Checks that the LRU list covers every block head exactly once.
    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        let mut heads: Vec<usize> = self.blocks().map(|(idx, _)| idx).collect();
        let mut order = self.lru_order();
        for pair in order.windows(2) {
            assert_eq!(self.entries[pair[1]].prev(), Some(pair[0]));
        }
        assert_eq!(order.last().copied(), self.mru_tail());
        heads.sort_unstable();
        order.sort_unstable();
        assert_eq!(heads, order, "LRU list and block heads disagree");
        for (idx, entry) in self.blocks() {
            assert!(entry.size_units() > 0, "block {idx} has size 0");
        }
    }
}

/// Iterator over the block heads of the cache area.
pub struct Blocks<'a, I: LruIndex> {
    control: &'a ControlBlock<I>,
    next: usize,
}

impl<'a, I: LruIndex> Iterator for Blocks<'a, I> {
    type Item = (usize, &'a CacheEntry<I>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.control.last_entry {
            return None;
        }
        let idx = self.next;
        let entry = &self.control.entries[idx];
        self.next += entry.size_units().max(1);
        Some((idx, entry))
    }
}
