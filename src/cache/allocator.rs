//! Placement of a group in the cache area.
//!
//! Allocation escalates in three steps: take a run of free blocks as is,
//! otherwise evict least recently used blocks and look again, otherwise
//! compact the cache area. When a locked block still splits the free space,
//! the next least recently used block is evicted and compaction runs again.

use crate::{
    cache::{defrag, eviction, ControlBlock, EntryFlags, EntryRange, LruIndex, Relocation},
    hooks::OverlayHooks,
    token::OverlayToken,
    Error, Result,
};

/// Outcome of a successful allocation.
#[derive(Debug, Default)]
pub(crate) struct Allocation {
    pub(crate) range: EntryRange,
    pub(crate) evicted: Vec<OverlayToken>,
    pub(crate) relocated: Vec<Relocation>,
}

/// Finds the first run of adjacent free blocks covering `units`.
///
/// Returns the head of the run and the units it spans, which may exceed the
/// request by less than one block.
pub(crate) fn find_free_run<I: LruIndex>(control: &ControlBlock<I>, units: usize) -> Option<(usize, usize)> {
    let mut start = 0;
    let mut run = 0;
    for (idx, entry) in control.blocks() {
        if entry.is_resident() {
            run = 0;
            continue;
        }
        if run == 0 {
            start = idx;
        }
        run += entry.size_units();
        if run >= units {
            return Some((start, run));
        }
    }
    None
}

/// Claims `units` entries at the head of a free run for `token`.
fn carve<I: LruIndex>(
    control: &mut ControlBlock<I>,
    start: usize,
    run: usize,
    units: usize,
    token: OverlayToken,
    flags: EntryFlags,
) -> EntryRange {
    let mut idx = start;
    while idx < start + run {
        let size = control.entries()[idx].size_units().max(1);
        control.unlink(idx);
        idx += size;
    }

    control.occupy(start, units, token, flags);
    if run > units {
        control.make_free(start + units, run - units);
        control.push_lru(start + units);
    }
    control.push_mru(start);
    EntryRange { start, units }
}

/// Allocates `units` entries for `token`, evicting and compacting as needed.
///
/// The new block is linked at the MRU end and carries `flags`.
///
/// # Errors
///
/// - [`Error::NotEnoughEntries`] when no span between locked blocks can hold
///   the request; nothing is evicted in that case
/// - [`Error::DataDefrag`] when compaction would move a data overlay
pub(crate) fn allocate<I: LruIndex, H: OverlayHooks + ?Sized>(
    control: &mut ControlBlock<I>,
    memory: &mut [u8],
    hooks: &H,
    min_group_size: u32,
    token: OverlayToken,
    units: usize,
    flags: EntryFlags,
) -> Result<Allocation> {
    let not_enough = || Error::NotEnoughEntries {
        token,
        requested: units,
    };
    if units == 0 || units > eviction::largest_unlocked_span(control) {
        return Err(not_enough());
    }

    let mut allocation = Allocation::default();
    if let Some((start, run)) = find_free_run(control, units) {
        allocation.range = carve(control, start, run, units, token, flags);
        return Ok(allocation);
    }

    let victims = eviction::select_victims(control, units, token)?;
    allocation.evicted = eviction::evict(control, &victims);
    loop {
        if let Some((start, run)) = find_free_run(control, units) {
            allocation.range = carve(control, start, run, units, token, flags);
            return Ok(allocation);
        }

        log::debug!(
            "{} free units are fragmented, compacting for {}",
            control.free_units(),
            token
        );
        let moved = defrag::compact(control, memory, hooks, min_group_size)?;
        allocation.relocated.extend(moved);
        if let Some((start, run)) = find_free_run(control, units) {
            allocation.range = carve(control, start, run, units, token, flags);
            return Ok(allocation);
        }

        let idx = eviction::next_victim(control).ok_or_else(not_enough)?;
        allocation.evicted.push(eviction::evict_one(control, idx));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::RecordingHooks;

    const UNIT: u32 = 512;

    fn token(group: u16) -> OverlayToken {
        OverlayToken::from_parts(group, 0, 0, false)
    }

    fn alloc(
        control: &mut ControlBlock<u8>,
        memory: &mut [u8],
        group: u16,
        units: usize,
    ) -> Result<Allocation> {
        let hooks = RecordingHooks::default();
        allocate(control, memory, &hooks, UNIT, token(group), units, EntryFlags::empty())
    }

    #[test]
    fn test_first_fit_on_empty_cache() {
        let mut control = ControlBlock::<u8>::new(9, 1, None);
        let mut memory = vec![0; 9 * UNIT as usize];

        let a = alloc(&mut control, &mut memory, 1, 3).unwrap();
        assert_eq!(a.range, EntryRange { start: 0, units: 3 });
        let b = alloc(&mut control, &mut memory, 2, 2).unwrap();
        assert_eq!(b.range, EntryRange { start: 3, units: 2 });
        assert!(b.evicted.is_empty());
        assert_eq!(control.mru_tail(), Some(3));
        assert_eq!(control.free_units(), 3);
        control.assert_consistent();
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let mut control = ControlBlock::<u8>::new(4, 1, None);
        let mut memory = vec![0; 4 * UNIT as usize];
        for group in 1..=3 {
            alloc(&mut control, &mut memory, group, 1).unwrap();
        }
        control.touch(0);

        let d = alloc(&mut control, &mut memory, 4, 1).unwrap();
        assert_eq!(d.evicted, vec![token(2)]);
        assert_eq!(d.range.start, 1);
        assert_eq!(control.search(1, 0), Some(0));
        control.assert_consistent();
    }

    #[test]
    fn test_oversized_request_fails() {
        let mut control = ControlBlock::<u8>::new(4, 1, None);
        let mut memory = vec![0; 4 * UNIT as usize];
        let err = alloc(&mut control, &mut memory, 1, 4).unwrap_err();
        assert!(matches!(err, Error::NotEnoughEntries { requested: 4, .. }));
    }

    #[test]
    fn test_compacts_fragmented_cache() {
        let mut control = ControlBlock::<u8>::new(6, 1, None);
        let mut memory = vec![0; 6 * UNIT as usize];
        for group in 1..=5 {
            alloc(&mut control, &mut memory, group, 1).unwrap();
        }
        // LRU order 2, 4, 1, 3, 5: the two oldest leave holes at 1 and 3
        for idx in [0, 2, 4] {
            control.touch(idx);
        }

        let f = alloc(&mut control, &mut memory, 6, 2).unwrap();
        assert_eq!(f.evicted, vec![token(2), token(4)]);
        assert_eq!(f.relocated.len(), 2);
        assert_eq!(f.range, EntryRange { start: 3, units: 2 });
        assert_eq!(control.search(1, 0), Some(0));
        assert_eq!(control.search(3, 0), Some(1));
        assert_eq!(control.search(5, 0), Some(2));
        control.assert_consistent();
    }

    #[test]
    fn test_evicts_past_lock_that_splits_free_space() {
        let mut control = ControlBlock::<u8>::new(6, 1, None);
        let mut memory = vec![0; 6 * UNIT as usize];
        for group in 1..=5 {
            alloc(&mut control, &mut memory, group, 1).unwrap();
        }
        control.set_flag(1, EntryFlags::EVICT_LOCK, true);

        // evicting 1 and 3 leaves holes on both sides of the locked group 2
        let f = alloc(&mut control, &mut memory, 6, 2).unwrap();
        assert_eq!(f.evicted, vec![token(1), token(3), token(4)]);
        assert_eq!(f.range.units, 2);
        assert_eq!(control.search(2, 0), Some(1));
        assert!(control.search(5, 0).is_some());
        assert!(control.search(6, 0).is_some());
        control.assert_consistent();
    }

    #[test]
    fn test_request_wider_than_unlocked_span_evicts_nothing() {
        let mut control = ControlBlock::<u8>::new(5, 1, None);
        let mut memory = vec![0; 5 * UNIT as usize];
        for group in 1..=4 {
            alloc(&mut control, &mut memory, group, 1).unwrap();
        }
        control.set_flag(0, EntryFlags::EVICT_LOCK, true);
        control.set_flag(2, EntryFlags::EVICT_LOCK, true);

        let err = alloc(&mut control, &mut memory, 5, 2).unwrap_err();
        assert!(matches!(err, Error::NotEnoughEntries { requested: 2, .. }));
        for group in 1..=4 {
            assert!(control.search(group, 0).is_some(), "group {group}");
        }
        control.assert_consistent();
    }
}
