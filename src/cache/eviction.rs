//! Strict LRU victim selection.

use crate::{
    cache::{ControlBlock, LruIndex},
    token::OverlayToken,
    utils::BitSet,
    Error, Result,
};

/// Blocks chosen for eviction.
#[derive(Debug)]
pub(crate) struct Victims {
    /// Block heads, drained in index order
    pub(crate) heads: BitSet,
    /// Units the victims add up to, free blocks included
    pub(crate) units: usize,
}

/// Walks the LRU list from its least recently used end, skipping locked
/// blocks, until the collected blocks cover `units`.
///
/// # Errors
///
/// Returns [`Error::NotEnoughEntries`] when the list is exhausted first.
pub(crate) fn select_victims<I: LruIndex>(
    control: &ControlBlock<I>,
    units: usize,
    token: OverlayToken,
) -> Result<Victims> {
    let mut victims = Victims {
        heads: BitSet::new(control.first_table_entry()),
        units: 0,
    };

    let mut cursor = control.lru_head();
    while let Some(idx) = cursor {
        let entry = &control.entries()[idx];
        cursor = entry.next();
        if entry.properties().is_locked() {
            continue;
        }
        victims.heads.insert(idx);
        victims.units += entry.size_units();
        if victims.units >= units {
            return Ok(victims);
        }
    }

    Err(Error::NotEnoughEntries {
        token,
        requested: units,
    })
}

/// Least recently used block that is resident and unlocked.
pub(crate) fn next_victim<I: LruIndex>(control: &ControlBlock<I>) -> Option<usize> {
    let mut cursor = control.lru_head();
    while let Some(idx) = cursor {
        let entry = &control.entries()[idx];
        if entry.is_resident() && !entry.properties().is_locked() {
            return Some(idx);
        }
        cursor = entry.next();
    }
    None
}

/// Longest run of units not interrupted by a locked block.
///
/// Compaction never moves a block across a locked one, so this bounds the
/// largest group the cache area can take even after evicting everything
/// evictable.
pub(crate) fn largest_unlocked_span<I: LruIndex>(control: &ControlBlock<I>) -> usize {
    let mut largest = 0;
    let mut span = 0;
    for (_, entry) in control.blocks() {
        if entry.is_resident() && entry.properties().is_locked() {
            span = 0;
            continue;
        }
        span += entry.size_units().max(1);
        largest = largest.max(span);
    }
    largest
}

/// Evicts the block at `idx` and returns its token.
pub(crate) fn evict_one<I: LruIndex>(control: &mut ControlBlock<I>, idx: usize) -> OverlayToken {
    let token = control.entries()[idx].token();
    log::debug!("evicting {} from entry {}", token, idx);
    control.release(idx);
    token
}

/// Evicts the selected blocks and returns the tokens that left the cache.
pub(crate) fn evict<I: LruIndex>(control: &mut ControlBlock<I>, victims: &Victims) -> Vec<OverlayToken> {
    let resident: Vec<usize> = victims
        .heads
        .iter()
        .filter(|&idx| control.entries()[idx].is_resident())
        .collect();
    resident
        .into_iter()
        .map(|idx| evict_one(control, idx))
        .collect()
}
