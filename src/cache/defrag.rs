//! Compaction of the cache area.
//!
//! Compaction slides every movable resident block toward entry 0, in index
//! order, so that the free space behind it coalesces. Locked blocks (user
//! lock or load lock) stay where they are and split the cache area into
//! independent segments. The whole move list is planned before anything is
//! touched, so a data overlay in the way aborts compaction with the cache
//! unchanged.
//!
//! ```text
//!  before: [A][ ][B][L][ ][C][ ][ ]        L = locked
//!  after:  [A][B][ ][L][C][    free  ]
//! ```
//!
//! Blocks keep their position in the LRU list; the free space left behind is
//! rebuilt into free blocks of at most 15 units at the LRU end.

use crate::{
    cache::{ControlBlock, LruIndex},
    hooks::OverlayHooks,
    token::OverlayToken,
    Error, Result,
};

/// A block moved by compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relocation {
    /// Token of the moved group
    pub token: OverlayToken,
    /// Previous head index
    pub from: usize,
    /// New head index
    pub to: usize,
    /// Block size in units
    pub units: usize,
}

struct Plan {
    moves: Vec<Relocation>,
    /// Final `(start, units)` of every resident block, in index order
    occupied: Vec<(usize, usize)>,
}

fn plan<I: LruIndex>(control: &ControlBlock<I>) -> Result<Plan> {
    let mut plan = Plan {
        moves: Vec::new(),
        occupied: Vec::new(),
    };
    let mut write = 0;

    for (idx, entry) in control.blocks() {
        if entry.is_free() {
            continue;
        }
        let units = entry.size_units();
        if entry.properties().is_locked() || write == idx {
            plan.occupied.push((idx, units));
            write = idx + units;
            continue;
        }
        if entry.properties().is_data() {
            return Err(Error::DataDefrag {
                token: entry.token(),
            });
        }
        plan.moves.push(Relocation {
            token: entry.token(),
            from: idx,
            to: write,
            units,
        });
        plan.occupied.push((write, units));
        write += units;
    }
    Ok(plan)
}

/// Compacts the cache area and returns the blocks that moved.
///
/// Free units, LRU order of resident groups, and the bytes of every group
/// are preserved.
///
/// # Errors
///
/// Returns [`Error::DataDefrag`] when a data overlay would have to move; the
/// cache is left untouched in that case.
pub(crate) fn compact<I: LruIndex, H: OverlayHooks + ?Sized>(
    control: &mut ControlBlock<I>,
    memory: &mut [u8],
    hooks: &H,
    min_group_size: u32,
) -> Result<Vec<Relocation>> {
    let plan = plan(control)?;
    if plan.moves.is_empty() {
        return Ok(plan.moves);
    }

    let free_heads: Vec<usize> = control
        .blocks()
        .filter(|(_, entry)| entry.is_free())
        .map(|(idx, _)| idx)
        .collect();
    for idx in free_heads {
        control.unlink(idx);
    }

    let unit = min_group_size as usize;
    for relocation in &plan.moves {
        log::debug!(
            "moving {} from entry {} to {}",
            relocation.token,
            relocation.from,
            relocation.to
        );
        hooks.copy(
            memory,
            relocation.to * unit,
            relocation.from * unit,
            relocation.units * unit,
        );
        control.move_head(relocation.from, relocation.to);
    }

    let mut cursor = 0;
    for &(start, units) in &plan.occupied {
        if cursor < start {
            control.free_span(cursor, start);
        }
        cursor = start + units;
    }
    let end = control.first_table_entry();
    if cursor < end {
        control.free_span(cursor, end);
    }

    Ok(plan.moves)
}
