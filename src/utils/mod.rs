//! Small helpers shared across the engine.

mod bitset;
mod crc;

pub use bitset::{BitSet, BitSetIter};
pub use crc::{crc32, split_trailer};
