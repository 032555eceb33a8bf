//! Read access to the resident lookup tables.
//!
//! The tables are loaded into the last entries of the cache window:
//!
//! ```text
//!  +0                      offset table: u16 per group, in min-group units
//!  +2 * multigroup_offset  multi-group table: u32 tokens, 0 terminates a list
//!  +size - 4               CRC trailer (cleared after validation)
//! ```
//!
//! Group `g` spans `offset[g]..offset[g + 1]` units of the backing store.
//! A multi-group token's group field is the index of its first alternative
//! in the multi-group table.

use crate::token::OverlayToken;

/// A view over resident lookup tables.
#[derive(Debug, Clone, Copy)]
pub struct OverlayTables<'a> {
    bytes: &'a [u8],
    multigroup_offset: Option<u16>,
}

impl<'a> OverlayTables<'a> {
    /// Wraps the raw table bytes.
    #[must_use]
    pub fn new(bytes: &'a [u8], multigroup_offset: Option<u16>) -> Self {
        Self {
            bytes,
            multigroup_offset,
        }
    }

    fn read_u16(&self, pos: usize) -> Option<u16> {
        let raw = self.bytes.get(pos..pos + 2)?;
        Some(u16::from_le_bytes([raw[0], raw[1]]))
    }

    fn read_u32(&self, pos: usize) -> Option<u32> {
        let raw = self.bytes.get(pos..pos + 4)?;
        Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    /// Start of `group` in the backing store, in minimum-group units.
    #[must_use]
    pub fn group_offset_units(&self, group: u16) -> Option<u16> {
        self.read_u16(usize::from(group) * 2)
    }

    /// Size of `group` in minimum-group units.
    ///
    /// Returns `None` for groups outside the table or with a non-positive size.
    #[must_use]
    pub fn group_units(&self, group: u16) -> Option<u16> {
        let start = self.group_offset_units(group)?;
        let end = self.group_offset_units(group.checked_add(1)?)?;
        end.checked_sub(start).filter(|&units| units > 0)
    }

    /// Token stored at `index` of the multi-group table.
    ///
    /// Returns `None` past the table or at a list terminator.
    #[must_use]
    pub fn multigroup_token(&self, index: u16) -> Option<OverlayToken> {
        let base = usize::from(self.multigroup_offset?) * 2;
        let raw = self.read_u32(base + usize::from(index) * 4)?;
        (raw != 0).then_some(OverlayToken::new(raw))
    }

    /// Alternatives of the multi-group list starting at `first`, with their
    /// table index.
    pub fn multigroup_instances(&self, first: u16) -> impl Iterator<Item = (u16, OverlayToken)> + '_ {
        (first..=u16::MAX).map_while(move |index| Some((index, self.multigroup_token(index)?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables_bytes() -> Vec<u8> {
        let mut bytes = vec![0u8; 64];
        // offset table: group 0 = tables, groups 1..=3
        for (i, off) in [0u16, 1, 2, 4, 5].iter().enumerate() {
            bytes[i * 2..i * 2 + 2].copy_from_slice(&off.to_le_bytes());
        }
        // multi-group table at word 16 (byte 32)
        let tokens = [
            OverlayToken::from_parts(2, 4, 0, false),
            OverlayToken::from_parts(3, 8, 0, false),
        ];
        for (i, t) in tokens.iter().enumerate() {
            let pos = 32 + i * 4;
            bytes[pos..pos + 4].copy_from_slice(&t.value().to_le_bytes());
        }
        bytes
    }

    #[test]
    fn test_group_sizes() {
        let bytes = tables_bytes();
        let tables = OverlayTables::new(&bytes, Some(16));
        assert_eq!(tables.group_units(1), Some(1));
        assert_eq!(tables.group_units(2), Some(2));
        assert_eq!(tables.group_offset_units(3), Some(4));
        assert_eq!(tables.group_units(3), Some(1));
        // entry 5 is zero: size would be negative
        assert_eq!(tables.group_units(4), None);
        assert_eq!(tables.group_units(40), None);
    }

    #[test]
    fn test_multigroup_list() {
        let bytes = tables_bytes();
        let tables = OverlayTables::new(&bytes, Some(16));
        let instances: Vec<_> = tables.multigroup_instances(0).collect();
        assert_eq!(instances.len(), 2);
        assert_eq!(instances[1].0, 1);
        assert_eq!(instances[1].1.group_id(), 3);
        assert_eq!(tables.multigroup_token(2), None);

        let without = OverlayTables::new(&bytes, None);
        assert_eq!(without.multigroup_instances(0).count(), 0);
    }
}
