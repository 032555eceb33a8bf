//! Shared fixtures for unit tests: a backing-store image builder and hooks
//! that record every call the engine makes.

use std::{
    cell::{Cell, RefCell},
    collections::BTreeMap,
};

use crate::{
    hooks::{ErrorReport, HookError, HookResult, InstrumentationReport, LoadRequest, OverlayHooks},
    token::OverlayToken,
    utils,
};

/// Builds a backing-store image: lookup tables followed by the groups.
///
/// Group `g` is filled with `(g * 7 + i) % 251`; with CRC enabled the last
/// four bytes of every group and of the tables hold the checksum.
pub struct ImageBuilder {
    min_group_size: usize,
    tables_size: usize,
    crc: bool,
    groups: BTreeMap<u16, u16>,
    multigroup_offset: usize,
    multigroup: Vec<u32>,
}

impl ImageBuilder {
    pub fn new(min_group_size: u32) -> Self {
        Self {
            min_group_size: min_group_size as usize,
            tables_size: min_group_size as usize,
            crc: false,
            groups: BTreeMap::new(),
            multigroup_offset: 128,
            multigroup: Vec::new(),
        }
    }

    pub fn tables_size(mut self, size: u32) -> Self {
        self.tables_size = size as usize;
        self
    }

    pub fn crc(mut self, enabled: bool) -> Self {
        self.crc = enabled;
        self
    }

    pub fn group(mut self, id: u16, units: u16) -> Self {
        self.groups.insert(id, units);
        self
    }

    pub fn multigroup_offset(mut self, words: u16) -> Self {
        self.multigroup_offset = usize::from(words);
        self
    }

    /// Appends one list of alternatives, terminated by 0.
    pub fn multigroup(mut self, tokens: &[OverlayToken]) -> Self {
        self.multigroup.extend(tokens.iter().map(|t| t.value()));
        self.multigroup.push(0);
        self
    }

    fn table_units(&self) -> usize {
        self.tables_size.div_ceil(self.min_group_size)
    }

    pub fn build(self) -> Vec<u8> {
        let unit = self.min_group_size;
        let table_units = self.table_units();
        let max_id = self.groups.keys().next_back().copied().unwrap_or(0);

        let mut offsets = vec![0u16, table_units as u16];
        for id in 1..=max_id {
            let size = self.groups.get(&id).copied().unwrap_or(0);
            offsets.push(offsets[usize::from(id)] + size);
        }

        let total = usize::from(*offsets.last().unwrap()) * unit;
        let mut image = vec![0u8; total.max(table_units * unit)];
        for (i, off) in offsets.iter().enumerate() {
            image[i * 2..i * 2 + 2].copy_from_slice(&off.to_le_bytes());
        }
        let mg = self.multigroup_offset * 2;
        for (i, raw) in self.multigroup.iter().enumerate() {
            image[mg + i * 4..mg + i * 4 + 4].copy_from_slice(&raw.to_le_bytes());
        }
        if self.crc {
            seal(&mut image[..table_units * unit]);
        }

        for (&id, &units) in &self.groups {
            let start = usize::from(offsets[usize::from(id)]) * unit;
            let group = &mut image[start..start + usize::from(units) * unit];
            for (i, byte) in group.iter_mut().enumerate() {
                *byte = ((usize::from(id) * 7 + i) % 251) as u8;
            }
            if self.crc {
                seal(group);
            }
        }
        image
    }
}

fn seal(region: &mut [u8]) {
    let split = region.len() - 4;
    let crc = utils::crc32(&region[..split]);
    region[split..].copy_from_slice(&crc.to_le_bytes());
}

/// Bytes of `group` within an image produced by [`ImageBuilder`].
pub fn group_image(image: &[u8], min_group_size: u32, group: u16) -> &[u8] {
    let at = |g: u16| {
        let pos = usize::from(g) * 2;
        usize::from(u16::from_le_bytes([image[pos], image[pos + 1]])) * min_group_size as usize
    };
    &image[at(group)..at(group + 1)]
}

/// Hooks serving an in-memory image and recording every interaction.
///
/// `report_error` records instead of halting.
#[derive(Debug, Default)]
pub struct RecordingHooks {
    image: Vec<u8>,
    loads: RefCell<Vec<LoadRequest>>,
    errors: RefCell<Vec<ErrorReport>>,
    events: RefCell<Vec<InstrumentationReport>>,
    invalidations: RefCell<Vec<(u32, u32)>>,
    corrupt: Cell<Option<u32>>,
    depth: Cell<usize>,
    max_depth: Cell<usize>,
    entries: Cell<usize>,
    loads_inside: Cell<usize>,
    fail_enter: Cell<bool>,
    fail_enter_after_load: Cell<bool>,
    fail_exit: Cell<bool>,
    interrupt: Cell<bool>,
}

impl RecordingHooks {
    pub fn new(image: Vec<u8>) -> Self {
        Self {
            image,
            ..Self::default()
        }
    }

    pub fn image(&self) -> &[u8] {
        &self.image
    }

    pub fn loads(&self) -> Vec<LoadRequest> {
        self.loads.borrow().clone()
    }

    pub fn load_count(&self) -> usize {
        self.loads.borrow().len()
    }

    pub fn errors(&self) -> Vec<ErrorReport> {
        self.errors.borrow().clone()
    }

    pub fn events(&self) -> Vec<InstrumentationReport> {
        self.events.borrow().clone()
    }

    pub fn invalidations(&self) -> Vec<(u32, u32)> {
        self.invalidations.borrow().clone()
    }

    pub fn critical_depth(&self) -> usize {
        self.depth.get()
    }

    pub fn max_critical_depth(&self) -> usize {
        self.max_depth.get()
    }

    pub fn critical_entries(&self) -> usize {
        self.entries.get()
    }

    /// Loads issued while the critical section was held.
    pub fn loads_inside_critical(&self) -> usize {
        self.loads_inside.get()
    }

    /// Flips the first loaded byte of every load from `group_offset`.
    pub fn corrupt_offset(&self, group_offset: u32) {
        self.corrupt.set(Some(group_offset));
    }

    pub fn fail_enter(&self, fail: bool) {
        self.fail_enter.set(fail);
    }

    /// Refuses every critical section entered after the next load.
    pub fn fail_enter_after_load(&self) {
        self.fail_enter_after_load.set(true);
    }

    pub fn fail_exit(&self, fail: bool) {
        self.fail_exit.set(fail);
    }

    pub fn set_interrupt(&self, active: bool) {
        self.interrupt.set(active);
    }
}

impl OverlayHooks for RecordingHooks {
    fn load_group(&self, request: &LoadRequest, destination: &mut [u8]) -> HookResult {
        if self.depth.get() > 0 {
            self.loads_inside.set(self.loads_inside.get() + 1);
        }
        self.loads.borrow_mut().push(*request);

        let start = request.group_offset as usize;
        let source = self
            .image
            .get(start..start + destination.len())
            .ok_or_else(|| HookError::new(format!("no image data at 0x{start:x}")))?;
        destination.copy_from_slice(source);
        if self.corrupt.get() == Some(request.group_offset) {
            destination[0] ^= 0xFF;
        }
        if self.fail_enter_after_load.get() {
            self.fail_enter.set(true);
        }
        Ok(())
    }

    fn invalidate_data_cache(&self, address: u32, size: u32) {
        self.invalidations.borrow_mut().push((address, size));
    }

    fn enter_critical_section(&self) -> HookResult {
        if self.fail_enter.get() {
            return Err(HookError::new("enter refused"));
        }
        let depth = self.depth.get() + 1;
        self.depth.set(depth);
        self.max_depth.set(self.max_depth.get().max(depth));
        self.entries.set(self.entries.get() + 1);
        Ok(())
    }

    fn exit_critical_section(&self) -> HookResult {
        if self.fail_exit.get() {
            return Err(HookError::new("exit refused"));
        }
        self.depth.set(self.depth.get().saturating_sub(1));
        Ok(())
    }

    fn report_error(&self, report: &ErrorReport) {
        self.errors.borrow_mut().push(*report);
    }

    fn report_instrumentation(&self, report: &InstrumentationReport) {
        self.events.borrow_mut().push(*report);
    }

    fn in_interrupt_context(&self) -> bool {
        self.interrupt.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_layout() {
        let image = ImageBuilder::new(512).crc(true).group(1, 1).group(3, 2).build();
        assert_eq!(image.len(), 4 * 512);
        assert_eq!(group_image(&image, 512, 1).len(), 512);
        assert!(group_image(&image, 512, 2).is_empty());
        assert_eq!(group_image(&image, 512, 3)[1], 22);

        let (payload, crc) = utils::split_trailer(group_image(&image, 512, 3)).unwrap();
        assert_eq!(utils::crc32(payload), crc);
        let (payload, crc) = utils::split_trailer(&image[..512]).unwrap();
        assert_eq!(utils::crc32(payload), crc);
    }
}
