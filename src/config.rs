//! Overlay engine configuration.
//!
//! Everything the firmware image was built against lives here: the group
//! granularity, the size and address of the cache window, the depth of the
//! shadow call stack and the layout of the lookup tables. The engine copies
//! the configuration at construction and validates it in
//! [`crate::Engine::init`].
//!
//! # Defaults
//!
//! | Setting             | Default        |
//! |---------------------|----------------|
//! | `min_group_size`    | 512 bytes      |
//! | `max_group_size`    | 4096 bytes     |
//! | `cache_size`        | 8192 bytes     |
//! | `cache_base`        | `0x2000_0000`  |
//! | `call_stack_depth`  | 30 frames      |
//! | `tables.size`       | 512 bytes      |
//! | `crc`               | off            |
//! | `multi_group`       | off            |
//!
//! # Example
//!
//! ```rust
//! use ovlcache::{OverlayConfig, TablesLayout};
//!
//! let config = OverlayConfig::new()
//!     .with_cache_size(4 * 1024)
//!     .with_crc(true)
//!     .with_tables(TablesLayout::new(512).with_multigroup_offset(64))
//!     .with_multi_group(true);
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.num_entries(), 8);
//! ```

use crate::{Error, Result};

/// Smallest supported group granularity in bytes.
pub const MIN_GROUP_SIZE_LIMIT: u32 = 512;
/// Largest supported group size in bytes.
pub const MAX_GROUP_SIZE_LIMIT: u32 = 4096;
/// Largest group size expressible in an entry's size field, in units.
pub const MAX_GROUP_UNITS: u32 = 15;
/// Largest supported shadow call stack depth.
///
/// Frames link to each other through a signed 16-bit byte offset.
pub const MAX_CALL_STACK_DEPTH: usize = (i16::MAX as usize) / crate::stack::FRAME_SIZE;

/// Layout of the offset and multi-group lookup tables.
///
/// Both tables are stored back to back at offset 0 of the backing store: the
/// offset table first (one `u16` per group, in minimum-group units), the
/// multi-group table `multigroup_offset` 16-bit words later, and an optional
/// CRC trailer in the last four bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TablesLayout {
    /// Total size of the tables in bytes, CRC trailer included
    pub size: u32,
    /// Start of the multi-group table in 16-bit words from the table start
    pub multigroup_offset: Option<u16>,
}

impl TablesLayout {
    /// Creates a layout with only an offset table.
    #[must_use]
    pub fn new(size: u32) -> Self {
        Self {
            size,
            multigroup_offset: None,
        }
    }

    /// Sets the start of the multi-group table in 16-bit words.
    #[must_use]
    pub fn with_multigroup_offset(mut self, offset: u16) -> Self {
        self.multigroup_offset = Some(offset);
        self
    }
}

impl Default for TablesLayout {
    fn default() -> Self {
        Self::new(512)
    }
}

/// Configuration of the overlay cache engine.
///
/// Built with the `with_*` methods starting from [`OverlayConfig::new`] (or
/// [`Default`]). See the [module documentation](self) for default values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayConfig {
    /// Minimum group size in bytes; one cache entry covers this many bytes
    pub min_group_size: u32,
    /// Maximum group size in bytes
    pub max_group_size: u32,
    /// Size of the cache window in bytes, tables included
    pub cache_size: u32,
    /// Address of the first byte of the cache window
    pub cache_base: u32,
    /// Number of shadow call stack frames shared by all tasks
    pub call_stack_depth: usize,
    /// Layout of the lookup tables
    pub tables: TablesLayout,
    /// Whether loaded groups and tables carry a CRC trailer
    pub crc: bool,
    /// Whether multi-group tokens are supported
    pub multi_group: bool,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            min_group_size: 512,
            max_group_size: 4096,
            cache_size: 8192,
            cache_base: 0x2000_0000,
            call_stack_depth: 30,
            tables: TablesLayout::default(),
            crc: false,
            multi_group: false,
        }
    }
}

impl OverlayConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the minimum group size (entry granularity) in bytes.
    #[must_use]
    pub fn with_min_group_size(mut self, size: u32) -> Self {
        self.min_group_size = size;
        self
    }

    /// Sets the maximum group size in bytes.
    #[must_use]
    pub fn with_max_group_size(mut self, size: u32) -> Self {
        self.max_group_size = size;
        self
    }

    /// Sets the size of the cache window in bytes.
    #[must_use]
    pub fn with_cache_size(mut self, size: u32) -> Self {
        self.cache_size = size;
        self
    }

    /// Sets the address of the cache window.
    #[must_use]
    pub fn with_cache_base(mut self, base: u32) -> Self {
        self.cache_base = base;
        self
    }

    /// Sets the number of shadow call stack frames.
    #[must_use]
    pub fn with_call_stack_depth(mut self, depth: usize) -> Self {
        self.call_stack_depth = depth;
        self
    }

    /// Sets the lookup table layout.
    #[must_use]
    pub fn with_tables(mut self, tables: TablesLayout) -> Self {
        self.tables = tables;
        self
    }

    /// Enables or disables CRC validation.
    #[must_use]
    pub fn with_crc(mut self, enabled: bool) -> Self {
        self.crc = enabled;
        self
    }

    /// Enables or disables multi-group token support.
    #[must_use]
    pub fn with_multi_group(mut self, enabled: bool) -> Self {
        self.multi_group = enabled;
        self
    }

    /// Total number of cache entries, tables included.
    #[must_use]
    pub fn num_entries(&self) -> usize {
        (self.cache_size / self.min_group_size.max(1)) as usize
    }

    /// Number of entries the lookup tables occupy at the end of the cache.
    #[must_use]
    pub fn table_entries(&self) -> usize {
        self.tables.size.div_ceil(self.min_group_size.max(1)) as usize
    }

    /// Size of the tables once rounded up to whole entries, in bytes.
    #[must_use]
    pub fn table_bytes(&self) -> u32 {
        self.table_entries() as u32 * self.min_group_size
    }

    /// Number of entries available to overlay groups.
    #[must_use]
    pub fn group_entries(&self) -> usize {
        self.num_entries().saturating_sub(self.table_entries())
    }

    /// Largest group size in minimum-group units.
    #[must_use]
    pub fn max_group_units(&self) -> u32 {
        self.max_group_size / self.min_group_size.max(1)
    }

    /// Checks the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInitParams`] describing the first violated rule.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(Error::InvalidInitParams(msg));

        if !self.min_group_size.is_power_of_two()
            || !(MIN_GROUP_SIZE_LIMIT..=MAX_GROUP_SIZE_LIMIT).contains(&self.min_group_size)
        {
            return invalid(format!(
                "min group size {} must be a power of two in {MIN_GROUP_SIZE_LIMIT}..={MAX_GROUP_SIZE_LIMIT}",
                self.min_group_size
            ));
        }
        if !self.max_group_size.is_power_of_two()
            || !(self.min_group_size..=MAX_GROUP_SIZE_LIMIT).contains(&self.max_group_size)
        {
            return invalid(format!(
                "max group size {} must be a power of two in {}..={MAX_GROUP_SIZE_LIMIT}",
                self.max_group_size, self.min_group_size
            ));
        }
        if self.max_group_units() > MAX_GROUP_UNITS {
            return invalid(format!(
                "max group size spans {} units, at most {MAX_GROUP_UNITS} fit an entry",
                self.max_group_units()
            ));
        }
        if self.cache_size == 0 || self.cache_size % self.min_group_size != 0 {
            return invalid(format!(
                "cache size {} is not a non-zero multiple of {}",
                self.cache_size, self.min_group_size
            ));
        }
        if self.cache_base % self.min_group_size != 0
            || self.cache_base.checked_add(self.cache_size).is_none()
        {
            return invalid(format!(
                "cache base 0x{:08x} is misaligned or the window wraps",
                self.cache_base
            ));
        }
        if self.call_stack_depth == 0 || self.call_stack_depth > MAX_CALL_STACK_DEPTH {
            return invalid(format!(
                "call stack depth {} must be in 1..={MAX_CALL_STACK_DEPTH}",
                self.call_stack_depth
            ));
        }
        if self.tables.size < 2 || (self.crc && self.tables.size <= 4) {
            return invalid(format!("tables size {} is too small", self.tables.size));
        }
        if self.table_entries() >= self.num_entries() {
            return invalid(format!(
                "tables need {} of {} entries, none left for groups",
                self.table_entries(),
                self.num_entries()
            ));
        }
        if self.multi_group {
            match self.tables.multigroup_offset {
                Some(offset) if u32::from(offset) * 2 < self.tables.size => {}
                _ => {
                    return invalid(
                        "multi-group support needs a multi-group table inside the tables".into(),
                    )
                }
            }
        }
        Ok(())
    }
}
