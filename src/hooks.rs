//! The interface between the engine and the embedding application.
//!
//! The engine never touches storage, interrupts or caches directly. Every
//! platform service it needs is a method of [`OverlayHooks`], implemented by
//! the firmware and handed to [`crate::Engine::new`]. Only
//! [`OverlayHooks::load_group`] is mandatory; the other methods carry
//! defaults that suit a single-threaded host.
//!
//! # Call order on a miss
//!
//! ```text
//! enter_critical_section ─► allocate/evict/defrag (copy) ─► exit_critical_section
//!                                                                │
//!        load_group ◄────────────────────────────────────────────┘
//!            │
//!            ├─► crc_matches            (when CRC is enabled)
//!            └─► invalidate_data_cache
//!                      │
//! enter_critical_section ─► unpin, push frame ─► exit_critical_section
//! ```
//!
//! # Example
//!
//! ```rust
//! use ovlcache::hooks::{HookError, HookResult, LoadRequest, OverlayHooks};
//!
//! struct Flash<'a> {
//!     image: &'a [u8],
//! }
//!
//! impl OverlayHooks for Flash<'_> {
//!     fn load_group(&self, request: &LoadRequest, destination: &mut [u8]) -> HookResult {
//!         let start = request.group_offset as usize;
//!         let source = self
//!             .image
//!             .get(start..start + destination.len())
//!             .ok_or_else(|| HookError::new("read past end of flash"))?;
//!         destination.copy_from_slice(source);
//!         Ok(())
//!     }
//! }
//! ```

use strum::{Display, EnumIter, FromRepr};
use thiserror::Error;

use crate::{error::ErrorCode, token::OverlayToken, utils};

/// Result type returned by fallible hooks.
pub type HookResult = std::result::Result<(), HookError>;

/// Failure reported by a hook.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct HookError {
    message: String,
}

impl HookError {
    /// Creates a hook error with a description.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the description.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Arguments of a group fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadRequest {
    /// Byte offset of the group in the backing store
    pub group_offset: u32,
    /// Number of bytes to load
    pub size: u32,
    /// Cache address the bytes are loaded to
    pub destination: u32,
}

/// Payload of the error sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorReport {
    /// Token involved in the failure, or [`OverlayToken::default`] when none
    pub token: OverlayToken,
    /// The failure
    pub code: ErrorCode,
}

/// Call and return outcomes reported for profiling.
///
/// The codes share a base of `0xFC`; bit 0 marks an invocation and bit 1 a
/// load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, FromRepr)]
#[repr(u8)]
pub enum InstrumentationEvent {
    /// Return (or data access) to a group that was still resident
    ReturnWithoutLoad = 0xFC,
    /// Call into a group that was already resident
    InvokeWithoutLoad = 0xFD,
    /// Return (or data access) that had to reload the group
    ReturnWithLoad = 0xFE,
    /// Call that had to load the group
    InvokeWithLoad = 0xFF,
}

impl InstrumentationEvent {
    const BASE: u8 = 0xFC;
    const INVOKE: u8 = 0x01;
    const LOAD: u8 = 0x02;

    /// Selects the event for an access outcome.
    #[must_use]
    pub fn new(invoke: bool, loaded: bool) -> Self {
        let mut code = Self::BASE;
        if loaded {
            code |= Self::LOAD;
        }
        if invoke {
            code |= Self::INVOKE;
        }
        Self::from_repr(code).unwrap_or(Self::ReturnWithoutLoad)
    }

    /// Returns true if the event involved a load.
    #[must_use]
    pub fn loaded(self) -> bool {
        self as u8 & Self::LOAD != 0
    }

    /// Returns true if the event was a call rather than a return.
    #[must_use]
    pub fn invoked(self) -> bool {
        self as u8 & Self::INVOKE != 0
    }
}

/// Payload of the instrumentation sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstrumentationReport {
    /// Resolved token (for multi-group tokens, the instance that served)
    pub token: OverlayToken,
    /// What happened
    pub event: InstrumentationEvent,
}

/// Platform services consumed by the engine.
///
/// All methods take `&self`; implementations that record state use interior
/// mutability. The engine calls [`enter_critical_section`](Self::enter_critical_section)
/// and [`exit_critical_section`](Self::exit_critical_section) around every
/// structural mutation, but never around [`load_group`](Self::load_group).
pub trait OverlayHooks {
    /// Copies one group image from the backing store into `destination`.
    ///
    /// `destination` is exactly `request.size` bytes of the cache, starting
    /// at `request.destination`. The call may block.
    ///
    /// # Errors
    ///
    /// A failure is reported as [`crate::Error::LoadFailed`].
    fn load_group(&self, request: &LoadRequest, destination: &mut [u8]) -> HookResult;

    /// Moves `size` bytes of cache memory from offset `src` to offset `dest`.
    ///
    /// Used by defragmentation; the ranges may overlap.
    fn copy(&self, memory: &mut [u8], dest: usize, src: usize, size: usize) {
        memory.copy_within(src..src + size, dest);
    }

    /// Checks `bytes` against the expected checksum.
    fn crc_matches(&self, bytes: &[u8], expected: u32) -> bool {
        utils::crc32(bytes) == expected
    }

    /// Invalidates the data cache over a freshly loaded range.
    fn invalidate_data_cache(&self, _address: u32, _size: u32) {}

    /// Enters the critical section guarding engine state.
    ///
    /// # Errors
    ///
    /// A failure is reported as [`crate::Error::EnterCriticalSection`].
    fn enter_critical_section(&self) -> HookResult {
        Ok(())
    }

    /// Leaves the critical section guarding engine state.
    ///
    /// # Errors
    ///
    /// A failure is reported as [`crate::Error::ExitCriticalSection`].
    fn exit_critical_section(&self) -> HookResult {
        Ok(())
    }

    /// Terminal error sink.
    ///
    /// The default logs the report and halts. Firmware overrides this with
    /// its own recovery; if the override returns, the engine hands the error
    /// back to its caller.
    fn report_error(&self, report: &ErrorReport) {
        log::error!(
            "overlay engine halted: {} (code {}) for token {}",
            report.code,
            report.code.value(),
            report.token
        );
        loop {
            std::hint::spin_loop();
        }
    }

    /// Best-effort profiling notification.
    fn report_instrumentation(&self, report: &InstrumentationReport) {
        log::trace!("{} {}", report.event, report.token);
    }

    /// Returns true when called from an interrupt handler.
    ///
    /// The engine refuses to resolve tokens in that case.
    fn in_interrupt_context(&self) -> bool {
        false
    }
}
