use strum::{Display, EnumCount, EnumIter, FromRepr};
use thiserror::Error;

use crate::{hooks::HookError, token::OverlayToken};

macro_rules! internal_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Internal {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Internal {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

/// Numeric error codes handed to the error sink.
///
/// The values are part of the embedding contract: firmware that overrides
/// [`crate::hooks::OverlayHooks::report_error`] commonly switches on the raw
/// number, so the discriminants never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumCount, FromRepr)]
#[repr(u32)]
pub enum ErrorCode {
    /// Configuration rejected during initialization
    InvalidInitParams = 0,
    /// The cache cannot provide enough entries for a group
    NotEnoughEntries = 1,
    /// The fetch hook failed to load a group
    LoadErr = 2,
    /// Compaction would have to move a data overlay
    OvlDataDefragErr = 3,
    /// A loaded group failed its checksum
    CrcCheckErr = 4,
    /// The offset / multi-group tables could not be loaded
    TableLoadErr = 5,
    /// Lock or unlock of a group that is not resident
    LockUnlockErr = 6,
    /// The engine was entered while disabled or from interrupt context
    InvokedWhileDisabled = 7,
    /// The critical-section provider failed on enter
    EnterCriticalSectionErr = 8,
    /// The critical-section provider failed on exit
    ExitCriticalSectionErr = 9,
    /// Internal bookkeeping is inconsistent
    InternalErr = 10,
    /// The engine was used before `init`
    NotInitialized = 11,
    /// The shadow call stack ran out of frames
    CallStackOverflow = 12,
}

impl ErrorCode {
    /// Returns the raw numeric value of this code.
    #[must_use]
    pub const fn value(self) -> u32 {
        self as u32
    }
}

/// The generic Error type, which provides coverage for all errors the overlay
/// engine can return.
///
/// # Error Categories
///
/// ## Configuration
/// - [`Error::InvalidInitParams`] - rejected [`crate::OverlayConfig`] or init arguments
/// - [`Error::NotInitialized`] - engine used before [`crate::Engine::init`]
///
/// ## Resource exhaustion
/// - [`Error::NotEnoughEntries`] - the cache cannot hold the requested group
/// - [`Error::CallStackOverflow`] - the shadow call stack is full
///
/// ## Integrity
/// - [`Error::LoadFailed`] - the fetch hook failed
/// - [`Error::CrcMismatch`] - a loaded group failed its checksum
/// - [`Error::TableLoad`] - the lookup tables could not be loaded
/// - [`Error::DataDefrag`] - compaction would have to move a data overlay
///
/// ## Protocol
/// - [`Error::LockUnlock`] - lock/unlock of a non-resident group
/// - [`Error::InvokedWhileDisabled`] - engine entered while disabled
/// - [`Error::EnterCriticalSection`] / [`Error::ExitCriticalSection`] - critical-section hook failure
/// - [`Error::LockError`] - a poisoned [`crate::SharedEngine`] mutex
/// - [`Error::Internal`] - broken internal bookkeeping
///
/// Every variant maps onto one [`ErrorCode`] through [`Error::code`], which is
/// what reaches the error sink.
#[derive(Error, Debug)]
pub enum Error {
    /// The configuration or init arguments were rejected.
    #[error("Invalid init parameters - {0}")]
    InvalidInitParams(String),

    /// The engine has not been initialized.
    #[error("Overlay engine is not initialized")]
    NotInitialized,

    /// Not enough cache entries to hold the group.
    ///
    /// Returned when the request exceeds the cache area or when every block
    /// that could be evicted still leaves too little room.
    #[error("Not enough cache entries for {token} ({requested} units requested)")]
    NotEnoughEntries {
        /// Token whose group was being placed
        token: OverlayToken,
        /// Requested size in minimum-group units
        requested: usize,
    },

    /// The fetch hook failed to load a group.
    #[error("Failed to load {token}: {source}")]
    LoadFailed {
        /// Token whose group was being loaded
        token: OverlayToken,
        /// Error returned by the hook
        #[source]
        source: HookError,
    },

    /// Compaction would have to relocate a data overlay.
    #[error("Defragmentation would move data overlay {token}")]
    DataDefrag {
        /// Resident data overlay that blocks compaction
        token: OverlayToken,
    },

    /// A loaded group failed checksum validation.
    #[error("CRC mismatch for {token}")]
    CrcMismatch {
        /// Token whose group failed validation
        token: OverlayToken,
    },

    /// The offset and multi-group tables could not be loaded.
    #[error("Failed to load overlay tables - {0}")]
    TableLoad(String),

    /// Lock or unlock was requested for a group that is not resident.
    #[error("Cannot change lock state of non-resident {token}")]
    LockUnlock {
        /// Token of the requested group
        token: OverlayToken,
    },

    /// The engine was entered while disabled or from interrupt context.
    #[error("Overlay engine invoked while disabled ({token})")]
    InvokedWhileDisabled {
        /// Token that was being invoked
        token: OverlayToken,
    },

    /// The critical-section provider failed to enter.
    #[error("Failed to enter critical section: {0}")]
    EnterCriticalSection(#[source] HookError),

    /// The critical-section provider failed to exit.
    #[error("Failed to exit critical section: {0}")]
    ExitCriticalSection(#[source] HookError),

    /// The shadow call stack is full.
    ///
    /// The value is the configured depth that was exceeded.
    #[error("Shadow call stack overflow - depth {0}")]
    CallStackOverflow(usize),

    /// Failed to lock the shared engine.
    ///
    /// The mutex was poisoned by a panicking holder.
    #[error("Failed to lock target")]
    LockError,

    /// Internal bookkeeping is inconsistent.
    #[error("Internal - {file}:{line}: {message}")]
    Internal {
        /// The message to be printed for the Internal error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },
}

impl Error {
    /// Returns the numeric code reported to the error sink.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::InvalidInitParams(_) => ErrorCode::InvalidInitParams,
            Error::NotInitialized => ErrorCode::NotInitialized,
            Error::NotEnoughEntries { .. } => ErrorCode::NotEnoughEntries,
            Error::LoadFailed { .. } => ErrorCode::LoadErr,
            Error::DataDefrag { .. } => ErrorCode::OvlDataDefragErr,
            Error::CrcMismatch { .. } => ErrorCode::CrcCheckErr,
            Error::TableLoad(_) => ErrorCode::TableLoadErr,
            Error::LockUnlock { .. } => ErrorCode::LockUnlockErr,
            Error::InvokedWhileDisabled { .. } => ErrorCode::InvokedWhileDisabled,
            Error::EnterCriticalSection(_) | Error::LockError => {
                ErrorCode::EnterCriticalSectionErr
            }
            Error::ExitCriticalSection(_) => ErrorCode::ExitCriticalSectionErr,
            Error::CallStackOverflow(_) => ErrorCode::CallStackOverflow,
            Error::Internal { .. } => ErrorCode::InternalErr,
        }
    }

    /// Returns the token the error is about, if any.
    #[must_use]
    pub fn token(&self) -> Option<OverlayToken> {
        match self {
            Error::NotEnoughEntries { token, .. }
            | Error::LoadFailed { token, .. }
            | Error::DataDefrag { token }
            | Error::CrcMismatch { token }
            | Error::LockUnlock { token }
            | Error::InvokedWhileDisabled { token } => Some(*token),
            Error::TableLoad(_) => Some(OverlayToken::TABLES),
            _ => None,
        }
    }
}
