//! # ovlcache Prelude
//!
//! The types needed to configure an engine, implement its hooks and drive
//! overlay calls.
//!
//! ```rust
//! use ovlcache::prelude::*;
//! ```

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all ovlcache operations
pub use crate::Error;

/// Numeric error codes passed to the error sink
pub use crate::ErrorCode;

/// The result type used throughout ovlcache
pub use crate::Result;

// ================================================================================================
// Engine
// ================================================================================================

/// The overlay engine and its lifecycle types
pub use crate::engine::{Engine, EngineState, InitArgs, LockState, Status};

/// Build-time parameters
pub use crate::config::{OverlayConfig, TablesLayout};

/// Cache reset scope
pub use crate::cache::ResetType;

/// Thread-safe engine wrapper
pub use crate::critical::SharedEngine;

// ================================================================================================
// Calls
// ================================================================================================

/// Overlay tokens
pub use crate::token::OverlayToken;

/// Task stacks
pub use crate::stack::TaskId;

/// Stub-facing call/return entry points
pub use crate::dispatch::{Dispatcher, ReturnPath};

// ================================================================================================
// Platform Interface
// ================================================================================================

/// Hooks implemented by the embedding
pub use crate::hooks::{
    ErrorReport, HookError, HookResult, InstrumentationEvent, InstrumentationReport, LoadRequest,
    OverlayHooks,
};
