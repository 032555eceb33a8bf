// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]

//! # ovlcache
//!
//! A software-managed overlay cache for embedded programs that are larger
//! than their execution RAM. Functions and read-only data are linked into
//! *overlay groups* kept in a backing store (flash, external memory). Calls
//! to them go through 32-bit *overlay tokens*; the engine loads the group
//! into a small RAM window on demand, evicting least recently used groups,
//! and tracks active calls on a shadow stack so returns land correctly even
//! after the caller's group moved.
//!
//! ## Features
//!
//! - **Variable-size groups** - groups span 1 to 15 cache entries
//! - **LRU eviction with locking** - pin hot groups with [`Engine::lock_unlock`]
//! - **Compaction** - fragmented free space is merged by moving code blocks
//! - **CRC validation** - optional CRC-32 trailer check on every load
//! - **Multi-group tokens** - functions duplicated into several groups
//! - **Per-task shadow stacks** - one frame pool shared by all tasks
//! - **Platform hooks** - storage, critical sections and error handling are
//!   supplied by the embedding through [`OverlayHooks`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ovlcache::prelude::*;
//!
//! struct Flash(Vec<u8>);
//!
//! impl OverlayHooks for Flash {
//!     fn load_group(&self, request: &LoadRequest, destination: &mut [u8]) -> HookResult {
//!         let start = request.group_offset as usize;
//!         let source = self
//!             .0
//!             .get(start..start + destination.len())
//!             .ok_or_else(|| HookError::new("read past end of flash"))?;
//!         destination.copy_from_slice(source);
//!         Ok(())
//!     }
//! }
//!
//! let config = OverlayConfig::new().with_cache_size(4096).with_cache_base(0x8000_0000);
//! let mut engine: Engine<Flash> = Engine::new(config, Flash(std::fs::read("overlays.bin")?));
//! engine.init(InitArgs::eager())?;
//!
//! let token = OverlayToken::from_parts(3, 0, 0, false);
//! let target = engine.invoke(TaskId::MAIN, token, 0x0000_1234)?;
//! // ... run the function at `target` ...
//! let resume = engine.return_from_callee(TaskId::MAIN)?;
//! assert_eq!(resume, 0x0000_1234);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! - [`token`] - the overlay token encoding
//! - [`config`] - build-time parameters and their validation
//! - [`cache`] - control block, LRU list, allocation, eviction, compaction
//! - [`tables`] - the offset and multi-group lookup tables
//! - [`stack`] - the shadow call stack
//! - [`engine`] - the [`Engine`] tying it together
//! - [`dispatch`] - call/return entry points for stubs
//! - [`hooks`] - the platform interface
//! - [`critical`] - critical-section guard and [`SharedEngine`]
//!
//! ## Error Handling
//!
//! Fallible operations return [`Result`]. Call-path failures are also
//! reported to [`OverlayHooks::report_error`], whose default halts.

#[macro_use]
pub(crate) mod error;

pub mod cache;
pub mod config;
pub mod critical;
pub mod dispatch;
pub mod engine;
pub mod hooks;
pub(crate) mod loader;
pub mod prelude;
pub mod stack;
pub mod tables;
pub mod token;
pub mod utils;

#[cfg(test)]
pub(crate) mod test;

/// `ovlcache` result type
pub type Result<T> = std::result::Result<T, Error>;

pub use error::{Error, ErrorCode};

pub use cache::{ControlBlock, IndexProfile, LruIndex, ResetType};
pub use config::{OverlayConfig, TablesLayout};
pub use critical::{CriticalSection, SharedEngine};
pub use dispatch::{Dispatcher, ReturnPath};
pub use engine::{Engine, EngineState, InitArgs, LockState, Status};
pub use hooks::OverlayHooks;
pub use stack::{CallStack, StackFrame, TaskId};
pub use token::OverlayToken;
