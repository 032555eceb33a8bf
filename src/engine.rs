//! The overlay engine.
//!
//! [`Engine`] is the context object holding the cache window, its control
//! block, the shadow call stack and the embedding's hooks. There is no
//! global state: every operation takes the engine by reference, and
//! concurrent hosts wrap it in [`crate::SharedEngine`].
//!
//! # Lifecycle
//!
//! ```text
//!  new ──► init ──► [load_tables] ──► invoke / return_from_callee / access_data
//!                                       ▲      │
//!                          enable ──────┘      └── lock_unlock, reset, disable
//! ```
//!
//! # Call path
//!
//! [`Engine::invoke`] resolves the token. A hit moves the block to the MRU
//! end. A miss allocates a block (evicting and compacting as needed), pins
//! it with the load lock, leaves the critical section, fetches and validates
//! the group, and re-enters to unpin. A frame is then pushed on the shadow
//! call stack and the resident address of the target is returned.
//! [`Engine::return_from_callee`] pops that frame and, when the caller is an
//! overlay function, resolves the caller's group again (reloading it if it
//! was evicted meanwhile) before returning the address to resume at.
//!
//! # Errors
//!
//! Errors on the call path are handed to
//! [`OverlayHooks::report_error`] before they are returned. Configuration
//! errors, use before `init` and lock/unlock of a non-resident group are
//! only returned.

use strum::Display;

use crate::{
    cache::{allocator, ControlBlock, EntryFlags, IndexProfile, LruIndex, ResetType},
    config::OverlayConfig,
    critical::CriticalSection,
    hooks::{ErrorReport, InstrumentationEvent, InstrumentationReport, LoadRequest, OverlayHooks},
    loader,
    stack::{CallStack, StackFrame, TaskId},
    tables::OverlayTables,
    token::OverlayToken,
    Error, Result,
};

/// Arguments of [`Engine::init`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InitArgs {
    /// Load the lookup tables during `init` instead of on first use
    pub load_tables: bool,
}

impl InitArgs {
    /// Loads the tables during `init`.
    #[must_use]
    pub fn eager() -> Self {
        Self { load_tables: true }
    }

    /// Defers the table load to the first call or [`Engine::load_tables`].
    #[must_use]
    pub fn deferred() -> Self {
        Self { load_tables: false }
    }
}

/// Whether the engine accepts calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum EngineState {
    /// `init` has not run
    Uninitialized,
    /// Calls are resolved
    Enabled,
    /// Calls are rejected with [`Error::InvokedWhileDisabled`]
    Disabled,
}

/// Requested eviction lock state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum LockState {
    /// Keep the group resident
    Locked,
    /// Let the group be evicted again
    Unlocked,
}

/// Read-only view of the engine for diagnostics.
pub struct Status<'a, I: LruIndex> {
    /// The shadow call stack
    pub call_stack: &'a CallStack,
    /// The cache slot table
    pub control_block: &'a ControlBlock<I>,
    /// Whether calls are accepted
    pub state: EngineState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Invoke,
    Return,
    Data,
}

#[derive(Debug, Clone, Copy)]
struct Resolution {
    entry: usize,
    /// Concrete token served; differs from the request for multi-group tokens
    instance: OverlayToken,
    multigroup_entry: Option<u16>,
}

/// Hands an error to the error sink unless it is caller-recoverable.
fn escalate<H: OverlayHooks + ?Sized>(hooks: &H, err: Error) -> Error {
    match err {
        Error::InvalidInitParams(_) | Error::NotInitialized | Error::LockUnlock { .. } => {}
        _ => hooks.report_error(&ErrorReport {
            token: err.token().unwrap_or_default(),
            code: err.code(),
        }),
    }
    err
}

/// The overlay cache engine.
///
/// `I` selects the width of the LRU links (see [`IndexProfile`]); the
/// default `u16` covers caches of up to 65534 entries.
pub struct Engine<H: OverlayHooks, I: LruIndex = u16> {
    config: OverlayConfig,
    hooks: H,
    control: ControlBlock<I>,
    stack: CallStack,
    memory: Vec<u8>,
    state: EngineState,
}

impl<H: OverlayHooks, I: LruIndex> Engine<H, I> {
    /// Creates an uninitialized engine.
    pub fn new(config: OverlayConfig, hooks: H) -> Self {
        Self {
            config,
            hooks,
            control: ControlBlock::new(0, 0, None),
            stack: CallStack::new(0),
            memory: Vec::new(),
            state: EngineState::Uninitialized,
        }
    }

    /// Validates the configuration, clears the cache and the shadow call
    /// stack, and enables the engine.
    ///
    /// Creates the stack of [`TaskId::MAIN`]. Calling `init` again starts
    /// over from an empty cache.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInitParams`] for a rejected configuration, or one
    ///   with more entries than `I` can link
    /// - [`Error::TableLoad`] when eager table loading fails
    pub fn init(&mut self, args: InitArgs) -> Result<()> {
        self.config.validate()?;
        let entries = self.config.num_entries();
        if entries > I::MAX_ENTRIES {
            return Err(Error::InvalidInitParams(format!(
                "{} entries need the {} index profile, the engine uses {}",
                entries,
                IndexProfile::for_entries(entries),
                I::PROFILE
            )));
        }

        let multigroup_offset = if self.config.multi_group {
            self.config.tables.multigroup_offset
        } else {
            None
        };
        self.memory = vec![0; self.config.cache_size as usize];
        self.control = ControlBlock::new(entries, self.config.table_entries(), multigroup_offset);
        self.stack = CallStack::new(self.config.call_stack_depth);
        self.stack.add_task();
        self.state = EngineState::Enabled;
        log::debug!(
            "overlay engine ready: {} entries of {} bytes at 0x{:08x}, {} stack frames",
            entries,
            self.config.min_group_size,
            self.config.cache_base,
            self.config.call_stack_depth
        );

        if args.load_tables {
            self.load_tables()?;
        }
        Ok(())
    }

    /// Loads the offset and multi-group tables.
    ///
    /// Calls resolve the tables on first use; this loads them ahead of time.
    ///
    /// # Errors
    ///
    /// - [`Error::NotInitialized`] before `init`
    /// - [`Error::TableLoad`] when the fetch or the CRC check fails
    pub fn load_tables(&mut self) -> Result<()> {
        self.ensure_initialized()?;
        self.load_tables_inner()
            .map_err(|err| escalate(&self.hooks, err))
    }

    fn load_tables_inner(&mut self) -> Result<()> {
        let first = self.control.first_table_entry();
        let request = LoadRequest {
            group_offset: 0,
            size: self.config.table_bytes(),
            destination: self.entry_address(first),
        };
        match loader::fetch(
            &self.hooks,
            &mut self.memory,
            self.config.cache_base,
            &request,
            self.config.crc,
            OverlayToken::TABLES,
        ) {
            Ok(()) => {}
            Err(err @ (Error::LoadFailed { .. } | Error::CrcMismatch { .. })) => {
                return Err(Error::TableLoad(err.to_string()))
            }
            Err(err) => return Err(err),
        }

        if self.config.multi_group && self.config.crc {
            // the multi-group scan stops at a zero token
            let end = self.memory.len();
            self.memory[end - 4..].fill(0);
        }

        let cs = CriticalSection::enter(&self.hooks)?;
        self.control.mark_tables_loaded();
        cs.exit()?;
        log::debug!("overlay tables loaded into entry {}", first);
        Ok(())
    }

    /// Returns read-only references to the call stack and control block.
    #[must_use]
    pub fn status(&self) -> Status<'_, I> {
        Status {
            call_stack: &self.stack,
            control_block: &self.control,
            state: self.state,
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// The configuration the engine was built with
    #[must_use]
    pub fn config(&self) -> &OverlayConfig {
        &self.config
    }

    /// The embedding's hooks
    #[must_use]
    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    /// The embedding's hooks, mutably
    pub fn hooks_mut(&mut self) -> &mut H {
        &mut self.hooks
    }

    /// The cache window
    #[must_use]
    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    /// Reads `len` bytes of the cache window at `address`.
    #[must_use]
    pub fn read(&self, address: u32, len: usize) -> Option<&[u8]> {
        let start = address.checked_sub(self.config.cache_base)? as usize;
        self.memory.get(start..start.checked_add(len)?)
    }

    /// Address of cache entry `index`.
    #[must_use]
    pub fn entry_address(&self, index: usize) -> u32 {
        self.config.cache_base + (index as u32) * self.config.min_group_size
    }

    fn in_cache_area(&self, address: u32) -> bool {
        let end = self.entry_address(self.control.first_table_entry());
        (self.config.cache_base..end).contains(&address)
    }

    /// Resident address of `token`'s target, without touching the LRU list.
    #[must_use]
    pub fn resident_address(&self, token: OverlayToken) -> Option<u32> {
        let found = self.find_resident(token, None).ok()??;
        Some(self.entry_address(found.entry) + found.instance.offset_bytes())
    }

    /// Resumes resolving calls.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`] before `init`.
    pub fn enable(&mut self) -> Result<()> {
        self.ensure_initialized()?;
        self.state = EngineState::Enabled;
        Ok(())
    }

    /// Rejects calls until [`Engine::enable`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`] before `init`.
    pub fn disable(&mut self) -> Result<()> {
        self.ensure_initialized()?;
        self.state = EngineState::Disabled;
        Ok(())
    }

    /// Evicts every group; [`ResetType::All`] also drops the tables, which
    /// are reloaded on the next call.
    ///
    /// # Errors
    ///
    /// - [`Error::NotInitialized`] before `init`
    /// - critical-section failures
    pub fn reset(&mut self, kind: ResetType) -> Result<()> {
        self.ensure_initialized()?;
        let result = CriticalSection::enter(&self.hooks).and_then(|cs| {
            self.control.reset(kind);
            cs.exit()
        });
        log::debug!("overlay cache reset ({})", kind);
        result.map_err(|err| escalate(&self.hooks, err))
    }

    /// Creates a shadow call stack for another task.
    ///
    /// # Errors
    ///
    /// - [`Error::NotInitialized`] before `init`
    /// - critical-section failures
    pub fn init_task_stack(&mut self) -> Result<TaskId> {
        self.ensure_initialized()?;
        let cs = CriticalSection::enter(&self.hooks).map_err(|err| escalate(&self.hooks, err))?;
        let task = self.stack.add_task();
        cs.exit().map_err(|err| escalate(&self.hooks, err))?;
        Ok(task)
    }

    /// Sets or clears the eviction lock of a resident group.
    ///
    /// Locking is idempotent and never loads: locking a group that is not
    /// resident fails.
    ///
    /// # Errors
    ///
    /// - [`Error::NotInitialized`] before `init`
    /// - [`Error::LockUnlock`] when the group is not resident
    /// - critical-section failures
    pub fn lock_unlock(&mut self, token: OverlayToken, state: LockState) -> Result<()> {
        self.ensure_initialized()?;
        self.lock_unlock_inner(token, state)
            .map_err(|err| escalate(&self.hooks, err))
    }

    /// Like [`Engine::lock_unlock`], for a function address whose first two
    /// instruction words are its `lui`/`addi` token thunk.
    ///
    /// # Errors
    ///
    /// See [`Engine::lock_unlock`].
    pub fn lock_unlock_function(&mut self, thunk: [u32; 2], state: LockState) -> Result<()> {
        self.lock_unlock(OverlayToken::from_thunk(thunk[0], thunk[1]), state)
    }

    fn lock_unlock_inner(&mut self, token: OverlayToken, state: LockState) -> Result<()> {
        let cs = CriticalSection::enter(&self.hooks)?;
        let Some(found) = self.find_resident(token, None)? else {
            cs.exit()?;
            log::warn!("cannot {} {}: not resident", state, token);
            return Err(Error::LockUnlock { token });
        };
        self.control
            .set_flag(found.entry, EntryFlags::EVICT_LOCK, state == LockState::Locked);
        cs.exit()
    }

    /// Enters overlay function `token` on behalf of `task`.
    ///
    /// `return_address` is where the caller continues; when it lies inside
    /// the cache the caller is taken to be the overlay function on top of
    /// the task's stack. Returns the resident address to jump to. Plain
    /// addresses are returned unchanged without any bookkeeping.
    ///
    /// # Errors
    ///
    /// Any failure is reported to the error sink except
    /// [`Error::NotInitialized`]:
    /// - [`Error::InvokedWhileDisabled`] when disabled or in interrupt context
    /// - [`Error::CallStackOverflow`] when the frame pool is exhausted
    /// - [`Error::NotEnoughEntries`], [`Error::DataDefrag`] from allocation
    /// - [`Error::LoadFailed`], [`Error::CrcMismatch`], [`Error::TableLoad`] from loading
    pub fn invoke(&mut self, task: TaskId, token: OverlayToken, return_address: u32) -> Result<u32> {
        self.invoke_inner(task, token, return_address)
            .map_err(|err| escalate(&self.hooks, err))
    }

    fn invoke_inner(&mut self, task: TaskId, token: OverlayToken, return_address: u32) -> Result<u32> {
        if !token.is_overlay() {
            return Ok(token.value());
        }
        self.ensure_ready(token)?;
        self.stack.depth(task)?;
        if self.stack.is_full() {
            return Err(Error::CallStackOverflow(self.stack.capacity()));
        }

        let caller_return = self.caller_return(task, return_address)?;
        let resolved = self.resolve(token, None, Access::Invoke)?;

        let cs = CriticalSection::enter(&self.hooks)?;
        self.stack
            .push(task, StackFrame::call(caller_return, token, resolved.multigroup_entry))?;
        cs.exit()?;

        Ok(self.entry_address(resolved.entry) + resolved.instance.offset_bytes())
    }

    /// Leaves the innermost overlay call of `task` and returns the address
    /// to resume at.
    ///
    /// When the caller is an overlay function its group is resolved again,
    /// and reloaded if it was evicted while the callee ran.
    ///
    /// # Errors
    ///
    /// As for [`Engine::invoke`]; returning without an active call is an
    /// [`Error::Internal`].
    pub fn return_from_callee(&mut self, task: TaskId) -> Result<u32> {
        self.return_inner(task)
            .map_err(|err| escalate(&self.hooks, err))
    }

    fn return_inner(&mut self, task: TaskId) -> Result<u32> {
        let callee = self.stack.top(task)?.callee_token;
        self.ensure_ready(callee)?;

        let cs = CriticalSection::enter(&self.hooks)?;
        let frame = self.stack.pop(task)?;
        let caller = *self.stack.top(task)?;
        cs.exit()?;

        if !caller.callee_token.is_overlay() {
            return Ok(frame.caller_return);
        }

        let resolved = self.resolve(caller.callee_token, caller.multigroup_entry, Access::Return)?;
        if resolved.multigroup_entry != caller.multigroup_entry {
            let cs = CriticalSection::enter(&self.hooks)?;
            self.stack.top_mut(task)?.multigroup_entry = resolved.multigroup_entry;
            cs.exit()?;
        }

        Ok(self.entry_address(resolved.entry) + resolved.instance.offset_bytes() + frame.caller_return)
    }

    /// Makes data overlay `token` resident and returns its address.
    ///
    /// The block is tagged as data, which keeps compaction from moving it.
    ///
    /// # Errors
    ///
    /// As for [`Engine::invoke`], minus the call stack.
    pub fn access_data(&mut self, token: OverlayToken) -> Result<u32> {
        self.access_data_inner(token)
            .map_err(|err| escalate(&self.hooks, err))
    }

    fn access_data_inner(&mut self, token: OverlayToken) -> Result<u32> {
        if !token.is_overlay() {
            return Ok(token.value());
        }
        self.ensure_ready(token)?;
        let resolved = self.resolve(token, None, Access::Data)?;
        Ok(self.entry_address(resolved.entry) + resolved.instance.offset_bytes())
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.state == EngineState::Uninitialized {
            return Err(Error::NotInitialized);
        }
        Ok(())
    }

    fn ensure_ready(&mut self, token: OverlayToken) -> Result<()> {
        self.ensure_initialized()?;
        if self.state == EngineState::Disabled || self.hooks.in_interrupt_context() {
            return Err(Error::InvokedWhileDisabled { token });
        }
        if !self.control.tables_loaded() {
            self.load_tables_inner()?;
        }
        Ok(())
    }

    fn tables(&self) -> OverlayTables<'_> {
        let start = self.control.first_table_entry() * self.config.min_group_size as usize;
        OverlayTables::new(&self.memory[start..], self.control.multigroup_offset())
    }

    /// Return point stored in the frame of a call made from `return_address`.
    fn caller_return(&self, task: TaskId, return_address: u32) -> Result<u32> {
        if !self.in_cache_area(return_address) {
            return Ok(return_address);
        }
        let caller = *self.stack.top(task)?;
        if !caller.callee_token.is_overlay() {
            return Err(internal_error!(
                "return address 0x{:08x} is inside the cache but task {} has no overlay call",
                return_address,
                task.0
            ));
        }
        let found = self
            .find_resident(caller.callee_token, caller.multigroup_entry)?
            .ok_or_else(|| internal_error!("calling group of {} is not resident", caller.callee_token))?;
        let entry_point = self.entry_address(found.entry) + found.instance.offset_bytes();
        return_address.checked_sub(entry_point).ok_or_else(|| {
            internal_error!(
                "return address 0x{:08x} precedes its function at 0x{:08x}",
                return_address,
                entry_point
            )
        })
    }

    fn find_resident(&self, token: OverlayToken, preferred: Option<u16>) -> Result<Option<Resolution>> {
        if !token.is_multi_group() {
            return Ok(self.control.resolve(token).map(|range| Resolution {
                entry: range.start,
                instance: token,
                multigroup_entry: None,
            }));
        }
        if !self.config.multi_group {
            return Err(internal_error!(
                "multi-group token {} without multi-group support",
                token
            ));
        }

        let tables = self.tables();
        let preferred = preferred.and_then(|idx| Some((idx, tables.multigroup_token(idx)?)));
        let found = preferred
            .into_iter()
            .chain(tables.multigroup_instances(token.group_id()))
            .find_map(|(idx, instance)| {
                let range = self.control.resolve(instance)?;
                Some(Resolution {
                    entry: range.start,
                    instance,
                    multigroup_entry: Some(idx),
                })
            });
        Ok(found)
    }

    fn first_instance(&self, token: OverlayToken, preferred: Option<u16>) -> Result<(OverlayToken, Option<u16>)> {
        if !token.is_multi_group() {
            return Ok((token, None));
        }
        let idx = preferred.unwrap_or(token.group_id());
        self.tables()
            .multigroup_token(idx)
            .map(|instance| (instance, Some(idx)))
            .ok_or_else(|| internal_error!("multi-group entry {} of {} is empty", idx, token))
    }

    fn instrument(&self, instance: OverlayToken, access: Access, loaded: bool) {
        self.hooks.report_instrumentation(&InstrumentationReport {
            token: instance,
            event: InstrumentationEvent::new(access == Access::Invoke, loaded),
        });
    }

    /// Makes `token` resident, loading it on a miss.
    fn resolve(&mut self, token: OverlayToken, preferred: Option<u16>, access: Access) -> Result<Resolution> {
        let cs = CriticalSection::enter(&self.hooks)?;
        if let Some(found) = self.find_resident(token, preferred)? {
            self.control.touch(found.entry);
            if access == Access::Data {
                self.control.set_flag(found.entry, EntryFlags::DATA, true);
            }
            cs.exit()?;
            log::trace!("{} resident in entry {}", found.instance, found.entry);
            self.instrument(found.instance, access, false);
            return Ok(found);
        }

        let (instance, multigroup_entry) = self.first_instance(token, preferred)?;
        let (mut request, units) = loader::group_request(
            &self.tables(),
            instance,
            self.config.min_group_size,
            self.config.max_group_units(),
        )?;
        let flags = if access == Access::Data {
            EntryFlags::LOAD_LOCK | EntryFlags::DATA
        } else {
            EntryFlags::LOAD_LOCK
        };
        let allocation = allocator::allocate(
            &mut self.control,
            &mut self.memory,
            &self.hooks,
            self.config.min_group_size,
            instance.with_offset_words(0),
            units,
            flags,
        )?;
        let entry = allocation.range.start;
        cs.exit()?;
        if !allocation.evicted.is_empty() || !allocation.relocated.is_empty() {
            log::debug!(
                "placing {} evicted {} group(s) and moved {}",
                instance,
                allocation.evicted.len(),
                allocation.relocated.len()
            );
        }

        request.destination = self.entry_address(entry);
        let fetched = loader::fetch(
            &self.hooks,
            &mut self.memory,
            self.config.cache_base,
            &request,
            self.config.crc,
            instance,
        );

        let cs = match CriticalSection::enter(&self.hooks) {
            Ok(cs) => cs,
            Err(err) => {
                self.control.release(entry);
                return Err(err);
            }
        };
        if let Err(err) = fetched {
            self.control.release(entry);
            cs.exit()?;
            return Err(err);
        }
        self.control.set_flag(entry, EntryFlags::LOAD_LOCK, false);
        cs.exit()?;

        self.instrument(instance, access, true);
        Ok(Resolution {
            entry,
            instance,
            multigroup_entry,
        })
    }
}
