//! Serialization of engine state.
//!
//! Two layers keep engine state consistent:
//!
//! - [`CriticalSection`] brackets every structural mutation with the
//!   embedding's `enter_critical_section` / `exit_critical_section` hooks
//!   (interrupt masking before the scheduler runs, a mutex afterwards). It is
//!   held per operation, never across a fetch or a whole overlay call.
//! - [`SharedEngine`] puts the engine behind a `std::sync::Mutex` for hosts
//!   where several threads drive one engine.
//!
//! # Examples
//!
//! ```rust,ignore
//! use ovlcache::{Engine, OverlayConfig, SharedEngine, TaskId};
//! use std::sync::Arc;
//! use std::thread;
//!
//! let shared = Arc::new(SharedEngine::new(Engine::new(OverlayConfig::default(), hooks)));
//! let worker = Arc::clone(&shared);
//! thread::spawn(move || {
//!     let address = worker.with(|engine| engine.invoke(TaskId::MAIN, token, 0x8000_0000))?;
//!     Ok::<_, ovlcache::Error>(address)
//! });
//! ```

use std::sync::{Mutex, MutexGuard};

use crate::{
    cache::LruIndex,
    engine::Engine,
    error::ErrorCode,
    hooks::{ErrorReport, OverlayHooks},
    token::OverlayToken,
    Error, Result,
};

/// RAII guard over the embedding's critical section.
///
/// Dropping the guard leaves the critical section on a best-effort basis;
/// use [`CriticalSection::exit`] to observe exit failures.
pub struct CriticalSection<'h, H: OverlayHooks + ?Sized> {
    hooks: &'h H,
    active: bool,
}

impl<'h, H: OverlayHooks + ?Sized> CriticalSection<'h, H> {
    /// Enters the critical section.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EnterCriticalSection`] if the hook fails.
    pub fn enter(hooks: &'h H) -> Result<Self> {
        hooks
            .enter_critical_section()
            .map_err(Error::EnterCriticalSection)?;
        Ok(Self {
            hooks,
            active: true,
        })
    }

    /// Leaves the critical section.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ExitCriticalSection`] if the hook fails.
    pub fn exit(mut self) -> Result<()> {
        self.active = false;
        self.hooks
            .exit_critical_section()
            .map_err(Error::ExitCriticalSection)
    }
}

impl<H: OverlayHooks + ?Sized> Drop for CriticalSection<'_, H> {
    fn drop(&mut self) {
        if self.active {
            if let Err(err) = self.hooks.exit_critical_section() {
                log::error!("failed to leave critical section while unwinding: {}", err);
            }
        }
    }
}

/// An engine shared between threads.
pub struct SharedEngine<H: OverlayHooks, I: LruIndex = u16> {
    inner: Mutex<Engine<H, I>>,
}

impl<H: OverlayHooks, I: LruIndex> SharedEngine<H, I> {
    /// Wraps an engine.
    pub fn new(engine: Engine<H, I>) -> Self {
        Self {
            inner: Mutex::new(engine),
        }
    }

    /// Locks the engine.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockError`] if a previous holder panicked. The
    /// failure is also reported to the engine's error sink.
    pub fn lock(&self) -> Result<MutexGuard<'_, Engine<H, I>>> {
        self.inner.lock().map_err(|poisoned| {
            poisoned.get_ref().hooks().report_error(&ErrorReport {
                token: OverlayToken::default(),
                code: ErrorCode::EnterCriticalSectionErr,
            });
            Error::LockError
        })
    }

    /// Runs `f` with exclusive access to the engine.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockError`] on a poisoned lock, otherwise whatever
    /// `f` returns.
    pub fn with<R>(&self, f: impl FnOnce(&mut Engine<H, I>) -> Result<R>) -> Result<R> {
        let mut engine = self.lock()?;
        f(&mut engine)
    }

    /// Unwraps the engine.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockError`] if a previous holder panicked.
    pub fn into_inner(self) -> Result<Engine<H, I>> {
        self.inner.into_inner().map_err(|_| Error::LockError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::RecordingHooks;

    #[test]
    fn test_guard_balances_hooks() {
        let hooks = RecordingHooks::default();
        {
            let guard = CriticalSection::enter(&hooks).unwrap();
            assert_eq!(hooks.critical_depth(), 1);
            guard.exit().unwrap();
        }
        assert_eq!(hooks.critical_depth(), 0);

        {
            let _guard = CriticalSection::enter(&hooks).unwrap();
        }
        assert_eq!(hooks.critical_depth(), 0);
        assert_eq!(hooks.critical_entries(), 2);
    }

    #[test]
    fn test_guard_reports_failures() {
        let hooks = RecordingHooks::default();
        hooks.fail_enter(true);
        assert!(matches!(
            CriticalSection::enter(&hooks),
            Err(Error::EnterCriticalSection(_))
        ));

        hooks.fail_enter(false);
        hooks.fail_exit(true);
        let guard = CriticalSection::enter(&hooks).unwrap();
        assert!(matches!(guard.exit(), Err(Error::ExitCriticalSection(_))));
    }
}
