//! Call and return entry points for generated stubs.
//!
//! On target, the toolchain routes every overlay call through a stub that
//! saves the return address, asks the engine for the resident address, and
//! jumps there with the return address replaced by the engine's own return
//! stub. That stub in turn asks the engine where to resume. The register
//! plumbing is platform code; [`ReturnPath`] is the seam it implements, and
//! [`Dispatcher`] drives the engine on its behalf for one task.
//!
//! # Examples
//!
//! ```rust,ignore
//! struct Cpu { ra: u32, pc: u32 }
//!
//! impl ReturnPath for Cpu {
//!     fn capture_return_point(&mut self) -> u32 { self.ra }
//!     fn resume_at_return_point(&mut self, address: u32) { self.pc = address; }
//! }
//!
//! let mut dispatcher = Dispatcher::new(&mut engine, TaskId::MAIN);
//! cpu.pc = dispatcher.call(&mut cpu, token)?;
//! // ... callee runs ...
//! dispatcher.ret(&mut cpu)?;
//! ```

use crate::{
    cache::LruIndex,
    engine::Engine,
    hooks::OverlayHooks,
    stack::TaskId,
    token::OverlayToken,
    Result,
};

/// Access to the caller's return point.
pub trait ReturnPath {
    /// Returns the address the caller continues at.
    fn capture_return_point(&mut self) -> u32;

    /// Continues execution at `address`.
    fn resume_at_return_point(&mut self, address: u32);
}

/// Drives overlay calls of one task.
pub struct Dispatcher<'e, H: OverlayHooks, I: LruIndex = u16> {
    engine: &'e mut Engine<H, I>,
    task: TaskId,
}

impl<'e, H: OverlayHooks, I: LruIndex> Dispatcher<'e, H, I> {
    /// Creates a dispatcher for `task`.
    pub fn new(engine: &'e mut Engine<H, I>, task: TaskId) -> Self {
        Self { engine, task }
    }

    /// The task calls are made for
    #[must_use]
    pub fn task(&self) -> TaskId {
        self.task
    }

    /// The engine being driven
    #[must_use]
    pub fn engine(&self) -> &Engine<H, I> {
        self.engine
    }

    /// Calls through `token`, returning the address to jump to.
    ///
    /// # Errors
    ///
    /// See [`Engine::invoke`].
    pub fn call<P: ReturnPath + ?Sized>(&mut self, path: &mut P, token: OverlayToken) -> Result<u32> {
        let return_point = path.capture_return_point();
        self.engine.invoke(self.task, token, return_point)
    }

    /// Returns from the innermost call and resumes `path` at the caller.
    ///
    /// # Errors
    ///
    /// See [`Engine::return_from_callee`]. `path` is left untouched on error.
    pub fn ret<P: ReturnPath + ?Sized>(&mut self, path: &mut P) -> Result<u32> {
        let address = self.engine.return_from_callee(self.task)?;
        path.resume_at_return_point(address);
        Ok(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        engine::InitArgs,
        test::{ImageBuilder, RecordingHooks},
        OverlayConfig,
    };

    struct Cpu {
        ra: u32,
        pc: u32,
    }

    impl ReturnPath for Cpu {
        fn capture_return_point(&mut self) -> u32 {
            self.ra
        }

        fn resume_at_return_point(&mut self, address: u32) {
            self.pc = address;
        }
    }

    #[test]
    fn test_nested_calls_resume_inside_caller() {
        let image = ImageBuilder::new(512).group(1, 1).group(2, 1).build();
        let config = OverlayConfig::new().with_cache_size(4 * 512);
        let mut engine: Engine<RecordingHooks> = Engine::new(config, RecordingHooks::new(image));
        engine.init(InitArgs::eager()).unwrap();

        let outer = OverlayToken::from_parts(1, 4, 0, false);
        let inner = OverlayToken::from_parts(2, 0, 0, false);
        let mut cpu = Cpu { ra: 0x0800_0010, pc: 0 };
        let mut dispatcher = Dispatcher::new(&mut engine, TaskId::MAIN);

        cpu.pc = dispatcher.call(&mut cpu, outer).unwrap();
        // call instruction 8 bytes into the outer function
        cpu.ra = cpu.pc + 8;
        let expected_return = cpu.ra;
        cpu.pc = dispatcher.call(&mut cpu, inner).unwrap();

        dispatcher.ret(&mut cpu).unwrap();
        assert_eq!(cpu.pc, expected_return);
        dispatcher.ret(&mut cpu).unwrap();
        assert_eq!(cpu.pc, 0x0800_0010);
        assert!(dispatcher.ret(&mut cpu).is_err());
    }
}
