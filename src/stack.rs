//! The shadow call stack.
//!
//! Every call into an overlay function pushes a [`StackFrame`] recording how
//! to get back to the caller. Frames come out of one pool shared by every
//! task; each task owns a chain through the pool, linked by signed byte
//! offsets, that ends at the task's base frame:
//!
//! ```text
//!  pool:  [0: task 0] [1: task 1] [2: task 0] [3: free] ...
//!           ▲                        │ prev = -32
//!           └────────────────────────┘
//!  task 0 base: prev = 0xDEAD
//! ```
//!
//! When the caller is itself an overlay function its return address is
//! stored as an offset from the caller's entry point, so the return still
//! lands correctly after the caller's group was evicted and reloaded
//! elsewhere.

use crate::{token::OverlayToken, Error, Result};

/// Size of a frame in its binary form.
pub const FRAME_SIZE: usize = 16;

/// Previous-frame offset marking the bottom of a task stack.
pub const END_OF_STACK: i16 = 0xDEADu16 as i16;

const NO_MULTIGROUP_ENTRY: u16 = 0xFFFF;

/// Identifies a task stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub usize);

impl TaskId {
    /// The stack created by [`crate::Engine::init`], used by bare-metal code.
    pub const MAIN: TaskId = TaskId(0);
}

/// One active overlay call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackFrame {
    /// Return address, or offset from the caller's entry point when the
    /// caller is an overlay function
    pub caller_return: u32,
    /// Token the call was made through; a plain address for base frames
    pub callee_token: OverlayToken,
    /// Byte offset to the previous frame, [`END_OF_STACK`] at the bottom
    pub prev_frame_offset: i16,
    /// Padding to keep frames word aligned
    pub alignment: u8,
    /// Multi-group table index of the instance serving the call
    pub multigroup_entry: Option<u16>,
}

impl StackFrame {
    /// The base frame of a task: no overlay callee, end of chain.
    #[must_use]
    pub fn base() -> Self {
        Self {
            caller_return: 0,
            callee_token: OverlayToken::default(),
            prev_frame_offset: END_OF_STACK,
            alignment: 0,
            multigroup_entry: None,
        }
    }

    pub(crate) fn call(caller_return: u32, callee_token: OverlayToken, multigroup_entry: Option<u16>) -> Self {
        Self {
            caller_return,
            callee_token,
            prev_frame_offset: END_OF_STACK,
            alignment: 0,
            multigroup_entry,
        }
    }

    /// Returns true for the bottom frame of a chain.
    #[must_use]
    pub fn is_last(&self) -> bool {
        self.prev_frame_offset == END_OF_STACK
    }

    /// Serializes the frame, little endian.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; FRAME_SIZE] {
        let mut bytes = [0u8; FRAME_SIZE];
        bytes[0..4].copy_from_slice(&self.caller_return.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.callee_token.value().to_le_bytes());
        bytes[8..10].copy_from_slice(&self.prev_frame_offset.to_le_bytes());
        bytes[10] = self.alignment;
        let entry = self.multigroup_entry.unwrap_or(NO_MULTIGROUP_ENTRY);
        bytes[14..16].copy_from_slice(&entry.to_le_bytes());
        bytes
    }

    /// Parses a frame in the layout of [`StackFrame::to_bytes`].
    #[must_use]
    pub fn from_bytes(bytes: &[u8; FRAME_SIZE]) -> Self {
        let entry = u16::from_le_bytes([bytes[14], bytes[15]]);
        Self {
            caller_return: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            callee_token: OverlayToken::new(u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]])),
            prev_frame_offset: i16::from_le_bytes([bytes[8], bytes[9]]),
            alignment: bytes[10],
            multigroup_entry: (entry != NO_MULTIGROUP_ENTRY).then_some(entry),
        }
    }
}

#[derive(Debug)]
struct TaskStack {
    base: StackFrame,
    top: Option<usize>,
    depth: usize,
}

/// Frame pool and per-task chains.
#[derive(Debug)]
pub struct CallStack {
    frames: Vec<StackFrame>,
    free: Vec<usize>,
    tasks: Vec<TaskStack>,
}

impl CallStack {
    pub(crate) fn new(depth: usize) -> Self {
        Self {
            frames: vec![StackFrame::base(); depth],
            free: (0..depth).rev().collect(),
            tasks: Vec::new(),
        }
    }

    /// Number of frames in the pool
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.frames.len()
    }

    /// Frames currently in use across all tasks
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.frames.len() - self.free.len()
    }

    /// Returns true when no frame is left in the pool
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.free.is_empty()
    }

    /// Number of task stacks
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub(crate) fn add_task(&mut self) -> TaskId {
        self.tasks.push(TaskStack {
            base: StackFrame::base(),
            top: None,
            depth: 0,
        });
        TaskId(self.tasks.len() - 1)
    }

    fn task(&self, task: TaskId) -> Result<&TaskStack> {
        self.tasks
            .get(task.0)
            .ok_or_else(|| internal_error!("unknown task stack {}", task.0))
    }

    /// Number of active calls on `task`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] for an unknown task.
    pub fn depth(&self, task: TaskId) -> Result<usize> {
        Ok(self.task(task)?.depth)
    }

    /// The innermost frame of `task`, its base frame when no call is active.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] for an unknown task.
    pub fn top(&self, task: TaskId) -> Result<&StackFrame> {
        let stack = self.task(task)?;
        Ok(match stack.top {
            Some(idx) => &self.frames[idx],
            None => &stack.base,
        })
    }

    pub(crate) fn top_mut(&mut self, task: TaskId) -> Result<&mut StackFrame> {
        let stack = self
            .tasks
            .get_mut(task.0)
            .ok_or_else(|| internal_error!("unknown task stack {}", task.0))?;
        Ok(match stack.top {
            Some(idx) => &mut self.frames[idx],
            None => &mut stack.base,
        })
    }

    /// Frames of `task` from innermost to outermost, base frame excluded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] for an unknown task.
    pub fn frames(&self, task: TaskId) -> Result<Vec<StackFrame>> {
        let mut frames = Vec::new();
        let mut cursor = self.task(task)?.top;
        while let Some(idx) = cursor {
            let frame = self.frames[idx];
            frames.push(frame);
            cursor = Self::prev_index(idx, frame.prev_frame_offset);
        }
        Ok(frames)
    }

    fn prev_index(idx: usize, offset: i16) -> Option<usize> {
        if offset == END_OF_STACK {
            return None;
        }
        let prev = idx as isize + isize::from(offset) / FRAME_SIZE as isize;
        usize::try_from(prev).ok()
    }

    pub(crate) fn push(&mut self, task: TaskId, mut frame: StackFrame) -> Result<()> {
        let capacity = self.capacity();
        let top = self.task(task)?.top;
        let idx = self.free.pop().ok_or(Error::CallStackOverflow(capacity))?;

        frame.prev_frame_offset = match top {
            Some(prev) => ((prev as isize - idx as isize) * FRAME_SIZE as isize) as i16,
            None => END_OF_STACK,
        };
        self.frames[idx] = frame;

        let stack = &mut self.tasks[task.0];
        stack.top = Some(idx);
        stack.depth += 1;
        log::trace!("push frame {} for {} (task {}, depth {})", idx, frame.callee_token, task.0, stack.depth);
        Ok(())
    }

    pub(crate) fn pop(&mut self, task: TaskId) -> Result<StackFrame> {
        let Some(idx) = self.task(task)?.top else {
            return Err(internal_error!("return without an active call on task {}", task.0));
        };
        let frame = self.frames[idx];
        let stack = &mut self.tasks[task.0];
        stack.top = Self::prev_index(idx, frame.prev_frame_offset);
        stack.depth -= 1;
        self.free.push(idx);
        log::trace!("pop frame {} for {} (task {})", idx, frame.callee_token, task.0);
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(group: u16) -> StackFrame {
        StackFrame::call(0x100, OverlayToken::from_parts(group, 0, 0, false), None)
    }

    #[test]
    fn test_frame_layout() {
        let frame = StackFrame {
            caller_return: 0x1122_3344,
            callee_token: OverlayToken::new(0xAABB_CCDD),
            prev_frame_offset: -32,
            alignment: 0,
            multigroup_entry: Some(7),
        };
        let bytes = frame.to_bytes();
        assert_eq!(&bytes[0..4], &[0x44, 0x33, 0x22, 0x11]);
        assert_eq!(&bytes[4..8], &[0xDD, 0xCC, 0xBB, 0xAA]);
        assert_eq!(&bytes[8..10], &(-32i16).to_le_bytes());
        assert_eq!(&bytes[14..16], &[7, 0]);
        assert_eq!(StackFrame::from_bytes(&bytes), frame);

        let base = StackFrame::base().to_bytes();
        assert_eq!(&base[8..10], &[0xAD, 0xDE]);
        assert_eq!(&base[14..16], &[0xFF, 0xFF]);
        assert!(StackFrame::from_bytes(&base).is_last());
    }

    #[test]
    fn test_push_pop_is_lifo() {
        let mut stack = CallStack::new(4);
        let main = stack.add_task();
        stack.push(main, call(1)).unwrap();
        stack.push(main, call(2)).unwrap();
        assert_eq!(stack.depth(main).unwrap(), 2);
        assert_eq!(stack.top(main).unwrap().callee_token.group_id(), 2);

        assert_eq!(stack.pop(main).unwrap().callee_token.group_id(), 2);
        assert_eq!(stack.pop(main).unwrap().callee_token.group_id(), 1);
        assert!(stack.top(main).unwrap().is_last());
        assert!(matches!(stack.pop(main), Err(Error::Internal { .. })));
    }

    #[test]
    fn test_tasks_share_the_pool() {
        let mut stack = CallStack::new(3);
        let a = stack.add_task();
        let b = stack.add_task();
        stack.push(a, call(1)).unwrap();
        stack.push(b, call(2)).unwrap();
        stack.push(a, call(3)).unwrap();
        assert!(stack.is_full());
        assert!(matches!(stack.push(b, call(4)), Err(Error::CallStackOverflow(3))));

        let groups: Vec<u16> = stack
            .frames(a)
            .unwrap()
            .iter()
            .map(|f| f.callee_token.group_id())
            .collect();
        assert_eq!(groups, vec![3, 1]);
        assert_eq!(stack.frames(a).unwrap()[0].prev_frame_offset, -(2 * FRAME_SIZE as i16));

        stack.pop(b).unwrap();
        assert_eq!(stack.in_use(), 2);
        stack.push(b, call(5)).unwrap();
        assert_eq!(stack.top(b).unwrap().callee_token.group_id(), 5);
    }

    #[test]
    fn test_unknown_task() {
        let stack = CallStack::new(1);
        assert!(stack.top(TaskId(3)).is_err());
    }
}
