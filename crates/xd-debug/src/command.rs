//! Debug command queue
//!
//! Commands flow from the control surface to the simulation thread. The queue
//! is the only point where the two threads synchronize.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use xd_core::queue_trace;

use crate::breakpoint::{BreakpointHandle, BreakpointLocation};
use crate::simulator::WatchKind;

/// Debug command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugCommand {
    /// No operation
    None,
    /// Leave the debugger loop
    Exit,
    /// Run until a stop condition
    Continue,
    /// Single step all CPUs
    Step,
    /// Step over the next instruction of a CPU
    StepOver { cpu: usize },
    /// Step one CPU
    StepCpu { cpu: usize, count: u32 },
    /// Step every CPU
    StepAll { count: u32 },
    /// Interrupt a running CONTINUE
    Break,
    /// Install a breakpoint
    SetBreakpoint {
        location: BreakpointLocation,
        enabled: bool,
        condition: Option<String>,
    },
    /// Enable or disable a breakpoint
    EnableBreakpoint { handle: BreakpointHandle, enable: bool },
    /// Remove a breakpoint
    DeleteBreakpoint { handle: BreakpointHandle },
    /// Remove every breakpoint
    DeleteAllBreakpoints,
    /// Install a physical-memory watchpoint
    SetWatchpoint { kind: WatchKind, addr: u64, len: u32 },
    /// Remove a watchpoint
    DeleteWatchpoint { addr: u64 },
}

/// Thread-safe FIFO of debug commands
pub struct CommandQueue {
    queue: Mutex<VecDeque<DebugCommand>>,
    available: Condvar,
}

impl CommandQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(64)),
            available: Condvar::new(),
        }
    }

    /// Append a command at the tail
    pub fn enqueue(&self, cmd: DebugCommand) {
        queue_trace!("enqueue {:?}", cmd);
        self.queue.lock().push_back(cmd);
        self.available.notify_one();
    }

    /// Take the command at the head
    pub fn dequeue(&self) -> Option<DebugCommand> {
        let cmd = self.queue.lock().pop_front();
        if let Some(ref c) = cmd {
            queue_trace!("dequeue {:?}", c);
        }
        cmd
    }

    /// Take the head command, waiting up to `timeout` for one to arrive
    pub fn dequeue_timeout(&self, timeout: Duration) -> Option<DebugCommand> {
        let mut queue = self.queue.lock();
        if queue.is_empty() {
            self.available.wait_for(&mut queue, timeout);
        }
        let cmd = queue.pop_front();
        if let Some(ref c) = cmd {
            queue_trace!("dequeue {:?}", c);
        }
        cmd
    }

    /// Remove the first command matching `pred`, keeping the rest in order
    pub fn take_first<F>(&self, pred: F) -> Option<DebugCommand>
    where
        F: Fn(&DebugCommand) -> bool,
    {
        let mut queue = self.queue.lock();
        let pos = queue.iter().position(pred)?;
        queue.remove(pos)
    }

    /// Check for a queued command matching `pred`
    pub fn contains<F>(&self, pred: F) -> bool
    where
        F: Fn(&DebugCommand) -> bool,
    {
        self.queue.lock().iter().any(pred)
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Get queue length
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Drop every queued command
    pub fn clear(&self) {
        self.queue.lock().clear();
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new()
    }
}
