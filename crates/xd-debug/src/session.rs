//! Debug session
//!
//! The session ties the command queue, the breakpoint registry and the
//! inspection caches to one simulator. Two threads use it: the simulation
//! thread drives [`DebugSession::fetch_next_command`] and reports instruction
//! boundaries through [`DebugSession::command_finished`], while the control
//! thread submits commands and reads the caches.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use tracing::{info, warn};
use xd_core::{session_debug, DebuggerConfig};

use crate::breakpoint::{Breakpoint, BreakpointHandle, BreakpointLocation, BreakpointRegistry};
use crate::command::{CommandQueue, DebugCommand};
use crate::disassembler::{DisasmOrigin, DisassemblyCache};
use crate::error::{DebugError, Result};
use crate::memory::{self, MemoryDump};
use crate::registers::{reg, SmpInfo, REGISTERS};
use crate::simulator::{CpuMode, DebugFrontend, SegReg, Simulator, Syntax, WatchKind};
use crate::stack::{StackEntry, StackSnapshot};

/// How long the simulation thread waits for a command before polling again
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Bytes shown by the memory view
pub const MEMORY_VIEW_BYTES: usize = 256;

/// Why [`DebugSession::fetch_next_command`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// EXIT was dequeued
    Quit,
    /// A CONTINUE ran and stopped on `cpu`
    Stopped { cpu: usize },
}

/// Debugger state for one simulator
pub struct DebugSession<S: Simulator + ?Sized> {
    sim: Arc<S>,
    frontend: Arc<dyn DebugFrontend>,
    config: RwLock<DebuggerConfig>,
    queue: CommandQueue,
    in_run_loop: AtomicBool,
    breakpoints: Mutex<BreakpointRegistry>,
    smp: RwLock<SmpInfo>,
    disasm: RwLock<DisassemblyCache>,
    memory: RwLock<MemoryDump>,
    stack: RwLock<StackSnapshot>,
}

impl<S: Simulator + ?Sized> DebugSession<S> {
    /// Create a session. Registers are not bound until
    /// [`init_register_refs`](Self::init_register_refs) runs.
    pub fn new(sim: Arc<S>, frontend: Arc<dyn DebugFrontend>, config: DebuggerConfig) -> Self {
        Self {
            sim,
            frontend,
            config: RwLock::new(config),
            queue: CommandQueue::new(),
            in_run_loop: AtomicBool::new(false),
            breakpoints: Mutex::new(BreakpointRegistry::new()),
            smp: RwLock::new(SmpInfo::new()),
            disasm: RwLock::new(DisassemblyCache::new()),
            memory: RwLock::new(MemoryDump::new()),
            stack: RwLock::new(StackSnapshot::new()),
        }
    }

    /// Bind register parameters for every CPU. Only the first call binds.
    pub fn init_register_refs(&self) -> bool {
        let bound = self.smp.write().init_register_refs(&*self.sim);
        if bound {
            info!("Debug session bound registers for {} CPU(s)", self.sim.cpu_count());
        }
        bound
    }

    pub fn simulator(&self) -> &Arc<S> {
        &self.sim
    }

    pub fn config(&self) -> RwLockReadGuard<'_, DebuggerConfig> {
        self.config.read()
    }

    pub fn set_config(&self, config: DebuggerConfig) {
        *self.config.write() = config;
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.queue
    }

    /// Whether a CONTINUE is currently executing
    pub fn in_run_loop(&self) -> bool {
        self.in_run_loop.load(Ordering::SeqCst)
    }

    // Command submission (control thread)

    pub fn enqueue(&self, cmd: DebugCommand) {
        self.queue.enqueue(cmd);
    }

    pub fn cmd_continue(&self) {
        self.enqueue(DebugCommand::Continue);
    }

    pub fn cmd_break(&self) {
        self.enqueue(DebugCommand::Break);
    }

    pub fn cmd_step(&self) {
        self.enqueue(DebugCommand::Step);
    }

    /// Step over the next instruction of the selected CPU
    pub fn cmd_step_over(&self) {
        let cpu = self.config.read().selected_cpu as usize;
        self.enqueue(DebugCommand::StepOver { cpu });
    }

    pub fn cmd_step_n(&self, cpu: usize, count: u32) {
        self.enqueue(DebugCommand::StepCpu { cpu, count });
    }

    /// Step the selected CPU by the configured per-CPU count
    pub fn cmd_step_selected(&self) {
        let (cpu, count) = {
            let config = self.config.read();
            (config.selected_cpu as usize, config.cpu_step_count)
        };
        self.cmd_step_n(cpu, count);
    }

    /// Step every CPU by the configured global count
    pub fn cmd_step_all(&self) {
        let count = self.config.read().global_step_count;
        self.enqueue(DebugCommand::StepAll { count });
    }

    pub fn cmd_exit(&self) {
        self.enqueue(DebugCommand::Exit);
    }

    pub fn cmd_watch(&self, kind: WatchKind, addr: u64, len: u32) {
        self.enqueue(DebugCommand::SetWatchpoint { kind, addr, len });
    }

    pub fn cmd_unwatch(&self, addr: u64) {
        self.enqueue(DebugCommand::DeleteWatchpoint { addr });
    }

    // Simulation thread

    /// Process queued commands until EXIT, or until a CONTINUE has run.
    pub fn fetch_next_command(&self) -> FetchOutcome {
        loop {
            let Some(cmd) = self.queue.dequeue_timeout(POLL_INTERVAL) else {
                continue;
            };
            match cmd {
                DebugCommand::Exit => {
                    self.queue.clear();
                    info!("Debug session exiting");
                    return FetchOutcome::Quit;
                }
                DebugCommand::Continue => {
                    self.in_run_loop.store(true, Ordering::SeqCst);
                    session_debug!("continue");
                    let cpu = self
                        .sim
                        .continue_execution(&mut |cpu| self.command_finished(cpu));
                    // a BREAK already cleared the flag and notified
                    if self.in_run_loop.swap(false, Ordering::SeqCst) {
                        self.notify(cpu);
                    }
                    session_debug!("continue stopped on cpu{}", cpu);
                    return FetchOutcome::Stopped { cpu };
                }
                other => self.process_cmd(other),
            }
        }
    }

    /// Drive [`fetch_next_command`](Self::fetch_next_command) until EXIT
    pub fn run(&self) {
        while self.fetch_next_command() != FetchOutcome::Quit {}
    }

    /// Instruction boundary checkpoint.
    ///
    /// While a CONTINUE runs, a queued BREAK stops it and a queued EXIT stops
    /// it without being consumed; other commands wait for the run to end.
    /// Outside a run this reports completion to the frontend.
    pub fn command_finished(&self, cpu: usize) -> bool {
        if !self.in_run_loop.load(Ordering::SeqCst) {
            return self.notify(cpu);
        }

        if self.queue.take_first(|c| *c == DebugCommand::Break).is_some() {
            self.in_run_loop.store(false, Ordering::SeqCst);
            session_debug!("break on cpu{}", cpu);
            self.notify(cpu);
            return true;
        }
        if self.queue.contains(|c| *c == DebugCommand::Exit) {
            self.in_run_loop.store(false, Ordering::SeqCst);
            return true;
        }
        false
    }

    fn notify(&self, cpu: usize) -> bool {
        if let Err(e) = self.reload(cpu) {
            warn!("Could not refresh cpu{} state: {}", cpu, e);
        }
        self.frontend.command_finished(cpu)
    }

    fn process_cmd(&self, cmd: DebugCommand) {
        session_debug!("process {:?}", cmd);
        match cmd {
            DebugCommand::None | DebugCommand::Exit | DebugCommand::Continue => {}
            DebugCommand::Step => {
                let cpu = self.sim.step_n(None, 1);
                self.command_finished(cpu);
            }
            DebugCommand::StepOver { cpu } => {
                let cpu = self.sim.step_over(cpu);
                self.command_finished(cpu);
            }
            DebugCommand::StepCpu { cpu, count } => {
                let cpu = self.sim.step_n(Some(cpu), count);
                self.command_finished(cpu);
            }
            DebugCommand::StepAll { count } => {
                let cpu = self.sim.step_n(None, count);
                self.command_finished(cpu);
            }
            DebugCommand::Break => session_debug!("break outside a run ignored"),
            DebugCommand::SetBreakpoint {
                location,
                enabled,
                condition,
            } => {
                self.add_breakpoint(location, enabled, condition.as_deref());
            }
            DebugCommand::EnableBreakpoint { handle, enable } => {
                self.enable_breakpoint(handle, enable);
            }
            DebugCommand::DeleteBreakpoint { handle } => {
                self.del_breakpoint(handle);
            }
            DebugCommand::DeleteAllBreakpoints => self.del_all_breakpoints(),
            DebugCommand::SetWatchpoint { kind, addr, len } => {
                if !self.sim.set_watchpoint(kind, addr, len) {
                    warn!("Watchpoint at 0x{:x} rejected", addr);
                }
            }
            DebugCommand::DeleteWatchpoint { addr } => {
                if !self.sim.delete_watchpoint(addr) {
                    warn!("No watchpoint at 0x{:x}", addr);
                }
            }
        }
    }

    // Breakpoints

    fn add_breakpoint(&self, location: BreakpointLocation, enabled: bool, condition: Option<&str>) -> bool {
        match self
            .breakpoints
            .lock()
            .add(&*self.sim, location, enabled, condition)
        {
            Ok(_) => true,
            Err(e) => {
                warn!("{}", e);
                false
            }
        }
    }

    pub fn add_breakpoint_lin(&self, addr: u64, enabled: bool, condition: Option<&str>) -> bool {
        self.add_breakpoint(BreakpointLocation::Linear(addr), enabled, condition)
    }

    pub fn add_breakpoint_virt(&self, segment: u16, offset: u64, enabled: bool, condition: Option<&str>) -> bool {
        self.add_breakpoint(BreakpointLocation::Virtual { segment, offset }, enabled, condition)
    }

    pub fn add_breakpoint_phy(&self, addr: u64, enabled: bool, condition: Option<&str>) -> bool {
        self.add_breakpoint(BreakpointLocation::Physical(addr), enabled, condition)
    }

    /// `index`-th linear breakpoint
    pub fn get_breakpoint_lin(&self, index: usize) -> Option<Breakpoint> {
        self.breakpoints.lock().nth_linear(index).cloned()
    }

    /// `index`-th virtual breakpoint
    pub fn get_breakpoint_virt(&self, index: usize) -> Option<Breakpoint> {
        self.breakpoints.lock().nth_virtual(index).cloned()
    }

    /// `index`-th physical breakpoint
    pub fn get_breakpoint_phy(&self, index: usize) -> Option<Breakpoint> {
        self.breakpoints.lock().nth_physical(index).cloned()
    }

    /// Breakpoint installed at exactly `location`
    pub fn breakpoint_at(&self, location: BreakpointLocation) -> Option<Breakpoint> {
        let registry = self.breakpoints.lock();
        let found = match location {
            BreakpointLocation::Linear(addr) => registry.get_linear(addr),
            BreakpointLocation::Virtual { segment, offset } => registry.get_virtual(segment, offset),
            BreakpointLocation::Physical(addr) => registry.get_physical(addr),
        };
        found.cloned()
    }

    pub fn breakpoint(&self, handle: BreakpointHandle) -> Option<Breakpoint> {
        self.breakpoints.lock().find(handle).cloned()
    }

    /// Every breakpoint in creation order
    pub fn breakpoints(&self) -> Vec<Breakpoint> {
        self.breakpoints.lock().iter().cloned().collect()
    }

    pub fn get_breakpoint_lin_count(&self) -> usize {
        self.breakpoints.lock().linear_count()
    }

    pub fn get_breakpoint_virt_count(&self) -> usize {
        self.breakpoints.lock().virtual_count()
    }

    pub fn get_breakpoint_phy_count(&self) -> usize {
        self.breakpoints.lock().physical_count()
    }

    pub fn del_breakpoint(&self, handle: BreakpointHandle) -> bool {
        match self.breakpoints.lock().remove(&*self.sim, handle) {
            Ok(_) => true,
            Err(e) => {
                warn!("{}", e);
                false
            }
        }
    }

    pub fn del_all_breakpoints(&self) {
        self.breakpoints.lock().clear(&*self.sim);
    }

    pub fn enable_breakpoint(&self, handle: BreakpointHandle, enable: bool) -> bool {
        match self.breakpoints.lock().set_enabled(&*self.sim, handle, enable) {
            Ok(()) => true,
            Err(e) => {
                warn!("{}", e);
                false
            }
        }
    }

    // Registers

    pub fn update_register(&self, cpu: usize) -> Result<()> {
        self.smp.write().update_register(&*self.sim, cpu)
    }

    pub fn write_register(&self, cpu: usize, regno: usize) -> Result<()> {
        self.smp.read().write_register(&*self.sim, cpu, regno)
    }

    pub fn set_register(&self, cpu: usize, regno: usize, value: u64) -> Result<()> {
        self.smp.write().set_register(&*self.sim, cpu, regno, value)
    }

    pub fn registers(&self) -> RwLockReadGuard<'_, SmpInfo> {
        self.smp.read()
    }

    /// Registers of `cpu` the current configuration shows
    pub fn visible_registers(&self, cpu: usize) -> Vec<usize> {
        let config = self.config.read();
        self.smp.read().visible_registers(cpu, &config)
    }

    /// Cached value of a segment register of `cpu`
    fn selector(&self, cpu: usize, regno: usize) -> Result<u16> {
        let smp = self.smp.read();
        if smp.cpu_count() == 0 {
            return Err(DebugError::NotInitialized);
        }
        let info = smp.cpu(cpu).ok_or(DebugError::NoSuchCpu(cpu))?;
        Ok(info.value(regno) as u16)
    }

    /// Raw, full-width value of a register straight from the simulator
    fn raw_register(&self, cpu: usize, regno: usize) -> Result<u64> {
        let smp = self.smp.read();
        if smp.cpu_count() == 0 {
            return Err(DebugError::NotInitialized);
        }
        let info = smp.cpu(cpu).ok_or(DebugError::NoSuchCpu(cpu))?;
        let param = info.regs[regno]
            .param
            .as_ref()
            .ok_or(DebugError::Unbound(REGISTERS[regno].param))?;
        Ok(param.get64())
    }

    fn resolve(&self, cpu: usize, mode: CpuMode, use_segment: bool, seg_regno: usize, address: u64) -> Result<DisasmOrigin> {
        if !use_segment {
            return Ok(DisasmOrigin::linear(address));
        }
        let selector = self.selector(cpu, seg_regno)?;
        let linear = memory::segment_to_linear(&*self.sim, cpu, mode, selector, address)?;
        Ok(DisasmOrigin::segmented(linear, selector, address))
    }

    // Disassembly and memory

    /// Rebuild the disassembly window at `address`, an offset within CS when
    /// `use_segment` is set and a linear address otherwise.
    pub fn disassemble(&self, cpu: usize, use_segment: bool, address: u64, syntax: Syntax) -> Result<()> {
        if cpu >= self.sim.cpu_count() {
            return Err(DebugError::NoSuchCpu(cpu));
        }
        let mode = self.sim.cpu_mode(cpu);
        let origin = self.resolve(cpu, mode, use_segment, reg::CS, address)?;

        let mut fresh = DisassemblyCache::new();
        fresh.disassemble(&*self.sim, cpu, mode, origin, syntax)?;
        *self.disasm.write() = fresh;
        Ok(())
    }

    /// Whether `address` lies outside the cached disassembly window
    pub fn must_disassemble(&self, cpu: usize, use_segment: bool, address: u64) -> bool {
        if cpu >= self.sim.cpu_count() {
            return true;
        }
        let mode = self.sim.cpu_mode(cpu);
        match self.resolve(cpu, mode, use_segment, reg::CS, address) {
            Ok(origin) => self.disasm.read().must_disassemble(cpu, origin.linear),
            Err(_) => true,
        }
    }

    pub fn disassembly(&self) -> RwLockReadGuard<'_, DisassemblyCache> {
        self.disasm.read()
    }

    /// Read `size` bytes at `address`, an offset within DS when
    /// `use_segment` is set.
    pub fn memorydump(&self, cpu: usize, use_segment: bool, address: u64, size: usize) -> Result<()> {
        if cpu >= self.sim.cpu_count() {
            return Err(DebugError::NoSuchCpu(cpu));
        }
        let mode = self.sim.cpu_mode(cpu);
        let origin = self.resolve(cpu, mode, use_segment, reg::DS, address)?;

        let mut fresh = MemoryDump::new();
        fresh.refresh(&*self.sim, cpu, origin.linear, size)?;
        *self.memory.write() = fresh;
        Ok(())
    }

    /// Write one byte at a linear address
    pub fn memoryset(&self, cpu: usize, address: u64, value: u8) -> bool {
        match memory::write_byte(&*self.sim, cpu, address, value) {
            Ok(()) => true,
            Err(e) => {
                warn!("{}", e);
                false
            }
        }
    }

    pub fn memory_dump(&self) -> RwLockReadGuard<'_, MemoryDump> {
        self.memory.read()
    }

    /// Memory view split into elements of the configured display size
    pub fn memory_view(&self) -> Vec<u64> {
        let size = self.config.read().mem_displ_size;
        self.memory.read().elements(size)
    }

    // Stack

    /// Capture the stack of `cpu` from its current stack pointer
    pub fn prepare_stack_data(&self, cpu: usize) -> Result<()> {
        let rsp = self.raw_register(cpu, reg::RSP)?;
        let snapshot = StackSnapshot::prepare(&*self.sim, cpu, rsp);
        *self.stack.write() = snapshot;
        Ok(())
    }

    pub fn stack(&self) -> RwLockReadGuard<'_, StackSnapshot> {
        self.stack.read()
    }

    /// Stack entries at the configured display width
    pub fn stack_view(&self) -> Vec<StackEntry> {
        let bytes = self.config.read().stack_bytes;
        self.stack.read().entries(bytes).to_vec()
    }

    /// Refresh every inspection cache for `cpu`.
    ///
    /// Register refresh failures are returned; the other caches log and keep
    /// their previous contents.
    pub fn reload(&self, cpu: usize) -> Result<()> {
        self.update_register(cpu)?;

        let (use_segment, syntax, mem_addr) = {
            let config = self.config.read();
            let syntax = if config.use_gas_syntax { Syntax::Att } else { Syntax::Intel };
            (config.addr_displ_seg_ofs, syntax, config.mem_displ_addr)
        };

        let rip = self.raw_register(cpu, reg::RIP)?;
        let linear = self.sim.get_laddr(cpu, SegReg::Cs, rip);
        if self.disasm.read().must_disassemble(cpu, linear) {
            let address = if use_segment { rip } else { linear };
            if let Err(e) = self.disassemble(cpu, use_segment, address, syntax) {
                warn!("cpu{}: disassembly at 0x{:x} failed: {}", cpu, linear, e);
            }
        }

        if let Err(e) = self.prepare_stack_data(cpu) {
            warn!("cpu{}: stack snapshot failed: {}", cpu, e);
        }
        if let Err(e) = self.memorydump(cpu, false, mem_addr, MEMORY_VIEW_BYTES) {
            warn!("cpu{}: memory view refresh failed: {}", cpu, e);
        }
        session_debug!("cpu{}: reloaded", cpu);
        Ok(())
    }
}
