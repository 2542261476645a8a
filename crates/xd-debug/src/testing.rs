//! In-memory simulator used by the unit tests

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::breakpoint::{BreakpointHandle, BreakpointLocation, INVALID_HANDLE};
use crate::simulator::{
    BreakpointBackend, CodeWidth, CpuMode, CpuState, DecodedInstruction, Decoder, GuestMemory,
    NumericParam, ParamRef, ParamRegistry, RunControl, SegReg, SegmentDescriptor, Syntax, WatchKind,
};

const MEMORY_SIZE: usize = 0x20_0000;

type RegFile = Arc<Mutex<HashMap<(usize, String), u64>>>;

struct MockParam {
    regs: RegFile,
    key: (usize, String),
}

impl NumericParam for MockParam {
    fn get64(&self) -> u64 {
        self.regs.lock().get(&self.key).copied().unwrap_or(0)
    }

    fn set(&self, value: u64) {
        self.regs.lock().insert(self.key.clone(), value);
    }
}

/// Run-control calls seen by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunCall {
    Continue,
    Step { cpu: Option<usize>, count: u32 },
    StepOver { cpu: usize },
}

pub struct MockSim {
    cpus: usize,
    regs: RegFile,
    hidden: Mutex<HashSet<String>>,
    modes: Mutex<Vec<CpuMode>>,
    memory: Mutex<Vec<u8>>,
    failing: Mutex<Vec<u64>>,
    seg_bases: Mutex<HashMap<(usize, SegReg), u64>>,
    descriptors: Mutex<HashMap<u16, SegmentDescriptor>>,
    breakpoints: Mutex<HashMap<BreakpointHandle, (BreakpointLocation, bool)>>,
    next_handle: Mutex<BreakpointHandle>,
    reject: Mutex<bool>,
    watchpoints: Mutex<Vec<(WatchKind, u64, u32)>>,
    calls: Mutex<Vec<RunCall>>,
}

impl MockSim {
    pub fn new(cpus: usize) -> Self {
        Self {
            cpus,
            regs: Arc::new(Mutex::new(HashMap::new())),
            hidden: Mutex::new(HashSet::new()),
            modes: Mutex::new(vec![CpuMode::empty(); cpus]),
            memory: Mutex::new(vec![0; MEMORY_SIZE]),
            failing: Mutex::new(Vec::new()),
            seg_bases: Mutex::new(HashMap::new()),
            descriptors: Mutex::new(HashMap::new()),
            breakpoints: Mutex::new(HashMap::new()),
            next_handle: Mutex::new(1),
            reject: Mutex::new(false),
            watchpoints: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_reg(&self, cpu: usize, name: &str, value: u64) {
        self.regs.lock().insert((cpu, name.to_string()), value);
    }

    pub fn reg(&self, cpu: usize, name: &str) -> u64 {
        self.regs.lock().get(&(cpu, name.to_string())).copied().unwrap_or(0)
    }

    pub fn hide_param(&self, name: &str) {
        self.hidden.lock().insert(name.to_string());
    }

    pub fn set_mode(&self, cpu: usize, mode: CpuMode) {
        self.modes.lock()[cpu] = mode;
    }

    pub fn write_mem(&self, addr: u64, bytes: &[u8]) {
        let start = addr as usize;
        self.memory.lock()[start..start + bytes.len()].copy_from_slice(bytes);
    }

    pub fn read_mem(&self, addr: u64, len: usize) -> Vec<u8> {
        let start = addr as usize;
        self.memory.lock()[start..start + len].to_vec()
    }

    /// Any access covering `addr` fails from now on
    pub fn fail_reads_at(&self, addr: u64) {
        self.failing.lock().push(addr);
    }

    pub fn set_segment_base(&self, cpu: usize, seg: SegReg, base: u64) {
        self.seg_bases.lock().insert((cpu, seg), base);
    }

    pub fn set_descriptor(&self, selector: u16, desc: SegmentDescriptor) {
        self.descriptors.lock().insert(selector, desc);
    }

    pub fn reject_breakpoints(&self, reject: bool) {
        *self.reject.lock() = reject;
    }

    pub fn breakpoint_installed(&self, handle: BreakpointHandle) -> bool {
        self.breakpoints.lock().contains_key(&handle)
    }

    pub fn breakpoint_enabled(&self, handle: BreakpointHandle) -> Option<bool> {
        self.breakpoints.lock().get(&handle).map(|(_, enabled)| *enabled)
    }

    pub fn installed_breakpoints(&self) -> usize {
        self.breakpoints.lock().len()
    }

    pub fn watchpoints(&self) -> Vec<(WatchKind, u64, u32)> {
        self.watchpoints.lock().clone()
    }

    pub fn calls(&self) -> Vec<RunCall> {
        self.calls.lock().clone()
    }

    fn accessible(&self, addr: u64, len: usize) -> bool {
        let end = addr.saturating_add(len as u64);
        end <= MEMORY_SIZE as u64 && !self.failing.lock().iter().any(|&f| f >= addr && f < end)
    }
}

impl ParamRegistry for MockSim {
    fn get_param_num(&self, name: &str, cpu: usize) -> Option<ParamRef> {
        if cpu >= self.cpus || self.hidden.lock().contains(name) {
            return None;
        }
        Some(Arc::new(MockParam {
            regs: Arc::clone(&self.regs),
            key: (cpu, name.to_string()),
        }))
    }
}

impl CpuState for MockSim {
    fn cpu_count(&self) -> usize {
        self.cpus
    }

    fn cpu_mode(&self, cpu: usize) -> CpuMode {
        self.modes.lock()[cpu]
    }
}

impl GuestMemory for MockSim {
    fn read_linear(&self, _cpu: usize, addr: u64, buf: &mut [u8]) -> bool {
        if !self.accessible(addr, buf.len()) {
            return false;
        }
        let start = addr as usize;
        buf.copy_from_slice(&self.memory.lock()[start..start + buf.len()]);
        true
    }

    fn write_linear(&self, _cpu: usize, addr: u64, buf: &[u8]) -> bool {
        if !self.accessible(addr, buf.len()) {
            return false;
        }
        self.write_mem(addr, buf);
        true
    }

    fn get_laddr(&self, cpu: usize, seg: SegReg, offset: u64) -> u64 {
        self.seg_bases.lock().get(&(cpu, seg)).copied().unwrap_or(0) + offset
    }

    fn descriptor(&self, _cpu: usize, selector: u16) -> Option<SegmentDescriptor> {
        self.descriptors.lock().get(&selector).copied()
    }
}

impl Decoder for MockSim {
    /// `0x00` is undecodable, `0x90` is a one byte nop, `0x01..=0x0F` encode
    /// their own length, anything else is a one byte data directive.
    fn decode(&self, bytes: &[u8], _width: CodeWidth, _seg_base: u64, addr: u64, syntax: Syntax) -> DecodedInstruction {
        let suffix = if syntax == Syntax::Att { " (att)" } else { "" };
        let (len, text) = match bytes.first().copied().unwrap_or(0) {
            0x00 => (0, String::new()),
            0x90 => (1, format!("nop @{:x}{}", addr, suffix)),
            b @ 0x01..=0x0F => (b as usize, format!("op{:02x} @{:x}{}", b, addr, suffix)),
            b => (1, format!("db {:02x} @{:x}{}", b, addr, suffix)),
        };
        DecodedInstruction { len, text }
    }
}

impl RunControl for MockSim {
    /// Runs CPU 0 from RIP one byte at a time until an enabled linear
    /// breakpoint or the boundary callback stops it.
    fn continue_execution(&self, boundary: &mut dyn FnMut(usize) -> bool) -> usize {
        self.calls.lock().push(RunCall::Continue);
        for _ in 0..10_000 {
            let rip = self.reg(0, "RIP");
            let hit = self
                .breakpoints
                .lock()
                .values()
                .any(|(loc, enabled)| *enabled && *loc == BreakpointLocation::Linear(rip));
            if hit || boundary(0) {
                return 0;
            }
            self.set_reg(0, "RIP", rip + 1);
        }
        0
    }

    fn step_n(&self, cpu: Option<usize>, count: u32) -> usize {
        self.calls.lock().push(RunCall::Step { cpu, count });
        let target = cpu.unwrap_or(0);
        let rip = self.reg(target, "RIP");
        self.set_reg(target, "RIP", rip + count as u64);
        target
    }

    fn step_over(&self, cpu: usize) -> usize {
        self.calls.lock().push(RunCall::StepOver { cpu });
        cpu
    }
}

impl BreakpointBackend for MockSim {
    fn set_breakpoint(&self, location: &BreakpointLocation, _condition: Option<&str>) -> BreakpointHandle {
        if *self.reject.lock() {
            return INVALID_HANDLE;
        }
        let mut next = self.next_handle.lock();
        let handle = *next;
        *next += 1;
        self.breakpoints.lock().insert(handle, (*location, true));
        handle
    }

    fn enable_breakpoint(&self, handle: BreakpointHandle, enable: bool) -> bool {
        match self.breakpoints.lock().get_mut(&handle) {
            Some(entry) => {
                entry.1 = enable;
                true
            }
            None => false,
        }
    }

    fn delete_breakpoint(&self, handle: BreakpointHandle) -> bool {
        self.breakpoints.lock().remove(&handle).is_some()
    }

    fn set_watchpoint(&self, kind: WatchKind, addr: u64, len: u32) -> bool {
        self.watchpoints.lock().push((kind, addr, len));
        true
    }

    fn delete_watchpoint(&self, addr: u64) -> bool {
        let mut wps = self.watchpoints.lock();
        let before = wps.len();
        wps.retain(|(_, a, _)| *a != addr);
        wps.len() != before
    }
}
