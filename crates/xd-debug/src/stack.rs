//! Stack snapshot
//!
//! The stack is captured three times over, once per pointer width, so the
//! view can switch between 16, 32 and 64-bit entries without re-reading guest
//! memory.

use xd_core::cache_trace;

use crate::simulator::{GuestMemory, SegReg};

/// Entries captured per width
pub const STACK_ENTRIES: usize = 32;

/// One stack slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StackEntry {
    /// Linear address of the slot
    pub linear: u64,
    /// Offset of the slot within SS
    pub offset: u64,
    /// Value stored in the slot, zero-extended
    pub value: u64,
}

/// Stack contents in 16, 32 and 64-bit interpretations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackSnapshot {
    /// Number of complete entries in each array
    pub cnt: usize,
    pub entries16: Vec<StackEntry>,
    pub entries32: Vec<StackEntry>,
    pub entries64: Vec<StackEntry>,
}

impl StackSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture the stack of `cpu` from stack pointer `rsp`.
    ///
    /// Stops at the first slot any width fails to read; the entry arrays all
    /// hold exactly `cnt` entries afterwards.
    pub fn prepare<S>(sim: &S, cpu: usize, rsp: u64) -> Self
    where
        S: GuestMemory + ?Sized,
    {
        let sp16 = rsp & 0xFFFF;
        let sp32 = rsp & 0xFFFF_FFFF;
        let sp64 = rsp;

        let mut snapshot = Self {
            cnt: 0,
            entries16: Vec::with_capacity(STACK_ENTRIES),
            entries32: Vec::with_capacity(STACK_ENTRIES),
            entries64: Vec::with_capacity(STACK_ENTRIES),
        };

        for i in 0..STACK_ENTRIES as u64 {
            let slot16 = read_slot::<S, 2>(sim, cpu, (sp16 + i * 2) & 0xFFFF);
            let slot32 = read_slot::<S, 4>(sim, cpu, (sp32 + i * 4) & 0xFFFF_FFFF);
            let slot64 = read_slot::<S, 8>(sim, cpu, sp64.wrapping_add(i * 8));

            let (Some(e16), Some(e32), Some(e64)) = (slot16, slot32, slot64) else {
                cache_trace!("cpu{}: stack read stopped at entry {}", cpu, i);
                break;
            };
            snapshot.entries16.push(e16);
            snapshot.entries32.push(e32);
            snapshot.entries64.push(e64);
            snapshot.cnt += 1;
        }

        snapshot
    }

    /// Entries at a given width in bytes (2, 4 or 8)
    pub fn entries(&self, bytes: u8) -> &[StackEntry] {
        match bytes {
            2 => &self.entries16,
            8 => &self.entries64,
            _ => &self.entries32,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cnt == 0
    }
}

fn read_slot<S, const N: usize>(sim: &S, cpu: usize, offset: u64) -> Option<StackEntry>
where
    S: GuestMemory + ?Sized,
{
    let linear = sim.get_laddr(cpu, SegReg::Ss, offset);
    let mut buf = [0u8; 8];
    if !sim.read_linear(cpu, linear, &mut buf[..N]) {
        return None;
    }
    Some(StackEntry {
        linear,
        offset,
        value: u64::from_le_bytes(buf),
    })
}
