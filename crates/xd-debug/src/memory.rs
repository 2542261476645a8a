//! Address translation and the memory dump view

use xd_core::cache_trace;

use crate::error::{DebugError, Result};
use crate::simulator::{CpuMode, GuestMemory};

/// Largest offset a 16-bit segment can address
const OFFSET_MAX_16: u64 = 0xFFFF;
/// Largest offset a 32-bit segment can address
const OFFSET_MAX_32: u64 = 0xFFFF_FFFF;

/// Linear address of `selector:offset` in the given mode.
///
/// Long mode is flat. Protected mode looks the selector up in the descriptor
/// tables and enforces the limit, inverted for expand-down segments. Real mode
/// uses `selector * 16 + offset` with a 16-bit offset.
pub fn segment_to_linear<S>(sim: &S, cpu: usize, mode: CpuMode, selector: u16, offset: u64) -> Result<u64>
where
    S: GuestMemory + ?Sized,
{
    if mode.is_long() {
        return Ok(offset);
    }
    if !mode.is_protected() {
        if offset > OFFSET_MAX_16 {
            return Err(DebugError::SegmentLimit { selector, offset });
        }
        return Ok(((selector as u64) << 4) + offset);
    }

    let desc = sim
        .descriptor(cpu, selector)
        .ok_or(DebugError::BadSelector { selector })?;
    let limit = desc.limit as u64;
    let in_limit = if desc.expand_down {
        let upper = if desc.big { OFFSET_MAX_32 } else { OFFSET_MAX_16 };
        offset > limit && offset <= upper
    } else {
        offset <= limit
    };
    if !in_limit {
        return Err(DebugError::SegmentLimit { selector, offset });
    }
    Ok(desc.base.wrapping_add(offset) & OFFSET_MAX_32)
}

/// Contents of a guest memory range, refreshed on demand
#[derive(Debug, Clone, Default)]
pub struct MemoryDump {
    address: u64,
    data: Vec<u8>,
}

impl MemoryDump {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `size` bytes at `linear`.
    ///
    /// On failure the previous contents stay in place.
    pub fn refresh<S>(&mut self, sim: &S, cpu: usize, linear: u64, size: usize) -> Result<()>
    where
        S: GuestMemory + ?Sized,
    {
        let mut buf = vec![0u8; size];
        if !sim.read_linear(cpu, linear, &mut buf) {
            return Err(DebugError::ReadFailed { addr: linear, len: size });
        }
        self.address = linear;
        self.data = buf;
        cache_trace!("cpu{}: dumped {} bytes at 0x{:x}", cpu, size, linear);
        Ok(())
    }

    /// Linear address of the first byte
    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Dump split into little-endian elements of `size` bytes (1, 2, 4 or 8;
    /// anything else reads as bytes). A trailing partial element is dropped.
    pub fn elements(&self, size: u8) -> Vec<u64> {
        let size = match size {
            2 | 4 | 8 => size as usize,
            _ => 1,
        };
        self.data
            .chunks_exact(size)
            .map(|chunk| {
                let mut buf = [0u8; 8];
                buf[..size].copy_from_slice(chunk);
                u64::from_le_bytes(buf)
            })
            .collect()
    }

    /// Byte at a linear address, if it is inside the dump
    pub fn byte_at(&self, linear: u64) -> Option<u8> {
        let index = linear.checked_sub(self.address)?;
        self.data.get(usize::try_from(index).ok()?).copied()
    }
}

/// Write one byte of guest memory at a linear address
pub fn write_byte<S>(sim: &S, cpu: usize, linear: u64, value: u8) -> Result<()>
where
    S: GuestMemory + ?Sized,
{
    if sim.write_linear(cpu, linear, &[value]) {
        Ok(())
    } else {
        Err(DebugError::WriteFailed { addr: linear })
    }
}
