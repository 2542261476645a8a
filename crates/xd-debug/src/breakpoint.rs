//! Breakpoint registry
//!
//! Breakpoints are installed through the simulator's breakpoint primitive,
//! which hands back an opaque handle. The registry keeps the local view of
//! every installed breakpoint, keyed by that handle.

use std::fmt;

use thiserror::Error;
use xd_core::bp_debug;

use crate::simulator::BreakpointBackend;

/// Handle issued by the breakpoint primitive. `-1` means failure.
pub type BreakpointHandle = i32;

/// Handle value the primitive uses to report failure
pub const INVALID_HANDLE: BreakpointHandle = -1;

/// Where a breakpoint sits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BreakpointLocation {
    /// Linear address
    Linear(u64),
    /// Segment selector plus offset
    Virtual { segment: u16, offset: u64 },
    /// Physical address
    Physical(u64),
}

impl fmt::Display for BreakpointLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Linear(addr) => write!(f, "lin 0x{:016x}", addr),
            Self::Virtual { segment, offset } => write!(f, "{:04x}:{:08x}", segment, offset),
            Self::Physical(addr) => write!(f, "phy 0x{:016x}", addr),
        }
    }
}

/// Breakpoint kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BreakpointKind {
    Linear,
    LinearConditional,
    Virtual,
    VirtualConditional,
    Physical,
    PhysicalConditional,
}

impl BreakpointKind {
    pub fn is_conditional(&self) -> bool {
        matches!(
            self,
            Self::LinearConditional | Self::VirtualConditional | Self::PhysicalConditional
        )
    }
}

/// Address space filter for lookups and counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Space {
    Linear,
    Virtual,
    Physical,
}

impl BreakpointLocation {
    fn space(&self) -> Space {
        match self {
            Self::Linear(_) => Space::Linear,
            Self::Virtual { .. } => Space::Virtual,
            Self::Physical(_) => Space::Physical,
        }
    }
}

/// A single breakpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint {
    /// Address of the breakpoint
    pub location: BreakpointLocation,
    /// Optional condition expression
    pub condition: Option<String>,
    /// Whether the breakpoint is enabled
    pub enabled: bool,
    /// Handle from the breakpoint primitive
    pub handle: BreakpointHandle,
}

impl Breakpoint {
    pub fn kind(&self) -> BreakpointKind {
        let conditional = self.condition.is_some();
        match (self.location.space(), conditional) {
            (Space::Linear, false) => BreakpointKind::Linear,
            (Space::Linear, true) => BreakpointKind::LinearConditional,
            (Space::Virtual, false) => BreakpointKind::Virtual,
            (Space::Virtual, true) => BreakpointKind::VirtualConditional,
            (Space::Physical, false) => BreakpointKind::Physical,
            (Space::Physical, true) => BreakpointKind::PhysicalConditional,
        }
    }
}

/// Breakpoint errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BreakpointError {
    #[error("Breakpoint primitive rejected {0}")]
    Rejected(BreakpointLocation),
    #[error("Breakpoint primitive reused handle {0}")]
    DuplicateHandle(BreakpointHandle),
    #[error("No breakpoint with handle {0}")]
    UnknownHandle(BreakpointHandle),
}

/// Breakpoint registry
#[derive(Debug, Default)]
pub struct BreakpointRegistry {
    /// Installed breakpoints in creation order
    breakpoints: Vec<Breakpoint>,
}

impl BreakpointRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a breakpoint and record it.
    ///
    /// Nothing is recorded when the primitive fails.
    pub fn add<B>(
        &mut self,
        backend: &B,
        location: BreakpointLocation,
        enabled: bool,
        condition: Option<&str>,
    ) -> Result<BreakpointHandle, BreakpointError>
    where
        B: BreakpointBackend + ?Sized,
    {
        let handle = backend.set_breakpoint(&location, condition);
        if handle == INVALID_HANDLE {
            return Err(BreakpointError::Rejected(location));
        }
        if self.find(handle).is_some() {
            backend.delete_breakpoint(handle);
            return Err(BreakpointError::DuplicateHandle(handle));
        }
        if !enabled {
            backend.enable_breakpoint(handle, false);
        }

        self.breakpoints.push(Breakpoint {
            location,
            condition: condition.map(str::to_string),
            enabled,
            handle,
        });
        bp_debug!("Added breakpoint {} at {}", handle, location);
        Ok(handle)
    }

    /// Remove a breakpoint by handle
    pub fn remove<B>(&mut self, backend: &B, handle: BreakpointHandle) -> Result<Breakpoint, BreakpointError>
    where
        B: BreakpointBackend + ?Sized,
    {
        let pos = self
            .breakpoints
            .iter()
            .position(|bp| bp.handle == handle)
            .ok_or(BreakpointError::UnknownHandle(handle))?;
        backend.delete_breakpoint(handle);
        let bp = self.breakpoints.remove(pos);
        bp_debug!("Removed breakpoint {} at {}", handle, bp.location);
        Ok(bp)
    }

    /// Remove every breakpoint
    pub fn clear<B>(&mut self, backend: &B)
    where
        B: BreakpointBackend + ?Sized,
    {
        for bp in self.breakpoints.drain(..) {
            backend.delete_breakpoint(bp.handle);
        }
        bp_debug!("Cleared all breakpoints");
    }

    /// Enable or disable a breakpoint
    pub fn set_enabled<B>(&mut self, backend: &B, handle: BreakpointHandle, enable: bool) -> Result<(), BreakpointError>
    where
        B: BreakpointBackend + ?Sized,
    {
        let bp = self
            .breakpoints
            .iter_mut()
            .find(|bp| bp.handle == handle)
            .ok_or(BreakpointError::UnknownHandle(handle))?;
        bp.enabled = enable;
        backend.enable_breakpoint(handle, enable);
        bp_debug!("Breakpoint {} {}", handle, if enable { "enabled" } else { "disabled" });
        Ok(())
    }

    /// Get a breakpoint by handle
    pub fn find(&self, handle: BreakpointHandle) -> Option<&Breakpoint> {
        self.breakpoints.iter().find(|bp| bp.handle == handle)
    }

    /// Linear breakpoint at `addr`
    pub fn get_linear(&self, addr: u64) -> Option<&Breakpoint> {
        self.breakpoints
            .iter()
            .find(|bp| bp.location == BreakpointLocation::Linear(addr))
    }

    /// Virtual breakpoint at `segment:offset`
    pub fn get_virtual(&self, segment: u16, offset: u64) -> Option<&Breakpoint> {
        self.breakpoints
            .iter()
            .find(|bp| bp.location == BreakpointLocation::Virtual { segment, offset })
    }

    /// Physical breakpoint at `addr`
    pub fn get_physical(&self, addr: u64) -> Option<&Breakpoint> {
        self.breakpoints
            .iter()
            .find(|bp| bp.location == BreakpointLocation::Physical(addr))
    }

    /// `index`-th linear breakpoint in creation order
    pub fn nth_linear(&self, index: usize) -> Option<&Breakpoint> {
        self.iter_space(Space::Linear).nth(index)
    }

    /// `index`-th virtual breakpoint in creation order
    pub fn nth_virtual(&self, index: usize) -> Option<&Breakpoint> {
        self.iter_space(Space::Virtual).nth(index)
    }

    /// `index`-th physical breakpoint in creation order
    pub fn nth_physical(&self, index: usize) -> Option<&Breakpoint> {
        self.iter_space(Space::Physical).nth(index)
    }

    pub fn linear_count(&self) -> usize {
        self.iter_space(Space::Linear).count()
    }

    pub fn virtual_count(&self) -> usize {
        self.iter_space(Space::Virtual).count()
    }

    pub fn physical_count(&self) -> usize {
        self.iter_space(Space::Physical).count()
    }

    /// Get all breakpoints
    pub fn iter(&self) -> impl Iterator<Item = &Breakpoint> {
        self.breakpoints.iter()
    }

    /// Get the total number of breakpoints
    pub fn count(&self) -> usize {
        self.breakpoints.len()
    }

    fn iter_space(&self, space: Space) -> impl Iterator<Item = &Breakpoint> {
        self.breakpoints
            .iter()
            .filter(move |bp| bp.location.space() == space)
    }
}
