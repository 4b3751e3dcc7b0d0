//! Second-stage address translation (IOMMU) boundary
//!
//! Each sub-device may sit behind its own translation unit. The unit itself
//! is an external collaborator; this module tracks whether a sub-device's
//! mapping context is active or has faulted, and keeps the two flags from
//! ever disagreeing.

use std::fmt;
use std::sync::Arc;
use vc_core::error::MemoryError;

/// Translation page size
pub const IOMMU_PAGE_SIZE: u32 = 4096;

/// Round `addr` down to its page
pub fn page_align_down(addr: u32) -> u32 {
    addr & !(IOMMU_PAGE_SIZE - 1)
}

/// Identifier of one translation domain (one per sub-device)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DomainId(pub u32);

/// External IOMMU driver for one sub-device
pub trait Iommu: Send + Sync {
    /// Domain buffers must be mapped into for this unit
    fn domain(&self) -> DomainId;

    /// Enable translation through this unit
    fn activate(&self) -> Result<(), MemoryError>;

    /// Disable translation through this unit
    fn deactivate(&self);

    /// Map `len` bytes at `iova` to physical `phys`
    fn map_page(&self, iova: u32, phys: u64, len: u32) -> Result<(), MemoryError>;

    /// Remove a mapping created by `map_page`
    fn unmap_page(&self, iova: u32);
}

/// Translation state of one sub-device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MmuState {
    /// Not translating
    #[default]
    Inactive,
    /// Mapping context live
    Active,
    /// Fault reported while active; waiting for recovery
    Faulted,
}

/// Per sub-device translation context
pub struct MmuContext {
    iommu: Arc<dyn Iommu>,
    state: MmuState,
}

impl MmuContext {
    pub fn new(iommu: Arc<dyn Iommu>) -> Self {
        Self {
            iommu,
            state: MmuState::Inactive,
        }
    }

    pub fn state(&self) -> MmuState {
        self.state
    }

    pub fn domain(&self) -> DomainId {
        self.iommu.domain()
    }

    pub fn iommu(&self) -> &Arc<dyn Iommu> {
        &self.iommu
    }

    pub fn is_active(&self) -> bool {
        self.state == MmuState::Active
    }

    /// Activate unless already active. Returns true if the hardware was touched.
    ///
    /// A faulted context stays faulted until recovery clears it.
    pub fn ensure_active(&mut self) -> Result<bool, MemoryError> {
        match self.state {
            MmuState::Inactive => {
                self.iommu.activate()?;
                self.state = MmuState::Active;
                tracing::trace!("iommu domain {:?} activated", self.iommu.domain());
                Ok(true)
            }
            MmuState::Active | MmuState::Faulted => Ok(false),
        }
    }

    /// Detach an attached unit, faulted or not. Returns true if the hardware
    /// was touched.
    pub fn deactivate(&mut self) -> bool {
        match self.state {
            MmuState::Active | MmuState::Faulted => {
                self.iommu.deactivate();
                self.state = MmuState::Inactive;
                tracing::trace!("iommu domain {:?} deactivated", self.iommu.domain());
                true
            }
            MmuState::Inactive => false,
        }
    }

    /// Record a translation fault
    pub fn mark_faulted(&mut self) {
        self.state = MmuState::Faulted;
    }

    /// Leave the faulted state after a repaired fault; translation stays live
    pub fn clear_fault(&mut self) {
        if self.state == MmuState::Faulted {
            self.state = MmuState::Active;
        }
    }

    /// State after a hardware reset.
    ///
    /// A faulted unit was already torn down by the reset, so only the flag
    /// is dropped; an active one is deactivated explicitly.
    pub fn reset(&mut self) {
        match self.state {
            MmuState::Faulted => self.state = MmuState::Inactive,
            MmuState::Active => {
                self.deactivate();
            }
            MmuState::Inactive => {}
        }
    }
}

impl fmt::Debug for MmuContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MmuContext")
            .field("domain", &self.iommu.domain())
            .field("state", &self.state)
            .finish()
    }
}
