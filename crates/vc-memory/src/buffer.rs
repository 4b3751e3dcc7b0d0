//! External buffer service boundary

use crate::mmu::DomainId;
use std::fmt;
use std::sync::Arc;
use vc_core::error::MemoryError;

/// Mask of the handle field inside a register word
pub const HANDLE_MASK: u32 = 0x3FF;
/// Shift of the offset field inside a register word
pub const OFFSET_SHIFT: u32 = 10;

/// Client-visible buffer handle (10 bits on the wire, 0 means "none")
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub u32);

impl BufferHandle {
    /// Split a packed register word into its handle and raw offset fields
    pub fn unpack(word: u32) -> (Self, u32) {
        (Self(word & HANDLE_MASK), word >> OFFSET_SHIFT)
    }

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Address space a buffer is mapped into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MappingContext {
    /// No translation unit, the engine sees physical addresses
    Physical,
    /// Mapped into the given IOMMU domain
    Iommu(DomainId),
}

/// Device-visible placement of a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceMapping {
    /// Device address (IOVA or physical)
    pub addr: u32,
    /// Length in bytes
    pub len: usize,
}

/// Content-addressed buffer service that owns the actual allocations.
///
/// Every successful `import` must be balanced by exactly one `release`.
pub trait BufferService: Send + Sync {
    /// Resolve and pin a handle
    fn import(&self, handle: BufferHandle) -> Result<(), MemoryError>;

    /// Map a pinned buffer into `ctx`
    fn map(&self, handle: BufferHandle, ctx: MappingContext) -> Result<DeviceMapping, MemoryError>;

    /// Read bytes from a pinned buffer through a kernel mapping
    fn read(&self, handle: BufferHandle, offset: usize, out: &mut [u8]) -> Result<(), MemoryError>;

    /// Write bytes into a pinned buffer through a kernel mapping
    fn write(&self, handle: BufferHandle, offset: usize, data: &[u8]) -> Result<(), MemoryError>;

    /// Drop one pin
    fn release(&self, handle: BufferHandle);
}

/// A buffer pinned for as long as this value lives
pub struct PinnedBuffer {
    handle: BufferHandle,
    service: Arc<dyn BufferService>,
}

impl PinnedBuffer {
    /// Import `handle`, pinning it until the returned value is dropped
    pub fn pin(service: &Arc<dyn BufferService>, handle: BufferHandle) -> Result<Self, MemoryError> {
        service.import(handle)?;
        Ok(Self {
            handle,
            service: Arc::clone(service),
        })
    }

    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    pub fn map(&self, ctx: MappingContext) -> Result<DeviceMapping, MemoryError> {
        self.service.map(self.handle, ctx)
    }

    pub fn read(&self, offset: usize, out: &mut [u8]) -> Result<(), MemoryError> {
        self.service.read(self.handle, offset, out)
    }

    pub fn write(&self, offset: usize, data: &[u8]) -> Result<(), MemoryError> {
        self.service.write(self.handle, offset, data)
    }
}

impl Drop for PinnedBuffer {
    fn drop(&mut self) {
        self.service.release(self.handle);
    }
}

impl fmt::Debug for PinnedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinnedBuffer")
            .field("handle", &self.handle)
            .finish()
    }
}
