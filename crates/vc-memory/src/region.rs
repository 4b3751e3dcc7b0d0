//! Memory region records owned by a register task

use crate::buffer::{BufferHandle, MappingContext, PinnedBuffer};
use vc_core::error::MemoryError;

/// One translated buffer reference.
///
/// Holds the pin on the underlying buffer; dropping the region releases it.
#[derive(Debug)]
pub struct MemoryRegion {
    buffer: PinnedBuffer,
    /// Device-visible base address of the buffer
    pub addr: u32,
    /// Buffer length in bytes
    pub len: usize,
    /// Register word the address was substituted into, `None` for buffers
    /// referenced indirectly (e.g. a scaling list inside a PPS block)
    pub reg_idx: Option<usize>,
}

impl MemoryRegion {
    /// Map an already pinned buffer and record it
    pub fn map(
        buffer: PinnedBuffer,
        ctx: MappingContext,
        reg_idx: Option<usize>,
    ) -> Result<Self, MemoryError> {
        let mapping = buffer.map(ctx)?;
        Ok(Self {
            buffer,
            addr: mapping.addr,
            len: mapping.len,
            reg_idx,
        })
    }

    pub fn handle(&self) -> BufferHandle {
        self.buffer.handle()
    }

    /// True if `addr` falls inside this region
    pub fn contains(&self, addr: u32) -> bool {
        let start = self.addr as u64;
        let addr = addr as u64;
        addr >= start && addr < start + self.len as u64
    }
}
