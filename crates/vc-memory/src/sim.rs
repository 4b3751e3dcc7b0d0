//! In-process buffer service and IOMMU used by tests and the simulator

use crate::buffer::{BufferHandle, BufferService, DeviceMapping, MappingContext};
use crate::mmu::{DomainId, Iommu, IOMMU_PAGE_SIZE};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use vc_core::error::MemoryError;

/// First physical address handed out
pub const SIM_PHYS_BASE: u64 = 0x6000_0000;
/// First IOVA handed out
pub const SIM_IOVA_BASE: u32 = 0x1000_0000;

struct SimBuffer {
    data: Vec<u8>,
    phys: u64,
    pins: usize,
}

/// Buffer service backed by host memory.
///
/// Buffers are laid out back to back on page boundaries; IOVAs mirror the
/// physical layout at a fixed displacement so mappings are stable.
pub struct SimBufferService {
    buffers: Mutex<HashMap<BufferHandle, SimBuffer>>,
    next_phys: Mutex<u64>,
}

impl SimBufferService {
    pub fn new() -> Self {
        Self {
            buffers: Mutex::new(HashMap::new()),
            next_phys: Mutex::new(SIM_PHYS_BASE),
        }
    }

    /// Register a zero-filled buffer of `len` bytes
    pub fn add_buffer(&self, handle: BufferHandle, len: usize) {
        let mut next = self.next_phys.lock();
        let phys = *next;
        let pages = len.div_ceil(IOMMU_PAGE_SIZE as usize).max(1);
        *next += (pages * IOMMU_PAGE_SIZE as usize) as u64;

        self.buffers.lock().insert(
            handle,
            SimBuffer {
                data: vec![0; len],
                phys,
                pins: 0,
            },
        );
    }

    /// Address `handle` would map to in `ctx`
    pub fn device_addr(&self, handle: BufferHandle, ctx: MappingContext) -> Option<u32> {
        let buffers = self.buffers.lock();
        let buffer = buffers.get(&handle)?;
        Some(Self::addr_for(buffer.phys, ctx))
    }

    pub fn pin_count(&self, handle: BufferHandle) -> usize {
        self.buffers.lock().get(&handle).map_or(0, |b| b.pins)
    }

    /// Pins outstanding over all buffers
    pub fn total_pins(&self) -> usize {
        self.buffers.lock().values().map(|b| b.pins).sum()
    }

    fn addr_for(phys: u64, ctx: MappingContext) -> u32 {
        match ctx {
            MappingContext::Physical => phys as u32,
            MappingContext::Iommu(_) => SIM_IOVA_BASE + (phys - SIM_PHYS_BASE) as u32,
        }
    }

    fn check_range(
        handle: BufferHandle,
        buffer: &SimBuffer,
        offset: usize,
        len: usize,
    ) -> Result<(), MemoryError> {
        match offset.checked_add(len) {
            Some(end) if end <= buffer.data.len() => Ok(()),
            _ => Err(MemoryError::BufferOverrun {
                handle: handle.0,
                offset,
                len,
            }),
        }
    }
}

impl Default for SimBufferService {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferService for SimBufferService {
    fn import(&self, handle: BufferHandle) -> Result<(), MemoryError> {
        let mut buffers = self.buffers.lock();
        let buffer = buffers
            .get_mut(&handle)
            .ok_or(MemoryError::InvalidHandle {
                handle: handle.0,
                reg: 0,
            })?;
        buffer.pins += 1;
        Ok(())
    }

    fn map(&self, handle: BufferHandle, ctx: MappingContext) -> Result<DeviceMapping, MemoryError> {
        let buffers = self.buffers.lock();
        let buffer = buffers.get(&handle).ok_or(MemoryError::MapFailed(handle.0))?;
        if buffer.pins == 0 {
            return Err(MemoryError::MapFailed(handle.0));
        }
        Ok(DeviceMapping {
            addr: Self::addr_for(buffer.phys, ctx),
            len: buffer.data.len(),
        })
    }

    fn read(&self, handle: BufferHandle, offset: usize, out: &mut [u8]) -> Result<(), MemoryError> {
        let buffers = self.buffers.lock();
        let buffer = buffers.get(&handle).ok_or(MemoryError::MapFailed(handle.0))?;
        Self::check_range(handle, buffer, offset, out.len())?;
        out.copy_from_slice(&buffer.data[offset..offset + out.len()]);
        Ok(())
    }

    fn write(&self, handle: BufferHandle, offset: usize, data: &[u8]) -> Result<(), MemoryError> {
        let mut buffers = self.buffers.lock();
        let buffer = buffers
            .get_mut(&handle)
            .ok_or(MemoryError::MapFailed(handle.0))?;
        Self::check_range(handle, buffer, offset, data.len())?;
        buffer.data[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn release(&self, handle: BufferHandle) {
        if let Some(buffer) = self.buffers.lock().get_mut(&handle) {
            buffer.pins = buffer.pins.saturating_sub(1);
        }
    }
}

/// IOMMU that records what it is asked to do
pub struct SimIommu {
    domain: DomainId,
    activations: AtomicUsize,
    deactivations: AtomicUsize,
    pages: Mutex<HashMap<u32, u64>>,
}

impl SimIommu {
    pub fn new(domain: DomainId) -> Self {
        Self {
            domain,
            activations: AtomicUsize::new(0),
            deactivations: AtomicUsize::new(0),
            pages: Mutex::new(HashMap::new()),
        }
    }

    pub fn activate_count(&self) -> usize {
        self.activations.load(Ordering::Relaxed)
    }

    pub fn deactivate_count(&self) -> usize {
        self.deactivations.load(Ordering::Relaxed)
    }

    /// Physical page mapped at `iova`, if any
    pub fn mapped(&self, iova: u32) -> Option<u64> {
        self.pages.lock().get(&iova).copied()
    }

    pub fn mapped_pages(&self) -> usize {
        self.pages.lock().len()
    }
}

impl Iommu for SimIommu {
    fn domain(&self) -> DomainId {
        self.domain
    }

    fn activate(&self) -> Result<(), MemoryError> {
        self.activations.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn deactivate(&self) {
        self.deactivations.fetch_add(1, Ordering::Relaxed);
    }

    fn map_page(&self, iova: u32, phys: u64, _len: u32) -> Result<(), MemoryError> {
        if iova % IOMMU_PAGE_SIZE != 0 {
            return Err(MemoryError::Iommu(format!("unaligned iova {:08x}", iova)));
        }
        self.pages.lock().insert(iova, phys);
        Ok(())
    }

    fn unmap_page(&self, iova: u32) {
        self.pages.lock().remove(&iova);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffers_do_not_overlap() {
        let sim = SimBufferService::new();
        sim.add_buffer(BufferHandle(1), 0x1800);
        sim.add_buffer(BufferHandle(2), 0x10);

        let a = sim.device_addr(BufferHandle(1), MappingContext::Physical).unwrap();
        let b = sim.device_addr(BufferHandle(2), MappingContext::Physical).unwrap();
        assert_eq!(b - a, 0x2000);

        let iova = sim
            .device_addr(BufferHandle(1), MappingContext::Iommu(DomainId(0)))
            .unwrap();
        assert_eq!(iova, SIM_IOVA_BASE);
    }

    #[test]
    fn test_iommu_rejects_unaligned_page() {
        let iommu = SimIommu::new(DomainId(0));
        assert!(matches!(
            iommu.map_page(0x1000_0040, 0x8000, IOMMU_PAGE_SIZE),
            Err(MemoryError::Iommu(_))
        ));
        iommu.map_page(0x1000_0000, 0x8000, IOMMU_PAGE_SIZE).unwrap();
        assert_eq!(iommu.mapped(0x1000_0000), Some(0x8000));
    }

    #[test]
    fn test_map_requires_pin() {
        let sim = SimBufferService::new();
        sim.add_buffer(BufferHandle(1), 0x100);
        assert!(sim.map(BufferHandle(1), MappingContext::Physical).is_err());

        sim.import(BufferHandle(1)).unwrap();
        let mapping = sim.map(BufferHandle(1), MappingContext::Physical).unwrap();
        assert_eq!(mapping.len, 0x100);
        sim.release(BufferHandle(1));
        assert_eq!(sim.total_pins(), 0);
    }

    #[test]
    fn test_read_write_bounds() {
        let sim = SimBufferService::new();
        sim.add_buffer(BufferHandle(1), 8);
        sim.write(BufferHandle(1), 4, &[1, 2, 3, 4]).unwrap();

        let mut out = [0u8; 4];
        sim.read(BufferHandle(1), 4, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
        assert!(sim.write(BufferHandle(1), 6, &[0; 4]).is_err());
    }
}
