//! Buffer address translation for register blobs
//!
//! A register word marked by the format's translation table carries a
//! packed buffer reference:
//!
//! ```text
//!  31                     10 9          0
//! +-------------------------+------------+
//! |         offset          |   handle   |
//! +-------------------------+------------+
//! ```
//!
//! The translator pins the buffer, maps it into the sub-device's address
//! space and overwrites the word with `device_addr + offset`.

use crate::buffer::{BufferHandle, BufferService, MappingContext, PinnedBuffer};
use crate::region::MemoryRegion;
use std::sync::Arc;
use vc_core::error::MemoryError;

/// Shape of a picture parameter set block holding scaling-list references
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PpsLayout {
    /// Block starts at the register's offset field instead of byte 0
    pub start_at_offset: bool,
    /// Number of repeated entries
    pub count: usize,
    /// Size of one entry in bytes
    pub entry_size: usize,
    /// Byte position of the scaling-list reference inside an entry
    pub addr_offset: usize,
}

impl PpsLayout {
    pub const H264: Self = Self {
        start_at_offset: true,
        count: 256,
        entry_size: 32,
        addr_offset: 23,
    };

    pub const H265: Self = Self {
        start_at_offset: false,
        count: 64,
        entry_size: 80,
        addr_offset: 74,
    };
}

/// Register holding the PPS block reference, plus its layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PpsSpec {
    pub reg: usize,
    pub layout: PpsLayout,
}

/// Per-format translation parameters
#[derive(Debug, Clone, Copy)]
pub struct TranslateSpec<'a> {
    /// Register indices that hold buffer references
    pub table: &'a [usize],
    /// Direction-MV register
    pub dir_mv_reg: Option<usize>,
    /// Scale the direction-MV offset by 16
    pub scale_dir_mv: bool,
    /// Register whose translated address is kept as the decoded-length base
    pub len_reg: Option<usize>,
    pub pps: Option<PpsSpec>,
}

impl<'a> TranslateSpec<'a> {
    /// Plain table with no special registers
    pub fn table(table: &'a [usize]) -> Self {
        Self {
            table,
            dir_mv_reg: None,
            scale_dir_mv: false,
            len_reg: None,
            pps: None,
        }
    }
}

/// Result of translating one blob
#[derive(Debug, Default)]
pub struct Translation {
    /// Pinned regions, released when dropped
    pub regions: Vec<MemoryRegion>,
    /// Device address recorded for the decoded-length register
    pub dec_base: Option<u32>,
}

/// Resolves packed buffer references against a buffer service
pub struct AddressTranslator {
    service: Arc<dyn BufferService>,
    ctx: MappingContext,
    trace_pps: bool,
}

impl AddressTranslator {
    pub fn new(service: Arc<dyn BufferService>, ctx: MappingContext) -> Self {
        Self {
            service,
            ctx,
            trace_pps: false,
        }
    }

    pub fn context(&self) -> MappingContext {
        self.ctx
    }

    /// Log every scaling list fill
    pub fn set_pps_trace(&mut self, on: bool) {
        self.trace_pps = on;
    }

    pub fn pps_trace(&self) -> bool {
        self.trace_pps
    }

    /// Translate every marked word of `regs` in place.
    ///
    /// Any failure releases all buffers pinned so far and leaves the
    /// caller with an error; `regs` may then be partially rewritten and
    /// must be discarded.
    pub fn translate(
        &self,
        regs: &mut [u32],
        spec: &TranslateSpec<'_>,
    ) -> Result<Translation, MemoryError> {
        let mut out = Translation::default();
        let len = regs.len();

        for &idx in spec.table {
            let word = *regs
                .get(idx)
                .ok_or(MemoryError::RegisterOutOfRange { index: idx, len })?;
            let (handle, raw_offset) = BufferHandle::unpack(word);
            if handle.is_none() {
                continue;
            }

            let offset = if spec.scale_dir_mv && spec.dir_mv_reg == Some(idx) {
                raw_offset << 4
            } else {
                raw_offset
            };
            tracing::trace!("pos {:3} handle {:3} offset {:10}", idx, handle, offset);

            let pinned = self.pin(handle, idx)?;

            if let Some(pps) = spec.pps.filter(|pps| pps.reg == idx) {
                self.fill_pps(&pinned, offset, &pps.layout, &mut out.regions)?;
            }

            let region = MemoryRegion::map(pinned, self.ctx, Some(idx))?;
            let addr = region.addr.wrapping_add(offset);

            if spec.len_reg == Some(idx) {
                tracing::trace!("dec_set {:08x}", addr);
                out.dec_base = Some(addr);
            }

            regs[idx] = addr;
            out.regions.push(region);
        }

        Ok(out)
    }

    fn pin(&self, handle: BufferHandle, reg: usize) -> Result<PinnedBuffer, MemoryError> {
        PinnedBuffer::pin(&self.service, handle).map_err(|err| match err {
            MemoryError::OutOfMemory => MemoryError::OutOfMemory,
            _ => {
                tracing::error!("import buffer handle {} failed, reg[{}]", handle, reg);
                MemoryError::InvalidHandle {
                    handle: handle.0,
                    reg,
                }
            }
        })
    }

    /// Resolve the scaling-list reference of the first PPS entry and copy
    /// the device address into every entry.
    fn fill_pps(
        &self,
        pps: &PinnedBuffer,
        offset: u32,
        layout: &PpsLayout,
        regions: &mut Vec<MemoryRegion>,
    ) -> Result<(), MemoryError> {
        let start = if layout.start_at_offset {
            offset as usize
        } else {
            0
        };
        let base = start + layout.addr_offset;

        let mut raw = [0u8; 4];
        pps.read(base, &mut raw)?;
        let (handle, scaling_offset) = BufferHandle::unpack(u32::from_le_bytes(raw));
        if handle.is_none() {
            return Ok(());
        }

        if self.trace_pps {
            tracing::debug!(
                "pps fill: start {} count {} size {} addr offset {}",
                start,
                layout.count,
                layout.entry_size,
                layout.addr_offset
            );
        }

        let scaling = PinnedBuffer::pin(&self.service, handle).map_err(|err| match err {
            MemoryError::OutOfMemory => MemoryError::OutOfMemory,
            _ => MemoryError::InvalidHandle {
                handle: handle.0,
                reg: usize::MAX,
            },
        })?;
        let region = MemoryRegion::map(scaling, self.ctx, None)?;
        let addr = region.addr.wrapping_add(scaling_offset).to_le_bytes();

        for i in 0..layout.count {
            pps.write(base + i * layout.entry_size, &addr)?;
        }

        regions.push(region);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::OFFSET_SHIFT;
    use crate::sim::SimBufferService;

    fn setup() -> (Arc<SimBufferService>, AddressTranslator) {
        let sim = Arc::new(SimBufferService::new());
        let translator = AddressTranslator::new(sim.clone(), MappingContext::Physical);
        (sim, translator)
    }

    fn pack(handle: u32, offset: u32) -> u32 {
        (offset << OFFSET_SHIFT) | handle
    }

    #[test]
    fn test_translate_table() {
        let (sim, translator) = setup();
        sim.add_buffer(BufferHandle(1), 0x10000);
        sim.add_buffer(BufferHandle(2), 0x10000);
        let base1 = sim.device_addr(BufferHandle(1), MappingContext::Physical).unwrap();
        let base2 = sim.device_addr(BufferHandle(2), MappingContext::Physical).unwrap();

        let mut regs = vec![0u32; 8];
        regs[2] = pack(1, 0x100);
        regs[5] = pack(2, 0);
        regs[6] = 0xABCD_0000; // handle 0, untouched

        let table = [2, 5, 6];
        let out = translator
            .translate(&mut regs, &TranslateSpec::table(&table))
            .unwrap();

        assert_eq!(regs[2], base1 + 0x100);
        assert_eq!(regs[5], base2);
        assert_eq!(regs[6], 0xABCD_0000);
        assert_eq!(out.regions.len(), 2);
        assert_eq!(sim.pin_count(BufferHandle(1)), 1);

        drop(out);
        assert_eq!(sim.total_pins(), 0);
    }

    #[test]
    fn test_dir_mv_scaling() {
        let (sim, translator) = setup();
        sim.add_buffer(BufferHandle(4), 0x100000);
        let base = sim.device_addr(BufferHandle(4), MappingContext::Physical).unwrap();

        let mut regs = vec![0u32; 4];
        regs[1] = pack(4, 0x10);
        regs[2] = pack(4, 0x10);

        let table = [1, 2];
        let spec = TranslateSpec {
            dir_mv_reg: Some(1),
            scale_dir_mv: true,
            ..TranslateSpec::table(&table)
        };
        translator.translate(&mut regs, &spec).unwrap();

        assert_eq!(regs[1], base + 0x100);
        assert_eq!(regs[2], base + 0x10);
    }

    #[test]
    fn test_len_reg_records_base() {
        let (sim, translator) = setup();
        sim.add_buffer(BufferHandle(7), 0x4000);
        let base = sim.device_addr(BufferHandle(7), MappingContext::Physical).unwrap();

        let mut regs = vec![0u32; 16];
        regs[12] = pack(7, 0x20);
        let table = [12];
        let spec = TranslateSpec {
            len_reg: Some(12),
            ..TranslateSpec::table(&table)
        };
        let out = translator.translate(&mut regs, &spec).unwrap();
        assert_eq!(out.dec_base, Some(base + 0x20));
    }

    #[test]
    fn test_invalid_handle_releases_partial_pins() {
        let (sim, translator) = setup();
        sim.add_buffer(BufferHandle(1), 0x1000);

        let mut regs = vec![pack(1, 0), pack(9, 0)];
        let table = [0, 1];
        let err = translator
            .translate(&mut regs, &TranslateSpec::table(&table))
            .unwrap_err();

        assert_eq!(err, MemoryError::InvalidHandle { handle: 9, reg: 1 });
        assert_eq!(sim.total_pins(), 0);
    }

    #[test]
    fn test_table_index_out_of_range() {
        let (_sim, translator) = setup();
        let mut regs = vec![0u32; 4];
        let table = [10];
        let err = translator
            .translate(&mut regs, &TranslateSpec::table(&table))
            .unwrap_err();
        assert_eq!(err, MemoryError::RegisterOutOfRange { index: 10, len: 4 });
    }

    #[test]
    fn test_pps_fill_h265() {
        let (sim, translator) = setup();
        let layout = PpsLayout::H265;
        sim.add_buffer(BufferHandle(3), layout.count * layout.entry_size);
        sim.add_buffer(BufferHandle(5), 0x1000);
        let scaling = sim.device_addr(BufferHandle(5), MappingContext::Physical).unwrap();

        // Client writes the same reference into the first entry only
        let reference = pack(5, 0x40).to_le_bytes();
        sim.write(BufferHandle(3), layout.addr_offset, &reference).unwrap();

        let mut regs = vec![0u32; 4];
        regs[3] = pack(3, 0);
        let table = [3];
        let spec = TranslateSpec {
            pps: Some(PpsSpec { reg: 3, layout }),
            ..TranslateSpec::table(&table)
        };
        let out = translator.translate(&mut regs, &spec).unwrap();
        assert_eq!(out.regions.len(), 2);
        assert_eq!(out.regions[0].reg_idx, None);

        for i in [0, 1, layout.count - 1] {
            let mut raw = [0u8; 4];
            sim.read(BufferHandle(3), layout.addr_offset + i * layout.entry_size, &mut raw)
                .unwrap();
            assert_eq!(u32::from_le_bytes(raw), scaling + 0x40);
        }
    }

    #[test]
    fn test_pps_without_scaling_reference() {
        let (sim, translator) = setup();
        sim.add_buffer(BufferHandle(3), 256 * 32 + 0x100);

        let mut regs = vec![pack(3, 0x100)];
        let table = [0];
        let spec = TranslateSpec {
            pps: Some(PpsSpec {
                reg: 0,
                layout: PpsLayout::H264,
            }),
            ..TranslateSpec::table(&table)
        };
        let out = translator.translate(&mut regs, &spec).unwrap();
        assert_eq!(out.regions.len(), 1);
    }
}
