//! Memory-mapped register access

use crate::info::RunningMode;
use std::sync::Arc;
use vc_core::error::HardwareError;

/// A memory-mapped window of 32-bit registers.
///
/// Implementations synchronize internally; the interrupt fast path reads
/// and acknowledges status without holding the scheduler lock.
pub trait RegisterWindow: Send + Sync {
    /// Window size in words
    fn len(&self) -> usize;

    fn read(&self, index: usize) -> Result<u32, HardwareError>;

    fn write(&self, index: usize, value: u32) -> Result<(), HardwareError>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// View of a window starting at a fixed word offset (decoder or encoder bank)
#[derive(Clone)]
pub struct RegisterBank {
    window: Arc<dyn RegisterWindow>,
    base: usize,
}

impl RegisterBank {
    pub fn new(window: Arc<dyn RegisterWindow>, base: usize) -> Self {
        Self { window, base }
    }

    pub fn len(&self) -> usize {
        self.window.len().saturating_sub(self.base)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn read(&self, index: usize) -> Result<u32, HardwareError> {
        self.window.read(self.base + index)
    }

    pub fn write(&self, index: usize, value: u32) -> Result<(), HardwareError> {
        self.window.write(self.base + index, value)
    }

    /// Read `count` consecutive registers starting at 0
    pub fn read_range(&self, count: usize) -> Result<Vec<u32>, HardwareError> {
        (0..count).map(|i| self.read(i)).collect()
    }

    /// Log `count` registers, used for error dumps
    pub fn dump(&self, count: usize) {
        tracing::error!("dumping vpu_device registers:");
        for i in 0..count.min(self.len()) {
            match self.read(i) {
                Ok(value) => tracing::error!("reg[{:02}]: {:08x}", i, value),
                Err(err) => tracing::error!("reg[{:02}]: {}", i, err),
            }
        }
    }
}

impl std::fmt::Debug for RegisterBank {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisterBank")
            .field("base", &self.base)
            .field("len", &self.len())
            .finish()
    }
}

/// Shared mode-select register of a multiplexed engine.
///
/// The upper half of the register holds write-enable bits for the lower
/// half, so a write only affects bits whose companion is set.
#[derive(Clone)]
pub struct ModeSelect {
    grf: Arc<dyn RegisterWindow>,
    index: usize,
    bit: u32,
}

impl ModeSelect {
    /// `offset` is the register's byte offset inside the GRF window
    pub fn new(grf: Arc<dyn RegisterWindow>, offset: usize, bit: u32) -> Self {
        Self {
            grf,
            index: offset / 4,
            bit,
        }
    }

    /// Select the personality for `mode`
    pub fn switch_to(&self, mode: RunningMode) -> Result<(), HardwareError> {
        let bits = 1u32 << self.bit;
        let raw = self.grf.read(self.index)?;
        let value = if mode == RunningMode::Hevc {
            raw | bits | (bits << 16)
        } else {
            (raw & !bits) | (bits << 16)
        };
        self.grf.write(self.index, value)
    }
}

impl std::fmt::Debug for ModeSelect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModeSelect")
            .field("index", &self.index)
            .field("bit", &self.bit)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimRegisterFile;

    #[test]
    fn test_bank_offsets() {
        let file = Arc::new(SimRegisterFile::new(0x20));
        let bank = RegisterBank::new(file.clone(), 0x10);

        bank.write(2, 0xCAFE).unwrap();
        assert_eq!(file.peek(0x12), 0xCAFE);
        assert_eq!(bank.len(), 0x10);
        assert!(bank.write(0x10, 1).is_err());
    }

    #[test]
    fn test_mode_select_bits() {
        let grf = Arc::new(SimRegisterFile::new(0x100));
        grf.poke(0x10, 0x0000_00F0);
        let select = ModeSelect::new(grf.clone(), 0x40, 4);

        select.switch_to(RunningMode::Hevc).unwrap();
        assert_eq!(grf.peek(0x10), 0x0010_00F0);

        select.switch_to(RunningMode::Vpu).unwrap();
        assert_eq!(grf.peek(0x10), 0x0010_00E0);
        assert_eq!(grf.write_count(0x10), 2);
    }
}
