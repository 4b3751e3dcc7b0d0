//! Trailing "extra info" block of a register blob
//!
//! Lets a client slice one buffer into several regions: after normal
//! translation the listed register words get an additive offset.

use bytemuck::{Pod, Zeroable};
use vc_core::error::MemoryError;

/// Magic value that marks a valid extra info block
pub const EXTRA_INFO_MAGIC: u32 = 0x4C4A46;

/// Maximum number of (index, offset) pairs in one block
pub const EXTRA_INFO_MAX_ELEMS: usize = 20;

/// One additive adjustment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct ExtraInfoElem {
    pub index: u32,
    pub offset: u32,
}

/// Wire layout of the extra info block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct ExtraInfo {
    pub magic: u32,
    pub count: u32,
    pub elems: [ExtraInfoElem; EXTRA_INFO_MAX_ELEMS],
}

impl ExtraInfo {
    /// Build a block from a list of adjustments
    pub fn new(elems: &[ExtraInfoElem]) -> Self {
        let mut info = Self::zeroed();
        info.magic = EXTRA_INFO_MAGIC;
        let count = elems.len().min(EXTRA_INFO_MAX_ELEMS);
        info.elems[..count].copy_from_slice(&elems[..count]);
        info.count = count as u32;
        info
    }

    /// Parse the trailing bytes of a blob.
    ///
    /// Short input is zero padded. Returns `None` when the magic does not
    /// match, in which case the block is ignored.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let mut raw = [0u8; std::mem::size_of::<ExtraInfo>()];
        let len = bytes.len().min(raw.len());
        raw[..len].copy_from_slice(&bytes[..len]);

        let info: ExtraInfo = bytemuck::pod_read_unaligned(&raw);
        (info.magic == EXTRA_INFO_MAGIC).then_some(info)
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    /// Valid adjustments; a count above the maximum is clamped
    pub fn entries(&self) -> &[ExtraInfoElem] {
        let count = self.count as usize;
        if count > EXTRA_INFO_MAX_ELEMS {
            tracing::warn!(
                "extra info count {} exceeds {}, clamping",
                count,
                EXTRA_INFO_MAX_ELEMS
            );
        }
        &self.elems[..count.min(EXTRA_INFO_MAX_ELEMS)]
    }

    /// Add each offset to its register word
    pub fn apply(&self, regs: &mut [u32]) -> Result<(), MemoryError> {
        let len = regs.len();
        for elem in self.entries() {
            let index = elem.index as usize;
            let word = regs
                .get_mut(index)
                .ok_or(MemoryError::RegisterOutOfRange { index, len })?;
            tracing::trace!("reg[{}] + offset {}", index, elem.offset);
            *word = word.wrapping_add(elem.offset);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_roundtrip_with_padding() {
        let info = ExtraInfo::new(&[ExtraInfoElem { index: 2, offset: 0x100 }]);
        let bytes = info.as_bytes();

        // Only magic, count and the first element are sent
        let parsed = ExtraInfo::parse(&bytes[..16]).unwrap();
        assert_eq!(parsed.entries(), &[ExtraInfoElem { index: 2, offset: 0x100 }]);
    }

    #[test]
    fn test_bad_magic_ignored() {
        let mut info = ExtraInfo::new(&[ExtraInfoElem { index: 0, offset: 1 }]);
        info.magic = 0xDEAD;
        assert!(ExtraInfo::parse(info.as_bytes()).is_none());
        assert!(ExtraInfo::parse(&[]).is_none());
    }

    #[test]
    fn test_apply_offsets() {
        let info = ExtraInfo::new(&[
            ExtraInfoElem { index: 1, offset: 0x40 },
            ExtraInfoElem { index: 3, offset: 0x80 },
        ]);
        let mut regs = [0x1000, 0x2000, 0x3000, 0x4000];
        info.apply(&mut regs).unwrap();
        assert_eq!(regs, [0x1000, 0x2040, 0x3000, 0x4080]);
    }

    #[test]
    fn test_apply_out_of_range() {
        let info = ExtraInfo::new(&[ExtraInfoElem { index: 8, offset: 1 }]);
        let mut regs = [0u32; 4];
        assert_eq!(
            info.apply(&mut regs),
            Err(MemoryError::RegisterOutOfRange { index: 8, len: 4 })
        );
    }

    #[test]
    fn test_count_clamped() {
        let mut info = ExtraInfo::new(&[]);
        info.count = 500;
        assert_eq!(info.entries().len(), EXTRA_INFO_MAX_ELEMS);
    }
}
