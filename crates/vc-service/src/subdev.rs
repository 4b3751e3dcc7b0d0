//! Sub-devices: one register window each, identified at attach

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use vc_core::error::HardwareError;
use vc_hw::{RegisterBank, RegisterWindow, RunningMode, VcodecInfo};
use vc_memory::{AddressTranslator, BufferService, Iommu, MappingContext};

/// Index of a sub-device inside its service
pub type SubDeviceId = usize;

/// What the platform hands over for one sub-device
#[derive(Clone)]
pub struct SubDeviceDesc {
    pub name: String,
    /// Personality this window runs as on shared hardware
    pub mode: RunningMode,
    pub window: Arc<dyn RegisterWindow>,
    pub iommu: Option<Arc<dyn Iommu>>,
}

impl SubDeviceDesc {
    pub fn new(name: impl Into<String>, mode: RunningMode, window: Arc<dyn RegisterWindow>) -> Self {
        Self {
            name: name.into(),
            mode,
            window,
            iommu: None,
        }
    }

    pub fn with_iommu(mut self, iommu: Arc<dyn Iommu>) -> Self {
        self.iommu = Some(iommu);
        self
    }
}

/// Pending interrupt counts raised by the top half
#[derive(Debug, Default)]
pub struct IrqCounts {
    pub dec_codec: AtomicU32,
    pub dec_pp: AtomicU32,
    pub enc_codec: AtomicU32,
}

/// Consume one pending interrupt from `counter`
pub(crate) fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| v.checked_sub(1))
        .is_ok()
}

/// An attached sub-device
pub struct SubDevice {
    pub id: SubDeviceId,
    pub name: String,
    pub mode: RunningMode,
    pub info: &'static VcodecInfo,
    pub window: Arc<dyn RegisterWindow>,
    pub dec: RegisterBank,
    pub enc: Option<RegisterBank>,
    pub translator: AddressTranslator,
    pub has_iommu: bool,
    pub irqs: IrqCounts,
}

impl SubDevice {
    /// Identify the hardware behind `desc` and bind its register banks
    pub fn attach(
        id: SubDeviceId,
        desc: &SubDeviceDesc,
        buffers: Arc<dyn BufferService>,
    ) -> Result<Self, HardwareError> {
        let raw = desc.window.read(0)?;
        let hw_id = (raw >> 16) & 0xffff;
        let info = VcodecInfo::lookup(hw_id).ok_or(HardwareError::UnknownHwId(hw_id))?;

        if desc.window.len() < info.hw.io_words {
            return Err(HardwareError::RegisterOutOfWindow {
                index: info.hw.io_words - 1,
                len: desc.window.len(),
            });
        }

        let dec = RegisterBank::new(desc.window.clone(), info.hw.dec_offset);
        let enc = info
            .hw
            .has_encoder()
            .then(|| RegisterBank::new(desc.window.clone(), info.hw.enc_offset));
        let ctx = desc
            .iommu
            .as_ref()
            .map_or(MappingContext::Physical, |mmu| MappingContext::Iommu(mmu.domain()));

        tracing::info!(
            "sub-device {} '{}': hw id {:04x}, mode {:?}, {:?}",
            id,
            desc.name,
            hw_id,
            desc.mode,
            ctx
        );

        Ok(Self {
            id,
            name: desc.name.clone(),
            mode: desc.mode,
            info,
            window: desc.window.clone(),
            dec,
            enc,
            translator: AddressTranslator::new(buffers, ctx),
            has_iommu: desc.iommu.is_some(),
            irqs: IrqCounts::default(),
        })
    }

    pub fn hw_id(&self) -> u32 {
        self.info.hw_id
    }

    /// Dump the whole window, used when hardware reports an error
    pub fn dump(&self) {
        RegisterBank::new(self.window.clone(), 0).dump(self.info.hw.io_words);
    }
}

impl std::fmt::Debug for SubDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubDevice")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("hw_id", &format_args!("{:04x}", self.info.hw_id))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vc_hw::hw_id;
    use vc_hw::sim::SimRegisterFile;
    use vc_memory::sim::SimBufferService;

    fn buffers() -> Arc<dyn BufferService> {
        Arc::new(SimBufferService::new())
    }

    #[test]
    fn test_attach_identifies_hardware() {
        let window = Arc::new(SimRegisterFile::new(0x400));
        window.poke(0, hw_id::VPU_8270 << 16);
        let desc = SubDeviceDesc::new("vpu", RunningMode::Vpu, window);

        let sub = SubDevice::attach(0, &desc, buffers()).unwrap();
        assert_eq!(sub.hw_id(), hw_id::VPU_8270);
        assert!(sub.enc.is_some());
        assert_eq!(sub.translator.context(), MappingContext::Physical);
    }

    #[test]
    fn test_attach_rejects_unknown_id() {
        let window = Arc::new(SimRegisterFile::new(0x400));
        window.poke(0, 0xbeef << 16);
        let desc = SubDeviceDesc::new("vpu", RunningMode::Vpu, window);

        let err = SubDevice::attach(0, &desc, buffers()).unwrap_err();
        assert_eq!(err, HardwareError::UnknownHwId(0xbeef));
    }

    #[test]
    fn test_take_one_saturates() {
        let counter = AtomicU32::new(1);
        assert!(take_one(&counter));
        assert!(!take_one(&counter));
        assert_eq!(counter.load(Ordering::Relaxed), 0);
    }
}
