//! Simulated engine groups for tests, benchmarks and the simulator binary
//!
//! A [`SimGroup`] wires a [`VcodecService`] to simulated register files,
//! IOMMUs, clocks and a host-memory buffer service, and plays the hardware
//! side: it sets completion status bits and raises interrupt lines.

use crate::irq::IrqLine;
use crate::service::VcodecService;
use crate::subdev::{SubDeviceDesc, SubDeviceId};
use std::sync::Arc;
use vc_core::{DebugFlags, Result, ServiceConfig};
use vc_hw::sim::{SimPlatform, SimRegisterFile};
use vc_hw::{hw_id, Chip, DeviceKind, RegisterWindow, RunningMode, TaskType, VcodecInfo};
use vc_memory::sim::{SimBufferService, SimIommu};
use vc_memory::{BufferHandle, BufferService, DomainId, Iommu};

/// Mode-select bit position used by the simulated combo group
pub const SIM_MODE_CTRL: (usize, u32) = (0x408, 2);

/// Scratch page handed to the prefetch fault workaround
pub const SIM_PREFETCH_PAGE: u64 = 0x7fff_f000;

struct SimSubDevice {
    name: &'static str,
    hw_id: u32,
    mode: RunningMode,
    iommu: bool,
}

/// Describes a simulated group before attach
pub struct SimGroupBuilder {
    device: DeviceKind,
    chip: Chip,
    config: ServiceConfig,
    flags: DebugFlags,
    subdevs: Vec<SimSubDevice>,
    mode_ctrl: Option<(usize, u32)>,
    prefetch_page: Option<u64>,
    resets: bool,
}

impl SimGroupBuilder {
    pub fn new(device: DeviceKind) -> Self {
        Self {
            device,
            chip: Chip::Generic,
            config: ServiceConfig::default(),
            flags: DebugFlags::empty(),
            subdevs: Vec::new(),
            mode_ctrl: None,
            prefetch_page: None,
            resets: true,
        }
    }

    pub fn subdevice(mut self, name: &'static str, hw_id: u32, mode: RunningMode, iommu: bool) -> Self {
        self.subdevs.push(SimSubDevice {
            name,
            hw_id,
            mode,
            iommu,
        });
        self
    }

    pub fn chip(mut self, chip: Chip) -> Self {
        self.chip = chip;
        self
    }

    pub fn config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn debug_flags(mut self, flags: DebugFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn mode_control(mut self, byte_offset: usize, bit: u32) -> Self {
        self.mode_ctrl = Some((byte_offset, bit));
        self
    }

    pub fn prefetch_page(mut self, phys: u64) -> Self {
        self.prefetch_page = Some(phys);
        self
    }

    pub fn without_resets(mut self) -> Self {
        self.resets = false;
        self
    }

    pub fn attach(self) -> Result<SimGroup> {
        let mut platform = SimPlatform::new(self.device);
        if let Some(page) = self.prefetch_page {
            platform = platform.with_prefetch_page(page);
        }
        if !self.resets {
            platform = platform.without_resets();
        }
        let buffers = Arc::new(SimBufferService::new());
        let service: Arc<dyn BufferService> = buffers.clone();

        let mut builder = VcodecService::builder(platform.platform(), service)
            .config(self.config)
            .debug_flags(self.flags)
            .chip(self.chip);
        if let Some((offset, bit)) = self.mode_ctrl {
            builder = builder.mode_control(offset, bit);
        }

        let mut windows = Vec::new();
        let mut iommus = Vec::new();
        for (i, sub) in self.subdevs.iter().enumerate() {
            let words = VcodecInfo::lookup(sub.hw_id).map_or(0x400, |info| info.hw.io_words);
            let window = Arc::new(SimRegisterFile::new(words));
            window.poke(0, sub.hw_id << 16);

            let as_window: Arc<dyn RegisterWindow> = window.clone();
            let mut desc = SubDeviceDesc::new(sub.name, sub.mode, as_window);
            let iommu = sub.iommu.then(|| Arc::new(SimIommu::new(DomainId(i as u32))));
            if let Some(iommu) = &iommu {
                let as_iommu: Arc<dyn Iommu> = iommu.clone();
                desc = desc.with_iommu(as_iommu);
            }

            builder = builder.subdevice(desc);
            windows.push(window);
            iommus.push(iommu);
        }

        Ok(SimGroup {
            service: builder.attach()?,
            platform,
            buffers,
            windows,
            iommus,
        })
    }
}

/// An attached simulated engine group
pub struct SimGroup {
    pub service: VcodecService,
    pub platform: SimPlatform,
    pub buffers: Arc<SimBufferService>,
    pub windows: Vec<Arc<SimRegisterFile>>,
    pub iommus: Vec<Option<Arc<SimIommu>>>,
}

impl SimGroup {
    pub fn builder(device: DeviceKind) -> SimGroupBuilder {
        SimGroupBuilder::new(device)
    }

    /// One VPU with encoder, decoder and post-processor behind an IOMMU
    pub fn vpu() -> Result<Self> {
        Self::builder(DeviceKind::Vpu)
            .subdevice("vpu", hw_id::VPU_8270, RunningMode::Vpu, true)
            .attach()
    }

    /// A VPU and an HEVC decoder sharing one engine through the mode-select bit
    pub fn combo() -> Result<Self> {
        Self::builder(DeviceKind::Combo)
            .subdevice("vpu", hw_id::VPU_8270, RunningMode::Vpu, true)
            .subdevice("hevc", hw_id::HEVC, RunningMode::Hevc, true)
            .mode_control(SIM_MODE_CTRL.0, SIM_MODE_CTRL.1)
            .attach()
    }

    /// Register a buffer with the simulated buffer service
    pub fn add_buffer(&self, handle: u32, len: usize) {
        self.buffers.add_buffer(BufferHandle(handle), len);
    }

    pub fn info(&self, subdev: SubDeviceId) -> &'static VcodecInfo {
        self.service.subdevices()[subdev].info
    }

    /// A zeroed register blob sized for `subdev`
    pub fn blob(&self, subdev: SubDeviceId) -> Vec<u32> {
        vec![0; self.info(subdev).hw.reg_size()]
    }

    /// Finish the decoder task on `subdev`, with `extra` status bits
    pub fn complete_dec(&self, subdev: SubDeviceId, extra: u32) -> Result<bool> {
        self.set_status(subdev, TaskType::Dec, extra);
        self.service.raise_irq(subdev, IrqLine::Dec)
    }

    /// Finish the post-processor task on `subdev`
    pub fn complete_pp(&self, subdev: SubDeviceId) -> Result<bool> {
        self.set_status(subdev, TaskType::Pp, 0);
        self.service.raise_irq(subdev, IrqLine::Dec)
    }

    /// Finish the encoder task on `subdev`
    pub fn complete_enc(&self, subdev: SubDeviceId) -> Result<bool> {
        self.set_status(subdev, TaskType::Enc, 0);
        self.service.raise_irq(subdev, IrqLine::Enc)
    }

    /// Status word the simulated hardware reports for a clean `kind` completion
    pub fn done_status(&self, subdev: SubDeviceId, kind: TaskType) -> u32 {
        self.info(subdev)
            .task(kind)
            .map_or(0, |t| t.irq_mask | t.ready_mask)
    }

    fn set_status(&self, subdev: SubDeviceId, kind: TaskType, extra: u32) {
        let info = self.info(subdev);
        let Some(task) = info.task(kind) else {
            return;
        };
        let bank = match kind {
            TaskType::Enc => info.hw.enc_offset,
            _ => info.hw.dec_offset,
        };
        let status = self.done_status(subdev, kind) | extra;
        self.windows[subdev].poke(bank + task.reg_irq, status);
    }
}
