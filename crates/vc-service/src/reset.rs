//! Hardware reset and translation fault recovery

use crate::service::{Counters, ServiceInner, ServiceState, VcodecService};
use crate::subdev::SubDeviceId;
use std::sync::atomic::Ordering;
use std::thread;
use vc_core::{DebugFlags, Result};
use vc_memory::{mmu::page_align_down, MmuState, IOMMU_PAGE_SIZE};

impl ServiceInner {
    /// Reset the engine group. The pipeline is expected to be idle.
    pub(crate) fn reset(&self, state: &mut ServiceState, subdev: SubDeviceId) {
        self.reset_request.store(0, Ordering::Release);
        let domain = self
            .ops
            .idle_domain()
            .unwrap_or_else(|| self.platform.default_idle_domain());
        tracing::info!("reset start, idle domain {:?}", domain);

        if !state.slots.is_idle() {
            tracing::error!(
                "reset with tasks in flight: codec {:?} pproc {:?} reserved {:?}",
                state.slots.codec,
                state.slots.pproc,
                state.slots.reserved
            );
            state.slots = Default::default();
        }

        let resets = &self.platform.resets;
        if resets.can_reset() {
            let granted = match &self.platform.idle {
                Some(idle) => idle.set_idle(domain, true),
                None => Err(vc_core::HardwareError::IdleRequestDenied(format!("{:?}", domain))),
            };
            match granted {
                Err(err) => {
                    tracing::warn!("{}, falling back to secure monitor reset", err);
                    if let Some(secure) = &self.platform.secure {
                        secure.reset_codec();
                    }
                }
                Ok(()) => {
                    self.reduce_freq(state);
                    resets.assert_all();
                    thread::sleep(self.config.reset_pulse());
                    resets.deassert_all();
                    if let Some(idle) = &self.platform.idle {
                        if let Err(err) = idle.set_idle(domain, false) {
                            tracing::warn!("idle release failed: {}", err);
                        }
                    }
                }
            }
        }

        // The faulted unit need not belong to the task that triggered the reset
        for (id, mmu) in state.mmu.iter_mut().enumerate() {
            if let Some(mmu) = mmu {
                if id == subdev || mmu.state() == MmuState::Faulted {
                    mmu.reset();
                }
            }
        }
        Counters::bump(&self.counters.resets);
        tracing::info!("reset done");
    }

    /// Translation fault reported for `subdev` at device address `addr`
    pub(crate) fn iommu_fault(&self, state: &mut ServiceState, subdev: SubDeviceId, addr: u32, status: u32) {
        let Some(codec) = state.slots.codec else {
            tracing::warn!("iommu fault at {:08x} with no codec task", addr);
            return;
        };
        let sub = &self.subdevs[subdev];
        tracing::error!(
            "iommu fault on {} at {:08x}, status {:08x}, task {}",
            sub.name,
            addr,
            status,
            codec
        );

        if let Some(task) = state.tasks.get(&codec) {
            for region in &task.regions {
                tracing::error!(
                    "  region {} addr {:08x} len {:x} reg {:?}",
                    region.handle(),
                    region.addr,
                    region.len,
                    region.reg_idx
                );
            }
            match task.region_at(addr) {
                Some(region) => tracing::error!(
                    "fault inside buffer {} (reg {:?})",
                    region.handle(),
                    region.reg_idx
                ),
                None => tracing::error!("fault outside every buffer of task {}", codec),
            }
        }
        if self.flags.contains(DebugFlags::DUMP_ERR_REG) {
            sub.dump();
        }

        let Some(Some(mmu)) = state.mmu.get_mut(subdev) else {
            self.raise_reset_request();
            return;
        };
        mmu.mark_faulted();

        match self.platform.prefetch_page {
            Some(page) if self.ops.is_prefetch_fault(status) => {
                if let Some(old) = state.war_iova.take() {
                    mmu.iommu().unmap_page(old);
                }
                let iova = page_align_down(addr);
                match mmu.iommu().map_page(iova, page, IOMMU_PAGE_SIZE) {
                    Ok(()) => {
                        tracing::info!("prefetch workaround page mapped at {:08x}", iova);
                        state.war_iova = Some(iova);
                    }
                    Err(err) => {
                        tracing::error!("prefetch workaround map failed: {}", err);
                        self.raise_reset_request();
                    }
                }
            }
            _ => self.raise_reset_request(),
        }
    }
}

impl VcodecService {
    /// Deliver a translation fault notification from the IOMMU driver
    pub fn iommu_fault(&self, subdev: SubDeviceId, addr: u32, status: u32) -> Result<()> {
        self.inner.subdev(subdev)?;
        let mut state = self.inner.state.lock();
        self.inner.iommu_fault(&mut state, subdev, addr, status);
        Ok(())
    }
}
