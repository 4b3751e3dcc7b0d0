//! Mode switching on engines shared by several sub-devices

use crate::service::{ServiceInner, ServiceState};
use crate::subdev::SubDeviceId;
use vc_core::DebugFlags;

impl ServiceInner {
    /// Make `subdev` the personality the shared engine runs as.
    ///
    /// Must be called with the scheduler lock held, right before the
    /// task's registers are written.
    pub(crate) fn enter_mode(&self, state: &mut ServiceState, subdev: SubDeviceId) {
        let mode = self.subdevs[subdev].mode;
        let Some(select) = self.mode_select.as_ref().filter(|_| self.subdevs.len() > 1) else {
            self.activate_mmu(state, subdev);
            return;
        };

        if state.curr_mode == mode {
            self.activate_mmu(state, subdev);
            return;
        }

        for (id, mmu) in state.mmu.iter_mut().enumerate() {
            if id == subdev {
                continue;
            }
            if let Some(mmu) = mmu {
                if mmu.deactivate() && self.flags.contains(DebugFlags::IOMMU) {
                    tracing::debug!("iommu of sub-device {} detached for mode switch", id);
                }
            }
        }

        if let Err(err) = select.switch_to(mode) {
            tracing::error!("switching to {:?} failed: {}", mode, err);
            return;
        }
        self.activate_mmu(state, subdev);

        tracing::debug!("mode {:?} -> {:?}", state.curr_mode, mode);
        state.prev_mode = state.curr_mode;
        state.curr_mode = mode;
    }

    fn activate_mmu(&self, state: &mut ServiceState, subdev: SubDeviceId) {
        let Some(Some(mmu)) = state.mmu.get_mut(subdev) else {
            return;
        };
        match mmu.ensure_active() {
            Ok(true) if self.flags.contains(DebugFlags::IOMMU) => {
                tracing::debug!("iommu of sub-device {} attached", subdev);
            }
            Ok(_) => {}
            Err(err) => tracing::warn!("iommu attach for sub-device {} failed: {}", subdev, err),
        }
    }
}
