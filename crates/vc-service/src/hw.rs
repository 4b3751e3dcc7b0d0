//! Register submission and completion

use crate::service::{ServiceInner, ServiceState};
use crate::session::unlink;
use crate::subdev::SubDevice;
use crate::task::{RegisterTask, TaskId, TaskStatus};
use std::sync::atomic::Ordering;
use std::time::Instant;
use vc_core::error::{HardwareError, SessionError};
use vc_core::{DebugFlags, Result};
use vc_hw::{DeviceKind, RegisterBank, TaskInfo, TaskType};

/// rkvdec cache-line configuration registers, relative to the decoder bank
const RKVDEC_CACHE_REGS: [usize; 2] = [0x100 + 0x07, 0x100 + 0x17];
const RKVDEC_CACHE_64B: u32 = 0x13;
const RKVDEC_CACHE_32B: u32 = 0x3;

impl ServiceInner {
    /// Program the hardware for an admitted task
    pub(crate) fn copy_to_hw(&self, state: &mut ServiceState, id: TaskId) {
        let Some((kind, subdev, session, freq)) = state
            .tasks
            .get(&id)
            .map(|t| (t.kind, t.subdev, t.session, t.freq))
        else {
            return;
        };

        state.total_running += 1;
        if let Some(s) = state.sessions.get_mut(&session) {
            s.task_running += 1;
        }

        if state.auto_freq && state.freq != Some(freq) {
            let regs = state.tasks.get(&id).map_or(&[][..], |t| t.regs.as_slice());
            if let Err(err) = self.ops.set_freq(&self.platform, freq, regs) {
                tracing::warn!("set freq {:?} failed: {}", freq, err);
            }
            if self.flags.contains(DebugFlags::CLOCK) {
                tracing::debug!("freq {:?} -> {:?}", state.freq, freq);
            }
            state.freq = Some(freq);
        }

        self.enter_mode(state, subdev);

        match kind {
            TaskType::Enc | TaskType::Dec => state.slots.codec = Some(id),
            TaskType::Pp => state.slots.pproc = Some(id),
            TaskType::DecPp => {
                state.slots.codec = Some(id);
                state.slots.pproc = Some(id);
            }
        }

        let Some(task) = state.tasks.get_mut(&id) else {
            return;
        };
        task.started = Some(Instant::now());
        let sub = &self.subdevs[subdev];
        if let Err(err) = self.write_task(sub, task) {
            tracing::error!("task {} submission to {} failed: {}", id, sub.name, err);
            self.raise_reset_request();
        }
    }

    fn write_task(&self, sub: &SubDevice, task: &RegisterTask) -> std::result::Result<(), HardwareError> {
        let hw = &sub.info.hw;
        let Some(info) = sub.info.task(task.kind) else {
            return Err(HardwareError::InvalidSubDevice(sub.id));
        };
        let src = &task.regs;
        let en = info.reg_en;
        let (base, end) = hw.submit_range(task.kind);

        match task.kind {
            TaskType::Enc => {
                let enc = sub.enc.as_ref().ok_or(HardwareError::InvalidSubDevice(sub.id))?;
                if let Some(reg) = hw.enc_clean_cache {
                    enc.write(reg, 1)?;
                }
                // Mode setup first, then the rest, then start
                enc.write(en, word(src, en) & info.enable_mask)?;
                self.write_range(enc, src, base, end, en)?;
                enc.write(en, word(src, en))?;
            }
            TaskType::Dec => {
                if let Some(reg) = hw.dec_clean_cache {
                    sub.dec.write(reg, 1)?;
                }
                if self.platform.device == DeviceKind::Rkvdec {
                    let cache = if self.flags.contains(DebugFlags::CACHE_32B) {
                        RKVDEC_CACHE_32B
                    } else {
                        RKVDEC_CACHE_64B
                    };
                    for reg in RKVDEC_CACHE_REGS {
                        sub.dec.write(reg, cache)?;
                    }
                }
                self.write_range(&sub.dec, src, base, end, en)?;
                self.ops.config(&sub.dec)?;
                sub.dec.write(en, word(src, en) | info.gating_mask)?;
            }
            TaskType::Pp => {
                self.write_range(&sub.dec, src, base, end, en)?;
                sub.dec.write(en, word(src, en) | info.gating_mask)?;
            }
            TaskType::DecPp => {
                if let Some(reg) = hw.dec_clean_cache {
                    sub.dec.write(reg, 1)?;
                }
                self.write_range(&sub.dec, src, base, end, en)?;
                sub.dec.write(en, word(src, en) | info.gating_mask)?;
            }
        }
        Ok(())
    }

    fn write_range(
        &self,
        bank: &RegisterBank,
        src: &[u32],
        base: usize,
        end: usize,
        skip: usize,
    ) -> std::result::Result<(), HardwareError> {
        let trace = self.flags.contains(DebugFlags::SET_REG);
        for i in (base..end).filter(|&i| i != skip) {
            let value = word(src, i);
            if trace {
                tracing::trace!("set reg[{:03}]: {:08x}", i, value);
            }
            bank.write(i, value)?;
        }
        Ok(())
    }

    /// Retire a finished task: read results back, free its slots and wake
    /// the owning session
    pub(crate) fn run_to_done(&self, state: &mut ServiceState, id: TaskId) {
        let Some((kind, subdev, session)) =
            state.tasks.get(&id).map(|t| (t.kind, t.subdev, t.session))
        else {
            tracing::error!("completed task {} missing from arena", id);
            return;
        };

        unlink(&mut state.running, id);
        state.done.push_back(id);
        match kind {
            TaskType::Enc | TaskType::Dec => state.slots.codec = None,
            TaskType::Pp => state.slots.pproc = None,
            TaskType::DecPp => {
                state.slots.codec = None;
                state.slots.pproc = None;
            }
        }

        let sub = &self.subdevs[subdev];
        if let Some(task) = state.tasks.get_mut(&id) {
            task.status = TaskStatus::Done;
            if let Err(err) = self.read_back(sub, task) {
                tracing::error!("task {} read back from {} failed: {}", id, sub.name, err);
            }
            if self.flags.contains(DebugFlags::TIMING) {
                if let Some(started) = task.started {
                    tracing::debug!("task {} ran {:?}", id, started.elapsed());
                }
            }
        }

        state.total_running = state.total_running.saturating_sub(1);
        if let Some(s) = state.sessions.get_mut(&session) {
            unlink(&mut s.running, id);
            s.done.push_back(id);
            s.task_running = s.task_running.saturating_sub(1);
            s.wait.notify_all();
        }
    }

    fn read_back(&self, sub: &SubDevice, task: &mut RegisterTask) -> std::result::Result<(), HardwareError> {
        let hw = &sub.info.hw;
        let Some(info) = sub.info.task(task.kind) else {
            return Err(HardwareError::InvalidSubDevice(sub.id));
        };
        let bank = match task.kind {
            TaskType::Enc => sub.enc.as_ref().ok_or(HardwareError::InvalidSubDevice(sub.id))?,
            _ => &sub.dec,
        };

        let live = bank.read_range(hw.readback_len(task.kind))?;
        for (dst, value) in task.regs.iter_mut().zip(live) {
            *dst = value;
        }

        match task.kind {
            TaskType::Enc => self.stamp_status(task, info),
            TaskType::Dec => {
                revert_length(task, info);
                self.stamp_status(task, info);
            }
            TaskType::Pp => sub.dec.write(info.reg_irq, 0)?,
            TaskType::DecPp => {
                if let Some(pipe) = info.reg_pipe {
                    sub.dec.write(pipe, word(&task.regs, pipe) & !info.pipe_mask)?;
                }
                revert_length(task, info);
                self.stamp_status(task, info);
            }
        }
        Ok(())
    }

    fn stamp_status(&self, task: &mut RegisterTask, info: &TaskInfo) {
        if let Some(reg) = task.regs.get_mut(info.reg_irq) {
            *reg = self.irq_status.load(Ordering::Acquire);
        }
    }

    /// Hand the oldest finished task of `session` back and free it
    pub(crate) fn return_reg(&self, state: &mut ServiceState, session: u32) -> Result<Vec<u32>> {
        let id = state
            .session_mut(session)
            .and_then(|s| s.done.pop_front())
            .ok_or(SessionError::Closed)?;
        unlink(&mut state.done, id);
        let task = state.tasks.remove(&id).ok_or(SessionError::Closed)?;

        let base = self.subdevs[task.subdev].info.hw.return_base(task.kind);
        let out = task.result(base);
        if self.flags.contains(DebugFlags::GET_REG) {
            for (i, value) in out.iter().enumerate() {
                tracing::trace!("get reg[{:03}]: {:08x}", base + i, value);
            }
        }
        Ok(out)
    }
}

/// Turn the decoded-length address back into a byte count
fn revert_length(task: &mut RegisterTask, info: &TaskInfo) {
    if let Some(reg) = info.reg_len {
        let base = task.dec_base.unwrap_or(0);
        if let Some(len) = task.regs.get_mut(reg) {
            *len = len.wrapping_sub(base) << 10;
        }
    }
}

fn word(regs: &[u32], index: usize) -> u32 {
    regs.get(index).copied().unwrap_or(0)
}
