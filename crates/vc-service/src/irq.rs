//! Interrupt handling
//!
//! The fast half runs on the caller's thread as soon as a line fires: it
//! reads the status word, acknowledges it in hardware, counts the event on
//! the sub-device and records error bits as reset requests, all without the
//! scheduler lock. The slow half runs on the dispatcher thread, takes the
//! lock, retires the finished task and runs a scheduling pass.

use crate::service::{Counters, ServiceInner, VcodecService};
use crate::subdev::{take_one, SubDevice, SubDeviceId};
use crossbeam::channel::Receiver;
use std::io;
use std::sync::atomic::Ordering;
use std::sync::Weak;
use std::thread::{self, JoinHandle};
use vc_core::{DebugFlags, Result};
use vc_hw::TaskType;
use vc_memory::MmuState;

/// Interrupt line of a sub-device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IrqLine {
    /// Decoder and post-processor
    Dec,
    Enc,
}

pub(crate) enum IrqMsg {
    Raised { subdev: SubDeviceId, line: IrqLine },
    Shutdown,
}

impl ServiceInner {
    /// Fast half of the decoder line. Returns true if the slow half must run.
    pub(crate) fn dec_irq(&self, sub: &SubDevice) -> bool {
        if self.secure_mode.load(Ordering::Acquire) {
            self.secure_isr.store(true, Ordering::Release);
            return true;
        }

        let mut wake = false;
        if let Some(dec) = sub.info.task(TaskType::Dec) {
            match sub.dec.read(dec.reg_irq) {
                Ok(status) => {
                    if self.flags.contains(DebugFlags::IRQ_STATUS) {
                        tracing::debug!("{} dec status {:08x}", sub.name, status);
                    }
                    if status & dec.irq_mask != 0 {
                        self.ack(sub, dec.reg_irq, 0);
                        self.ack(sub, dec.reg_en, dec.gating_mask);
                        if dec.is_error(status) {
                            tracing::warn!("{} decoder error status {:08x}", sub.name, status);
                            if self.flags.contains(DebugFlags::DUMP_ERR_REG) {
                                sub.dump();
                            }
                            self.raise_reset_request();
                        }
                        sub.irqs.dec_codec.fetch_add(1, Ordering::AcqRel);
                        Counters::bump(&self.counters.irq_dec);
                        self.irq_status.store(status, Ordering::Release);
                        wake = true;
                    }
                }
                Err(err) => tracing::error!("{} dec status read failed: {}", sub.name, err),
            }
        }

        if sub.info.hw.has_pp_irq() {
            if let Some(pp) = sub.info.task(TaskType::Pp) {
                match sub.dec.read(pp.reg_irq) {
                    Ok(status) if status & pp.irq_mask != 0 => {
                        if self.flags.contains(DebugFlags::IRQ_STATUS) {
                            tracing::debug!("{} pp status {:08x}", sub.name, status);
                        }
                        if pp.is_error(status) {
                            tracing::warn!("{} post-processor error status {:08x}", sub.name, status);
                            self.raise_reset_request();
                        }
                        self.ack(sub, pp.reg_irq, status & !pp.irq_mask);
                        sub.irqs.dec_pp.fetch_add(1, Ordering::AcqRel);
                        Counters::bump(&self.counters.irq_pp);
                        wake = true;
                    }
                    Ok(_) => {}
                    Err(err) => tracing::error!("{} pp status read failed: {}", sub.name, err),
                }
            }
        }
        wake
    }

    /// Fast half of the encoder line
    pub(crate) fn enc_irq(&self, sub: &SubDevice) -> bool {
        let (Some(enc), Some(bank)) = (sub.info.task(TaskType::Enc), sub.enc.as_ref()) else {
            return false;
        };
        let status = match bank.read(enc.reg_irq) {
            Ok(status) => status,
            Err(err) => {
                tracing::error!("{} enc status read failed: {}", sub.name, err);
                return false;
            }
        };
        if self.flags.contains(DebugFlags::IRQ_STATUS) {
            tracing::debug!("{} enc status {:08x}", sub.name, status);
        }

        let mut wake = false;
        if status & enc.irq_mask != 0 {
            if enc.is_error(status) {
                tracing::warn!("{} encoder error status {:08x}", sub.name, status);
                self.raise_reset_request();
            }
            if let Err(err) = bank.write(enc.reg_irq, status & !enc.irq_mask) {
                tracing::error!("{} enc ack failed: {}", sub.name, err);
            }
            sub.irqs.enc_codec.fetch_add(1, Ordering::AcqRel);
            Counters::bump(&self.counters.irq_enc);
            wake = true;
        }
        self.irq_status.store(status, Ordering::Release);
        wake
    }

    fn ack(&self, sub: &SubDevice, reg: usize, value: u32) {
        if let Err(err) = sub.dec.write(reg, value) {
            tracing::error!("{} write reg[{}] failed: {}", sub.name, reg, err);
        }
    }

    /// Slow half of the decoder line
    pub(crate) fn dec_isr(&self, id: SubDeviceId) {
        let Some(sub) = self.subdevs.get(id) else {
            return;
        };
        let mut state = self.state.lock();

        if self.secure_mode.load(Ordering::Acquire) {
            if let Some(s) = state.secure_waiter.and_then(|sid| state.sessions.get(&sid)) {
                s.wait.notify_all();
            }
            return;
        }

        if take_one(&sub.irqs.dec_codec) {
            match state.slots.codec {
                None => tracing::error!("{} decoder interrupt with no task running", sub.name),
                Some(task) => {
                    let faulted = matches!(state.mmu.get(id), Some(Some(m)) if m.state() == MmuState::Faulted);
                    if faulted {
                        if let Some(iova) = state.war_iova.take() {
                            if let Some(Some(mmu)) = state.mmu.get_mut(id) {
                                mmu.iommu().unmap_page(iova);
                                mmu.clear_fault();
                                tracing::info!("{} prefetch workaround page {:08x} removed", sub.name, iova);
                            }
                        }
                    }
                    self.run_to_done(&mut state, task);
                    if let Some(reg) = sub.info.hw.dec_soft_reset {
                        self.ack(sub, reg, 1);
                    }
                }
            }
        }

        if take_one(&sub.irqs.dec_pp) {
            match state.slots.pproc {
                None => tracing::error!("{} pp interrupt with no task running", sub.name),
                Some(task) => self.run_to_done(&mut state, task),
            }
        }

        self.try_set_reg(&mut state);
    }

    /// Slow half of the encoder line
    pub(crate) fn enc_isr(&self, id: SubDeviceId) {
        let Some(sub) = self.subdevs.get(id) else {
            return;
        };
        let mut state = self.state.lock();

        if take_one(&sub.irqs.enc_codec) {
            match state.slots.codec {
                None => tracing::error!("{} encoder interrupt with no task running", sub.name),
                Some(task) => self.run_to_done(&mut state, task),
            }
        }

        self.try_set_reg(&mut state);
    }
}

impl VcodecService {
    /// Deliver an interrupt on `line` of `subdev`.
    ///
    /// Runs the fast half inline and queues the slow half on the dispatcher
    /// thread. Returns whether the slow half was queued.
    pub fn raise_irq(&self, subdev: SubDeviceId, line: IrqLine) -> Result<bool> {
        let inner = &self.inner;
        let sub = inner.subdev(subdev)?;
        if inner.flags.contains(DebugFlags::IRQ_CHECK) {
            tracing::trace!("irq {:?} on {}", line, sub.name);
        }

        let wake = match line {
            IrqLine::Dec => inner.dec_irq(sub),
            IrqLine::Enc => inner.enc_irq(sub),
        };
        if wake && inner.irq_tx.send(IrqMsg::Raised { subdev, line }).is_err() {
            tracing::warn!("irq dispatcher is gone");
        }
        Ok(wake)
    }
}

/// Start the slow-half dispatcher
pub(crate) fn spawn_dispatcher(
    inner: Weak<ServiceInner>,
    rx: Receiver<IrqMsg>,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("vcodec-irq".into())
        .spawn(move || {
            while let Ok(IrqMsg::Raised { subdev, line }) = rx.recv() {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                match line {
                    IrqLine::Dec => inner.dec_isr(subdev),
                    IrqLine::Enc => inner.enc_isr(subdev),
                }
            }
            tracing::debug!("irq dispatcher stopped");
        })
}
