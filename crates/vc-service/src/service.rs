//! Scheduler context: shared state, attach and detach

use crate::irq::{self, IrqMsg};
use crate::power::{self, PowerMsg};
use crate::session::{unlink, Session, SessionId};
use crate::subdev::{SubDevice, SubDeviceDesc, SubDeviceId};
use crate::task::{RegisterTask, TaskId};
use crossbeam::channel::{self, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use vc_core::error::{HardwareError, ServiceError};
use vc_core::{DebugFlags, Result, ServiceConfig};
use vc_hw::{
    select_ops, Chip, Frequency, HwCapabilities, HwOps, ModeSelect, Platform, RunningMode,
};
use vc_memory::{BufferService, MmuContext};

/// In-flight slots. A slot holds a task only while that task is running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Slots {
    /// Encoder or decoder engine
    pub codec: Option<TaskId>,
    /// Post-processor
    pub pproc: Option<TaskId>,
    pub reserved: Option<TaskId>,
}

impl Slots {
    pub fn is_idle(&self) -> bool {
        self.codec.is_none() && self.pproc.is_none() && self.reserved.is_none()
    }

    /// Drop every slot reference to `id`
    pub fn release(&mut self, id: TaskId) {
        for slot in [&mut self.codec, &mut self.pproc, &mut self.reserved] {
            if *slot == Some(id) {
                *slot = None;
            }
        }
    }

    pub fn references(&self, id: TaskId) -> bool {
        [self.codec, self.pproc, self.reserved].contains(&Some(id))
    }
}

/// Everything guarded by the scheduler lock
#[derive(Debug)]
pub struct ServiceState {
    pub sessions: HashMap<SessionId, Session>,
    /// Task arena; queues and slots refer to tasks by id
    pub tasks: HashMap<TaskId, RegisterTask>,
    pub waiting: VecDeque<TaskId>,
    pub running: VecDeque<TaskId>,
    pub done: VecDeque<TaskId>,
    pub slots: Slots,
    pub powered: bool,
    /// Last time the power-off delay was re-armed
    pub last_arm: Option<Instant>,
    pub curr_mode: RunningMode,
    pub prev_mode: RunningMode,
    /// Tasks on hardware over all sessions
    pub total_running: usize,
    pub auto_freq: bool,
    /// Tier last applied through the variant, `None` when unknown
    pub freq: Option<Frequency>,
    /// Translation state per sub-device, `None` without an IOMMU
    pub mmu: Vec<Option<MmuContext>>,
    /// IOVA of the prefetch workaround page, if mapped
    pub war_iova: Option<u32>,
    /// Session waiting for a secure-mode interrupt
    pub secure_waiter: Option<SessionId>,
}

impl ServiceState {
    fn new(auto_freq: bool, mmu: Vec<Option<MmuContext>>) -> Self {
        Self {
            sessions: HashMap::new(),
            tasks: HashMap::new(),
            waiting: VecDeque::new(),
            running: VecDeque::new(),
            done: VecDeque::new(),
            slots: Slots::default(),
            powered: false,
            last_arm: None,
            curr_mode: RunningMode::None,
            prev_mode: RunningMode::None,
            total_running: 0,
            auto_freq,
            freq: None,
            mmu,
            war_iova: None,
            secure_waiter: None,
        }
    }

    /// Detach `id` from the global queues and slots and free it
    pub(crate) fn release_task(&mut self, id: TaskId) {
        if !unlink(&mut self.waiting, id) && !unlink(&mut self.running, id) {
            unlink(&mut self.done, id);
        }
        self.slots.release(id);
        self.tasks.remove(&id);
    }

    /// Drop every task owned by `session`
    pub(crate) fn clear_session(&mut self, session: SessionId) {
        let Some(s) = self.sessions.get_mut(&session) else {
            return;
        };
        let ids: Vec<TaskId> = s.task_ids().collect();
        s.waiting.clear();
        s.running.clear();
        s.done.clear();
        for id in ids {
            self.release_task(id);
        }
    }

    /// True if some global queue, slot or session still refers to a task of `session`
    pub fn references_session(&self, session: SessionId) -> bool {
        self.tasks.values().any(|t| t.session == session)
    }

    pub(crate) fn session_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(&id)
    }
}

/// Monotonic event counters
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub power_on: AtomicU64,
    pub power_off: AtomicU64,
    pub resets: AtomicU64,
    pub irq_dec: AtomicU64,
    pub irq_pp: AtomicU64,
    pub irq_enc: AtomicU64,
    pub timeouts: AtomicU64,
}

impl Counters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Shared part of the service, reachable from the worker threads
pub(crate) struct ServiceInner {
    pub config: ServiceConfig,
    pub flags: DebugFlags,
    pub platform: Platform,
    pub ops: Arc<dyn HwOps>,
    pub subdevs: Vec<SubDevice>,
    pub mode_select: Option<ModeSelect>,
    pub caps: HwCapabilities,
    pub state: Mutex<ServiceState>,
    /// Outstanding reset requests, raised from the interrupt fast path
    pub reset_request: AtomicU32,
    /// Raw status of the last interrupt
    pub irq_status: AtomicU32,
    pub secure_mode: AtomicBool,
    pub secure_isr: AtomicBool,
    pub counters: Counters,
    pub power_tx: Sender<PowerMsg>,
    pub irq_tx: Sender<IrqMsg>,
    pub next_session: AtomicU32,
    pub next_task: AtomicU64,
}

impl ServiceInner {
    pub fn subdev(&self, id: SubDeviceId) -> std::result::Result<&SubDevice, HardwareError> {
        self.subdevs.get(id).ok_or(HardwareError::InvalidSubDevice(id))
    }

    pub fn raise_reset_request(&self) {
        let pending = self.reset_request.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::warn!("reset requested ({} pending)", pending);
    }
}

/// Snapshot of scheduler state and counters
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    pub sessions: usize,
    pub waiting: usize,
    pub running: usize,
    pub done: usize,
    pub total_running: usize,
    pub codec_busy: bool,
    pub pproc_busy: bool,
    pub powered: bool,
    pub curr_mode: RunningMode,
    pub freq: Option<Frequency>,
    pub auto_freq: bool,
    pub reset_request: u32,
    pub power_on_count: u64,
    pub power_off_count: u64,
    pub reset_count: u64,
    pub irq_dec_count: u64,
    pub irq_pp_count: u64,
    pub irq_enc_count: u64,
    pub timeout_count: u64,
}

/// Attach-time description of an engine group
pub struct ServiceBuilder {
    platform: Platform,
    buffers: Arc<dyn BufferService>,
    config: ServiceConfig,
    flags: DebugFlags,
    chip: Chip,
    subdevs: Vec<SubDeviceDesc>,
    mode_ctrl: Option<(usize, u32)>,
}

impl ServiceBuilder {
    pub fn config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn debug_flags(mut self, flags: DebugFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn chip(mut self, chip: Chip) -> Self {
        self.chip = chip;
        self
    }

    pub fn subdevice(mut self, desc: SubDeviceDesc) -> Self {
        self.subdevs.push(desc);
        self
    }

    /// Shared mode-select bit at `byte_offset` of the platform GRF
    pub fn mode_control(mut self, byte_offset: usize, bit: u32) -> Self {
        self.mode_ctrl = Some((byte_offset, bit));
        self
    }

    /// Identify every sub-device, probe capabilities and start the workers
    pub fn attach(self) -> Result<VcodecService> {
        if self.subdevs.is_empty() {
            return Err(ServiceError::Config("no sub-devices to attach".into()));
        }

        let ops = select_ops(self.chip, self.platform.device);
        let mode_select = match self.mode_ctrl {
            Some((offset, bit)) => {
                let grf = self.platform.grf.clone().ok_or(HardwareError::NoModeControl)?;
                Some(ModeSelect::new(grf, offset, bit))
            }
            None => None,
        };

        // Identification reads registers, which needs the clocks running
        ops.power_on(&self.platform)?;
        let probed = self.probe();
        if let Err(err) = ops.power_off(&self.platform) {
            tracing::warn!("power off after probe failed: {}", err);
        }
        let (subdevs, caps) = probed?;

        let auto_freq = self.config.auto_freq.unwrap_or(caps.auto_freq);
        let mmu = self
            .subdevs
            .iter()
            .map(|d| d.iommu.clone().map(MmuContext::new))
            .collect();

        let (power_tx, power_rx) = channel::unbounded();
        let (irq_tx, irq_rx) = channel::unbounded();

        tracing::info!(
            "attached {} sub-device(s) on {:?}, ops {}, auto freq {}",
            subdevs.len(),
            self.platform.device,
            ops.name(),
            auto_freq
        );

        let inner = Arc::new(ServiceInner {
            config: self.config.clone(),
            flags: self.flags,
            platform: self.platform,
            ops,
            subdevs,
            mode_select,
            caps,
            state: Mutex::new(ServiceState::new(auto_freq, mmu)),
            reset_request: AtomicU32::new(0),
            irq_status: AtomicU32::new(0),
            secure_mode: AtomicBool::new(false),
            secure_isr: AtomicBool::new(false),
            counters: Counters::default(),
            power_tx,
            irq_tx,
            next_session: AtomicU32::new(1),
            next_task: AtomicU64::new(1),
        });

        let power_thread =
            power::spawn_timer(Arc::downgrade(&inner), power_rx, self.config.power_off_delay())?;
        let irq_thread = irq::spawn_dispatcher(Arc::downgrade(&inner), irq_rx)?;

        Ok(VcodecService {
            inner,
            power_thread: Some(power_thread),
            irq_thread: Some(irq_thread),
        })
    }

    fn probe(&self) -> Result<(Vec<SubDevice>, HwCapabilities)> {
        let subdevs = self
            .subdevs
            .iter()
            .enumerate()
            .map(|(id, desc)| -> Result<SubDevice> {
                let mut sub = SubDevice::attach(id, desc, self.buffers.clone())?;
                sub.translator.set_pps_trace(self.flags.contains(DebugFlags::PPS_FILL));
                Ok(sub)
            })
            .collect::<Result<Vec<_>>>()?;

        let primary = &subdevs[0];
        let enc = subdevs.iter().find_map(|s| s.enc.as_ref());
        let max_width = self.config.max_dec_pic_width.min(self.chip.max_dec_pic_width());
        let caps = HwCapabilities::probe(primary.mode, max_width, enc, primary.info.hw.reg_size())?;
        Ok((subdevs, caps))
    }
}

/// An attached engine group
pub struct VcodecService {
    pub(crate) inner: Arc<ServiceInner>,
    power_thread: Option<JoinHandle<()>>,
    irq_thread: Option<JoinHandle<()>>,
}

impl VcodecService {
    /// Start describing an engine group on `platform`
    pub fn builder(platform: Platform, buffers: Arc<dyn BufferService>) -> ServiceBuilder {
        ServiceBuilder {
            platform,
            buffers,
            config: ServiceConfig::default(),
            flags: DebugFlags::empty(),
            chip: Chip::Generic,
            subdevs: Vec::new(),
            mode_ctrl: None,
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    pub fn capabilities(&self) -> HwCapabilities {
        self.inner.caps
    }

    pub fn subdevices(&self) -> &[SubDevice] {
        &self.inner.subdevs
    }

    /// Outstanding reset requests
    pub fn pending_resets(&self) -> u32 {
        self.inner.reset_request.load(Ordering::Acquire)
    }

    /// Run `f` against the scheduler state under the lock
    pub fn inspect<R>(&self, f: impl FnOnce(&ServiceState) -> R) -> R {
        f(&self.inner.state.lock())
    }

    pub fn stats(&self) -> ServiceStats {
        let state = self.inner.state.lock();
        let counters = &self.inner.counters;
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        ServiceStats {
            sessions: state.sessions.len(),
            waiting: state.waiting.len(),
            running: state.running.len(),
            done: state.done.len(),
            total_running: state.total_running,
            codec_busy: state.slots.codec.is_some(),
            pproc_busy: state.slots.pproc.is_some(),
            powered: state.powered,
            curr_mode: state.curr_mode,
            freq: state.freq,
            auto_freq: state.auto_freq,
            reset_request: self.inner.reset_request.load(Ordering::Acquire),
            power_on_count: load(&counters.power_on),
            power_off_count: load(&counters.power_off),
            reset_count: load(&counters.resets),
            irq_dec_count: load(&counters.irq_dec),
            irq_pp_count: load(&counters.irq_pp),
            irq_enc_count: load(&counters.irq_enc),
            timeout_count: load(&counters.timeouts),
        }
    }
}

impl Drop for VcodecService {
    fn drop(&mut self) {
        let _ = self.inner.power_tx.send(PowerMsg::Shutdown);
        let _ = self.inner.irq_tx.send(IrqMsg::Shutdown);
        for handle in [self.power_thread.take(), self.irq_thread.take()]
            .into_iter()
            .flatten()
        {
            if handle.join().is_err() {
                tracing::error!("service worker panicked");
            }
        }

        let mut state = self.inner.state.lock();
        let sessions: Vec<SessionId> = state.sessions.keys().copied().collect();
        for id in sessions {
            state.clear_session(id);
        }
        state.sessions.clear();
        self.inner.power_off(&mut state);
        tracing::info!("detached");
    }
}
