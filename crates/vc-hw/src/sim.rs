//! Simulated hardware for tests and the simulator binary
//!
//! Every collaborator records what it is asked to do into a shared
//! [`EventLog`] so tests can assert on ordering across components.

use crate::info::DeviceKind;
use crate::platform::{
    Clock, ClockSet, IdleController, IdleDomain, Platform, ResetLine, ResetLines, SecureMonitor,
    WakeLock,
};
use crate::regs::RegisterWindow;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use vc_core::error::HardwareError;

/// Parent rate every simulated clock derives from
pub const SIM_PARENT_RATE: u64 = 1_200_000_000;

/// Ordered record of collaborator calls
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<String>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: String) {
        self.events.lock().push(event);
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    /// Events starting with `prefix`
    pub fn matching(&self, prefix: &str) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

/// Register window backed by host memory
pub struct SimRegisterFile {
    regs: Mutex<Vec<u32>>,
    writes: Mutex<Vec<(usize, u32)>>,
}

impl SimRegisterFile {
    pub fn new(words: usize) -> Self {
        Self {
            regs: Mutex::new(vec![0; words]),
            writes: Mutex::new(Vec::new()),
        }
    }

    /// Read a register without going through the window
    pub fn peek(&self, index: usize) -> u32 {
        self.regs.lock().get(index).copied().unwrap_or(0)
    }

    /// Set a register as the hardware would, without logging a write
    pub fn poke(&self, index: usize, value: u32) {
        if let Some(reg) = self.regs.lock().get_mut(index) {
            *reg = value;
        }
    }

    /// Writes seen at `index` through the window
    pub fn write_count(&self, index: usize) -> usize {
        self.writes.lock().iter().filter(|(i, _)| *i == index).count()
    }

    /// Drain the write log
    pub fn take_log(&self) -> Vec<(usize, u32)> {
        std::mem::take(&mut *self.writes.lock())
    }

    fn check(&self, index: usize, len: usize) -> Result<(), HardwareError> {
        if index < len {
            Ok(())
        } else {
            Err(HardwareError::RegisterOutOfWindow { index, len })
        }
    }
}

impl RegisterWindow for SimRegisterFile {
    fn len(&self) -> usize {
        self.regs.lock().len()
    }

    fn read(&self, index: usize) -> Result<u32, HardwareError> {
        let regs = self.regs.lock();
        self.check(index, regs.len())?;
        Ok(regs[index])
    }

    fn write(&self, index: usize, value: u32) -> Result<(), HardwareError> {
        let mut regs = self.regs.lock();
        self.check(index, regs.len())?;
        regs[index] = value;
        self.writes.lock().push((index, value));
        Ok(())
    }
}

/// Clock with a settable rate
pub struct SimClock {
    name: &'static str,
    rate: AtomicU64,
    default_rate: u64,
    enabled: AtomicBool,
    set_rate_count: AtomicUsize,
    log: EventLog,
}

impl SimClock {
    pub fn new(name: &'static str, rate: u64, log: EventLog) -> Self {
        Self {
            name,
            rate: AtomicU64::new(rate),
            default_rate: rate,
            enabled: AtomicBool::new(false),
            set_rate_count: AtomicUsize::new(0),
            log,
        }
    }

    /// Rate at construction
    pub fn default_rate(&self) -> u64 {
        self.default_rate
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_rate_count(&self) -> usize {
        self.set_rate_count.load(Ordering::Relaxed)
    }
}

impl Clock for SimClock {
    fn name(&self) -> &str {
        self.name
    }

    fn enable(&self) -> Result<(), HardwareError> {
        self.enabled.store(true, Ordering::Release);
        self.log.push(format!("enable {}", self.name));
        Ok(())
    }

    fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
        self.log.push(format!("disable {}", self.name));
    }

    fn rate(&self) -> u64 {
        self.rate.load(Ordering::Acquire)
    }

    fn set_rate(&self, hz: u64) -> Result<(), HardwareError> {
        if hz > SIM_PARENT_RATE {
            return Err(HardwareError::Clock(format!(
                "{}: {} Hz above parent",
                self.name, hz
            )));
        }
        self.rate.store(hz, Ordering::Release);
        self.set_rate_count.fetch_add(1, Ordering::Relaxed);
        self.log.push(format!("rate {} {}", self.name, hz));
        Ok(())
    }

    fn parent_rate(&self) -> u64 {
        SIM_PARENT_RATE
    }
}

pub struct SimResetLine {
    name: &'static str,
    log: EventLog,
}

impl SimResetLine {
    pub fn new(name: &'static str, log: EventLog) -> Self {
        Self { name, log }
    }
}

impl ResetLine for SimResetLine {
    fn assert(&self) {
        self.log.push(format!("assert {}", self.name));
    }

    fn deassert(&self) {
        self.log.push(format!("deassert {}", self.name));
    }
}

/// Idle controller that can be told to refuse requests
pub struct SimIdleController {
    deny: AtomicBool,
    log: EventLog,
}

impl SimIdleController {
    pub fn new(log: EventLog) -> Self {
        Self {
            deny: AtomicBool::new(false),
            log,
        }
    }

    pub fn set_deny(&self, deny: bool) {
        self.deny.store(deny, Ordering::Release);
    }
}

impl IdleController for SimIdleController {
    fn set_idle(&self, domain: IdleDomain, idle: bool) -> Result<(), HardwareError> {
        if idle && self.deny.load(Ordering::Acquire) {
            self.log.push(format!("idle denied {:?}", domain));
            return Err(HardwareError::IdleRequestDenied(format!("{:?}", domain)));
        }
        self.log.push(format!("idle {:?} {}", domain, idle));
        Ok(())
    }
}

pub struct SimSecureMonitor {
    resets: AtomicUsize,
    log: EventLog,
}

impl SimSecureMonitor {
    pub fn new(log: EventLog) -> Self {
        Self {
            resets: AtomicUsize::new(0),
            log,
        }
    }

    pub fn reset_count(&self) -> usize {
        self.resets.load(Ordering::Relaxed)
    }
}

impl SecureMonitor for SimSecureMonitor {
    fn reset_codec(&self) {
        self.resets.fetch_add(1, Ordering::Relaxed);
        self.log.push("secure reset".to_string());
    }
}

#[derive(Default)]
pub struct SimWakeLock {
    held: AtomicBool,
    acquired: AtomicUsize,
}

impl SimWakeLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }

    pub fn acquire_count(&self) -> usize {
        self.acquired.load(Ordering::Relaxed)
    }
}

impl WakeLock for SimWakeLock {
    fn acquire(&self) {
        self.held.store(true, Ordering::Release);
        self.acquired.fetch_add(1, Ordering::Relaxed);
    }

    fn release(&self) {
        self.held.store(false, Ordering::Release);
    }
}

/// A complete simulated platform.
///
/// Keeps typed handles to every collaborator so tests can inspect them
/// after handing [`SimPlatform::platform`] to the scheduler.
pub struct SimPlatform {
    pub log: EventLog,
    pub aclk: Arc<SimClock>,
    pub hclk: Arc<SimClock>,
    pub core: Arc<SimClock>,
    pub cabac: Arc<SimClock>,
    pub idle: Arc<SimIdleController>,
    pub secure: Arc<SimSecureMonitor>,
    pub wake_lock: Arc<SimWakeLock>,
    pub grf: Arc<SimRegisterFile>,
    platform: Platform,
}

/// GRF size in words
const SIM_GRF_WORDS: usize = 0x400;

impl SimPlatform {
    pub fn new(device: DeviceKind) -> Self {
        let log = EventLog::new();
        let aclk = Arc::new(SimClock::new("aclk", 300_000_000, log.clone()));
        let hclk = Arc::new(SimClock::new("hclk", 150_000_000, log.clone()));
        let core = Arc::new(SimClock::new("core", 200_000_000, log.clone()));
        let cabac = Arc::new(SimClock::new("cabac", 200_000_000, log.clone()));
        let idle = Arc::new(SimIdleController::new(log.clone()));
        let secure = Arc::new(SimSecureMonitor::new(log.clone()));
        let wake_lock = Arc::new(SimWakeLock::new());
        let grf = Arc::new(SimRegisterFile::new(SIM_GRF_WORDS));

        let line = |name| -> Option<Arc<dyn ResetLine>> {
            Some(Arc::new(SimResetLine::new(name, log.clone())))
        };
        let clock = |clk: &Arc<SimClock>| -> Option<Arc<dyn Clock>> { Some(clk.clone()) };

        let platform = Platform {
            device,
            clocks: ClockSet::new(clock(&aclk), clock(&hclk), clock(&core), clock(&cabac), None),
            resets: ResetLines {
                a: line("a"),
                h: line("h"),
                niu_a: line("niu_a"),
                niu_h: line("niu_h"),
                core: line("core"),
                cabac: line("cabac"),
            },
            idle: Some(idle.clone()),
            secure: Some(secure.clone()),
            wake_lock: wake_lock.clone(),
            grf: Some(grf.clone()),
            prefetch_page: None,
        };

        Self {
            log,
            aclk,
            hclk,
            core,
            cabac,
            idle,
            secure,
            wake_lock,
            grf,
            platform,
        }
    }

    /// Provide a scratch page for the prefetch fault workaround
    pub fn with_prefetch_page(mut self, phys: u64) -> Self {
        self.platform.prefetch_page = Some(phys);
        self
    }

    /// Remove the reset lines so hardware reset is skipped
    pub fn without_resets(mut self) -> Self {
        self.platform.resets = ResetLines::default();
        self
    }

    pub fn platform(&self) -> Platform {
        self.platform.clone()
    }

    /// A fresh register window of `words` registers
    pub fn window(&self, words: usize) -> Arc<SimRegisterFile> {
        Arc::new(SimRegisterFile::new(words))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_file_bounds() {
        let file = SimRegisterFile::new(4);
        assert!(file.write(3, 7).is_ok());
        assert_eq!(
            file.read(4),
            Err(HardwareError::RegisterOutOfWindow { index: 4, len: 4 })
        );
        file.poke(0, 1);
        assert_eq!(file.take_log(), vec![(3, 7)]);
        assert!(file.take_log().is_empty());
    }

    #[test]
    fn test_idle_deny() {
        let log = EventLog::new();
        let idle = SimIdleController::new(log.clone());
        idle.set_deny(true);
        assert!(idle.set_idle(IdleDomain::Video, true).is_err());
        // Releasing idle always succeeds
        assert!(idle.set_idle(IdleDomain::Video, false).is_ok());
        assert_eq!(log.matching("idle denied").len(), 1);
    }

    #[test]
    fn test_platform_defaults() {
        let sim = SimPlatform::new(DeviceKind::Combo);
        let platform = sim.platform();
        assert!(platform.resets.can_reset());
        platform.clocks.enable_all().unwrap();
        assert!(sim.aclk.is_enabled());
        assert!(sim.core.is_enabled());
        assert!(sim.without_resets().platform().resets.a.is_none());
    }
}
