//! Power and clock control
//!
//! Power is either on or off. Every scheduling pass with work waiting
//! powers on and, at most once per re-arm interval, pushes the deferred
//! power-off further out. The power-off itself runs on a timer thread and
//! backs off if the scheduler lock is busy.

use crate::service::{Counters, ServiceInner, ServiceState};
use crossbeam::channel::{Receiver, RecvTimeoutError};
use std::io;
use std::sync::Weak;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use vc_core::DebugFlags;

/// Messages to the power-off timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PowerMsg {
    /// Restart the power-off delay
    Arm,
    Shutdown,
}

impl ServiceInner {
    pub(crate) fn power_on(&self, state: &mut ServiceState) {
        let now = Instant::now();
        let rearm = state
            .last_arm
            .map_or(true, |last| now.duration_since(last) > self.config.power_rearm_interval());
        if rearm {
            if self.power_tx.send(PowerMsg::Arm).is_err() {
                tracing::warn!("power timer is gone");
            }
            state.last_arm = Some(now);
        }

        if state.powered {
            return;
        }
        state.powered = true;
        if self.flags.contains(DebugFlags::POWER) {
            tracing::debug!("power on via {}", self.ops.name());
        }
        if let Err(err) = self.ops.power_on(&self.platform) {
            tracing::warn!("power on failed: {}", err);
        }
        Counters::bump(&self.counters.power_on);
        self.platform.wake_lock.acquire();
        tracing::info!("power on");
    }

    pub(crate) fn power_off(&self, state: &mut ServiceState) {
        if !state.powered {
            return;
        }
        state.powered = false;

        if state.total_running > 0 {
            tracing::warn!(
                "power off with {} task(s) running, waiting {:?}",
                state.total_running,
                self.config.settle_delay()
            );
            thread::sleep(self.config.settle_delay());
        }

        for mmu in state.mmu.iter_mut().flatten() {
            mmu.deactivate();
        }
        state.curr_mode = vc_hw::RunningMode::None;

        if let Err(err) = self.ops.power_off(&self.platform) {
            tracing::warn!("power off failed: {}", err);
        }
        Counters::bump(&self.counters.power_off);
        self.platform.wake_lock.release();
        tracing::info!("power off");
    }

    /// Idle hook; a variant that lowered the clocks invalidates the tier cache
    pub(crate) fn reduce_freq(&self, state: &mut ServiceState) {
        match self.ops.reduce_freq(&self.platform) {
            Ok(true) => {
                if self.flags.contains(DebugFlags::CLOCK) {
                    tracing::debug!("idle clock reduction");
                }
                state.freq = None;
            }
            Ok(false) => {}
            Err(err) => tracing::warn!("reduce freq failed: {}", err),
        }
    }
}

/// Start the deferred power-off timer
pub(crate) fn spawn_timer(
    inner: Weak<ServiceInner>,
    rx: Receiver<PowerMsg>,
    delay: Duration,
) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("vcodec-power".into())
        .spawn(move || {
            let mut deadline: Option<Instant> = None;
            loop {
                let msg = match deadline {
                    Some(at) => rx.recv_deadline(at),
                    None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
                };
                match msg {
                    Ok(PowerMsg::Arm) => deadline = Some(Instant::now() + delay),
                    Ok(PowerMsg::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {
                        let Some(inner) = inner.upgrade() else {
                            break;
                        };
                        deadline = match inner.state.try_lock() {
                            Some(mut state) => {
                                inner.power_off(&mut state);
                                None
                            }
                            None => Some(Instant::now() + delay),
                        };
                    }
                }
            }
            tracing::debug!("power timer stopped");
        })
}
