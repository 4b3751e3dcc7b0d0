//! Client control surface
//!
//! One session per client handle. Everything a client can do goes through
//! these calls; they are safe to use from any number of threads.

use crate::service::{Counters, ServiceInner, ServiceState, VcodecService};
use crate::session::{Session, SessionId};
use crate::subdev::SubDeviceId;
use crate::task::RegisterTask;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Instant;
use vc_core::error::{ServiceError, SessionError};
use vc_core::{DebugFlags, Result};
use vc_hw::{Capabilities, TaskType};
use vc_memory::ExtraInfo;

impl VcodecService {
    /// Open a session on `subdev` for process `pid`
    pub fn open(&self, subdev: SubDeviceId, pid: u32) -> Result<SessionId> {
        let inner = &self.inner;
        inner.subdev(subdev)?;
        let id = inner.next_session.fetch_add(1, Ordering::Relaxed);
        inner.secure_isr.store(false, Ordering::Release);

        inner
            .state
            .lock()
            .sessions
            .insert(id, Session::new(id, pid, subdev));
        self.trace_call("open", id);
        tracing::debug!("session {} opened on sub-device {} by pid {}", id, subdev, pid);
        Ok(id)
    }

    /// Declare the engine type. Bits 16 and up select secure mode (1 = on).
    pub fn set_client_type(&self, id: SessionId, raw: u32) -> Result<()> {
        let inner = &self.inner;
        let raw_kind = raw & 0xffff;
        let secure = raw >> 16;
        let kind =
            TaskType::from_raw(raw_kind).ok_or(SessionError::UnsupportedClientType(raw_kind))?;

        let mut state = inner.state.lock();
        let session = state
            .sessions
            .get_mut(&id)
            .ok_or(SessionError::InvalidId(id))?;
        if inner.subdevs[session.subdev].info.task(kind).is_none() {
            return Err(SessionError::UnsupportedClientType(raw_kind).into());
        }
        session.kind = Some(kind);
        inner.secure_mode.store(secure == 1, Ordering::Release);

        self.trace_call("set_client_type", id);
        tracing::debug!("session {} type {:?}, secure {}", id, kind, secure == 1);
        Ok(())
    }

    /// Submit a register blob, optionally followed by an extra info block.
    ///
    /// Returns once the task is queued and an admission attempt was made.
    pub fn submit(&self, id: SessionId, blob: &[u8]) -> Result<()> {
        let inner = &self.inner;
        self.trace_call("submit", id);

        if inner.secure_mode.load(Ordering::Acquire) {
            let mut state = inner.state.lock();
            if !state.sessions.contains_key(&id) {
                return Err(SessionError::InvalidId(id).into());
            }
            inner.power_on(&mut state);
            state.secure_waiter = Some(id);
            return Ok(());
        }

        let (kind, subdev, auto_freq) = {
            let state = inner.state.lock();
            let session = state.sessions.get(&id).ok_or(SessionError::InvalidId(id))?;
            let kind = session.kind.ok_or(SessionError::ClientTypeUnset)?;
            (kind, session.subdev, state.auto_freq)
        };

        let task_id = inner.next_task.fetch_add(1, Ordering::Relaxed);
        let task = RegisterTask::prepare(
            task_id,
            id,
            &inner.subdevs[subdev],
            kind,
            blob,
            auto_freq,
            inner.ops.as_ref(),
            inner.flags,
        )
        .inspect_err(|err| tracing::warn!("session {} submit rejected: {}", id, err))?;

        let mut state = inner.state.lock();
        let Some(session) = state.sessions.get_mut(&id) else {
            return Err(SessionError::Closed.into());
        };
        session.waiting.push_back(task_id);
        state.waiting.push_back(task_id);
        state.tasks.insert(task_id, task);
        tracing::debug!("task {} queued by session {}", task_id, id);

        inner.try_set_reg(&mut state);
        Ok(())
    }

    /// Submit register words with an optional extra info block
    pub fn submit_regs(&self, id: SessionId, regs: &[u32], extra: Option<&ExtraInfo>) -> Result<()> {
        let mut blob: Vec<u8> = bytemuck::cast_slice(regs).to_vec();
        if let Some(extra) = extra {
            blob.extend_from_slice(extra.as_bytes());
        }
        self.submit(id, &blob)
    }

    /// Capability descriptor matching the session's type
    pub fn get_hw_capabilities(&self, id: SessionId) -> Result<Capabilities> {
        let state = self.inner.state.lock();
        let session = state.sessions.get(&id).ok_or(SessionError::InvalidId(id))?;
        let caps = self.inner.caps;
        Ok(match session.kind {
            Some(TaskType::Enc) => Capabilities::Encoder(caps.enc),
            _ => Capabilities::Decoder(caps.dec),
        })
    }

    /// Wait for the oldest finished task of the session and return its
    /// result registers.
    ///
    /// On timeout the session's tasks are dropped, a reset is requested if
    /// any were on hardware, and a timeout error is returned.
    pub fn collect(&self, id: SessionId) -> Result<Vec<u32>> {
        let inner = &self.inner;
        self.trace_call("collect", id);
        let deadline = Instant::now() + inner.config.collect_timeout();

        let mut state = inner.state.lock();
        let wait = state
            .sessions
            .get(&id)
            .ok_or(SessionError::InvalidId(id))?
            .wait
            .clone();

        if inner.secure_mode.load(Ordering::Acquire) {
            while !inner.secure_isr.load(Ordering::Acquire) {
                if wait.wait_until(&mut state, deadline).timed_out() {
                    break;
                }
            }
            if !inner.secure_isr.swap(false, Ordering::AcqRel) {
                tracing::warn!("session {} secure wait timed out", id);
            }
            return Ok(Vec::new());
        }

        loop {
            match state.sessions.get(&id) {
                None => return Err(SessionError::Closed.into()),
                Some(s) if !s.done.is_empty() => break,
                Some(_) => {}
            }
            if wait.wait_until(&mut state, deadline).timed_out() {
                match state.sessions.get(&id) {
                    None => return Err(SessionError::Closed.into()),
                    Some(s) if !s.done.is_empty() => break,
                    Some(_) => return Err(inner.collect_timeout(&mut state, id)),
                }
            }
        }

        inner.return_reg(&mut state, id)
    }

    /// Whether any sub-device sits behind a translation unit
    pub fn probe_iommu_status(&self) -> bool {
        self.inner.subdevs.iter().any(|s| s.has_iommu)
    }

    /// Tear down a session, discarding every task it still owns
    pub fn close(&self, id: SessionId) -> Result<()> {
        let inner = &self.inner;
        self.trace_call("close", id);

        let running = {
            let state = inner.state.lock();
            state
                .sessions
                .get(&id)
                .ok_or(SessionError::InvalidId(id))?
                .task_running
        };
        if running > 0 {
            tracing::error!("session {} closed with {} task(s) running", id, running);
            thread::sleep(inner.config.settle_delay());
        }

        let mut state = inner.state.lock();
        let session = state.sessions.get(&id).ok_or(SessionError::InvalidId(id))?;
        session.wait.notify_all();
        let running = session.task_running;
        state.total_running = state.total_running.saturating_sub(running);

        if inner.secure_mode.swap(false, Ordering::AcqRel) {
            inner.secure_isr.store(false, Ordering::Release);
        }
        if state.secure_waiter == Some(id) {
            state.secure_waiter = None;
        }

        state.clear_session(id);
        state.sessions.remove(&id);
        tracing::debug!("session {} closed", id);
        Ok(())
    }

    fn trace_call(&self, call: &str, id: SessionId) {
        if self.inner.flags.contains(DebugFlags::IOCTL) {
            tracing::debug!("{} session {}", call, id);
        }
    }
}

impl ServiceInner {
    /// Recovery after a collect timeout
    fn collect_timeout(&self, state: &mut ServiceState, id: SessionId) -> ServiceError {
        let running = state
            .session_mut(id)
            .map(|s| std::mem::take(&mut s.task_running))
            .unwrap_or(0);
        tracing::error!("session {} collect timed out, {} task(s) running", id, running);

        if running > 0 {
            state.total_running = state.total_running.saturating_sub(running);
            self.raise_reset_request();
        }
        state.clear_session(id);
        Counters::bump(&self.counters.timeouts);
        self.try_set_reg(state);

        SessionError::Timeout { running }.into()
    }
}
