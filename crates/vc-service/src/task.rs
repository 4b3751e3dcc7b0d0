//! Register tasks
//!
//! A task is built outside the scheduler lock: the blob is copied into a
//! register buffer sized for the engine, buffer references are translated
//! (pinning every buffer the task touches), the optional extra info block
//! is applied and a frequency tier is picked. Dropping a task releases its
//! pins.

use crate::session::SessionId;
use crate::subdev::{SubDevice, SubDeviceId};
use std::time::Instant;
use vc_core::error::{MemoryError, SessionError};
use vc_core::{DebugFlags, Result};
use vc_hw::{Frequency, HwOps, TaskType};
use vc_memory::{ExtraInfo, MemoryRegion};

/// Task identifier, unique over the service lifetime
pub type TaskId = u64;

/// Where a task currently sits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Waiting,
    Running,
    Done,
}

/// One submitted register blob
#[derive(Debug)]
pub struct RegisterTask {
    pub id: TaskId,
    pub session: SessionId,
    pub subdev: SubDeviceId,
    pub kind: TaskType,
    pub status: TaskStatus,
    /// Register words, `reg_size` of the engine
    pub regs: Vec<u32>,
    /// Bytes of register data the client supplied
    pub size: usize,
    pub freq: Frequency,
    /// Device address the decoded-length register was translated to
    pub dec_base: Option<u32>,
    pub regions: Vec<MemoryRegion>,
    pub submitted: Instant,
    pub started: Option<Instant>,
}

/// Largest blob accepted for an engine with `reg_size` register words
pub fn max_blob_len(reg_size: usize) -> usize {
    reg_size * 4 + std::mem::size_of::<ExtraInfo>()
}

impl RegisterTask {
    /// Build a task from a client blob.
    ///
    /// Fails on a malformed blob, a format the engine has no table for, or
    /// any buffer reference that cannot be resolved; no buffer stays pinned
    /// on failure.
    #[allow(clippy::too_many_arguments)]
    pub fn prepare(
        id: TaskId,
        session: SessionId,
        subdev: &SubDevice,
        kind: TaskType,
        blob: &[u8],
        auto_freq: bool,
        ops: &dyn HwOps,
        flags: DebugFlags,
    ) -> Result<Self> {
        let info = subdev.info;
        let reg_size = info.hw.reg_size();
        let max = max_blob_len(reg_size);
        if blob.is_empty() || blob.len() % 4 != 0 || blob.len() > max {
            return Err(SessionError::MalformedBlob {
                got: blob.len(),
                max,
            }
            .into());
        }

        let task_info = info
            .task(kind)
            .ok_or(SessionError::UnsupportedClientType(kind as u32))?;

        let size = blob.len().min(reg_size * 4);
        let mut regs = vec![0u32; reg_size];
        for (word, chunk) in regs.iter_mut().zip(blob[..size].chunks_exact(4)) {
            *word = bytemuck::pod_read_unaligned(chunk);
        }

        let format = (task_info.get_fmt)(&regs)
            .ok_or(MemoryError::UnsupportedFormat(kind as u32))?;
        let spec = info
            .translate_spec(task_info, format)
            .ok_or(MemoryError::UnsupportedFormat(kind as u32))?;

        let translation = subdev.translator.translate(&mut regs, &spec)?;

        if blob.len() > size {
            if let Some(extra) = ExtraInfo::parse(&blob[size..]) {
                if flags.contains(DebugFlags::EXTRA_INFO) {
                    tracing::debug!("task {} extra info {:?}", id, extra.entries());
                }
                extra.apply(&mut regs)?;
            }
        }

        let freq = if auto_freq {
            ops.get_freq(info.hw_id, kind, &regs)
        } else {
            Frequency::Default
        };

        if flags.contains(DebugFlags::TASK_INFO) {
            tracing::debug!(
                "task {}: {:?} {:?} on {}, {} regions, freq {:?}",
                id,
                kind,
                format,
                subdev.name,
                translation.regions.len(),
                freq
            );
        }

        Ok(Self {
            id,
            session,
            subdev: subdev.id,
            kind,
            status: TaskStatus::Waiting,
            regs,
            size,
            freq,
            dec_base: translation.dec_base,
            regions: translation.regions,
            submitted: Instant::now(),
            started: None,
        })
    }

    /// Result words handed back on collect, starting at the type's return
    /// base. Words past the register file read as zero.
    pub fn result(&self, return_base: usize) -> Vec<u32> {
        let words = self.size / 4;
        (0..words)
            .map(|i| self.regs.get(return_base + i).copied().unwrap_or(0))
            .collect()
    }

    /// Region containing device address `addr`
    pub fn region_at(&self, addr: u32) -> Option<&MemoryRegion> {
        self.regions.iter().find(|r| r.contains(addr))
    }
}
