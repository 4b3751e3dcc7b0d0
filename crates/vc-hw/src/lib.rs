//! Hardware layer for the vcodec service
//!
//! Describes the supported codec engines (register file geometry, control
//! register positions and per-format translation tables), abstracts the
//! memory-mapped register windows, and defines the platform collaborators
//! (clocks, reset lines, idle controller, secure monitor, wake lock) the
//! scheduler drives. Every collaborator has a simulated implementation in
//! [`sim`].

pub mod caps;
pub mod info;
pub mod platform;
pub mod regs;
pub mod sim;
pub mod variant;

pub use caps::{Capabilities, DecConfig, EncConfig, HwCapabilities};
pub use info::{
    hw_id, DeviceKind, FormatType, HwInfo, RunningMode, TaskInfo, TaskType, VcodecInfo,
};
pub use platform::{
    Clock, ClockSet, IdleController, IdleDomain, Platform, ResetLine, ResetLines, SecureMonitor,
    WakeLock,
};
pub use regs::{ModeSelect, RegisterBank, RegisterWindow};
pub use variant::{select_ops, Chip, Frequency, HwOps};
