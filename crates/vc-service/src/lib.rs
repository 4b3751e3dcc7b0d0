//! Scheduler for shared video codec engines
//!
//! Clients open sessions, declare an engine type and submit register blobs.
//! The service translates buffer references, queues the task, admits it to
//! hardware when the engine resources it needs are free, retires it from
//! the interrupt path and hands the result registers back on collect.
//!
//! ```text
//!  client ──submit──► waiting ──admit──► running ──irq──► done ──collect──► client
//!                        ▲                  │
//!                        └── try_set_reg ◄──┘ (after every submit and completion)
//! ```
//!
//! All queue, slot, mode and power state lives behind one lock in
//! [`ServiceState`]. Interrupt status is read and acknowledged without the
//! lock; retirement happens on a dispatcher thread that takes it.

pub mod control;
pub mod hw;
pub mod irq;
pub mod mode;
pub mod power;
pub mod reset;
pub mod scheduler;
pub mod service;
pub mod session;
pub mod sim;
pub mod subdev;
pub mod task;

pub use irq::IrqLine;
pub use scheduler::{can_admit, decide, Admission};
pub use service::{ServiceBuilder, ServiceState, ServiceStats, Slots, VcodecService};
pub use session::{Session, SessionId};
pub use subdev::{SubDevice, SubDeviceDesc, SubDeviceId};
pub use task::{RegisterTask, TaskId};
