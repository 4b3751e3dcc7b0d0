//! Core types for the vcodec service
//!
//! This crate provides the foundational error types, configuration,
//! and logging infrastructure shared by the scheduler crates.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{Config, DebugConfig, DebugFlags, LogLevel, ServiceConfig};
pub use error::{HardwareError, MemoryError, Result, ServiceError, SessionError};
