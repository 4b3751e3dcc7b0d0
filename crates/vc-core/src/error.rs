//! Error types for the vcodec service

use thiserror::Error;

/// Main error type for the service
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Hardware error: {0}")]
    Hardware(#[from] HardwareError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),
}

/// Buffer import and address translation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    #[error("Out of memory")]
    OutOfMemory,

    #[error("Invalid buffer handle {handle} in reg[{reg}]")]
    InvalidHandle { handle: u32, reg: usize },

    #[error("Mapping buffer handle {0} failed")]
    MapFailed(u32),

    #[error("Register index {index} outside blob of {len} words")]
    RegisterOutOfRange { index: usize, len: usize },

    #[error("Access of {len} bytes at offset 0x{offset:x} exceeds buffer {handle}")]
    BufferOverrun { handle: u32, offset: usize, len: usize },

    #[error("Unsupported register format for task type {0}")]
    UnsupportedFormat(u32),

    #[error("IOMMU error: {0}")]
    Iommu(String),
}

/// Client session errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Invalid session ID: {0}")]
    InvalidId(u32),

    #[error("Client type not set")]
    ClientTypeUnset,

    #[error("Unsupported client type: {0}")]
    UnsupportedClientType(u32),

    #[error("Register blob of {got} bytes is malformed (need a multiple of 4, at most {max})")]
    MalformedBlob { got: usize, max: usize },

    #[error("Timeout waiting for {running} running task(s)")]
    Timeout { running: usize },

    #[error("Session closed")]
    Closed,
}

/// Hardware description and collaborator errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HardwareError {
    #[error("Unknown hardware id 0x{0:04x}")]
    UnknownHwId(u32),

    #[error("Register index {index} outside window of {len} words")]
    RegisterOutOfWindow { index: usize, len: usize },

    #[error("No mode-control resource, cannot switch decoder")]
    NoModeControl,

    #[error("Invalid sub-device: {0}")]
    InvalidSubDevice(usize),

    #[error("Idle request denied: {0}")]
    IdleRequestDenied(String),

    #[error("Clock error: {0}")]
    Clock(String),
}

/// Result type alias for service operations
pub type Result<T> = std::result::Result<T, ServiceError>;

impl ServiceError {
    /// True for errors caused by the client's input, as opposed to the
    /// hardware or the host.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Memory(MemoryError::InvalidHandle { .. })
                | Self::Memory(MemoryError::RegisterOutOfRange { .. })
                | Self::Memory(MemoryError::UnsupportedFormat(_))
                | Self::Session(SessionError::MalformedBlob { .. })
                | Self::Session(SessionError::ClientTypeUnset)
                | Self::Session(SessionError::UnsupportedClientType(_))
        )
    }

    /// True for a collect() liveness timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Session(SessionError::Timeout { .. }))
    }
}
