//! Configuration system for the vcodec service

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Config {
    pub service: ServiceConfig,
    pub debug: DebugConfig,
}

/// Scheduler timing and policy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Override for automatic frequency scaling. `None` keeps the
    /// hardware default (on for VPU and RKVDEC, off for HEVC).
    pub auto_freq: Option<bool>,
    /// Delay before the engine group is powered off after going idle
    pub power_off_delay_ms: u64,
    /// Minimum spacing between two re-arms of the power-off delay
    pub power_rearm_interval_ms: u64,
    /// Bound on a blocking collect()
    pub collect_timeout_ms: u64,
    /// Best-effort settle delay when powering off or closing with tasks in flight
    pub settle_delay_ms: u64,
    /// Pulse width between reset assert and deassert
    pub reset_pulse_us: u64,
    /// Largest decodable picture width reported in the capability descriptor
    pub max_dec_pic_width: u32,
}

/// Debug settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub log_level: LogLevel,
    pub log_to_file: bool,
    pub log_path: PathBuf,
    /// Raw `DebugFlags` mask
    pub debug_mask: u32,
}

/// Logging level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`
    pub fn as_filter(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

bitflags! {
    /// Verbose diagnostic categories
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DebugFlags: u32 {
        const POWER         = 0x0000_0001;
        const CLOCK         = 0x0000_0002;
        const IRQ_STATUS    = 0x0000_0004;
        const IOMMU         = 0x0000_0008;
        const IOCTL         = 0x0000_0010;
        const EXTRA_INFO    = 0x0000_0080;
        const TIMING        = 0x0000_0100;
        const TASK_INFO     = 0x0000_0200;
        /// Dump the whole register window when hardware reports an error
        const DUMP_ERR_REG  = 0x0000_0400;
        const SET_REG       = 0x0000_1000;
        const GET_REG       = 0x0000_2000;
        const PPS_FILL      = 0x0000_4000;
        const IRQ_CHECK     = 0x0000_8000;
        /// Program 32-byte instead of 64-byte cache lines on rkvdec
        const CACHE_32B     = 0x0001_0000;
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            auto_freq: None,
            power_off_delay_ms: 4000,
            power_rearm_interval_ms: 1000,
            collect_timeout_ms: 2000,
            settle_delay_ms: 50,
            reset_pulse_us: 2,
            max_dec_pic_width: 4096,
        }
    }
}

impl ServiceConfig {
    pub fn power_off_delay(&self) -> Duration {
        Duration::from_millis(self.power_off_delay_ms)
    }

    pub fn power_rearm_interval(&self) -> Duration {
        Duration::from_millis(self.power_rearm_interval_ms)
    }

    pub fn collect_timeout(&self) -> Duration {
        Duration::from_millis(self.collect_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn reset_pulse(&self) -> Duration {
        Duration::from_micros(self.reset_pulse_us)
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            log_to_file: false,
            log_path: PathBuf::from("vcodec-service.log"),
            debug_mask: 0,
        }
    }
}

impl DebugConfig {
    pub fn flags(&self) -> DebugFlags {
        DebugFlags::from_bits_truncate(self.debug_mask)
    }
}

impl Config {
    /// Load configuration from the default location, or create it
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, writing defaults there if it does not exist
    pub fn load_from(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            let config = Self::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the path to the configuration file
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vcodec-service")
            .join("config.toml")
    }
}
