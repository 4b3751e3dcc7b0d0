//! Platform collaborators driven by the scheduler
//!
//! Clocks, reset lines, the bus idle controller, the secure monitor and the
//! suspend blocker belong to the surrounding platform. The scheduler only
//! sees these traits.

use crate::info::DeviceKind;
use crate::regs::RegisterWindow;
use std::sync::Arc;
use vc_core::error::HardwareError;

/// One clock of the engine group
pub trait Clock: Send + Sync {
    fn name(&self) -> &str;

    fn enable(&self) -> Result<(), HardwareError>;

    fn disable(&self);

    fn rate(&self) -> u64;

    fn set_rate(&self, hz: u64) -> Result<(), HardwareError>;

    /// Rate of the parent clock
    fn parent_rate(&self) -> u64;
}

/// The engine group's clocks. Missing clocks are skipped.
#[derive(Clone, Default)]
pub struct ClockSet {
    pub aclk: Option<Arc<dyn Clock>>,
    pub hclk: Option<Arc<dyn Clock>>,
    pub core: Option<Arc<dyn Clock>>,
    pub cabac: Option<Arc<dyn Clock>>,
    pub pd_video: Option<Arc<dyn Clock>>,
    default_rates: DefaultRates,
}

#[derive(Debug, Clone, Copy, Default)]
struct DefaultRates {
    aclk: u64,
    core: u64,
    cabac: u64,
}

impl ClockSet {
    /// Bundle clocks and remember their current rates as defaults
    pub fn new(
        aclk: Option<Arc<dyn Clock>>,
        hclk: Option<Arc<dyn Clock>>,
        core: Option<Arc<dyn Clock>>,
        cabac: Option<Arc<dyn Clock>>,
        pd_video: Option<Arc<dyn Clock>>,
    ) -> Self {
        let rate = |clk: &Option<Arc<dyn Clock>>| clk.as_ref().map_or(0, |c| c.rate());
        let default_rates = DefaultRates {
            aclk: rate(&aclk),
            core: rate(&core),
            cabac: rate(&cabac),
        };
        Self {
            aclk,
            hclk,
            core,
            cabac,
            pd_video,
            default_rates,
        }
    }

    /// Enable every present clock, domain last
    pub fn enable_all(&self) -> Result<(), HardwareError> {
        for clk in [&self.aclk, &self.hclk, &self.core, &self.cabac, &self.pd_video]
            .into_iter()
            .flatten()
        {
            clk.enable()?;
        }
        Ok(())
    }

    /// Disable every present clock, domain first
    pub fn disable_all(&self) {
        for clk in [&self.pd_video, &self.hclk, &self.aclk, &self.core, &self.cabac]
            .into_iter()
            .flatten()
        {
            clk.disable();
        }
    }

    /// Restore the rates captured at attach time
    pub fn restore_defaults(&self) -> Result<(), HardwareError> {
        set_rate(&self.aclk, self.default_rates.aclk)?;
        set_rate(&self.core, self.default_rates.core)?;
        set_rate(&self.cabac, self.default_rates.cabac)
    }
}

/// Set `hz` on `clk` if present and the rate is meaningful
pub fn set_rate(clk: &Option<Arc<dyn Clock>>, hz: u64) -> Result<(), HardwareError> {
    match clk {
        Some(clk) if hz != 0 => {
            tracing::debug!("clock {} -> {} Hz", clk.name(), hz);
            clk.set_rate(hz)
        }
        _ => Ok(()),
    }
}

/// Lower `clk` to its parent rate divided by `divide`
pub fn set_div_rate(clk: &Option<Arc<dyn Clock>>, divide: u64) -> Result<(), HardwareError> {
    match clk {
        Some(c) => set_rate(clk, c.parent_rate() / divide + 1),
        None => Ok(()),
    }
}

/// One reset line
pub trait ResetLine: Send + Sync {
    fn assert(&self);
    fn deassert(&self);
}

/// Reset lines of the engine group. Missing lines are skipped.
#[derive(Clone, Default)]
pub struct ResetLines {
    pub a: Option<Arc<dyn ResetLine>>,
    pub h: Option<Arc<dyn ResetLine>>,
    pub niu_a: Option<Arc<dyn ResetLine>>,
    pub niu_h: Option<Arc<dyn ResetLine>>,
    pub core: Option<Arc<dyn ResetLine>>,
    pub cabac: Option<Arc<dyn ResetLine>>,
}

impl ResetLines {
    /// The primary bus resets gate the whole hardware reset sequence
    pub fn can_reset(&self) -> bool {
        self.a.is_some() && self.h.is_some()
    }

    /// Bus interface resets first, then bus, then functional blocks
    pub fn assert_all(&self) {
        for line in [&self.niu_a, &self.niu_h, &self.a, &self.h, &self.core, &self.cabac]
            .into_iter()
            .flatten()
        {
            line.assert();
        }
    }

    pub fn deassert_all(&self) {
        for line in [&self.niu_h, &self.niu_a, &self.a, &self.h, &self.core, &self.cabac]
            .into_iter()
            .flatten()
        {
            line.deassert();
        }
    }
}

/// Bus idle domain of the engine group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleDomain {
    Video,
    Hevc,
    Vpu,
}

/// Power management unit granting temporary bus idle
pub trait IdleController: Send + Sync {
    fn set_idle(&self, domain: IdleDomain, idle: bool) -> Result<(), HardwareError>;
}

/// Vendor secure world, used when bus idle cannot be granted
pub trait SecureMonitor: Send + Sync {
    fn reset_codec(&self);
}

/// System suspend blocker
pub trait WakeLock: Send + Sync {
    fn acquire(&self);
    fn release(&self);
}

/// Everything the scheduler needs from the platform
#[derive(Clone)]
pub struct Platform {
    pub device: DeviceKind,
    pub clocks: ClockSet,
    pub resets: ResetLines,
    pub idle: Option<Arc<dyn IdleController>>,
    pub secure: Option<Arc<dyn SecureMonitor>>,
    pub wake_lock: Arc<dyn WakeLock>,
    /// General register file holding mode-select and clock-select bits
    pub grf: Option<Arc<dyn RegisterWindow>>,
    /// Physical address of a scratch page for the prefetch fault workaround
    pub prefetch_page: Option<u64>,
}

impl Platform {
    /// Idle domain used when none is forced by the hardware variant
    pub fn default_idle_domain(&self) -> IdleDomain {
        if self.device == DeviceKind::Hevc {
            IdleDomain::Hevc
        } else {
            IdleDomain::Video
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{EventLog, SimClock, SimResetLine};

    #[test]
    fn test_reset_order() {
        let log = EventLog::new();
        let line = |name| -> Option<Arc<dyn ResetLine>> {
            Some(Arc::new(SimResetLine::new(name, log.clone())))
        };
        let resets = ResetLines {
            a: line("a"),
            h: line("h"),
            niu_a: line("niu_a"),
            niu_h: line("niu_h"),
            core: None,
            cabac: line("cabac"),
        };

        resets.assert_all();
        resets.deassert_all();
        assert_eq!(
            log.events(),
            vec![
                "assert niu_a",
                "assert niu_h",
                "assert a",
                "assert h",
                "assert cabac",
                "deassert niu_h",
                "deassert niu_a",
                "deassert a",
                "deassert h",
                "deassert cabac",
            ]
        );
    }

    #[test]
    fn test_restore_default_rates() {
        let log = EventLog::new();
        let aclk = Arc::new(SimClock::new("aclk", 300_000_000, log.clone()));
        let clocks = ClockSet::new(Some(aclk.clone() as Arc<dyn Clock>), None, None, None, None);

        aclk.set_rate(600_000_000).unwrap();
        clocks.restore_defaults().unwrap();
        assert_eq!(aclk.rate(), 300_000_000);
    }

    #[test]
    fn test_div_rate() {
        let log = EventLog::new();
        let aclk: Arc<dyn Clock> = Arc::new(SimClock::new("aclk", 300_000_000, log));
        let parent = aclk.parent_rate();
        set_div_rate(&Some(aclk.clone()), 32).unwrap();
        assert_eq!(aclk.rate(), parent / 32 + 1);
    }
}
