//! Hardware-variant strategies
//!
//! Power sequencing and clock policy differ per chip. Exactly one
//! [`HwOps`] implementation is selected at attach time by [`select_ops`].

use crate::info::{get_fmt_rkv_dec, hw_id, vpu_dec_fmt, DeviceKind, FormatType, TaskType};
use crate::platform::{set_div_rate, set_rate, IdleDomain, Platform};
use crate::regs::RegisterBank;
use serde::Serialize;
use std::sync::Arc;
use vc_core::error::HardwareError;

const MHZ: u64 = 1_000_000;

/// GRF register holding the VPU clock select bit on rk312x (byte offset)
const RK312X_GRF_SOC_CON1: usize = 0x144;
const BIT_VCODEC_CLK_SEL: u32 = 1 << 10;

/// Requested clock tier of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Frequency {
    Mhz200,
    Mhz266,
    Mhz300,
    Mhz400,
    Mhz500,
    Mhz600,
    /// Rates captured at attach time
    #[default]
    Default,
}

impl Frequency {
    /// Core clock rate for the tier, `None` for [`Frequency::Default`]
    pub fn hz(self) -> Option<u64> {
        match self {
            Self::Mhz200 => Some(200 * MHZ),
            Self::Mhz266 => Some(266 * MHZ),
            Self::Mhz300 => Some(300 * MHZ),
            Self::Mhz400 => Some(400 * MHZ),
            Self::Mhz500 => Some(500 * MHZ),
            Self::Mhz600 => Some(600 * MHZ),
            Self::Default => None,
        }
    }
}

/// Chip family the engine group is integrated in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Chip {
    #[default]
    Generic,
    Rk2928g,
    Rk312x,
    Rk322x,
    Rk322xh,
}

impl Chip {
    /// Widest decodable picture on this chip
    pub fn max_dec_pic_width(self) -> u32 {
        match self {
            Self::Rk2928g | Self::Rk312x | Self::Rk322x => 1920,
            Self::Generic | Self::Rk322xh => 4096,
        }
    }
}

/// Chip-specific power and clock operations
pub trait HwOps: Send + Sync {
    fn name(&self) -> &'static str;

    fn power_on(&self, platform: &Platform) -> Result<(), HardwareError> {
        platform.clocks.enable_all()
    }

    fn power_off(&self, platform: &Platform) -> Result<(), HardwareError> {
        platform.clocks.disable_all();
        Ok(())
    }

    /// Pick a clock tier from the content of a task's registers
    fn get_freq(&self, hw_id: u32, kind: TaskType, regs: &[u32]) -> Frequency {
        default_get_freq(hw_id, kind, regs)
    }

    /// Apply the tier requested by a task about to be submitted
    fn set_freq(
        &self,
        platform: &Platform,
        freq: Frequency,
        regs: &[u32],
    ) -> Result<(), HardwareError>;

    /// Lower clocks while the hardware is idle.
    ///
    /// Returns true when clocks were changed, which invalidates the
    /// last-applied tier.
    fn reduce_freq(&self, _platform: &Platform) -> Result<bool, HardwareError> {
        Ok(false)
    }

    /// Patch decoder registers right before the enable write
    fn config(&self, _dec: &RegisterBank) -> Result<(), HardwareError> {
        Ok(())
    }

    /// Fault status matching the prefetch over-read defect
    fn is_prefetch_fault(&self, _status: u32) -> bool {
        false
    }

    /// Idle domain to request on reset, `None` for the platform default
    fn idle_domain(&self) -> Option<IdleDomain> {
        None
    }
}

fn reg(regs: &[u32], index: usize) -> u32 {
    regs.get(index).copied().unwrap_or(0)
}

/// Raise clocks for large H.264, interlaced content, wide HEVC strides
/// and post-processing.
pub fn default_get_freq(hw: u32, kind: TaskType, regs: &[u32]) -> Frequency {
    let mut freq = Frequency::Default;

    if matches!(kind, TaskType::Dec | TaskType::DecPp) {
        if vpu_dec_fmt(regs) == Some(0) {
            let width = (reg(regs, 4) >> 23) * 16;
            if width > 2560 {
                freq = Frequency::Mhz600;
            }
        } else if reg(regs, 3) & (1 << 23) != 0 {
            freq = Frequency::Mhz400;
        }
    }
    if hw == hw_id::HEVC && reg(regs, 8) > 60000 {
        freq = Frequency::Mhz400;
    }
    if kind == TaskType::Pp {
        freq = Frequency::Mhz400;
    }
    freq
}

/// Plain clock enable/disable and aclk-only tiers
#[derive(Debug, Default)]
pub struct DefaultOps {
    idle: Option<IdleDomain>,
}

impl HwOps for DefaultOps {
    fn name(&self) -> &'static str {
        "default"
    }

    fn set_freq(
        &self,
        platform: &Platform,
        freq: Frequency,
        _regs: &[u32],
    ) -> Result<(), HardwareError> {
        match freq.hz() {
            Some(hz) => set_rate(&platform.clocks.aclk, hz),
            None => platform.clocks.restore_defaults(),
        }
    }

    fn idle_domain(&self) -> Option<IdleDomain> {
        self.idle
    }
}

/// Default ops after selecting the VPU clock source in the GRF
#[derive(Debug, Default)]
pub struct Rk312xOps;

impl HwOps for Rk312xOps {
    fn name(&self) -> &'static str {
        "rk312x"
    }

    fn power_on(&self, platform: &Platform) -> Result<(), HardwareError> {
        if let Some(grf) = &platform.grf {
            let index = RK312X_GRF_SOC_CON1 / 4;
            let raw = grf.read(index)?;
            grf.write(index, raw | BIT_VCODEC_CLK_SEL | (BIT_VCODEC_CLK_SEL << 16))?;
        }
        platform.clocks.enable_all()
    }

    fn set_freq(
        &self,
        platform: &Platform,
        freq: Frequency,
        regs: &[u32],
    ) -> Result<(), HardwareError> {
        DefaultOps::default().set_freq(platform, freq, regs)
    }
}

/// No power domain: clocks are divided down instead of gated
#[derive(Debug, Default)]
pub struct Rk322xOps;

impl HwOps for Rk322xOps {
    fn name(&self) -> &'static str {
        "rk322x"
    }

    fn power_on(&self, platform: &Platform) -> Result<(), HardwareError> {
        platform.clocks.enable_all()?;
        let aclk = if platform.device == DeviceKind::Rkvdec {
            500 * MHZ
        } else {
            300 * MHZ
        };
        set_rate(&platform.clocks.aclk, aclk)?;
        set_rate(&platform.clocks.core, 300 * MHZ)?;
        set_rate(&platform.clocks.cabac, 300 * MHZ)
    }

    fn power_off(&self, platform: &Platform) -> Result<(), HardwareError> {
        set_div_rate(&platform.clocks.aclk, 32)?;
        set_div_rate(&platform.clocks.core, 32)?;
        set_div_rate(&platform.clocks.cabac, 32)
    }

    fn get_freq(&self, _hw_id: u32, _kind: TaskType, _regs: &[u32]) -> Frequency {
        Frequency::Default
    }

    fn set_freq(
        &self,
        platform: &Platform,
        _freq: Frequency,
        _regs: &[u32],
    ) -> Result<(), HardwareError> {
        let clocks = &platform.clocks;
        if platform.device == DeviceKind::Rkvdec {
            set_rate(&clocks.core, 300 * MHZ)?;
            set_rate(&clocks.cabac, 300 * MHZ)?;
            set_rate(&clocks.aclk, 500 * MHZ)
        } else {
            set_rate(&clocks.aclk, 300 * MHZ)
        }
    }

    fn reduce_freq(&self, platform: &Platform) -> Result<bool, HardwareError> {
        if platform.clocks.aclk.is_none() {
            return Ok(false);
        }
        set_div_rate(&platform.clocks.aclk, 32)?;
        Ok(true)
    }
}

/// rkvdec on rk322xh: three-clock rates, register fixups and the
/// colocated-MV prefetch defect.
#[derive(Debug, Default)]
pub struct Rk322xhRkvdecOps;

/// Register holding the decoder power-save optimisation bit
const RKVDEC_PSAVE_REG: usize = 99;
const RKVDEC_PSAVE_BIT: u32 = 1 << 12;

/// Fault status bus id of the colocated-MV prefetch unit
const PREFETCH_BUS_ID: u32 = 2;

impl Rk322xhRkvdecOps {
    /// Set all three decoder clocks, raising the bus clock first when the
    /// core clock goes up.
    fn set_clocks(
        platform: &Platform,
        aclk: u64,
        core: u64,
        cabac: u64,
    ) -> Result<(), HardwareError> {
        let clocks = &platform.clocks;
        let current = clocks.core.as_ref().map_or(0, |c| c.rate());
        if core > current {
            set_rate(&clocks.aclk, aclk)?;
            set_rate(&clocks.core, core)?;
            set_rate(&clocks.cabac, cabac)
        } else {
            set_rate(&clocks.core, core)?;
            set_rate(&clocks.cabac, cabac)?;
            set_rate(&clocks.aclk, aclk)
        }
    }
}

impl HwOps for Rk322xhRkvdecOps {
    fn name(&self) -> &'static str {
        "rk322xh-rkvdec"
    }

    fn power_on(&self, platform: &Platform) -> Result<(), HardwareError> {
        Self::set_clocks(platform, 500 * MHZ, 250 * MHZ, 400 * MHZ)?;
        platform.clocks.enable_all()
    }

    fn power_off(&self, platform: &Platform) -> Result<(), HardwareError> {
        platform.clocks.disable_all();
        Self::set_clocks(platform, 50 * MHZ, 50 * MHZ, 50 * MHZ)
    }

    fn set_freq(
        &self,
        platform: &Platform,
        _freq: Frequency,
        regs: &[u32],
    ) -> Result<(), HardwareError> {
        if platform.device != DeviceKind::Rkvdec {
            return Ok(());
        }
        let core = if reg(regs, 1) & 0x0080_0000 != 0 {
            250 * MHZ
        } else {
            300 * MHZ
        };
        let aclk = if get_fmt_rkv_dec(regs) == Some(FormatType::H264D) {
            400 * MHZ
        } else {
            500 * MHZ
        };
        Self::set_clocks(platform, aclk, core, 400 * MHZ)
    }

    fn reduce_freq(&self, platform: &Platform) -> Result<bool, HardwareError> {
        Self::set_clocks(platform, 100 * MHZ, 100 * MHZ, 100 * MHZ)?;
        Ok(true)
    }

    fn config(&self, dec: &RegisterBank) -> Result<(), HardwareError> {
        let cfg = dec.read(RKVDEC_PSAVE_REG)?;
        dec.write(RKVDEC_PSAVE_REG, cfg & !RKVDEC_PSAVE_BIT)
    }

    fn is_prefetch_fault(&self, status: u32) -> bool {
        (status >> 6) & 0x1f == PREFETCH_BUS_ID
    }

    fn idle_domain(&self) -> Option<IdleDomain> {
        Some(IdleDomain::Video)
    }
}

/// Fixed 400 MHz bus clock whenever the tier changes
#[derive(Debug, Default)]
pub struct Rk2928gOps;

impl HwOps for Rk2928gOps {
    fn name(&self) -> &'static str {
        "rk2928g"
    }

    fn get_freq(&self, _hw_id: u32, _kind: TaskType, _regs: &[u32]) -> Frequency {
        Frequency::Default
    }

    fn set_freq(
        &self,
        platform: &Platform,
        _freq: Frequency,
        _regs: &[u32],
    ) -> Result<(), HardwareError> {
        set_rate(&platform.clocks.aclk, 400 * MHZ)
    }
}

/// Select the strategy for an engine group
pub fn select_ops(chip: Chip, device: DeviceKind) -> Arc<dyn HwOps> {
    let ops: Arc<dyn HwOps> = match (chip, device) {
        (Chip::Rk322xh, DeviceKind::Rkvdec) => Arc::new(Rk322xhRkvdecOps),
        (Chip::Rk322xh, _) => Arc::new(DefaultOps {
            idle: Some(IdleDomain::Vpu),
        }),
        (Chip::Rk322x, _) => Arc::new(Rk322xOps),
        (Chip::Rk2928g, _) => Arc::new(Rk2928gOps),
        (Chip::Rk312x, _) => Arc::new(Rk312xOps),
        (Chip::Generic, _) => Arc::new(DefaultOps::default()),
    };
    tracing::debug!("hardware ops {} for {:?}/{:?}", ops.name(), chip, device);
    ops
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::Clock;
    use crate::sim::SimPlatform;

    fn h264_regs(width: u32) -> Vec<u32> {
        let mut regs = vec![0u32; 101];
        regs[4] = (width / 16) << 23;
        regs
    }

    #[test]
    fn test_default_get_freq() {
        let hw = hw_id::VPU_8270;
        assert_eq!(
            default_get_freq(hw, TaskType::Dec, &h264_regs(3840)),
            Frequency::Mhz600
        );
        assert_eq!(
            default_get_freq(hw, TaskType::Dec, &h264_regs(1920)),
            Frequency::Default
        );

        let mut interlaced = vec![0u32; 101];
        interlaced[3] = (5 << 28) | (1 << 23);
        assert_eq!(
            default_get_freq(hw, TaskType::DecPp, &interlaced),
            Frequency::Mhz400
        );
        assert_eq!(default_get_freq(hw, TaskType::Pp, &[]), Frequency::Mhz400);
        assert_eq!(default_get_freq(hw, TaskType::Enc, &[]), Frequency::Default);

        let mut hevc = vec![0u32; 68];
        hevc[3] = 1 << 28;
        hevc[8] = 70000;
        assert_eq!(
            default_get_freq(hw_id::HEVC, TaskType::Dec, &hevc),
            Frequency::Mhz400
        );
    }

    #[test]
    fn test_default_set_freq() {
        let sim = SimPlatform::new(DeviceKind::Vpu);
        let platform = sim.platform();
        let ops = select_ops(Chip::Generic, DeviceKind::Vpu);

        ops.set_freq(&platform, Frequency::Mhz600, &[]).unwrap();
        assert_eq!(sim.aclk.rate(), 600 * MHZ);
        ops.set_freq(&platform, Frequency::Default, &[]).unwrap();
        assert_eq!(sim.aclk.rate(), sim.aclk.default_rate());
    }

    #[test]
    fn test_rk322xh_clock_order() {
        let sim = SimPlatform::new(DeviceKind::Rkvdec);
        let platform = sim.platform();
        let ops = select_ops(Chip::Rk322xh, DeviceKind::Rkvdec);

        ops.power_on(&platform).unwrap();
        assert_eq!(sim.core.rate(), 250 * MHZ);
        sim.log.clear();

        // H.264 without the low-core flag raises core to 300 MHz: aclk first
        let mut regs = vec![0u32; 78];
        regs[2] = 1 << 20;
        ops.set_freq(&platform, Frequency::Default, &regs).unwrap();
        let rates = sim.log.matching("rate");
        assert!(rates[0].starts_with("rate aclk"));
        assert_eq!(sim.aclk.rate(), 400 * MHZ);
        assert_eq!(sim.core.rate(), 300 * MHZ);

        // Idle reduce lowers core: core first, aclk last
        sim.log.clear();
        assert!(ops.reduce_freq(&platform).unwrap());
        let rates = sim.log.matching("rate");
        assert!(rates[0].starts_with("rate core"));
        assert!(rates[2].starts_with("rate aclk"));
        assert_eq!(sim.cabac.rate(), 100 * MHZ);
    }

    #[test]
    fn test_rk322xh_config_clears_power_save() {
        let sim = SimPlatform::new(DeviceKind::Rkvdec);
        let window = sim.window(0x80);
        window.poke(RKVDEC_PSAVE_REG, 0xFFFF_FFFF);
        let bank = RegisterBank::new(window.clone(), 0);

        select_ops(Chip::Rk322xh, DeviceKind::Rkvdec)
            .config(&bank)
            .unwrap();
        assert_eq!(window.peek(RKVDEC_PSAVE_REG), !RKVDEC_PSAVE_BIT);
    }

    #[test]
    fn test_prefetch_predicate() {
        let ops = select_ops(Chip::Rk322xh, DeviceKind::Rkvdec);
        assert!(ops.is_prefetch_fault(2 << 6));
        assert!(!ops.is_prefetch_fault(3 << 6));
        assert!(!select_ops(Chip::Generic, DeviceKind::Rkvdec).is_prefetch_fault(2 << 6));
        assert_eq!(
            select_ops(Chip::Rk322xh, DeviceKind::Combo).idle_domain(),
            Some(IdleDomain::Vpu)
        );
    }

    #[test]
    fn test_rk312x_clock_select() {
        let sim = SimPlatform::new(DeviceKind::Vpu);
        let platform = sim.platform();
        select_ops(Chip::Rk312x, DeviceKind::Vpu)
            .power_on(&platform)
            .unwrap();
        assert_eq!(
            sim.grf.peek(RK312X_GRF_SOC_CON1 / 4),
            BIT_VCODEC_CLK_SEL | (BIT_VCODEC_CLK_SEL << 16)
        );
        assert!(sim.aclk.is_enabled());
    }

    #[test]
    fn test_rk322x_power_off_divides() {
        let sim = SimPlatform::new(DeviceKind::Vpu);
        let platform = sim.platform();
        let ops = select_ops(Chip::Rk322x, DeviceKind::Vpu);
        ops.power_on(&platform).unwrap();
        assert_eq!(sim.aclk.rate(), 300 * MHZ);

        ops.power_off(&platform).unwrap();
        assert_eq!(sim.aclk.rate(), sim.aclk.parent_rate() / 32 + 1);
        // Clocks stay enabled on this chip
        assert!(sim.aclk.is_enabled());
    }
}
