//! Hardware capability descriptor
//!
//! Computed once at attach time and handed back verbatim to clients.

use crate::info::RunningMode;
use crate::regs::RegisterBank;
use bytemuck::{Pod, Zeroable};
use serde::Serialize;
use vc_core::error::HardwareError;

/// Encoder configuration register, relative to the encoder bank
const ENC_CONFIG_REG: usize = 63;

/// Decoder support matrix
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable, Serialize)]
pub struct DecConfig {
    pub max_dec_pic_width: u32,
    pub max_pp_out_pic_width: u32,
    pub h264_support: u32,
    pub jpeg_support: u32,
    pub mpeg4_support: u32,
    pub custom_mpeg4_support: u32,
    pub vc1_support: u32,
    pub mpeg2_support: u32,
    pub pp_support: u32,
    pub pp_config: u32,
    pub sorenson_support: u32,
    pub ref_buf_support: u32,
    pub vp6_support: u32,
    pub vp7_support: u32,
    pub vp8_support: u32,
    pub avs_support: u32,
    pub jpeg_ext_support: u32,
    pub reserve: u32,
    pub mvc_support: u32,
}

/// Encoder feature set
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable, Serialize)]
pub struct EncConfig {
    pub max_encoded_width: u32,
    pub h264_enabled: u32,
    pub mpeg4_enabled: u32,
    pub jpeg_enabled: u32,
    pub vs_enabled: u32,
    pub rgb_enabled: u32,
    pub reg_size: u32,
    pub reserv: [u32; 2],
}

impl EncConfig {
    /// Decode the encoder configuration register
    pub fn from_config_reg(config: u32, reg_size: usize) -> Self {
        Self {
            max_encoded_width: config & ((1 << 11) - 1),
            h264_enabled: 1,
            mpeg4_enabled: (config >> 26) & 1,
            jpeg_enabled: 1,
            vs_enabled: (config >> 24) & 1,
            rgb_enabled: (config >> 28) & 1,
            reg_size: reg_size as u32,
            reserv: [0; 2],
        }
    }
}

/// Descriptor returned for one session type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Capabilities {
    Decoder(DecConfig),
    Encoder(EncConfig),
}

impl Capabilities {
    /// Raw descriptor bytes
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Decoder(dec) => bytemuck::bytes_of(dec),
            Self::Encoder(enc) => bytemuck::bytes_of(enc),
        }
    }
}

/// Probed capabilities of an engine group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HwCapabilities {
    pub dec: DecConfig,
    pub enc: EncConfig,
    /// Whether the scheduler adjusts clocks per task by default
    pub auto_freq: bool,
}

impl HwCapabilities {
    /// Probe capabilities of a sub-device running as `mode`.
    ///
    /// `enc` is the encoder bank, if the hardware has one.
    pub fn probe(
        mode: RunningMode,
        max_dec_pic_width: u32,
        enc: Option<&RegisterBank>,
        reg_size: usize,
    ) -> Result<Self, HardwareError> {
        let mut caps = Self {
            dec: DecConfig {
                max_dec_pic_width,
                ..DecConfig::default()
            },
            ..Self::default()
        };

        match mode {
            RunningMode::Vpu => {
                caps.dec = DecConfig {
                    max_dec_pic_width,
                    h264_support: 3,
                    jpeg_support: 1,
                    mpeg4_support: 2,
                    custom_mpeg4_support: 1,
                    vc1_support: 3,
                    mpeg2_support: 1,
                    pp_support: 1,
                    sorenson_support: 1,
                    ref_buf_support: 3,
                    vp6_support: 1,
                    vp7_support: 1,
                    vp8_support: 1,
                    avs_support: 1,
                    mvc_support: 1,
                    ..DecConfig::default()
                };
                if let Some(enc) = enc.filter(|bank| !bank.is_empty()) {
                    let config = enc.read(ENC_CONFIG_REG)?;
                    caps.enc = EncConfig::from_config_reg(config, reg_size);
                }
                caps.auto_freq = true;
            }
            RunningMode::Rkvdec => caps.auto_freq = true,
            RunningMode::Hevc | RunningMode::None => caps.auto_freq = false,
        }

        tracing::debug!(
            "capabilities for {:?}: max width {}, auto freq {}",
            mode,
            caps.dec.max_dec_pic_width,
            caps.auto_freq
        );
        Ok(caps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimRegisterFile;
    use std::sync::Arc;

    #[test]
    fn test_vpu_probe_reads_encoder_config() {
        let window = Arc::new(SimRegisterFile::new(0x400));
        window.poke(ENC_CONFIG_REG, (1 << 28) | (1 << 24) | 1920);
        let bank = RegisterBank::new(window, 0);

        let caps = HwCapabilities::probe(RunningMode::Vpu, 4096, Some(&bank), 164).unwrap();
        assert!(caps.auto_freq);
        assert_eq!(caps.dec.h264_support, 3);
        assert_eq!(caps.enc.max_encoded_width, 1920);
        assert_eq!(caps.enc.rgb_enabled, 1);
        assert_eq!(caps.enc.vs_enabled, 1);
        assert_eq!(caps.enc.mpeg4_enabled, 0);
        assert_eq!(caps.enc.reg_size, 164);
    }

    #[test]
    fn test_hevc_disables_auto_freq() {
        let caps = HwCapabilities::probe(RunningMode::Hevc, 4096, None, 68).unwrap();
        assert!(!caps.auto_freq);
        assert_eq!(caps.dec.max_dec_pic_width, 4096);
        assert_eq!(caps.enc, EncConfig::default());
    }

    #[test]
    fn test_descriptor_bytes() {
        let caps = Capabilities::Decoder(DecConfig {
            max_dec_pic_width: 1920,
            ..Default::default()
        });
        let bytes = caps.as_bytes();
        assert_eq!(bytes.len(), std::mem::size_of::<DecConfig>());
        assert_eq!(&bytes[..4], &1920u32.to_ne_bytes());
    }
}
