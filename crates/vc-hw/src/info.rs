//! Hardware description tables
//!
//! Three layers describe an engine:
//!
//! 1. [`HwInfo`]: register file geometry, fixed per hardware id.
//! 2. [`TaskInfo`]: runtime control registers and masks, per task type.
//! 3. Translation tables: which register words carry buffer references,
//!    per stream format.

use serde::Serialize;
use vc_memory::{PpsLayout, PpsSpec, TranslateSpec};

/// Known hardware ids, read from the upper half of register word 0
pub mod hw_id {
    pub const VPU_DEC_9190: u32 = 0x6731;
    pub const VPU_8270: u32 = 0x8270;
    pub const VPU_4831: u32 = 0x4831;
    pub const HEVC: u32 = 0x6867;
    pub const RKVDEC: u32 = 0x6876;
    pub const RKVDEC2: u32 = 0x3410;
}

/// Task (client) type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TaskType {
    Enc = 0,
    Dec = 1,
    Pp = 2,
    DecPp = 3,
}

impl TaskType {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Enc),
            1 => Some(Self::Dec),
            2 => Some(Self::Pp),
            3 => Some(Self::DecPp),
            _ => None,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Logical personality a physical engine is running as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum RunningMode {
    #[default]
    None,
    Vpu,
    Hevc,
    Rkvdec,
}

/// Device class of an engine group, fixed at attach time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Vpu,
    Hevc,
    Combo,
    Rkvdec,
}

/// Stream format of a register blob
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatType {
    JpegD,
    H263D,
    H264D,
    H265D,
    Mpeg1D,
    Mpeg2D,
    Mpeg4D,
    Vp6D,
    Vp7D,
    Vp8D,
    Vp9D,
    Vc1D,
    AvsD,
    Pp,
    JpegE,
    H264E,
    Vp8E,
}

impl FormatType {
    /// Formats whose direction-MV offset is stored divided by 16
    pub fn scales_dir_mv(self) -> bool {
        matches!(self, Self::H264D | Self::Vp9D)
    }

    /// Layout of the scaling-list references inside the PPS block
    pub fn pps_layout(self) -> Option<PpsLayout> {
        match self {
            Self::H264D => Some(PpsLayout::H264),
            Self::H265D => Some(PpsLayout::H265),
            _ => None,
        }
    }
}

/// Register file geometry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HwInfo {
    pub hw_id: u32,
    /// Encoder bank position in the window, in words
    pub enc_offset: usize,
    pub enc_reg_num: usize,
    /// Decoder bank position in the window, in words
    pub dec_offset: usize,
    pub dec_reg_num: usize,
    pub base_dec: usize,
    pub end_dec: usize,
    pub base_pp: usize,
    pub end_pp: usize,
    pub base_dec_pp: usize,
    pub end_dec_pp: usize,
    /// Size of the whole register window in words
    pub io_words: usize,
    /// Decoder cache flush register, relative to the decoder bank
    pub dec_clean_cache: Option<usize>,
    /// Encoder cache flush register, relative to the encoder bank
    pub enc_clean_cache: Option<usize>,
    /// Decoder soft reset register, relative to the decoder bank
    pub dec_soft_reset: Option<usize>,
}

impl HwInfo {
    /// Register words a task buffer needs
    pub fn reg_size(&self) -> usize {
        self.dec_reg_num.max(self.enc_reg_num)
    }

    pub fn has_encoder(&self) -> bool {
        self.enc_reg_num != 0
    }

    pub fn has_decoder(&self) -> bool {
        self.dec_reg_num != 0
    }

    /// Register range written on submission
    pub fn submit_range(&self, kind: TaskType) -> (usize, usize) {
        match kind {
            TaskType::Enc => (0, self.enc_reg_num),
            TaskType::Dec => (self.base_dec, self.end_dec),
            TaskType::Pp => (self.base_pp, self.end_pp),
            TaskType::DecPp => (self.base_dec_pp, self.end_dec_pp),
        }
    }

    /// First word returned to the client on collect
    pub fn return_base(&self, kind: TaskType) -> usize {
        match kind {
            TaskType::Enc => 0,
            TaskType::Dec | TaskType::DecPp => self.base_dec_pp,
            TaskType::Pp => self.base_pp,
        }
    }

    /// Words copied back from hardware on completion
    pub fn readback_len(&self, kind: TaskType) -> usize {
        match kind {
            TaskType::Enc => self.enc_reg_num,
            _ => self.dec_reg_num,
        }
    }

    /// Hardware that has no separate post-processor interrupt
    pub fn has_pp_irq(&self) -> bool {
        self.hw_id != hw_id::HEVC && self.hw_id != hw_id::RKVDEC
    }
}

/// Runtime control parameters of one task type
#[derive(Debug, Clone, Copy)]
pub struct TaskInfo {
    pub name: &'static str,
    pub reg_en: usize,
    pub reg_irq: usize,
    pub reg_len: Option<usize>,
    pub reg_dir_mv: Option<usize>,
    pub reg_pps: Option<usize>,
    pub reg_pipe: Option<usize>,
    pub enable_mask: u32,
    pub gating_mask: u32,
    pub pipe_mask: u32,
    pub irq_mask: u32,
    pub ready_mask: u32,
    pub error_mask: u32,
    pub get_fmt: fn(&[u32]) -> Option<FormatType>,
}

impl TaskInfo {
    pub fn is_error(&self, status: u32) -> bool {
        let err = status & self.error_mask != 0;
        tracing::trace!(
            "task {} status {:08x} mask {:08x}",
            self.name,
            status,
            self.error_mask
        );
        err
    }
}

/// Register indices carrying buffer references for one format
#[derive(Debug, Clone, Copy)]
pub struct FormatTable {
    pub format: FormatType,
    pub table: &'static [usize],
}

/// Complete description of one supported engine
#[derive(Debug)]
pub struct VcodecInfo {
    pub hw_id: u32,
    pub hw: HwInfo,
    /// Indexed by [`TaskType::index`]; `None` for unsupported types
    pub tasks: [Option<TaskInfo>; 4],
    pub trans: &'static [FormatTable],
}

impl VcodecInfo {
    /// Look up the description matching a probed hardware id
    pub fn lookup(id: u32) -> Option<&'static VcodecInfo> {
        VCODEC_INFO_SET.iter().find(|info| info.hw_id == id)
    }

    pub fn task(&self, kind: TaskType) -> Option<&TaskInfo> {
        self.tasks[kind.index()].as_ref()
    }

    pub fn table(&self, format: FormatType) -> Option<&'static [usize]> {
        self.trans
            .iter()
            .find(|t| t.format == format)
            .map(|t| t.table)
    }

    /// Translation parameters for a blob of `format` submitted as `task`
    pub fn translate_spec(&self, task: &TaskInfo, format: FormatType) -> Option<TranslateSpec<'static>> {
        let table = self.table(format)?;
        Some(TranslateSpec {
            table,
            dir_mv_reg: task.reg_dir_mv,
            scale_dir_mv: format.scales_dir_mv(),
            len_reg: task.reg_len,
            pps: match (task.reg_pps, format.pps_layout()) {
                (Some(reg), Some(layout)) => Some(PpsSpec { reg, layout }),
                _ => None,
            },
        })
    }
}

/// Decoder format field of VPU register 3
pub fn vpu_dec_fmt(regs: &[u32]) -> Option<u32> {
    regs.get(3).map(|r| (r >> 28) & 0xf)
}

fn get_fmt_vpu_dec(regs: &[u32]) -> Option<FormatType> {
    match vpu_dec_fmt(regs)? {
        0 => Some(FormatType::H264D),
        1 => Some(FormatType::Mpeg4D),
        2 => Some(FormatType::H263D),
        3 => Some(FormatType::JpegD),
        4 => Some(FormatType::Vc1D),
        5 => Some(FormatType::Mpeg2D),
        6 => Some(FormatType::Mpeg1D),
        7 => Some(FormatType::Vp6D),
        9 => Some(FormatType::Vp7D),
        10 => Some(FormatType::Vp8D),
        11 => Some(FormatType::AvsD),
        _ => None,
    }
}

fn get_fmt_vpu_enc(regs: &[u32]) -> Option<FormatType> {
    match (regs.get(14)? >> 1) & 0x3 {
        1 => Some(FormatType::Vp8E),
        2 => Some(FormatType::JpegE),
        3 => Some(FormatType::H264E),
        _ => None,
    }
}

fn get_fmt_vpu_pp(_regs: &[u32]) -> Option<FormatType> {
    Some(FormatType::Pp)
}

/// Decoder format field of rkvdec register 2
pub fn get_fmt_rkv_dec(regs: &[u32]) -> Option<FormatType> {
    match (regs.get(2)? >> 20) & 0x3 {
        0 => Some(FormatType::H265D),
        1 => Some(FormatType::H264D),
        2 => Some(FormatType::Vp9D),
        _ => None,
    }
}

fn get_fmt_hevc(_regs: &[u32]) -> Option<FormatType> {
    Some(FormatType::H265D)
}

const TASK_VPU_ENC: TaskInfo = TaskInfo {
    name: "vpu_enc",
    reg_en: 14,
    reg_irq: 1,
    reg_len: None,
    reg_dir_mv: None,
    reg_pps: None,
    reg_pipe: None,
    enable_mask: 0x6,
    gating_mask: 0,
    pipe_mask: 0,
    irq_mask: 0x1,
    ready_mask: 0x4,
    error_mask: 0x1f8,
    get_fmt: get_fmt_vpu_enc,
};

const TASK_VPU_DEC: TaskInfo = TaskInfo {
    name: "vpu_dec",
    reg_en: 1,
    reg_irq: 1,
    reg_len: Some(12),
    reg_dir_mv: Some(41),
    reg_pps: None,
    reg_pipe: None,
    enable_mask: 0,
    gating_mask: 0,
    pipe_mask: 0,
    irq_mask: 0x100,
    ready_mask: 0x1000,
    error_mask: 0x7e000,
    get_fmt: get_fmt_vpu_dec,
};

const TASK_VPU_PP: TaskInfo = TaskInfo {
    name: "vpu_pp",
    reg_en: 61,
    reg_irq: 60,
    reg_len: None,
    reg_dir_mv: None,
    reg_pps: None,
    reg_pipe: None,
    enable_mask: 0,
    gating_mask: 0,
    pipe_mask: 0,
    irq_mask: 0x100,
    ready_mask: 0x1000,
    error_mask: 0x2000,
    get_fmt: get_fmt_vpu_pp,
};

const TASK_VPU_DEC_PP: TaskInfo = TaskInfo {
    name: "vpu_dec_pp",
    reg_pipe: Some(61),
    pipe_mask: 0x2,
    ..TASK_VPU_DEC
};

const TASK_RKV_DEC: TaskInfo = TaskInfo {
    name: "rkv_dec",
    reg_en: 1,
    reg_irq: 1,
    reg_len: None,
    reg_dir_mv: Some(52),
    reg_pps: Some(42),
    reg_pipe: None,
    enable_mask: 0,
    gating_mask: 0x8,
    pipe_mask: 0,
    irq_mask: 0x100,
    ready_mask: 0x1000,
    error_mask: 0x3e000,
    get_fmt: get_fmt_rkv_dec,
};

const TASK_HEVC_DEC: TaskInfo = TaskInfo {
    name: "hevc_dec",
    reg_dir_mv: None,
    get_fmt: get_fmt_hevc,
    ..TASK_RKV_DEC
};

const TASK_VPU: [Option<TaskInfo>; 4] = [
    Some(TASK_VPU_ENC),
    Some(TASK_VPU_DEC),
    Some(TASK_VPU_PP),
    Some(TASK_VPU_DEC_PP),
];

const TASK_VPU_DEC_ONLY: [Option<TaskInfo>; 4] = [
    None,
    Some(TASK_VPU_DEC),
    Some(TASK_VPU_PP),
    Some(TASK_VPU_DEC_PP),
];

const TASK_RKV: [Option<TaskInfo>; 4] = [None, Some(TASK_RKV_DEC), None, None];
const TASK_HEVC: [Option<TaskInfo>; 4] = [None, Some(TASK_HEVC_DEC), None, None];

const TBL_VPU_DEFAULT: &[usize] = &[12, 13, 14, 15, 16, 17, 40, 41];
const TBL_VPU_JPEGD: &[usize] = &[12, 13, 14, 40, 66, 67];
const TBL_VPU_H264D: &[usize] = &[
    12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27, 28, 29, 40, 41,
];
const TBL_VPU_VP8D: &[usize] = &[10, 12, 13, 14, 18, 19, 22, 23, 24, 25, 26, 27, 28, 29, 40];
const TBL_VPU_PP: &[usize] = &[63, 64, 65, 66, 67, 68, 69, 70, 71, 72];
const TBL_VPU_ENC: &[usize] = &[5, 6, 7, 8, 9, 10, 11, 12, 13, 51];
const TBL_VPU_VP8E: &[usize] = &[5, 6, 7, 8, 9, 10, 11, 12, 13, 26, 27, 51];

const TRANS_VPU: &[FormatTable] = &[
    FormatTable { format: FormatType::JpegD, table: TBL_VPU_JPEGD },
    FormatTable { format: FormatType::H263D, table: TBL_VPU_DEFAULT },
    FormatTable { format: FormatType::H264D, table: TBL_VPU_H264D },
    FormatTable { format: FormatType::Mpeg1D, table: TBL_VPU_DEFAULT },
    FormatTable { format: FormatType::Mpeg2D, table: TBL_VPU_DEFAULT },
    FormatTable { format: FormatType::Mpeg4D, table: TBL_VPU_DEFAULT },
    FormatTable { format: FormatType::Vp6D, table: TBL_VPU_DEFAULT },
    FormatTable { format: FormatType::Vp7D, table: TBL_VPU_DEFAULT },
    FormatTable { format: FormatType::Vp8D, table: TBL_VPU_VP8D },
    FormatTable { format: FormatType::Vc1D, table: TBL_VPU_DEFAULT },
    FormatTable { format: FormatType::AvsD, table: TBL_VPU_DEFAULT },
    FormatTable { format: FormatType::Pp, table: TBL_VPU_PP },
    FormatTable { format: FormatType::JpegE, table: TBL_VPU_ENC },
    FormatTable { format: FormatType::H264E, table: TBL_VPU_ENC },
    FormatTable { format: FormatType::Vp8E, table: TBL_VPU_VP8E },
];

const TBL_RKV_H265D: &[usize] = &[
    4, 6, 7, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 42, 43,
];
const TBL_RKV_H264D: &[usize] = &[
    4, 6, 7, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 41, 42, 43, 48,
];
const TBL_RKV_VP9D: &[usize] = &[4, 6, 7, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 52];

const TRANS_RKV: &[FormatTable] = &[
    FormatTable { format: FormatType::H265D, table: TBL_RKV_H265D },
    FormatTable { format: FormatType::H264D, table: TBL_RKV_H264D },
    FormatTable { format: FormatType::Vp9D, table: TBL_RKV_VP9D },
];

const HW_VPU_8270: HwInfo = HwInfo {
    hw_id: hw_id::VPU_8270,
    enc_offset: 0,
    enc_reg_num: 96,
    dec_offset: 0x100,
    dec_reg_num: 60 + 41,
    base_dec: 0,
    end_dec: 60,
    base_pp: 60,
    end_pp: 60 + 41,
    base_dec_pp: 0,
    end_dec_pp: 60 + 41,
    io_words: 0x400,
    dec_clean_cache: Some(516),
    enc_clean_cache: Some(772),
    dec_soft_reset: Some(101),
};

const HW_VPU_4831: HwInfo = HwInfo {
    hw_id: hw_id::VPU_4831,
    enc_reg_num: 164,
    ..HW_VPU_8270
};

const HW_VPU_9190: HwInfo = HwInfo {
    hw_id: hw_id::VPU_DEC_9190,
    enc_reg_num: 0,
    enc_clean_cache: None,
    dec_offset: 0,
    ..HW_VPU_8270
};

const HW_RKHEVC: HwInfo = HwInfo {
    hw_id: hw_id::HEVC,
    enc_offset: 0,
    enc_reg_num: 0,
    dec_offset: 0,
    dec_reg_num: 68,
    base_dec: 0,
    end_dec: 68,
    base_pp: 0,
    end_pp: 0,
    base_dec_pp: 0,
    end_dec_pp: 0,
    io_words: 0x120,
    dec_clean_cache: Some(260),
    enc_clean_cache: None,
    dec_soft_reset: None,
};

const HW_RKVDEC: HwInfo = HwInfo {
    hw_id: hw_id::RKVDEC,
    dec_reg_num: 78,
    end_dec: 78,
    ..HW_RKHEVC
};

static VCODEC_INFO_SET: [VcodecInfo; 6] = [
    VcodecInfo {
        hw_id: hw_id::VPU_8270,
        hw: HW_VPU_8270,
        tasks: TASK_VPU,
        trans: TRANS_VPU,
    },
    VcodecInfo {
        hw_id: hw_id::VPU_4831,
        hw: HW_VPU_4831,
        tasks: TASK_VPU,
        trans: TRANS_VPU,
    },
    VcodecInfo {
        hw_id: hw_id::VPU_DEC_9190,
        hw: HW_VPU_9190,
        tasks: TASK_VPU_DEC_ONLY,
        trans: TRANS_VPU,
    },
    VcodecInfo {
        hw_id: hw_id::HEVC,
        hw: HW_RKHEVC,
        tasks: TASK_HEVC,
        trans: TRANS_RKV,
    },
    VcodecInfo {
        hw_id: hw_id::RKVDEC,
        hw: HW_RKVDEC,
        tasks: TASK_RKV,
        trans: TRANS_RKV,
    },
    VcodecInfo {
        hw_id: hw_id::RKVDEC2,
        hw: HwInfo {
            hw_id: hw_id::RKVDEC2,
            ..HW_RKVDEC
        },
        tasks: TASK_RKV,
        trans: TRANS_RKV,
    },
];
