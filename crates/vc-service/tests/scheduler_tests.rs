//! Submission, admission and completion against a simulated engine group

use std::collections::HashMap;
use vc_core::{MemoryError, ServiceConfig, ServiceError, SessionError};
use vc_hw::{hw_id, DeviceKind, RunningMode, TaskType};
use vc_memory::{BufferHandle, DomainId, MappingContext};
use vc_service::sim::{SimGroup, SIM_MODE_CTRL};
use vc_service::{ServiceState, SessionId};

fn open(group: &SimGroup, subdev: usize, kind: TaskType) -> SessionId {
    let id = group.service.open(subdev, 100).unwrap();
    group.service.set_client_type(id, kind as u32).unwrap();
    id
}

fn vpu_with(config: ServiceConfig) -> SimGroup {
    SimGroup::builder(DeviceKind::Vpu)
        .subdevice("vpu", hw_id::VPU_8270, RunningMode::Vpu, true)
        .config(config)
        .attach()
        .unwrap()
}

/// A blob the VPU accepts for `kind`
fn vpu_blob(group: &SimGroup, kind: TaskType) -> Vec<u32> {
    let mut regs = group.blob(0);
    if kind == TaskType::Enc {
        // H.264 encode
        regs[14] = 3 << 1;
    }
    regs
}

/// At most one task per slot, and slot holders are running
fn check_slots(state: &ServiceState) {
    let running = |id: &u64| state.running.contains(id);
    if let Some(id) = &state.slots.codec {
        assert!(running(id));
    }
    if let Some(id) = &state.slots.pproc {
        assert!(running(id));
    }

    let kinds: Vec<TaskType> = state
        .running
        .iter()
        .filter_map(|id| state.tasks.get(id))
        .map(|t| t.kind)
        .collect();
    let codec_users = kinds
        .iter()
        .filter(|k| matches!(k, TaskType::Enc | TaskType::Dec | TaskType::DecPp))
        .count();
    let pproc_users = kinds
        .iter()
        .filter(|k| matches!(k, TaskType::Pp | TaskType::DecPp))
        .count();
    assert!(codec_users <= 1, "codec slot shared: {:?}", kinds);
    assert!(pproc_users <= 1, "pproc slot shared: {:?}", kinds);
    assert_eq!(state.total_running, state.running.len());
}

#[test]
fn test_decode_round_trip() {
    let group = SimGroup::vpu().unwrap();
    group.add_buffer(1, 0x10000);
    let session = open(&group, 0, TaskType::Dec);

    let mut regs = vpu_blob(&group, TaskType::Dec);
    regs[12] = 1;
    group.service.submit_regs(session, &regs, None).unwrap();

    let stats = group.service.stats();
    assert_eq!(stats.running, 1);
    assert!(stats.codec_busy);
    assert!(stats.powered);
    assert_eq!(group.buffers.pin_count(BufferHandle(1)), 1);

    // Hardware consumed 0x40 bytes of the stream
    let base = group
        .buffers
        .device_addr(BufferHandle(1), MappingContext::Iommu(DomainId(0)))
        .unwrap();
    let dec_offset = group.info(0).hw.dec_offset;
    group.windows[0].poke(dec_offset + 12, base + 0x40);

    assert!(group.complete_dec(0, 0).unwrap());
    let out = group.service.collect(session).unwrap();

    assert_eq!(out.len(), regs.len());
    assert_eq!(out[1], group.done_status(0, TaskType::Dec));
    assert_eq!(out[12], 0x40 << 10);
    assert_eq!(group.buffers.total_pins(), 0);

    let stats = group.service.stats();
    assert_eq!(stats.running, 0);
    assert_eq!(stats.done, 0);
    assert_eq!(stats.irq_dec_count, 1);
    assert!(!stats.codec_busy);
}

#[test]
fn test_encoder_waits_for_decoder() {
    let group = SimGroup::vpu().unwrap();
    let dec = open(&group, 0, TaskType::Dec);
    let enc = open(&group, 0, TaskType::Enc);

    group
        .service
        .submit_regs(dec, &vpu_blob(&group, TaskType::Dec), None)
        .unwrap();
    group
        .service
        .submit_regs(enc, &vpu_blob(&group, TaskType::Enc), None)
        .unwrap();

    let stats = group.service.stats();
    assert_eq!(stats.running, 1);
    assert_eq!(stats.waiting, 1);

    group.complete_dec(0, 0).unwrap();
    group.service.collect(dec).unwrap();

    // The encoder was admitted by the completion pass
    let (codec_kind, waiting) = group.service.inspect(|state| {
        let kind = state
            .slots
            .codec
            .and_then(|id| state.tasks.get(&id))
            .map(|t| t.kind);
        (kind, state.waiting.len())
    });
    assert_eq!(codec_kind, Some(TaskType::Enc));
    assert_eq!(waiting, 0);

    group.complete_enc(0).unwrap();
    let out = group.service.collect(enc).unwrap();
    assert_eq!(out[1], group.done_status(0, TaskType::Enc));
    assert_eq!(group.service.stats().irq_enc_count, 1);
}

#[test]
fn test_invalid_handle_rejected_before_queueing() {
    let group = SimGroup::vpu().unwrap();
    let session = open(&group, 0, TaskType::Dec);

    let mut regs = vpu_blob(&group, TaskType::Dec);
    regs[13] = 9;
    let err = group.service.submit_regs(session, &regs, None).unwrap_err();

    assert!(matches!(
        err,
        ServiceError::Memory(MemoryError::InvalidHandle { handle: 9, reg: 13 })
    ));
    assert!(err.is_client_error());
    let stats = group.service.stats();
    assert_eq!(stats.waiting, 0);
    assert_eq!(stats.running, 0);
    assert!(!stats.powered);
}

#[test]
fn test_malformed_blob_rejected() {
    let group = SimGroup::vpu().unwrap();
    let session = open(&group, 0, TaskType::Dec);

    let err = group.service.submit(session, &[0u8; 6]).unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Session(SessionError::MalformedBlob { got: 6, .. })
    ));

    let err = group.service.submit(session, &[]).unwrap_err();
    assert!(matches!(err, ServiceError::Session(SessionError::MalformedBlob { .. })));
}

#[test]
fn test_submit_requires_client_type() {
    let group = SimGroup::vpu().unwrap();
    let session = group.service.open(0, 1).unwrap();
    let err = group
        .service
        .submit_regs(session, &group.blob(0), None)
        .unwrap_err();
    assert!(matches!(err, ServiceError::Session(SessionError::ClientTypeUnset)));

    let err = group.service.set_client_type(session, 7).unwrap_err();
    assert!(matches!(
        err,
        ServiceError::Session(SessionError::UnsupportedClientType(7))
    ));
}

#[test]
fn test_unknown_session_and_subdevice() {
    let group = SimGroup::vpu().unwrap();
    assert!(group.service.open(3, 1).is_err());
    assert!(matches!(
        group.service.collect(42).unwrap_err(),
        ServiceError::Session(SessionError::InvalidId(42))
    ));
    assert!(group.service.close(42).is_err());
}

#[test]
fn test_session_results_in_submission_order() {
    let group = SimGroup::vpu().unwrap();
    let session = open(&group, 0, TaskType::Dec);

    for tag in 0..3 {
        let mut regs = vpu_blob(&group, TaskType::Dec);
        regs[50] = 0xa0 + tag;
        group.service.submit_regs(session, &regs, None).unwrap();
    }
    assert_eq!(group.service.stats().waiting, 2);

    for tag in 0..3 {
        group.complete_dec(0, 0).unwrap();
        let out = group.service.collect(session).unwrap();
        assert_eq!(out[50], 0xa0 + tag);
    }
    assert_eq!(group.service.stats().sessions, 1);
}

#[test]
fn test_decoder_and_pp_share_pipeline_without_auto_freq() {
    let group = vpu_with(ServiceConfig {
        auto_freq: Some(false),
        ..ServiceConfig::default()
    });
    let dec = open(&group, 0, TaskType::Dec);
    let pp = open(&group, 0, TaskType::Pp);

    group
        .service
        .submit_regs(dec, &vpu_blob(&group, TaskType::Dec), None)
        .unwrap();
    group
        .service
        .submit_regs(pp, &vpu_blob(&group, TaskType::Pp), None)
        .unwrap();

    let stats = group.service.stats();
    assert!(stats.codec_busy && stats.pproc_busy);
    assert_eq!(stats.running, 2);

    group.complete_pp(0).unwrap();
    group.service.collect(pp).unwrap();
    group.complete_dec(0, 0).unwrap();
    group.service.collect(dec).unwrap();

    let stats = group.service.stats();
    assert_eq!(stats.irq_pp_count, 1);
    assert_eq!(stats.irq_dec_count, 1);
    assert_eq!(stats.running, 0);
}

#[test]
fn test_auto_freq_keeps_decoder_off_busy_pp() {
    let group = SimGroup::vpu().unwrap();
    let pp = open(&group, 0, TaskType::Pp);
    let dec = open(&group, 0, TaskType::Dec);

    group
        .service
        .submit_regs(pp, &vpu_blob(&group, TaskType::Pp), None)
        .unwrap();
    group
        .service
        .submit_regs(dec, &vpu_blob(&group, TaskType::Dec), None)
        .unwrap();

    let stats = group.service.stats();
    assert!(stats.pproc_busy);
    assert!(!stats.codec_busy);
    assert_eq!(stats.waiting, 1);

    group.complete_pp(0).unwrap();
    group.service.collect(pp).unwrap();
    assert!(group.service.stats().codec_busy);

    group.complete_dec(0, 0).unwrap();
    group.service.collect(dec).unwrap();
}

#[test]
fn test_dec_pp_holds_both_slots() {
    let group = SimGroup::vpu().unwrap();
    let session = open(&group, 0, TaskType::DecPp);

    group
        .service
        .submit_regs(session, &vpu_blob(&group, TaskType::DecPp), None)
        .unwrap();
    let stats = group.service.stats();
    assert!(stats.codec_busy && stats.pproc_busy);

    group.complete_dec(0, 0).unwrap();
    group.service.collect(session).unwrap();
    let stats = group.service.stats();
    assert!(!stats.codec_busy && !stats.pproc_busy);
}

#[test]
fn test_slots_stay_exclusive_under_mixed_load() {
    for auto_freq in [true, false] {
        let group = vpu_with(ServiceConfig {
            auto_freq: Some(auto_freq),
            ..ServiceConfig::default()
        });
        let sessions: Vec<(SessionId, TaskType)> =
            [TaskType::Dec, TaskType::Pp, TaskType::Enc, TaskType::DecPp]
                .into_iter()
                .map(|kind| (open(&group, 0, kind), kind))
                .collect();

        let mut outstanding: HashMap<SessionId, usize> = HashMap::new();
        let mut seed = 0x1234_5678u32;
        for _ in 0..24 {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
            let (session, kind) = sessions[(seed >> 16) as usize % sessions.len()];
            group
                .service
                .submit_regs(session, &vpu_blob(&group, kind), None)
                .unwrap();
            *outstanding.entry(session).or_default() += 1;
            group.service.inspect(check_slots);
        }

        while outstanding.values().any(|&n| n > 0) {
            let (codec, pproc) = group.service.inspect(|state| {
                check_slots(state);
                let holder = |id: Option<u64>| {
                    id.and_then(|id| state.tasks.get(&id))
                        .map(|t| (t.kind, t.session))
                };
                (holder(state.slots.codec), holder(state.slots.pproc))
            });
            let (kind, session) = codec.or(pproc).expect("pipeline stalled with work waiting");
            match kind {
                TaskType::Enc => group.complete_enc(0).unwrap(),
                TaskType::Pp => group.complete_pp(0).unwrap(),
                TaskType::Dec | TaskType::DecPp => group.complete_dec(0, 0).unwrap(),
            };
            group.service.collect(session).unwrap();
            *outstanding.get_mut(&session).unwrap() -= 1;
        }

        let stats = group.service.stats();
        assert_eq!(stats.waiting + stats.running + stats.done, 0);
        assert_eq!(stats.total_running, 0);
    }
}

#[test]
fn test_no_clock_changes_without_auto_freq() {
    let group = vpu_with(ServiceConfig {
        auto_freq: Some(false),
        ..ServiceConfig::default()
    });
    let session = open(&group, 0, TaskType::Dec);

    for width_mbs in [20u32, 200, 255] {
        let mut regs = vpu_blob(&group, TaskType::Dec);
        regs[4] = width_mbs << 23;
        group.service.submit_regs(session, &regs, None).unwrap();
        group.complete_dec(0, 0).unwrap();
        group.service.collect(session).unwrap();
    }
    assert_eq!(group.platform.aclk.set_rate_count(), 0);
    assert_eq!(group.service.stats().freq, None);
}

#[test]
fn test_auto_freq_raises_clock_for_wide_h264() {
    let group = SimGroup::vpu().unwrap();
    let session = open(&group, 0, TaskType::Dec);

    let mut regs = vpu_blob(&group, TaskType::Dec);
    // 4080 pixels wide
    regs[4] = 255 << 23;
    group.service.submit_regs(session, &regs, None).unwrap();
    assert!(group.platform.aclk.set_rate_count() > 0);
    assert_eq!(group.service.stats().freq, Some(vc_hw::Frequency::Mhz600));

    group.complete_dec(0, 0).unwrap();
    group.service.collect(session).unwrap();
}

#[test]
fn test_combo_switches_mode_only_on_change() {
    let group = SimGroup::combo().unwrap();
    let vpu = open(&group, 0, TaskType::Dec);
    let hevc = open(&group, 1, TaskType::Dec);
    let grf_index = SIM_MODE_CTRL.0 / 4;

    for subdev in [0usize, 1, 0, 0, 1, 1, 0] {
        let session = if subdev == 0 { vpu } else { hevc };
        group
            .service
            .submit_regs(session, &group.blob(subdev), None)
            .unwrap();
        let mode = group.service.stats().curr_mode;
        assert_eq!(mode, group.service.subdevices()[subdev].mode);

        group.complete_dec(subdev, 0).unwrap();
        group.service.collect(session).unwrap();
    }

    // None to Vpu, then four changes of personality
    assert_eq!(group.platform.grf.write_count(grf_index), 5);
    let vpu_mmu = group.iommus[0].as_ref().unwrap();
    let hevc_mmu = group.iommus[1].as_ref().unwrap();
    assert_eq!(vpu_mmu.activate_count(), 3);
    assert_eq!(hevc_mmu.activate_count(), 2);
}

#[test]
fn test_combo_mode_bit_tracks_personality() {
    let group = SimGroup::combo().unwrap();
    let hevc = open(&group, 1, TaskType::Dec);
    let grf_index = SIM_MODE_CTRL.0 / 4;
    let bit = 1 << SIM_MODE_CTRL.1;

    group
        .service
        .submit_regs(hevc, &group.blob(1), None)
        .unwrap();
    assert_eq!(group.platform.grf.peek(grf_index) & bit, bit);
    assert_eq!(group.service.stats().curr_mode, RunningMode::Hevc);

    group.complete_dec(1, 0).unwrap();
    group.service.collect(hevc).unwrap();
    // Completion leaves the personality in place
    assert_eq!(group.service.stats().curr_mode, RunningMode::Hevc);
}

#[test]
fn test_capabilities_follow_session_type() {
    let group = SimGroup::vpu().unwrap();
    let dec = open(&group, 0, TaskType::Dec);
    let enc = open(&group, 0, TaskType::Enc);

    assert!(matches!(
        group.service.get_hw_capabilities(dec).unwrap(),
        vc_hw::Capabilities::Decoder(_)
    ));
    assert!(matches!(
        group.service.get_hw_capabilities(enc).unwrap(),
        vc_hw::Capabilities::Encoder(_)
    ));
}

#[test]
fn test_stats_serialize() {
    let group = SimGroup::vpu().unwrap();
    let session = open(&group, 0, TaskType::Dec);
    group
        .service
        .submit_regs(session, &group.blob(0), None)
        .unwrap();

    let json = serde_json::to_value(group.service.stats()).unwrap();
    assert_eq!(json["running"], 1);
    assert_eq!(json["codec_busy"], true);
    assert_eq!(json["sessions"], 1);

    group.complete_dec(0, 0).unwrap();
    group.service.collect(session).unwrap();
}
