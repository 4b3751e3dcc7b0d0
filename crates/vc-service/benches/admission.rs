//! Benchmarks for the submit, complete, collect cycle

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use vc_hw::TaskType;
use vc_service::sim::SimGroup;
use vc_service::{can_admit, decide};

fn bench_admission_rules(c: &mut Criterion) {
    let kinds = [TaskType::Enc, TaskType::Dec, TaskType::Pp, TaskType::DecPp];
    let codecs = [None, Some(TaskType::Dec), Some(TaskType::Enc)];

    c.bench_function("can_admit_matrix", |b| {
        b.iter(|| {
            let mut admitted = 0;
            for kind in kinds {
                for codec in codecs {
                    for pproc in [false, true] {
                        if can_admit(black_box(kind), codec, pproc, true) {
                            admitted += 1;
                        }
                    }
                }
            }
            admitted
        });
    });

    c.bench_function("decide_with_reset_pending", |b| {
        b.iter(|| decide(black_box(TaskType::Dec), None, false, true, true));
    });
}

fn bench_decode_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_cycle");

    for buffers in [0usize, 4, 16].iter() {
        group.throughput(Throughput::Elements(1));

        group.bench_with_input(BenchmarkId::new("buffers", buffers), buffers, |b, &buffers| {
            let sim = SimGroup::vpu().unwrap();
            let session = sim.service.open(0, 1).unwrap();
            sim.service
                .set_client_type(session, TaskType::Dec as u32)
                .unwrap();

            // Buffer references go in the H.264 translation table slots
            let mut regs = sim.blob(0);
            for (i, reg) in (12..29).take(buffers).enumerate() {
                let handle = i as u32 + 1;
                sim.add_buffer(handle, 0x4000);
                regs[reg] = handle;
            }

            b.iter(|| {
                sim.service.submit_regs(session, black_box(&regs), None).unwrap();
                sim.complete_dec(0, 0).unwrap();
                black_box(sim.service.collect(session).unwrap())
            });
        });
    }

    group.finish();
}

fn bench_encoder_behind_decoder(c: &mut Criterion) {
    c.bench_function("enc_after_dec", |b| {
        let sim = SimGroup::vpu().unwrap();
        let dec = sim.service.open(0, 1).unwrap();
        let enc = sim.service.open(0, 2).unwrap();
        sim.service.set_client_type(dec, TaskType::Dec as u32).unwrap();
        sim.service.set_client_type(enc, TaskType::Enc as u32).unwrap();

        let dec_regs = sim.blob(0);
        let mut enc_regs = sim.blob(0);
        enc_regs[14] = 3 << 1;

        b.iter(|| {
            sim.service.submit_regs(dec, &dec_regs, None).unwrap();
            sim.service.submit_regs(enc, &enc_regs, None).unwrap();
            sim.complete_dec(0, 0).unwrap();
            sim.service.collect(dec).unwrap();
            sim.complete_enc(0).unwrap();
            sim.service.collect(enc).unwrap()
        });
    });
}

criterion_group!(
    benches,
    bench_admission_rules,
    bench_decode_cycle,
    bench_encoder_behind_decoder
);
criterion_main!(benches);
