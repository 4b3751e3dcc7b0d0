//! vcodec-sim
//!
//! Attaches a simulated VPU + HEVC combo group, drives a mixed workload from
//! several client threads while a hardware thread plays the engines, and
//! prints the final service statistics as JSON.

use anyhow::{anyhow, bail, Context, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use vc_core::Config;
use vc_hw::{hw_id, DeviceKind, RunningMode, TaskType};
use vc_service::sim::{SimGroup, SIM_MODE_CTRL};
use vc_service::TaskId;

/// Tasks each client submits
const TASKS_PER_CLIENT: usize = 16;

/// How long the simulated hardware takes per task
const HW_LATENCY: Duration = Duration::from_millis(2);

struct Client {
    name: &'static str,
    subdev: usize,
    kind: TaskType,
    /// Buffer handles placed in the blob as (register, handle)
    buffers: &'static [(usize, u32)],
}

const CLIENTS: &[Client] = &[
    Client {
        name: "h264-decode",
        subdev: 0,
        kind: TaskType::Dec,
        buffers: &[(12, 1), (13, 2)],
    },
    Client {
        name: "h264-encode",
        subdev: 0,
        kind: TaskType::Enc,
        buffers: &[(5, 3)],
    },
    Client {
        name: "post-process",
        subdev: 0,
        kind: TaskType::Pp,
        buffers: &[],
    },
    Client {
        name: "hevc-decode",
        subdev: 1,
        kind: TaskType::Dec,
        buffers: &[(4, 4), (6, 5)],
    },
];

fn parse_args() -> Result<Option<PathBuf>> {
    let mut args = std::env::args().skip(1);
    let mut config = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let path = args.next().context("--config needs a path")?;
                config = Some(PathBuf::from(path));
            }
            "-h" | "--help" => {
                println!("usage: vcodec-sim [--config PATH]");
                std::process::exit(0);
            }
            other => bail!("unknown argument {}", other),
        }
    }
    Ok(config)
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(&path)
            .map_err(|e| anyhow!("loading {}: {}", path.display(), e)),
        None => Ok(Config::load().unwrap_or_else(|e| {
            eprintln!("using default configuration: {}", e);
            Config::default()
        })),
    }
}

fn attach(config: &Config) -> Result<SimGroup> {
    let group = SimGroup::builder(DeviceKind::Combo)
        .subdevice("vpu", hw_id::VPU_8270, RunningMode::Vpu, true)
        .subdevice("hevc", hw_id::HEVC, RunningMode::Hevc, true)
        .mode_control(SIM_MODE_CTRL.0, SIM_MODE_CTRL.1)
        .config(config.service.clone())
        .debug_flags(config.debug.flags())
        .attach()?;

    for handle in 1..=5 {
        group.add_buffer(handle, 0x20000);
    }
    Ok(group)
}

/// Complete whatever occupies the engine slots, once per task
fn play_hardware(group: &SimGroup, stop: &AtomicBool) -> Result<()> {
    let mut last: Option<TaskId> = None;
    while !stop.load(Ordering::Acquire) {
        let holder = group.service.inspect(|state| {
            state
                .slots
                .codec
                .or(state.slots.pproc)
                .and_then(|id| state.tasks.get(&id))
                .map(|task| (task.id, task.kind, task.subdev))
        });

        match holder {
            Some((id, kind, subdev)) if last != Some(id) => {
                thread::sleep(HW_LATENCY);
                match kind {
                    TaskType::Enc => group.complete_enc(subdev)?,
                    TaskType::Pp => group.complete_pp(subdev)?,
                    TaskType::Dec | TaskType::DecPp => group.complete_dec(subdev, 0)?,
                };
                last = Some(id);
            }
            _ => thread::sleep(Duration::from_micros(200)),
        }
    }
    Ok(())
}

fn run_client(group: &SimGroup, client: &Client) -> Result<usize> {
    let service = &group.service;
    let session = service.open(client.subdev, std::process::id())?;
    service.set_client_type(session, client.kind as u32)?;

    let mut regs = group.blob(client.subdev);
    for &(reg, handle) in client.buffers {
        regs[reg] = handle;
    }
    if client.kind == TaskType::Enc {
        // H.264
        regs[14] = 3 << 1;
    }

    let mut collected = 0;
    for _ in 0..TASKS_PER_CLIENT {
        service.submit_regs(session, &regs, None)?;
        match service.collect(session) {
            Ok(_) => collected += 1,
            Err(err) if err.is_timeout() => tracing::warn!("{}: {}", client.name, err),
            Err(err) => return Err(err.into()),
        }
    }
    service.close(session)?;
    tracing::info!("{} collected {} task(s)", client.name, collected);
    Ok(collected)
}

fn main() -> Result<()> {
    let config = load_config(parse_args()?)?;
    vc_core::logging::init(&config.debug).map_err(|e| anyhow!("logging: {}", e))?;

    tracing::info!("Starting vcodec-sim");
    let group = attach(&config)?;
    let stop = AtomicBool::new(false);
    let (group_ref, stop_ref) = (&group, &stop);

    let collected = thread::scope(|scope| -> Result<usize> {
        let hardware = scope.spawn(move || play_hardware(group_ref, stop_ref));
        let clients: Vec<_> = CLIENTS
            .iter()
            .map(|client| scope.spawn(move || run_client(group_ref, client)))
            .collect();

        let results: Vec<_> = clients.into_iter().map(|handle| handle.join()).collect();
        stop.store(true, Ordering::Release);
        hardware
            .join()
            .map_err(|_| anyhow!("hardware thread panicked"))??;

        let mut total = 0;
        for result in results {
            total += result.map_err(|_| anyhow!("client thread panicked"))??;
        }
        Ok(total)
    })?;

    tracing::info!(
        "{} of {} task(s) collected",
        collected,
        CLIENTS.len() * TASKS_PER_CLIENT
    );
    println!("{}", serde_json::to_string_pretty(&group.service.stats())?);
    Ok(())
}
