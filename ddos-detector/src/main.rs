#![forbid(unsafe_code)]

//! Detector process entry point: spawns one busy-waiting worker thread per
//! configured queue, runs the fast-pass detector loop on the async runtime,
//! and serves the Prometheus/health endpoints alongside a periodic text
//! snapshot (§4.7, §5).
//!
//! No kernel-bypass driver is bundled here (§6 leaves that unfixed); workers
//! are wired against `SoftNic`, the in-process stand-in `nic.rs` already
//! uses for tests. Binding a real AF_XDP/DPDK port means swapping the
//! `SoftNic::new(1)` construction below for that driver's `NicPort` impl —
//! everything upstream of the trait boundary is unaffected.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use ddos_core::config::{ClassificationConfig, Config};
use ddos_core::detector::DetectionState;
use ddos_core::nic::SoftNic;
use ddos_core::telemetry::{
    init_metrics, init_tracing, render_snapshot, shutdown_tracing, start_metrics_server, Metrics,
    Snapshot,
};
use ddos_core::worker::{Worker, WorkerCountersSnapshot, WorkerHandle};
use ddos_core::{load_from_path, Detector, EthStats};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Line-rate DDoS detector")]
struct Cli {
    /// Path to the detector's configuration TOML file.
    #[arg(short, long, value_name = "FILE", default_value = "config/detector.toml")]
    config: PathBuf,

    /// Network interface to attach the observational XDP counter program to.
    /// Requires the `ebpf-ingress` feature; the program only counts, it
    /// never drops, so this is a cross-check against the worker-side
    /// totals, not part of the detection path itself.
    #[cfg(feature = "ebpf-ingress")]
    #[arg(long, value_name = "IFACE")]
    ebpf_iface: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let cfg = match load_from_path(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("{:?}: {err}, falling back to built-in defaults", cli.config);
            Config::default()
        }
    };

    if let Err(err) = init_tracing(&cfg.logging) {
        eprintln!("failed to initialise logging: {err}");
        std::process::exit(1);
    }

    info!(
        num_workers = cfg.num_workers,
        burst_size = cfg.burst_size,
        baseline_net = %cfg.networks.baseline,
        attack_net = %cfg.networks.attack,
        "configuration loaded"
    );

    #[cfg(feature = "ebpf-ingress")]
    let _ebpf_ingress = cli.ebpf_iface.as_deref().and_then(|iface| {
        match ddos_ebpf_loader::XdpIngress::new(iface) {
            Ok(ingress) => Some(ingress),
            Err(err) => {
                error!(%err, iface, "failed to attach eBPF ingress counter, continuing without it");
                None
            }
        }
    });

    if let Err(err) = run(Arc::new(cfg)).await {
        error!(%err, "detector exited with error");
        shutdown_tracing();
        std::process::exit(1);
    }
    shutdown_tracing();
}

async fn run(cfg: Arc<Config>) -> ddos_core::Result<()> {
    let classification = cfg.classification()?;
    let force_quit = Arc::new(AtomicBool::new(false));
    spawn_signal_handler(force_quit.clone());

    let handles: Vec<Arc<WorkerHandle>> =
        (0..cfg.num_workers).map(|_| Arc::new(WorkerHandle::new(&cfg.sketch))).collect();

    let worker_threads: Vec<_> = handles
        .iter()
        .cloned()
        .enumerate()
        .map(|(idx, handle)| spawn_worker(idx, classification, &cfg, handle, force_quit.clone()))
        .collect();

    let metrics = match cfg.telemetry.metrics_port {
        Some(port) => match init_metrics() {
            Ok((metrics, registry)) => {
                tokio::spawn(start_metrics_server(port, registry, force_quit.clone()));
                Some(metrics)
            }
            Err(err) => {
                warn!(%err, "failed to initialise metrics exporter, continuing without it");
                None
            }
        },
        None => None,
    };

    run_detector_loop(&cfg, handles, metrics.as_deref(), force_quit.clone()).await;

    for (idx, thread) in worker_threads.into_iter().enumerate() {
        if thread.join().is_err() {
            warn!(worker = idx, "worker thread panicked");
        }
    }

    Ok(())
}

fn spawn_worker(
    idx: usize,
    classification: ClassificationConfig,
    cfg: &Config,
    handle: Arc<WorkerHandle>,
    force_quit: Arc<AtomicBool>,
) -> std::thread::JoinHandle<()> {
    let sample_rate = cfg.sketch.sample_rate;
    let burst_size = cfg.burst_size;
    std::thread::Builder::new()
        .name(format!("ddos-worker-{idx}"))
        .spawn(move || {
            let mut nic = SoftNic::new(1);
            let mut worker = Worker::new(0, classification, sample_rate, handle, force_quit);
            worker.run(&mut nic, burst_size);
        })
        .expect("failed to spawn worker thread")
}

/// SIGTERM/SIGINT both request the same graceful shutdown: flip `force_quit`
/// (release) so every busy-waiting worker and the detector loop observe it
/// (acquire) and return, per §5's cancellation ordering.
fn spawn_signal_handler(force_quit: Arc<AtomicBool>) {
    tokio::spawn(async move {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(err) => {
                error!(%err, "failed to install SIGTERM handler");
                return;
            }
        };
        let mut sigint = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()) {
            Ok(s) => s,
            Err(err) => {
                error!(%err, "failed to install SIGINT handler");
                return;
            }
        };
        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
            _ = sigint.recv() => info!("received SIGINT, shutting down"),
        }
        force_quit.store(true, Ordering::Release);
    });
}

/// Runs the fast-pass evaluation and the text-snapshot banner on the
/// configured cadences (§4.4, §4.7), sleeping `timing.tick_ms` between
/// polls. This thread sleeps rather than busy-waiting — it is the one
/// coordinator thread, not a per-packet hot path (§5).
async fn run_detector_loop(
    cfg: &Config,
    handles: Vec<Arc<WorkerHandle>>,
    metrics: Option<&Metrics>,
    force_quit: Arc<AtomicBool>,
) {
    let detector = Detector::new(cfg, handles.clone());
    let start = Instant::now();
    let mut state = DetectionState::new(start);

    let tick_interval = Duration::from_millis(cfg.timing.tick_ms);
    let fast_pass_interval = Duration::from_millis(cfg.timing.fast_pass_ms);
    let snapshot_interval = Duration::from_secs(cfg.timing.snapshot_secs);

    let mut last_fast_pass = start;
    let mut last_snapshot = start;
    let mut prev_cumulative = combined_counters(&handles);

    while !force_quit.load(Ordering::Acquire) {
        tokio::time::sleep(tick_interval).await;
        let now = Instant::now();

        if now.duration_since(last_fast_pass) >= fast_pass_interval {
            let report = detector.evaluate(&mut state, now);
            last_fast_pass = now;
            for alert in &report.alerts {
                warn!(
                    kind = alert.kind.as_str(),
                    level = ?alert.level,
                    value = alert.value,
                    threshold = alert.threshold,
                    "alert raised"
                );
            }
            if let Some(metrics) = metrics {
                if !report.alerts.is_empty() {
                    metrics.alerts_total.add(report.alerts.len() as u64, &[]);
                }
            }
        }

        if now.duration_since(last_snapshot) >= snapshot_interval {
            let cumulative = combined_counters(&handles);
            let interval_secs = now.duration_since(last_snapshot).as_secs_f64();
            let snapshot = Snapshot {
                interval_secs,
                counters: cumulative - prev_cumulative,
                cumulative_packets: cumulative.total_packets,
                cumulative_bytes: cumulative.total_bytes,
                nic: EthStats::default(),
            };

            if let Some(metrics) = metrics {
                let delta = snapshot.counters;
                metrics.packets_total.add(delta.total_packets, &[]);
                metrics.bytes_total.add(delta.total_bytes, &[]);
                metrics.attack_packets_total.add(delta.attack_packets, &[]);
                metrics.baseline_packets_total.add(delta.baseline_packets, &[]);
            }

            info!(
                "{}",
                render_snapshot(
                    &snapshot,
                    now.duration_since(start).as_secs_f64(),
                    &state.first_detection_latency,
                    &state.inter_detection_latency,
                )
            );

            last_snapshot = now;
            prev_cumulative = cumulative;
        }
    }
}

fn combined_counters(handles: &[Arc<WorkerHandle>]) -> WorkerCountersSnapshot {
    handles.iter().map(|h| h.counters.snapshot()).fold(WorkerCountersSnapshot::default(), |acc, s| acc + s)
}
