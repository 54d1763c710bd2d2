#![forbid(unsafe_code)]

//! Replayer process entry point: reads a pcap corpus and drives one NIC TX
//! queue under a chosen pacing mode (§4.5, §6).
//!
//! As with the detector binary, no kernel-bypass driver is bundled: TX goes
//! through `SoftNic`, `nic.rs`'s in-process stand-in. Binding a real port
//! means swapping that construction for a driver's `NicPort` impl.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use ddos_core::config::LoggingConfig;
use ddos_core::nic::SoftNic;
use ddos_core::replayer::{PacingMode, PcapReader, PhaseSchedule, Replayer};
use ddos_core::telemetry::{init_metrics, init_tracing, shutdown_tracing, start_metrics_server};
use ddos_core::Pacer;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "PCAP-driven traffic replayer")]
struct Cli {
    /// Libpcap-format capture file providing the replay corpus.
    pcap: PathBuf,

    /// Replay in timestamp-faithful order instead of phase-weighted draws.
    #[arg(long)]
    pcap_timed: bool,

    /// Replay via phase-weighted category draws instead of file order.
    #[arg(long)]
    adaptive: bool,

    /// Jitter applied to each inter-packet gap under `--pcap-timed`, as a
    /// fraction (0.0-1.0) of the gap.
    #[arg(long, default_value_t = 0.0)]
    jitter: f64,

    /// Divides every inter-packet gap under `--pcap-timed`; > 1.0 replays
    /// faster than capture speed.
    #[arg(long, default_value_t = 1.0)]
    speedup: f64,

    /// Target send rate in Gbps. Governs `--adaptive` and the free-run
    /// default; ignored under `--pcap-timed`, which paces from capture
    /// timestamps instead.
    #[arg(long, default_value_t = 1.0)]
    rate_gbps: f64,

    /// JSON phase schedule for `--adaptive` (§6). Falls back to the
    /// built-in HTTP-peak/DNS-burst/SSH-stable schedule if omitted.
    #[arg(long, value_name = "FILE")]
    phases: Option<PathBuf>,

    /// Restart from the beginning of the corpus on exhaustion instead of
    /// stopping.
    #[arg(long = "loop")]
    loop_forever: bool,

    /// Stop after this many seconds, regardless of corpus exhaustion.
    #[arg(long, value_name = "SECS")]
    duration: Option<u64>,

    #[arg(long, default_value_t = 1024)]
    burst_size: usize,

    #[arg(long, default_value = "info")]
    log_level: String,

    /// Serve `/metrics` and `/healthz` on this port, if set.
    #[arg(long, value_name = "PORT")]
    metrics_port: Option<u16>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let logging = LoggingConfig { level: cli.log_level.clone(), log_file: None };
    if let Err(err) = init_tracing(&logging) {
        eprintln!("failed to initialise logging: {err}");
        std::process::exit(1);
    }

    if let Err(err) = run(cli).await {
        error!(%err, "replayer exited with error");
        shutdown_tracing();
        std::process::exit(1);
    }
    shutdown_tracing();
}

async fn run(cli: Cli) -> ddos_core::Result<()> {
    let records = PcapReader::read_all(fs::File::open(&cli.pcap)?)?;
    info!(records = records.len(), pcap = ?cli.pcap, "loaded replay corpus");

    let mode = if cli.pcap_timed {
        PacingMode::PcapTimed { jitter_pct: cli.jitter, speedup: cli.speedup }
    } else if cli.adaptive {
        let schedule = match &cli.phases {
            Some(path) => PhaseSchedule::from_json(&fs::read_to_string(path)?)?,
            None => PhaseSchedule::default_three_phase(),
        };
        PacingMode::Adaptive { schedule }
    } else {
        PacingMode::FreeRun { rate_gbps: cli.rate_gbps }
    };

    let force_quit = Arc::new(AtomicBool::new(false));
    spawn_signal_handler(force_quit.clone());

    let metrics = match cli.metrics_port {
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

    let deadline = cli.duration.map(|secs| Instant::now() + Duration::from_secs(secs));
    let burst_size = cli.burst_size;
    let loop_forever = cli.loop_forever;
    let rate_gbps = cli.rate_gbps;

    let handle = std::thread::Builder::new()
        .name("ddos-replayer-tx".into())
        .spawn(move || {
            send_loop(records, mode, loop_forever, rate_gbps, burst_size, deadline, force_quit, metrics)
        })
        .expect("failed to spawn replay thread");

    let outcome = handle.join().expect("replay thread panicked");
    info!(sent = outcome.sent, dropped = outcome.dropped, "replay finished");
    Ok(())
}

struct SendSummary {
    sent: u64,
    dropped: u64,
}

/// Drives the TX loop to completion (or cancellation). Runs on its own
/// thread so `send_burst`'s synchronous calls never block the async
/// runtime driving the signal handler and metrics server.
fn send_loop(
    records: Vec<ddos_core::replayer::PcapRecord>,
    mode: PacingMode,
    loop_forever: bool,
    rate_gbps: f64,
    burst_size: usize,
    deadline: Option<Instant>,
    force_quit: Arc<AtomicBool>,
    metrics: Option<Arc<ddos_core::telemetry::Metrics>>,
) -> SendSummary {
    // Sequential exhaustion only applies to PcapTimed: FreeRun and Adaptive
    // draw randomly from the corpus and never advance the sequential cursor
    // `is_exhausted` checks.
    let is_sequential_mode = matches!(mode, PacingMode::PcapTimed { .. });

    let start = Instant::now();
    let mut replayer = Replayer::new(records, mode, start, loop_forever);
    let mut nic = SoftNic::new(1);
    let mut rng = rand::rng();
    let mut pacer = Pacer::new(rate_gbps * 1e9, 10_000_000.0, start);

    let mut sent = 0u64;
    let mut dropped = 0u64;

    while !force_quit.load(Ordering::Acquire) {
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                break;
            }
        }
        if is_sequential_mode && replayer.is_exhausted() {
            break;
        }

        let now = Instant::now();
        let elapsed_secs = now.duration_since(start).as_secs_f64();
        let outcome = replayer.send_burst(&mut nic, 0, burst_size, elapsed_secs, now, &mut rng);
        let accepted = outcome.accepted as u64;
        let dropped_this_burst = (burst_size as u64).saturating_sub(accepted);
        sent += accepted;
        dropped += dropped_this_burst;

        if let Some(metrics) = &metrics {
            metrics.replay_packets_sent_total.add(accepted, &[]);
            metrics.replay_packets_dropped_total.add(dropped_this_burst, &[]);
        }

        if !outcome.recommended_delay.is_zero() {
            std::thread::sleep(outcome.recommended_delay);
        } else {
            pacer.tick(Instant::now());
            let avg_frame_bytes = 512.0;
            while !pacer.can_send((burst_size as f64 * avg_frame_bytes) as usize) {
                std::thread::sleep(Duration::from_micros(100));
                pacer.tick(Instant::now());
                if force_quit.load(Ordering::Acquire) {
                    break;
                }
            }
            pacer.on_sent((burst_size as f64 * avg_frame_bytes) as usize);
        }
    }

    SendSummary { sent, dropped }
}

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
