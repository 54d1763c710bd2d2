//! Human-readable snapshot banner, emitted every `timing.snapshot_secs`
//! (§4.7). Aggregates worker counters and NIC hardware stats into a single
//! multi-line text record, independent of the Prometheus export in
//! `metrics.rs`.

use std::fmt::Write as _;

use crate::detector::LatencyHistogram;
use crate::nic::EthStats;
use crate::worker::WorkerCountersSnapshot;

/// A nominal core clock used only to express "cycles available per packet"
/// as an approximate budget, not a measured hardware counter — there is no
/// `rdtsc`-equivalent available to this crate's `SoftNic` harness.
const NOMINAL_CORE_HZ: f64 = 3.0e9;

#[derive(Debug, Clone, Copy, Default)]
pub struct Snapshot {
    pub interval_secs: f64,
    pub counters: WorkerCountersSnapshot,
    pub cumulative_packets: u64,
    pub cumulative_bytes: u64,
    pub nic: EthStats,
}

impl Snapshot {
    pub fn instantaneous_gbps(&self) -> f64 {
        if self.interval_secs <= 0.0 {
            return 0.0;
        }
        (self.counters.total_bytes as f64 * 8.0) / self.interval_secs / 1e9
    }

    pub fn cumulative_gbps(&self, total_elapsed_secs: f64) -> f64 {
        if total_elapsed_secs <= 0.0 {
            return 0.0;
        }
        (self.cumulative_bytes as f64 * 8.0) / total_elapsed_secs / 1e9
    }

    pub fn nic_drop_rate(&self) -> f64 {
        let received = self.nic.ipackets + self.nic.imissed;
        if received == 0 {
            return 0.0;
        }
        (self.nic.imissed + self.nic.nombuf) as f64 / received as f64
    }

    pub fn cycles_per_packet_budget(&self) -> f64 {
        let pps = self.counters.total_packets as f64 / self.interval_secs.max(1e-9);
        if pps <= 0.0 {
            return NOMINAL_CORE_HZ;
        }
        NOMINAL_CORE_HZ / pps
    }
}

fn bucket_pct(hist: &LatencyHistogram, idx: usize) -> f64 {
    let total = hist.total_count();
    if total == 0 {
        return 0.0;
    }
    hist.buckets[idx].count as f64 / total as f64 * 100.0
}

/// Renders the banner shown in §4.7: a box-drawing frame around throughput,
/// drop rate, protocol mix, and detection-latency percentages.
pub fn render_snapshot(
    snapshot: &Snapshot,
    total_elapsed_secs: f64,
    first_detection: &LatencyHistogram,
    inter_detection: &LatencyHistogram,
) -> String {
    let c = &snapshot.counters;
    let mut out = String::new();
    let _ = writeln!(out, "┌─ detector snapshot ─────────────────────────────────────────┐");
    let _ = writeln!(
        out,
        "│ throughput: {:>8.3} Gbps (instant)  {:>8.3} Gbps (cumulative) │",
        snapshot.instantaneous_gbps(),
        snapshot.cumulative_gbps(total_elapsed_secs)
    );
    let _ = writeln!(
        out,
        "│ packets: {:>12} total  {:>12} attack  {:>12} baseline │",
        c.total_packets, c.attack_packets, c.baseline_packets
    );
    let _ = writeln!(
        out,
        "│ nic drop rate: {:>7.4}%  imissed={:<10} nombuf={:<10} ierrors={:<10} │",
        snapshot.nic_drop_rate() * 100.0,
        snapshot.nic.imissed,
        snapshot.nic.nombuf,
        snapshot.nic.ierrors
    );
    let _ = writeln!(out, "│ cycles/packet budget (est.): {:>10.1} │", snapshot.cycles_per_packet_budget());
    let _ = writeln!(
        out,
        "│ protocol mix: tcp={:<10} udp={:<10} icmp={:<10} frag={:<10} │",
        c.tcp_packets, c.udp_packets, c.icmp_packets, c.fragmented_packets
    );
    let _ = writeln!(
        out,
        "│ first-detection latency (ms): <20={:>5.1}% 20-30={:>5.1}% 30-40={:>5.1}% 40-50={:>5.1}% >=50={:>5.1}% │",
        bucket_pct(first_detection, 0),
        bucket_pct(first_detection, 1),
        bucket_pct(first_detection, 2),
        bucket_pct(first_detection, 3),
        bucket_pct(first_detection, 4),
    );
    let _ = writeln!(
        out,
        "│ inter-detection latency (ms):  <20={:>5.1}% 20-30={:>5.1}% 30-40={:>5.1}% 40-50={:>5.1}% >=50={:>5.1}% │",
        bucket_pct(inter_detection, 0),
        bucket_pct(inter_detection, 1),
        bucket_pct(inter_detection, 2),
        bucket_pct(inter_detection, 3),
        bucket_pct(inter_detection, 4),
    );
    let _ = writeln!(out, "└───────────────────────────────────────────────────────────────┘");
    out
}
