//! One RX queue per worker: drain, parse, count, conditionally sketch.
//!
//! The hot loop never suspends (§5) — no `await`, no `Mutex`, no syscalls
//! beyond the NIC burst API. Counters are plain fields per §3's
//! single-writer discipline, not the atomics the teacher's own rate
//! limiter uses for its (retrofitted multi-reader) `Estimator` — see
//! `sketch.rs` for why that pattern does not carry over here.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::{ClassificationConfig, SketchConfig};
use crate::nic::{NicPort, PacketBuf};
use crate::packet::{L4Proto, Parser};
use crate::sketch::Sketch;

/// Cache-aligned, single-writer, monotonic counters. Read by the detector
/// and telemetry with relaxed loads (§5); never reset.
#[repr(align(64))]
#[derive(Default)]
pub struct WorkerCounters {
    pub total_packets: AtomicU64,
    pub total_bytes: AtomicU64,
    pub baseline_packets: AtomicU64,
    pub attack_packets: AtomicU64,
    pub other_ipv4_packets: AtomicU64,
    pub non_ipv4_packets: AtomicU64,

    pub tcp_packets: AtomicU64,
    pub udp_packets: AtomicU64,
    pub icmp_packets: AtomicU64,

    pub syn_packets: AtomicU64,
    pub syn_ack_packets: AtomicU64,
    pub pure_ack_packets: AtomicU64,
    pub fragmented_packets: AtomicU64,

    pub http_requests: AtomicU64,
    pub dns_queries: AtomicU64,
    pub ntp_queries: AtomicU64,

    // Source-network splits of the counters above, needed by the rule
    // table's per-source threshold selection (§4.4): a rule picks the
    // baseline or attack threshold by where the traffic it's counting
    // actually came from, not off one blended aggregate.
    pub udp_packets_baseline: AtomicU64,
    pub udp_packets_attack: AtomicU64,
    pub syn_packets_baseline: AtomicU64,
    pub syn_packets_attack: AtomicU64,
    pub icmp_packets_baseline: AtomicU64,
    pub icmp_packets_attack: AtomicU64,
    pub http_requests_baseline: AtomicU64,
    pub http_requests_attack: AtomicU64,
    pub dns_queries_attack: AtomicU64,
    pub ntp_queries_attack: AtomicU64,
    pub pure_ack_packets_attack: AtomicU64,
    pub fragmented_packets_attack: AtomicU64,

    pub quic_bytes_in: AtomicU64,
    pub quic_bytes_out: AtomicU64,
    pub quic_ack_frames: AtomicU64,
    pub quic_pn_jumps: AtomicU64,

    pub rx_bursts: AtomicU64,
    pub rx_empty_bursts: AtomicU64,
}

// `WorkerCounters` uses `Ordering::Relaxed` throughout, not for lock-free
// multi-writer safety (there is exactly one writer: the owning worker) but
// so that the detector/telemetry readers on other threads observe a torn
// but bounded-stale snapshot without a full fence — acceptable per §5
// because every derived rate is a delta over >= 10ms.
impl WorkerCounters {
    fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> WorkerCountersSnapshot {
        WorkerCountersSnapshot {
            total_packets: self.total_packets.load(Ordering::Relaxed),
            total_bytes: self.total_bytes.load(Ordering::Relaxed),
            baseline_packets: self.baseline_packets.load(Ordering::Relaxed),
            attack_packets: self.attack_packets.load(Ordering::Relaxed),
            other_ipv4_packets: self.other_ipv4_packets.load(Ordering::Relaxed),
            non_ipv4_packets: self.non_ipv4_packets.load(Ordering::Relaxed),
            tcp_packets: self.tcp_packets.load(Ordering::Relaxed),
            udp_packets: self.udp_packets.load(Ordering::Relaxed),
            icmp_packets: self.icmp_packets.load(Ordering::Relaxed),
            syn_packets: self.syn_packets.load(Ordering::Relaxed),
            syn_ack_packets: self.syn_ack_packets.load(Ordering::Relaxed),
            pure_ack_packets: self.pure_ack_packets.load(Ordering::Relaxed),
            fragmented_packets: self.fragmented_packets.load(Ordering::Relaxed),
            http_requests: self.http_requests.load(Ordering::Relaxed),
            dns_queries: self.dns_queries.load(Ordering::Relaxed),
            ntp_queries: self.ntp_queries.load(Ordering::Relaxed),
            udp_packets_baseline: self.udp_packets_baseline.load(Ordering::Relaxed),
            udp_packets_attack: self.udp_packets_attack.load(Ordering::Relaxed),
            syn_packets_baseline: self.syn_packets_baseline.load(Ordering::Relaxed),
            syn_packets_attack: self.syn_packets_attack.load(Ordering::Relaxed),
            icmp_packets_baseline: self.icmp_packets_baseline.load(Ordering::Relaxed),
            icmp_packets_attack: self.icmp_packets_attack.load(Ordering::Relaxed),
            http_requests_baseline: self.http_requests_baseline.load(Ordering::Relaxed),
            http_requests_attack: self.http_requests_attack.load(Ordering::Relaxed),
            dns_queries_attack: self.dns_queries_attack.load(Ordering::Relaxed),
            ntp_queries_attack: self.ntp_queries_attack.load(Ordering::Relaxed),
            pure_ack_packets_attack: self.pure_ack_packets_attack.load(Ordering::Relaxed),
            fragmented_packets_attack: self.fragmented_packets_attack.load(Ordering::Relaxed),
            quic_bytes_in: self.quic_bytes_in.load(Ordering::Relaxed),
            quic_bytes_out: self.quic_bytes_out.load(Ordering::Relaxed),
            quic_ack_frames: self.quic_ack_frames.load(Ordering::Relaxed),
            quic_pn_jumps: self.quic_pn_jumps.load(Ordering::Relaxed),
            rx_bursts: self.rx_bursts.load(Ordering::Relaxed),
            rx_empty_bursts: self.rx_empty_bursts.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time, plain-data copy of `WorkerCounters`, cheap to sum across
/// workers without holding any reference into worker-owned memory.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerCountersSnapshot {
    pub total_packets: u64,
    pub total_bytes: u64,
    pub baseline_packets: u64,
    pub attack_packets: u64,
    pub other_ipv4_packets: u64,
    pub non_ipv4_packets: u64,
    pub tcp_packets: u64,
    pub udp_packets: u64,
    pub icmp_packets: u64,
    pub syn_packets: u64,
    pub syn_ack_packets: u64,
    pub pure_ack_packets: u64,
    pub fragmented_packets: u64,
    pub http_requests: u64,
    pub dns_queries: u64,
    pub ntp_queries: u64,
    pub udp_packets_baseline: u64,
    pub udp_packets_attack: u64,
    pub syn_packets_baseline: u64,
    pub syn_packets_attack: u64,
    pub icmp_packets_baseline: u64,
    pub icmp_packets_attack: u64,
    pub http_requests_baseline: u64,
    pub http_requests_attack: u64,
    pub dns_queries_attack: u64,
    pub ntp_queries_attack: u64,
    pub pure_ack_packets_attack: u64,
    pub fragmented_packets_attack: u64,
    pub quic_bytes_in: u64,
    pub quic_bytes_out: u64,
    pub quic_ack_frames: u64,
    pub quic_pn_jumps: u64,
    pub rx_bursts: u64,
    pub rx_empty_bursts: u64,
}

impl std::ops::Add for WorkerCountersSnapshot {
    type Output = WorkerCountersSnapshot;

    fn add(self, rhs: Self) -> Self::Output {
        WorkerCountersSnapshot {
            total_packets: self.total_packets + rhs.total_packets,
            total_bytes: self.total_bytes + rhs.total_bytes,
            baseline_packets: self.baseline_packets + rhs.baseline_packets,
            attack_packets: self.attack_packets + rhs.attack_packets,
            other_ipv4_packets: self.other_ipv4_packets + rhs.other_ipv4_packets,
            non_ipv4_packets: self.non_ipv4_packets + rhs.non_ipv4_packets,
            tcp_packets: self.tcp_packets + rhs.tcp_packets,
            udp_packets: self.udp_packets + rhs.udp_packets,
            icmp_packets: self.icmp_packets + rhs.icmp_packets,
            syn_packets: self.syn_packets + rhs.syn_packets,
            syn_ack_packets: self.syn_ack_packets + rhs.syn_ack_packets,
            pure_ack_packets: self.pure_ack_packets + rhs.pure_ack_packets,
            fragmented_packets: self.fragmented_packets + rhs.fragmented_packets,
            http_requests: self.http_requests + rhs.http_requests,
            dns_queries: self.dns_queries + rhs.dns_queries,
            ntp_queries: self.ntp_queries + rhs.ntp_queries,
            udp_packets_baseline: self.udp_packets_baseline + rhs.udp_packets_baseline,
            udp_packets_attack: self.udp_packets_attack + rhs.udp_packets_attack,
            syn_packets_baseline: self.syn_packets_baseline + rhs.syn_packets_baseline,
            syn_packets_attack: self.syn_packets_attack + rhs.syn_packets_attack,
            icmp_packets_baseline: self.icmp_packets_baseline + rhs.icmp_packets_baseline,
            icmp_packets_attack: self.icmp_packets_attack + rhs.icmp_packets_attack,
            http_requests_baseline: self.http_requests_baseline + rhs.http_requests_baseline,
            http_requests_attack: self.http_requests_attack + rhs.http_requests_attack,
            dns_queries_attack: self.dns_queries_attack + rhs.dns_queries_attack,
            ntp_queries_attack: self.ntp_queries_attack + rhs.ntp_queries_attack,
            pure_ack_packets_attack: self.pure_ack_packets_attack + rhs.pure_ack_packets_attack,
            fragmented_packets_attack: self.fragmented_packets_attack + rhs.fragmented_packets_attack,
            quic_bytes_in: self.quic_bytes_in + rhs.quic_bytes_in,
            quic_bytes_out: self.quic_bytes_out + rhs.quic_bytes_out,
            quic_ack_frames: self.quic_ack_frames + rhs.quic_ack_frames,
            quic_pn_jumps: self.quic_pn_jumps + rhs.quic_pn_jumps,
            rx_bursts: self.rx_bursts + rhs.rx_bursts,
            rx_empty_bursts: self.rx_empty_bursts + rhs.rx_empty_bursts,
        }
    }
}

/// The counters are monotonic, so a later snapshot minus an earlier one is
/// always a valid per-interval delta (§4.7's snapshot banner uses this to
/// turn cumulative counts into an instantaneous rate).
impl std::ops::Sub for WorkerCountersSnapshot {
    type Output = WorkerCountersSnapshot;

    fn sub(self, rhs: Self) -> Self::Output {
        WorkerCountersSnapshot {
            total_packets: self.total_packets - rhs.total_packets,
            total_bytes: self.total_bytes - rhs.total_bytes,
            baseline_packets: self.baseline_packets - rhs.baseline_packets,
            attack_packets: self.attack_packets - rhs.attack_packets,
            other_ipv4_packets: self.other_ipv4_packets - rhs.other_ipv4_packets,
            non_ipv4_packets: self.non_ipv4_packets - rhs.non_ipv4_packets,
            tcp_packets: self.tcp_packets - rhs.tcp_packets,
            udp_packets: self.udp_packets - rhs.udp_packets,
            icmp_packets: self.icmp_packets - rhs.icmp_packets,
            syn_packets: self.syn_packets - rhs.syn_packets,
            syn_ack_packets: self.syn_ack_packets - rhs.syn_ack_packets,
            pure_ack_packets: self.pure_ack_packets - rhs.pure_ack_packets,
            fragmented_packets: self.fragmented_packets - rhs.fragmented_packets,
            http_requests: self.http_requests - rhs.http_requests,
            dns_queries: self.dns_queries - rhs.dns_queries,
            ntp_queries: self.ntp_queries - rhs.ntp_queries,
            udp_packets_baseline: self.udp_packets_baseline - rhs.udp_packets_baseline,
            udp_packets_attack: self.udp_packets_attack - rhs.udp_packets_attack,
            syn_packets_baseline: self.syn_packets_baseline - rhs.syn_packets_baseline,
            syn_packets_attack: self.syn_packets_attack - rhs.syn_packets_attack,
            icmp_packets_baseline: self.icmp_packets_baseline - rhs.icmp_packets_baseline,
            icmp_packets_attack: self.icmp_packets_attack - rhs.icmp_packets_attack,
            http_requests_baseline: self.http_requests_baseline - rhs.http_requests_baseline,
            http_requests_attack: self.http_requests_attack - rhs.http_requests_attack,
            dns_queries_attack: self.dns_queries_attack - rhs.dns_queries_attack,
            ntp_queries_attack: self.ntp_queries_attack - rhs.ntp_queries_attack,
            pure_ack_packets_attack: self.pure_ack_packets_attack - rhs.pure_ack_packets_attack,
            fragmented_packets_attack: self.fragmented_packets_attack - rhs.fragmented_packets_attack,
            quic_bytes_in: self.quic_bytes_in - rhs.quic_bytes_in,
            quic_bytes_out: self.quic_bytes_out - rhs.quic_bytes_out,
            quic_ack_frames: self.quic_ack_frames - rhs.quic_ack_frames,
            quic_pn_jumps: self.quic_pn_jumps - rhs.quic_pn_jumps,
            rx_bursts: self.rx_bursts - rhs.rx_bursts,
            rx_empty_bursts: self.rx_empty_bursts - rhs.rx_empty_bursts,
        }
    }
}

/// Number of buckets in the per-worker HTTP path histogram used by the
/// URL-concentration rule. Coarser than the sketch: it only needs to tell
/// "one path dominates" from "paths are spread out", not identify the path.
const HTTP_PATH_HISTOGRAM_SLOTS: usize = 1024;

/// Per-worker shared state the detector and telemetry read from another
/// thread: counters plus the sketch-reset request flag (§5).
pub struct WorkerHandle {
    pub counters: WorkerCounters,
    pub sketch: std::sync::Mutex<Sketch>,
    pub reset_sketch_requested: AtomicBool,
    pub http_path_histogram: std::sync::Mutex<Vec<u32>>,
    pub reset_path_histogram_requested: AtomicBool,
}

impl WorkerHandle {
    pub fn new(sketch_cfg: &SketchConfig) -> Self {
        Self {
            counters: WorkerCounters::default(),
            sketch: std::sync::Mutex::new(Sketch::new(sketch_cfg)),
            reset_sketch_requested: AtomicBool::new(false),
            http_path_histogram: std::sync::Mutex::new(vec![0u32; HTTP_PATH_HISTOGRAM_SLOTS]),
            reset_path_histogram_requested: AtomicBool::new(false),
        }
    }
}

/// Well-known UDP ports used to classify DNS/NTP queries (§3's "DNS/NTP
/// query totals").
const DNS_PORT: u16 = 53;
const NTP_PORT: u16 = 123;

/// Drains one RX queue in a tight busy-wait loop, per §4.3.
pub struct Worker {
    queue: usize,
    classification: ClassificationConfig,
    sample_rate: u32,
    handle: Arc<WorkerHandle>,
    force_quit: Arc<AtomicBool>,
    /// Fast-path sample counter; local to the worker, never shared.
    sample_counter: u32,
    /// Largest QUIC acked packet number seen so far, across all flows this
    /// worker has touched. Not per-flow state (§5 forbids that) — a global
    /// high-water mark is a coarser but still useful proxy for the
    /// "optimistic ACK" pattern the reference QUIC detector looks for.
    last_quic_pn: u64,
}

/// A jump in the acked packet number larger than this, relative to the
/// worker's high-water mark, counts as a packet-number anomaly event.
const QUIC_PN_JUMP_MAGNITUDE: u64 = 1_000_000;

impl Worker {
    pub fn new(
        queue: usize,
        classification: ClassificationConfig,
        sample_rate: u32,
        handle: Arc<WorkerHandle>,
        force_quit: Arc<AtomicBool>,
    ) -> Self {
        Self {
            queue,
            classification,
            sample_rate,
            handle,
            force_quit,
            sample_counter: 0,
            last_quic_pn: 0,
        }
    }

    /// Run until `force_quit` is observed. Busy-waits: never sleeps, never
    /// awaits, per §4.3 and §5.
    pub fn run(&mut self, nic: &mut dyn NicPort, burst_size: usize) {
        let mut burst: Vec<PacketBuf> = Vec::with_capacity(burst_size);
        while !self.force_quit.load(Ordering::Acquire) {
            burst.clear();
            let n = nic.rx_burst(self.queue, &mut burst);
            WorkerCounters::add(&self.handle.counters.rx_bursts, 1);
            if n == 0 {
                WorkerCounters::add(&self.handle.counters.rx_empty_bursts, 1);
                continue;
            }
            for frame in &burst {
                self.process_one(frame);
            }
        }
    }

    fn process_one(&mut self, frame: &[u8]) {
        let c = &self.handle.counters;
        WorkerCounters::add(&c.total_packets, 1);

        let facts = match Parser::parse(frame, &self.classification) {
            Ok(facts) => facts,
            Err(crate::packet::ParseError::NonIpv4) => {
                WorkerCounters::add(&c.non_ipv4_packets, 1);
                return;
            }
            Err(crate::packet::ParseError::Truncated) | Err(crate::packet::ParseError::Malformed) => {
                // Both variants only ever fire once the ethertype/IP-version
                // check already passed (packet.rs): this is IPv4 traffic
                // that didn't parse cleanly further in, not non-IPv4 noise.
                // Counts against `other_ipv4_packets` so §8's counter-sum
                // invariant holds for every parser outcome.
                WorkerCounters::add(&c.other_ipv4_packets, 1);
                return;
            }
        };

        WorkerCounters::add(&c.total_bytes, facts.len_bytes as u64);
        if facts.is_baseline {
            WorkerCounters::add(&c.baseline_packets, 1);
        } else if facts.is_attack {
            WorkerCounters::add(&c.attack_packets, 1);
        } else {
            WorkerCounters::add(&c.other_ipv4_packets, 1);
        }

        if facts.fragmented {
            WorkerCounters::add(&c.fragmented_packets, 1);
            if facts.is_attack {
                WorkerCounters::add(&c.fragmented_packets_attack, 1);
            }
        }

        match facts.l4_proto {
            L4Proto::Tcp => {
                WorkerCounters::add(&c.tcp_packets, 1);
                if facts.is_syn_ack() {
                    WorkerCounters::add(&c.syn_ack_packets, 1);
                } else if facts.is_syn() {
                    WorkerCounters::add(&c.syn_packets, 1);
                    if facts.is_baseline {
                        WorkerCounters::add(&c.syn_packets_baseline, 1);
                    } else if facts.is_attack {
                        WorkerCounters::add(&c.syn_packets_attack, 1);
                    }
                }
                if facts.is_pure_ack() {
                    WorkerCounters::add(&c.pure_ack_packets, 1);
                    if facts.is_attack {
                        WorkerCounters::add(&c.pure_ack_packets_attack, 1);
                    }
                }
                if let Some(http) = facts.http {
                    WorkerCounters::add(&c.http_requests, 1);
                    if facts.is_baseline {
                        WorkerCounters::add(&c.http_requests_baseline, 1);
                    } else if facts.is_attack {
                        WorkerCounters::add(&c.http_requests_attack, 1);
                    }
                    let idx = (http.path_hash as usize) % self.path_histogram_slots();
                    let mut hist = self.handle.http_path_histogram.lock().expect("histogram poisoned");
                    hist[idx] = hist[idx].saturating_add(1);
                }
            }
            L4Proto::Udp => {
                WorkerCounters::add(&c.udp_packets, 1);
                if facts.is_baseline {
                    WorkerCounters::add(&c.udp_packets_baseline, 1);
                } else if facts.is_attack {
                    WorkerCounters::add(&c.udp_packets_attack, 1);
                }
                let dst_port = u16::from_be(facts.dst_port_be);
                let src_port = u16::from_be(facts.src_port_be);
                if dst_port == DNS_PORT || src_port == DNS_PORT {
                    WorkerCounters::add(&c.dns_queries, 1);
                    if facts.is_attack {
                        WorkerCounters::add(&c.dns_queries_attack, 1);
                    }
                } else if dst_port == NTP_PORT || src_port == NTP_PORT {
                    WorkerCounters::add(&c.ntp_queries, 1);
                    if facts.is_attack {
                        WorkerCounters::add(&c.ntp_queries_attack, 1);
                    }
                }
                if let Some(quic) = facts.quic {
                    WorkerCounters::add(&c.quic_ack_frames, quic.ack_frame_count as u64);
                    // Treat traffic sourced from a classified host as the
                    // query leg and everything else as the response leg
                    // flowing back in, so bytes_out/bytes_in reads as a
                    // reflection/amplification ratio (§4.4).
                    if facts.is_baseline || facts.is_attack {
                        WorkerCounters::add(&c.quic_bytes_in, facts.len_bytes as u64);
                    } else {
                        WorkerCounters::add(&c.quic_bytes_out, facts.len_bytes as u64);
                    }
                    if quic.ack_frame_count > 0 {
                        let jumped = quic
                            .largest_acked_pn
                            .abs_diff(self.last_quic_pn)
                            > QUIC_PN_JUMP_MAGNITUDE;
                        if jumped && self.last_quic_pn > 0 {
                            WorkerCounters::add(&c.quic_pn_jumps, 1);
                        }
                        self.last_quic_pn = self.last_quic_pn.max(quic.largest_acked_pn);
                    }
                }
            }
            L4Proto::Icmp => {
                WorkerCounters::add(&c.icmp_packets, 1);
                if facts.is_baseline {
                    WorkerCounters::add(&c.icmp_packets_baseline, 1);
                } else if facts.is_attack {
                    WorkerCounters::add(&c.icmp_packets_attack, 1);
                }
            }
            L4Proto::Other => {}
        }

        self.maybe_reset_sketch();
        self.maybe_sample_sketch(&facts);
    }

    fn maybe_reset_sketch(&self) {
        if self
            .handle
            .reset_sketch_requested
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            self.handle.sketch.lock().expect("sketch poisoned").reset();
        }
        if self
            .handle
            .reset_path_histogram_requested
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            self.handle
                .http_path_histogram
                .lock()
                .expect("histogram poisoned")
                .iter_mut()
                .for_each(|c| *c = 0);
        }
    }

    fn path_histogram_slots(&self) -> usize {
        self.handle.http_path_histogram.lock().expect("histogram poisoned").len()
    }

    /// Fast-path sketch update rule (§4.3): 1-in-R sampling restricted to
    /// `is_attack` traffic, weighted by R to keep the estimate unbiased.
    fn maybe_sample_sketch(&mut self, facts: &crate::packet::PacketFacts) {
        if !facts.is_attack {
            return;
        }
        self.sample_counter = self.sample_counter.wrapping_add(1);
        if self.sample_counter % self.sample_rate != 0 {
            return;
        }
        let mut sketch = self.handle.sketch.lock().expect("sketch poisoned");
        sketch.update(facts.src_ip, self.sample_rate);
        sketch.update_bytes(facts.len_bytes as u64 * self.sample_rate as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClassificationConfig, SketchConfig};
    use crate::nic::SoftNic;

    fn classification() -> ClassificationConfig {
        ClassificationConfig::new("10.10.1.0/24", "10.10.2.0/24").unwrap()
    }

    fn eth_ipv4_tcp_syn(src: [u8; 4], dst: [u8; 4]) -> Vec<u8> {
        let mut frame = vec![0u8; 14];
        frame[12] = 0x08;
        frame[13] = 0x00;
        let mut ip = vec![0u8; 20];
        ip[0] = 0x45;
        ip[9] = 6; // TCP
        ip[12..16].copy_from_slice(&src);
        ip[16..20].copy_from_slice(&dst);
        let mut tcp = vec![0u8; 20];
        tcp[12] = 5 << 4;
        tcp[13] = 0x02; // SYN
        frame.extend(ip);
        frame.extend(tcp);
        frame
    }

    #[test]
    fn empty_burst_leaves_counters_unchanged() {
        let handle = Arc::new(WorkerHandle::new(&SketchConfig::default()));
        let force_quit = Arc::new(AtomicBool::new(false));
        let mut worker = Worker::new(0, classification(), 32, handle.clone(), force_quit);
        let mut nic = SoftNic::new(1);
        let mut out = Vec::with_capacity(8);
        assert_eq!(nic.rx_burst(0, &mut out), 0);
        assert_eq!(handle.counters.total_packets.load(Ordering::Relaxed), 0);
        let _ = &mut worker; // constructed but not run: no burst available
    }

    /// An Ethernet+IPv4 frame whose IHL claims more header bytes than the
    /// frame actually carries, tripping `ParseError::Malformed` after the
    /// ethertype/version checks already passed.
    fn eth_ipv4_malformed_ihl(src: [u8; 4], dst: [u8; 4]) -> Vec<u8> {
        let mut frame = vec![0u8; 14];
        frame[12] = 0x08;
        frame[13] = 0x00;
        let mut ip = vec![0u8; 20];
        ip[0] = 0x4F; // version 4, IHL = 15 words (60 bytes) but none follow
        ip[9] = 6;
        ip[12..16].copy_from_slice(&src);
        ip[16..20].copy_from_slice(&dst);
        frame.extend(ip);
        frame
    }

    #[test]
    fn counter_sum_invariant_holds_after_mixed_batch() {
        let handle = Arc::new(WorkerHandle::new(&SketchConfig::default()));
        let force_quit = Arc::new(AtomicBool::new(false));
        let mut worker = Worker::new(0, classification(), 32, handle.clone(), force_quit);

        worker.process_one(&eth_ipv4_tcp_syn([10, 10, 1, 5], [10, 10, 1, 1])); // baseline
        worker.process_one(&eth_ipv4_tcp_syn([10, 10, 2, 5], [10, 10, 1, 1])); // attack
        worker.process_one(&eth_ipv4_tcp_syn([8, 8, 8, 8], [10, 10, 1, 1])); // other ipv4
        worker.process_one(&vec![0u8; 4]); // non-ipv4 (too short)
        worker.process_one(&eth_ipv4_malformed_ihl([10, 10, 2, 5], [10, 10, 1, 1])); // malformed

        let c = &handle.counters;
        let total = c.total_packets.load(Ordering::Relaxed);
        let sum = c.baseline_packets.load(Ordering::Relaxed)
            + c.attack_packets.load(Ordering::Relaxed)
            + c.other_ipv4_packets.load(Ordering::Relaxed)
            + c.non_ipv4_packets.load(Ordering::Relaxed);
        assert_eq!(total, 5);
        assert_eq!(sum, total);
    }

    #[test]
    fn malformed_ipv4_frame_counts_as_other_ipv4_not_dropped() {
        let handle = Arc::new(WorkerHandle::new(&SketchConfig::default()));
        let force_quit = Arc::new(AtomicBool::new(false));
        let mut worker = Worker::new(0, classification(), 32, handle.clone(), force_quit);

        worker.process_one(&eth_ipv4_malformed_ihl([10, 10, 2, 5], [10, 10, 1, 1]));

        let c = &handle.counters;
        assert_eq!(c.total_packets.load(Ordering::Relaxed), 1);
        assert_eq!(c.other_ipv4_packets.load(Ordering::Relaxed), 1);
        assert_eq!(c.non_ipv4_packets.load(Ordering::Relaxed), 0);
        assert_eq!(c.baseline_packets.load(Ordering::Relaxed), 0);
        assert_eq!(c.attack_packets.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn sample_rate_gates_sketch_updates() {
        let handle = Arc::new(WorkerHandle::new(&SketchConfig::default()));
        let force_quit = Arc::new(AtomicBool::new(false));
        let mut worker = Worker::new(0, classification(), 4, handle.clone(), force_quit);

        for _ in 0..4 {
            worker.process_one(&eth_ipv4_tcp_syn([10, 10, 2, 5], [10, 10, 1, 1]));
        }
        let sketch = handle.sketch.lock().unwrap();
        // One sampled update out of four attack packets, weighted by R=4.
        assert_eq!(sketch.total_updates, 1);
    }
}
