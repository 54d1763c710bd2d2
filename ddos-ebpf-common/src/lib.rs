//! Types and constants shared between the BPF kernel program
//! (`ddos-ebpf-xdp`) and the userspace loader (`ddos-ebpf-loader`).
//!
//! `no_std` so it compiles for both targets:
//! - `bpfel-unknown-none` (kernel-side XDP program)
//! - the host target (userspace loader)
#![no_std]

/// Number of software queues the XDP program fans packets out across via a
/// 5-tuple hash — a software stand-in for the NIC's own RSS hash
/// distribution (§6), since the sandboxed environment this repo runs in has
/// no multi-queue NIC to delegate to.
pub const NUM_QUEUES: u32 = 8;

/// Index layout of the `proto_counts` BPF array. The userspace loader reads
/// these as a coarse, pre-userspace confirmation of the same totals
/// Telemetry computes independently from captured frames — not a
/// replacement for them.
pub mod proto_counter {
    pub const TOTAL: u32 = 0;
    pub const TCP: u32 = 1;
    pub const UDP: u32 = 2;
    pub const ICMP: u32 = 3;
    pub const SYN: u32 = 4;
    pub const COUNT: u32 = 5;
}
