//! XDP program: a software RSS fan-out plus coarse in-kernel packet counters
//! (§10). Classifies Ethernet/IPv4/TCP/UDP/ICMP, hashes the 5-tuple into one
//! of `NUM_QUEUES` software queues the way a NIC's own RSS hash would, and
//! counts totals into global BPF arrays the userspace loader can read as an
//! independent, pre-parser confirmation of the same traffic Telemetry
//! reports from the worker side.
//!
//! Repurposed from this repo's own TCP SYN fingerprint-capture XDP program:
//! same header structs and bounds-checked `ptr_at` pattern, different
//! payload — we count and hash instead of capturing handshake bytes into an
//! LRU map.
#![no_std]
#![no_main]

use aya_ebpf::{
    macros::{map, xdp},
    maps::Array,
    programs::XdpContext,
};

use core::mem;
use ddos_ebpf_common::{proto_counter, NUM_QUEUES};

// ── Network protocol constants (network byte order on LE host) ──────────────

const ETH_P_IP: u16 = 0x0800_u16.swap_bytes();
const ETH_P_8021Q: u16 = 0x8100_u16.swap_bytes();
const ETH_P_8021AD: u16 = 0x88A8_u16.swap_bytes();

const IP_MF: u16 = 0x2000_u16.swap_bytes();
const IP_OFFSET: u16 = 0x1FFF_u16.swap_bytes();

const IPPROTO_ICMP: u8 = 1;
const IPPROTO_TCP: u8 = 6;
const IPPROTO_UDP: u8 = 17;

const TCP_FLAG_SYN: u8 = 0x02;
const TCP_FLAG_ACK: u8 = 0x10;

// ── Network header definitions ───────────────────────────────────────────────
//
// aya-ebpf-bindings does not include ethernet/IP/TCP/UDP headers (those are
// UAPI network headers, not BPF-specific). We define minimal versions here.

#[repr(C)]
struct EthHdr {
    h_dest: [u8; 6],
    h_source: [u8; 6],
    h_proto: u16, // network byte order
}

#[repr(C)]
struct VlanHdr {
    tci: u16,
    encapsulated_proto: u16, // network byte order
}

/// Minimal IPv4 header (no options).
#[repr(C)]
struct IpHdr {
    version_ihl: u8,
    tos: u8,
    tot_len: u16,
    id: u16,
    frag_off: u16, // network byte order; contains MF/offset flags
    ttl: u8,
    protocol: u8,
    check: u16,
    saddr: u32, // network byte order
    daddr: u32, // network byte order
}

impl IpHdr {
    #[inline(always)]
    fn ihl(&self) -> u8 {
        self.version_ihl & 0x0F
    }
}

/// Minimal TCP header (fixed 20 bytes). Unlike a bitfield cast, `flags` is
/// read as a plain byte at its fixed network offset, so no endianness
/// juggling is needed for the bits this program actually inspects.
#[repr(C)]
struct TcpHdr {
    source: u16, // network byte order
    dest: u16,   // network byte order
    seq: u32,
    ack_seq: u32,
    doff_res: u8,
    flags: u8,
    window: u16,
    check: u16,
    urg_ptr: u16,
}

impl TcpHdr {
    #[inline(always)]
    fn syn(&self) -> bool {
        self.flags & TCP_FLAG_SYN != 0
    }
    #[inline(always)]
    fn ack(&self) -> bool {
        self.flags & TCP_FLAG_ACK != 0
    }
}

#[repr(C)]
struct UdpHdr {
    source: u16, // network byte order
    dest: u16,   // network byte order
    len: u16,
    check: u16,
}

// ── BPF maps ─────────────────────────────────────────────────────────────────

#[map]
#[allow(non_upper_case_globals)]
static queue_counts: Array<u64> = Array::with_max_entries(NUM_QUEUES, 0);

#[map]
#[allow(non_upper_case_globals)]
static proto_counts: Array<u64> = Array::with_max_entries(proto_counter::COUNT, 0);

// ── Packet access helper ─────────────────────────────────────────────────────

/// Returns a const pointer to `T` at `offset` bytes from the start of the
/// packet, or `None` if the access would exceed `data_end`.
///
/// The BPF verifier accepts this pattern (explicit bounds check before cast).
#[inline(always)]
unsafe fn ptr_at<T>(ctx: &XdpContext, offset: usize) -> Option<*const T> {
    let start = ctx.data();
    let end = ctx.data_end();
    let access_end = start.checked_add(offset)?.checked_add(mem::size_of::<T>())?;
    if access_end > end {
        return None;
    }
    Some(start.checked_add(offset)? as *const T)
}

#[inline(always)]
fn bump(map: &Array<u64>, idx: u32) {
    if let Some(ptr) = map.get_ptr_mut(idx) {
        unsafe {
            *ptr = (*ptr).wrapping_add(1);
        }
    }
}

/// Folds a 5-tuple into a queue index the same way a NIC's Toeplitz RSS hash
/// would, so traffic from one flow always lands in the same software queue.
#[inline(always)]
fn rss_hash(src_ip: u32, dst_ip: u32, src_port: u16, dst_port: u16, proto: u8) -> u32 {
    let mut h: u32 = 0x9e37_79b9;
    h ^= src_ip;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= dst_ip;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= (u32::from(src_port) << 16) | u32::from(dst_port);
    h = h.wrapping_mul(0x27d4_eb2f);
    h ^= u32::from(proto);
    h ^ (h >> 15)
}

// ── Entry point ──────────────────────────────────────────────────────────────

#[xdp]
pub fn ddos_xdp_classify(ctx: XdpContext) -> u32 {
    let _ = try_classify(&ctx);
    aya_ebpf::bindings::xdp_action::XDP_PASS
}

fn try_classify(ctx: &XdpContext) -> Result<(), ()> {
    let mut offset = 0usize;

    let eth = unsafe { ptr_at::<EthHdr>(ctx, offset).ok_or(())? };
    offset = offset.saturating_add(mem::size_of::<EthHdr>());

    let mut eth_type = unsafe { (*eth).h_proto };
    // Up to two VLAN tags (QinQ / 802.1ad), matching the userspace parser.
    for _ in 0..2 {
        if eth_type != ETH_P_8021Q && eth_type != ETH_P_8021AD {
            break;
        }
        let vlan = unsafe { ptr_at::<VlanHdr>(ctx, offset).ok_or(())? };
        offset = offset.saturating_add(mem::size_of::<VlanHdr>());
        eth_type = unsafe { (*vlan).encapsulated_proto };
    }

    if eth_type != ETH_P_IP {
        return Ok(());
    }

    let ip = unsafe { ptr_at::<IpHdr>(ctx, offset).ok_or(())? };
    let ip_hdr_len = unsafe { usize::from((*ip).ihl()).saturating_mul(4) };
    if ip_hdr_len < mem::size_of::<IpHdr>() {
        return Ok(());
    }

    let frag_off = unsafe { (*ip).frag_off };
    let fragmented = frag_off & (IP_MF | IP_OFFSET) != 0;
    let proto = unsafe { (*ip).protocol };
    let src_ip = unsafe { (*ip).saddr };
    let dst_ip = unsafe { (*ip).daddr };

    bump(&proto_counts, proto_counter::TOTAL);

    let l4_start = offset.saturating_add(ip_hdr_len);
    let (src_port, dst_port) = match proto {
        IPPROTO_TCP if !fragmented => {
            bump(&proto_counts, proto_counter::TCP);
            let tcp = unsafe { ptr_at::<TcpHdr>(ctx, l4_start).ok_or(())? };
            if unsafe { (*tcp).syn() && !(*tcp).ack() } {
                bump(&proto_counts, proto_counter::SYN);
            }
            unsafe { ((*tcp).source, (*tcp).dest) }
        }
        IPPROTO_UDP if !fragmented => {
            bump(&proto_counts, proto_counter::UDP);
            let udp = unsafe { ptr_at::<UdpHdr>(ctx, l4_start).ok_or(())? };
            unsafe { ((*udp).source, (*udp).dest) }
        }
        IPPROTO_ICMP => {
            bump(&proto_counts, proto_counter::ICMP);
            (0u16, 0u16)
        }
        _ => (0u16, 0u16),
    };

    let idx = rss_hash(src_ip, dst_ip, src_port, dst_port, proto) % NUM_QUEUES;
    bump(&queue_counts, idx);

    Ok(())
}

// ── Required for no_std + no_main ────────────────────────────────────────────

#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}
