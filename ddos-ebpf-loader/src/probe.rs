use aya::maps::Array;
use aya::programs::{Xdp, XdpFlags};
use aya::{Ebpf, EbpfLoader};
use ddos_ebpf_common::{proto_counter, NUM_QUEUES};
use tracing::info;

use crate::EbpfError;

/// Raw bytes of the compiled XDP BPF object, embedded at compile time.
/// `include_bytes_aligned!` ensures 8-byte alignment required by aya's ELF parser.
static XDP_BPF_BYTES: &[u8] = aya::include_bytes_aligned!(concat!(env!("OUT_DIR"), "/xdp.bpf.o"));

/// Coarse packet counters read from the XDP program's global BPF arrays
/// (§10): an independent, pre-userspace confirmation of the totals
/// Telemetry computes from captured frames on the worker side, not a
/// replacement for them.
#[derive(Debug, Clone, Copy, Default)]
pub struct IngressCounters {
    pub total: u64,
    pub tcp: u64,
    pub udp: u64,
    pub icmp: u64,
    pub syn: u64,
    pub queue_counts: [u64; NUM_QUEUES as usize],
}

/// Manages the eBPF XDP classifier's lifecycle and exposes its counters.
///
/// Attaches the RSS fan-out/classification program to a network interface.
/// The program never drops traffic — it passes every frame through and only
/// counts it — so attaching this is purely observational and changes
/// nothing about how the worker/detector pipeline sees the same traffic.
pub struct XdpIngress {
    _ebpf: Ebpf,
    interface: String,
}

impl XdpIngress {
    /// Load the XDP BPF program and attach it to the given network interface.
    pub fn new(interface: &str) -> Result<Self, EbpfError> {
        // Remove the locked memory limit so BPF maps can be created without
        // depending on `ulimits: memlock: -1` in the deployment environment.
        #[cfg(target_os = "linux")]
        unsafe {
            let rlim =
                libc::rlimit { rlim_cur: libc::RLIM_INFINITY, rlim_max: libc::RLIM_INFINITY };
            let _ = libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim);
        }

        let mut ebpf = EbpfLoader::new().load(XDP_BPF_BYTES).map_err(EbpfError::Load)?;

        let program: &mut Xdp = ebpf
            .program_mut("ddos_xdp_classify")
            .ok_or(EbpfError::ProgramNotFound)?
            .try_into()
            .map_err(EbpfError::ProgramType)?;

        program.load().map_err(EbpfError::ProgramLoad)?;
        program
            .attach(interface, XdpFlags::default())
            .map_err(EbpfError::Attach)?;

        info!(interface, "XDP ingress classifier attached");

        Ok(Self { _ebpf: ebpf, interface: interface.to_string() })
    }

    /// Snapshot the current counters. Returns `None` if the maps are
    /// unreadable (should not happen once `new` has succeeded).
    pub fn counters(&self) -> Option<IngressCounters> {
        let proto_map = Array::<_, u64>::try_from(self._ebpf.map("proto_counts")?).ok()?;
        let queue_map = Array::<_, u64>::try_from(self._ebpf.map("queue_counts")?).ok()?;

        let mut out = IngressCounters {
            total: proto_map.get(&proto_counter::TOTAL, 0).unwrap_or(0),
            tcp: proto_map.get(&proto_counter::TCP, 0).unwrap_or(0),
            udp: proto_map.get(&proto_counter::UDP, 0).unwrap_or(0),
            icmp: proto_map.get(&proto_counter::ICMP, 0).unwrap_or(0),
            syn: proto_map.get(&proto_counter::SYN, 0).unwrap_or(0),
            queue_counts: [0u64; NUM_QUEUES as usize],
        };
        for i in 0..NUM_QUEUES {
            out.queue_counts[i as usize] = queue_map.get(&i, 0).unwrap_or(0);
        }
        Some(out)
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }
}
