//! The kernel-bypass NIC boundary.
//!
//! Section 6 of the design deliberately does not fix a framework: a real
//! deployment binds this trait to `dpdk-sys`, an AF_XDP ring, or any other
//! zero-copy driver. `SoftNic` is the in-process stand-in used by tests and
//! by the bundled binaries when no such driver is present.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// One packet buffer as handed to/from the NIC boundary.
///
/// Owned by exactly one side at a time: the RX path hands ownership to the
/// worker, which must release it (drop it) before moving to the next
/// packet; the TX path keeps ownership until `tx_burst` accepts the buffer.
pub type PacketBuf = Vec<u8>;

/// Hardware counters read from `eth_stats`, per §4.7.
#[derive(Debug, Clone, Copy, Default)]
pub struct EthStats {
    pub ipackets: u64,
    pub opackets: u64,
    /// Hardware-dropped due to no matching filter / ring full.
    pub imissed: u64,
    /// Dropped because the mbuf pool was exhausted.
    pub nombuf: u64,
    pub ierrors: u64,
}

/// The NIC binding abstraction named in §6: a buffer-pool-backed port that
/// supports burst RX/TX and hardware counter reads. One `NicPort` instance
/// is shared by all of a port's RX/TX queues; callers pass the queue index.
pub trait NicPort: Send {
    /// Drain up to `out.len()` packets from `queue` into `out`, returning the
    /// number actually filled. Returning 0 on an empty ring is not an error.
    fn rx_burst(&mut self, queue: usize, out: &mut Vec<PacketBuf>) -> usize;

    /// Attempt to transmit every buffer in `bufs` on `queue`, returning how
    /// many were accepted starting from the front. The caller owns and must
    /// release any buffers beyond the returned count.
    fn tx_burst(&mut self, queue: usize, bufs: &[PacketBuf]) -> usize;

    fn eth_stats(&self) -> EthStats;
}

/// An in-process software NIC: RX queues are fed from a shared inbox,
/// TX is recorded into a shared outbox. Used for unit/integration tests and
/// for running the bundled replayer against the bundled detector on one
/// machine without a real kernel-bypass driver.
pub struct SoftNic {
    rx_queues: Vec<Arc<Mutex<VecDeque<PacketBuf>>>>,
    tx_log: Arc<Mutex<Vec<PacketBuf>>>,
    stats: EthStats,
    /// If set, `tx_burst` only accepts this many packets per call,
    /// regardless of how many were offered — used to exercise the
    /// partial-acceptance / buffer-release path (Testable Property #5).
    tx_accept_limit: Option<usize>,
}

impl SoftNic {
    pub fn new(num_queues: usize) -> Self {
        Self {
            rx_queues: (0..num_queues).map(|_| Arc::new(Mutex::new(VecDeque::new()))).collect(),
            tx_log: Arc::new(Mutex::new(Vec::new())),
            stats: EthStats::default(),
            tx_accept_limit: None,
        }
    }

    /// A handle into one RX queue's inbox, for a test or replayer producer
    /// to push frames into.
    pub fn rx_inbox(&self, queue: usize) -> Arc<Mutex<VecDeque<PacketBuf>>> {
        self.rx_queues[queue].clone()
    }

    pub fn tx_log(&self) -> Arc<Mutex<Vec<PacketBuf>>> {
        self.tx_log.clone()
    }

    pub fn with_tx_accept_limit(mut self, limit: usize) -> Self {
        self.tx_accept_limit = Some(limit);
        self
    }
}

impl NicPort for SoftNic {
    fn rx_burst(&mut self, queue: usize, out: &mut Vec<PacketBuf>) -> usize {
        let mut inbox = self.rx_queues[queue].lock().expect("rx inbox poisoned");
        let want = out.capacity().max(1);
        let mut n = 0;
        while n < want {
            match inbox.pop_front() {
                Some(buf) => {
                    out.push(buf);
                    n += 1;
                }
                None => break,
            }
        }
        self.stats.ipackets += n as u64;
        n
    }

    fn tx_burst(&mut self, _queue: usize, bufs: &[PacketBuf]) -> usize {
        let accept = self.tx_accept_limit.unwrap_or(bufs.len()).min(bufs.len());
        let mut log = self.tx_log.lock().expect("tx log poisoned");
        log.extend(bufs[..accept].iter().cloned());
        self.stats.opackets += accept as u64;
        accept
    }

    fn eth_stats(&self) -> EthStats {
        self.stats
    }
}

/// Guarantees that any buffers a `tx_burst` call did not accept are released
/// before this guard goes out of scope, on every exit path (including panics
/// unwinding through the caller). This replaces the source's repeated
/// free-on-all-paths bug: the drop glue is the only release path needed.
pub struct TxBurstGuard<'a> {
    tail: &'a mut Vec<PacketBuf>,
}

impl<'a> TxBurstGuard<'a> {
    /// `bufs` is drained of everything past `accepted`; the guard holds the
    /// unaccepted tail until dropped, at which point it is released
    /// (truncated away) regardless of how the scope is exited.
    pub fn new(bufs: &'a mut Vec<PacketBuf>, accepted: usize) -> Self {
        bufs.drain(..accepted);
        Self { tail: bufs }
    }

    pub fn unaccepted_len(&self) -> usize {
        self.tail.len()
    }
}

impl Drop for TxBurstGuard<'_> {
    fn drop(&mut self) {
        self.tail.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soft_nic_rx_drains_fifo() {
        let mut nic = SoftNic::new(1);
        {
            let inbox = nic.rx_inbox(0);
            let mut inbox = inbox.lock().unwrap();
            inbox.push_back(vec![1, 2, 3]);
            inbox.push_back(vec![4, 5, 6]);
        }
        let mut out = Vec::with_capacity(8);
        let n = nic.rx_burst(0, &mut out);
        assert_eq!(n, 2);
        assert_eq!(out[0], vec![1, 2, 3]);
        assert_eq!(out[1], vec![4, 5, 6]);
    }

    #[test]
    fn empty_rx_burst_returns_zero() {
        let mut nic = SoftNic::new(1);
        let mut out = Vec::with_capacity(8);
        assert_eq!(nic.rx_burst(0, &mut out), 0);
    }

    #[test]
    fn tx_burst_guard_releases_unaccepted_tail_on_every_exit_path() {
        let starting_free_count = 1000usize;
        let mut free_count = starting_free_count;
        let mut nic = SoftNic::new(1).with_tx_accept_limit(1);

        for _ in 0..1000 {
            let mut burst: Vec<PacketBuf> = (0..16u8).map(|i| vec![i]).collect();
            free_count -= burst.len();
            let accepted = nic.tx_burst(0, &burst);
            let guard = TxBurstGuard::new(&mut burst, accepted);
            free_count += guard.unaccepted_len();
            drop(guard);
            free_count += accepted;
        }

        assert_eq!(free_count, starting_free_count);
    }
}
