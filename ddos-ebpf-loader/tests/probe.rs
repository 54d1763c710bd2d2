use ddos_ebpf_loader::IngressCounters;

#[test]
fn ingress_counters_default_is_all_zero() {
    let counters = IngressCounters::default();
    assert_eq!(counters.total, 0);
    assert_eq!(counters.tcp, 0);
    assert_eq!(counters.udp, 0);
    assert_eq!(counters.icmp, 0);
    assert_eq!(counters.syn, 0);
    assert!(counters.queue_counts.iter().all(|&c| c == 0));
}

#[test]
fn queue_counts_array_has_num_queues_slots() {
    let counters = IngressCounters::default();
    assert_eq!(counters.queue_counts.len(), ddos_ebpf_common::NUM_QUEUES as usize);
}
