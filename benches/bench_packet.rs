//! Micro benchmarks for Ethernet -> IPv4 -> L4 classification (§4.1). Pure
//! CPU, no IO — the same per-packet budget the worker loop has to meet at
//! line rate.
//!
//! ```bash
//! cargo bench --bench bench_packet
//! ```

use criterion::{criterion_group, criterion_main, Criterion};
use ddos_core::config::ClassificationConfig;
use ddos_core::Parser;

const IPPROTO_TCP: u8 = 6;
const IPPROTO_UDP: u8 = 17;
const TCP_FLAG_SYN: u8 = 0x02;
const TCP_FLAG_ACK: u8 = 0x10;

fn cfg() -> ClassificationConfig {
    ClassificationConfig::new("10.10.1.0/24", "10.10.2.0/24").unwrap()
}

fn eth_ipv4_tcp(src: [u8; 4], dst: [u8; 4], dst_port: u16, flags: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![0u8; 14];
    frame[12] = 0x08;
    frame[13] = 0x00;

    let mut ip = vec![0u8; 20];
    ip[0] = 0x45;
    ip[9] = IPPROTO_TCP;
    ip[12..16].copy_from_slice(&src);
    ip[16..20].copy_from_slice(&dst);

    let mut tcp = vec![0u8; 20];
    tcp[0..2].copy_from_slice(&51234u16.to_be_bytes());
    tcp[2..4].copy_from_slice(&dst_port.to_be_bytes());
    tcp[12] = 5 << 4;
    tcp[13] = flags;

    frame.extend(ip);
    frame.extend(tcp);
    frame.extend(payload);
    frame
}

fn eth_ipv4_udp(src: [u8; 4], dst: [u8; 4], dst_port: u16, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![0u8; 14];
    frame[12] = 0x08;
    frame[13] = 0x00;

    let mut ip = vec![0u8; 20];
    ip[0] = 0x45;
    ip[9] = IPPROTO_UDP;
    ip[12..16].copy_from_slice(&src);
    ip[16..20].copy_from_slice(&dst);

    let mut udp = vec![0u8; 8];
    udp[0..2].copy_from_slice(&40000u16.to_be_bytes());
    udp[2..4].copy_from_slice(&dst_port.to_be_bytes());

    frame.extend(ip);
    frame.extend(udp);
    frame.extend(payload);
    frame
}

fn bench_parse_syn(c: &mut Criterion) {
    let frame = eth_ipv4_tcp([10, 10, 2, 5], [10, 10, 1, 1], 443, TCP_FLAG_SYN, &[]);
    let cfg = cfg();

    c.bench_function("parse_tcp_syn", |b| {
        b.iter(|| Parser::parse(std::hint::black_box(&frame), &cfg))
    });
}

fn bench_parse_http_get(c: &mut Criterion) {
    let frame = eth_ipv4_tcp(
        [10, 10, 1, 5],
        [10, 10, 1, 1],
        80,
        TCP_FLAG_ACK,
        b"GET /index.html HTTP/1.1\r\nHost: example.com\r\n\r\n",
    );
    let cfg = cfg();
    let facts = Parser::parse(&frame, &cfg).expect("well-formed frame parses");
    assert!(facts.http.is_some(), "fixture should produce http facts");

    c.bench_function("parse_http_get", |b| {
        b.iter(|| Parser::parse(std::hint::black_box(&frame), &cfg))
    });
}

fn bench_parse_dns_query(c: &mut Criterion) {
    let frame = eth_ipv4_udp([10, 10, 2, 9], [10, 10, 1, 1], 53, &[0u8; 28]);
    let cfg = cfg();

    c.bench_function("parse_udp_dns", |b| {
        b.iter(|| Parser::parse(std::hint::black_box(&frame), &cfg))
    });
}

criterion_group!(packet_benches, bench_parse_syn, bench_parse_http_get, bench_parse_dns_query);
criterion_main!(packet_benches);
