//! Packet classification: L2 -> L3 -> L4, plus HTTP first-line and QUIC
//! first-frame heuristics.
//!
//! Grounded on the bounds-checking discipline of the XDP program this
//! workspace's eBPF crates are built from (`ddos-ebpf-xdp`), but expressed
//! as safe slice reads instead of verifier-checked raw pointers: this parser
//! runs in userspace, not in the kernel, and has no verifier to satisfy.

use crate::config::ClassificationConfig;

const ETH_HDR_LEN: usize = 14;
const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_VLAN: u16 = 0x8100;

const IPPROTO_ICMP: u8 = 1;
const IPPROTO_TCP: u8 = 6;
const IPPROTO_UDP: u8 = 17;

const IPV4_FLAG_MF: u16 = 0x2000;
const IPV4_FRAG_OFFSET_MASK: u16 = 0x1FFF;

const TCP_FLAG_FIN: u8 = 0x01;
const TCP_FLAG_SYN: u8 = 0x02;
const TCP_FLAG_RST: u8 = 0x04;
const TCP_FLAG_ACK: u8 = 0x10;

const QUIC_PORTS: [u16; 2] = [443, 8443];
const QUIC_FIXED_BIT: u8 = 0x40;
const QUIC_LONG_HEADER_BIT: u8 = 0x80;
const QUIC_FRAME_ACK: u8 = 0x02;
const QUIC_FRAME_ACK_ECN: u8 = 0x03;
const QUIC_FRAME_PADDING: u8 = 0x00;
/// Bound on the tolerant ACK-frame scan (§4.1): never loop unboundedly on a
/// malformed or adversarial frame stream.
const QUIC_SCAN_MAX_ITERATIONS: u32 = 64;

const HTTP_DST_PORT: u16 = 80;
const HTTP_METHODS: [(&[u8], HttpMethod); 6] = [
    (b"GET ", HttpMethod::Get),
    (b"POST ", HttpMethod::Post),
    (b"HEAD ", HttpMethod::Head),
    (b"PUT ", HttpMethod::Put),
    (b"DELETE ", HttpMethod::Delete),
    (b"OPTIONS ", HttpMethod::Options),
];
const HTTP_PATH_MAX_LEN: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum L4Proto {
    Tcp,
    Udp,
    Icmp,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Head,
    Put,
    Delete,
    Options,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HttpFacts {
    pub method: Option<HttpMethod>,
    /// 32-bit hash of the path, up to the first space/CRLF, capped at
    /// `HTTP_PATH_MAX_LEN` bytes.
    pub path_hash: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QuicFacts {
    pub ack_frame_count: u32,
    pub largest_acked_pn: u64,
}

/// One packet's classification, built entirely on the worker's stack.
/// Never stored past the packet that produced it.
#[derive(Debug, Clone, Copy)]
pub struct PacketFacts {
    pub len_bytes: u16,
    pub is_ipv4: bool,
    pub src_ip: u32,
    pub dst_ip: u32,
    pub l4_proto: L4Proto,
    pub tcp_flags: u8,
    pub dst_port_be: u16,
    pub src_port_be: u16,
    pub fragmented: bool,
    pub is_baseline: bool,
    pub is_attack: bool,
    pub http: Option<HttpFacts>,
    pub quic: Option<QuicFacts>,
}

impl PacketFacts {
    pub fn is_syn(&self) -> bool {
        self.l4_proto == L4Proto::Tcp && self.tcp_flags & TCP_FLAG_SYN != 0
    }

    pub fn is_syn_ack(&self) -> bool {
        self.is_syn() && self.tcp_flags & TCP_FLAG_ACK != 0
    }

    /// TCP flags exactly equal to the ACK bit, nothing else set.
    pub fn is_pure_ack(&self) -> bool {
        self.l4_proto == L4Proto::Tcp && self.tcp_flags == TCP_FLAG_ACK
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    Truncated,
    NonIpv4,
    Malformed,
}

pub struct Parser;

impl Parser {
    /// Classify one Ethernet frame. Never reads past `frame.len()`.
    pub fn parse(frame: &[u8], cfg: &ClassificationConfig) -> Result<PacketFacts, ParseError> {
        if frame.len() < ETH_HDR_LEN {
            return Err(ParseError::NonIpv4);
        }

        let mut offset = 12; // start of EtherType
        let mut ethertype = be16(frame, offset).ok_or(ParseError::Truncated)?;
        offset += 2;
        // Walk up to two stacked VLAN tags, matching the XDP classifier.
        for _ in 0..2 {
            if ethertype != ETHERTYPE_VLAN {
                break;
            }
            offset += 2; // skip tag control information
            ethertype = be16(frame, offset).ok_or(ParseError::Truncated)?;
            offset += 2;
        }

        if ethertype != ETHERTYPE_IPV4 {
            return Err(ParseError::NonIpv4);
        }

        let ip_start = offset;
        if frame.len() < ip_start + 20 {
            return Err(ParseError::Truncated);
        }

        let ver_ihl = frame[ip_start];
        if ver_ihl >> 4 != 4 {
            return Err(ParseError::NonIpv4);
        }
        let ihl = (ver_ihl & 0x0F) as usize * 4;
        if ihl < 20 || frame.len() < ip_start + ihl {
            return Err(ParseError::Malformed);
        }

        let frag_field = be16(frame, ip_start + 6).ok_or(ParseError::Truncated)?;
        let more_fragments = frag_field & IPV4_FLAG_MF != 0;
        let frag_offset_nonzero = frag_field & IPV4_FRAG_OFFSET_MASK != 0;
        let fragmented = more_fragments || frag_offset_nonzero;

        let proto = frame[ip_start + 9];
        let src_ip = be32(frame, ip_start + 12).ok_or(ParseError::Truncated)?;
        let dst_ip = be32(frame, ip_start + 16).ok_or(ParseError::Truncated)?;

        let l4_start = ip_start + ihl;
        let mut facts = PacketFacts {
            len_bytes: frame.len().min(u16::MAX as usize) as u16,
            is_ipv4: true,
            src_ip,
            dst_ip,
            l4_proto: L4Proto::Other,
            tcp_flags: 0,
            dst_port_be: 0,
            src_port_be: 0,
            fragmented,
            is_baseline: cfg.baseline_net.contains(src_ip),
            is_attack: cfg.attack_net.contains(src_ip),
            http: None,
            quic: None,
        };

        match proto {
            IPPROTO_TCP => {
                if frame.len() < l4_start + 20 {
                    return Err(ParseError::Truncated);
                }
                facts.l4_proto = L4Proto::Tcp;
                facts.src_port_be = be16_net(frame, l4_start).ok_or(ParseError::Truncated)?;
                facts.dst_port_be = be16_net(frame, l4_start + 2).ok_or(ParseError::Truncated)?;
                facts.tcp_flags = frame[l4_start + 13]
                    & (TCP_FLAG_FIN | TCP_FLAG_SYN | TCP_FLAG_RST | TCP_FLAG_ACK);

                let dst_port_host = u16::from_be(facts.dst_port_be);
                if dst_port_host == HTTP_DST_PORT {
                    let data_offset = ((frame[l4_start + 12] >> 4) as usize) * 4;
                    let payload_start = l4_start + data_offset;
                    if data_offset >= 20 && frame.len() > payload_start {
                        facts.http = parse_http_first_line(&frame[payload_start..]);
                    }
                }
            }
            IPPROTO_UDP => {
                if frame.len() < l4_start + 8 {
                    return Err(ParseError::Truncated);
                }
                facts.l4_proto = L4Proto::Udp;
                facts.src_port_be = be16_net(frame, l4_start).ok_or(ParseError::Truncated)?;
                facts.dst_port_be = be16_net(frame, l4_start + 2).ok_or(ParseError::Truncated)?;

                let src_port_host = u16::from_be(facts.src_port_be);
                let dst_port_host = u16::from_be(facts.dst_port_be);
                let payload_start = l4_start + 8;
                if frame.len() > payload_start
                    && (QUIC_PORTS.contains(&src_port_host) || QUIC_PORTS.contains(&dst_port_host))
                {
                    facts.quic = parse_quic(&frame[payload_start..]);
                }
            }
            IPPROTO_ICMP => {
                facts.l4_proto = L4Proto::Icmp;
            }
            _ => {}
        }

        Ok(facts)
    }
}

fn be16(buf: &[u8], at: usize) -> Option<u16> {
    buf.get(at..at + 2).map(|b| u16::from_be_bytes([b[0], b[1]]))
}

fn be32(buf: &[u8], at: usize) -> Option<u32> {
    buf.get(at..at + 4).map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

/// Same bytes as `be16` but returned still in network order, for fields the
/// caller only ever compares bit-for-bit against other network-order values.
fn be16_net(buf: &[u8], at: usize) -> Option<u16> {
    buf.get(at..at + 2).map(|b| u16::from_ne_bytes([b[0], b[1]]))
}

fn parse_http_first_line(payload: &[u8]) -> Option<HttpFacts> {
    let (prefix, method) =
        HTTP_METHODS.iter().find(|(prefix, _)| payload.starts_with(prefix))?;
    let rest = &payload[prefix.len()..];
    let end = rest
        .iter()
        .take(HTTP_PATH_MAX_LEN)
        .position(|&b| b == b' ' || b == b'\r' || b == b'\n')
        .unwrap_or_else(|| rest.len().min(HTTP_PATH_MAX_LEN));
    let path = &rest[..end];
    Some(HttpFacts { method: Some(*method), path_hash: fnv1a32(path) })
}

fn fnv1a32(data: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c9dc5;
    for &b in data {
        hash ^= b as u32;
        hash = hash.wrapping_mul(0x01000193);
    }
    hash
}

/// QUIC heuristic per §4.1: fixed bit set, recognised long-header version (or
/// a tolerant short-header passthrough), then a bounded scan for ACK frames.
fn parse_quic(payload: &[u8]) -> Option<QuicFacts> {
    let first = *payload.first()?;
    if first & QUIC_FIXED_BIT == 0 {
        return None;
    }

    let frame_start = if first & QUIC_LONG_HEADER_BIT != 0 {
        if payload.len() < 5 {
            return None;
        }
        let version = be32(payload, 1)?;
        let recognised = version == 0x0000_0001 || (version & 0xffff_ff00) == 0xff00_0000;
        if !recognised {
            return None;
        }
        // Simplified offset: version(4) + dcid_len(1) + dcid + scid_len(1) + scid.
        // Real DCID/SCID lengths vary; this is the same tolerant
        // approximation the source's heuristic relies on (see design notes).
        let mut off = 5;
        let dcid_len = *payload.get(off)? as usize;
        off += 1 + dcid_len;
        let scid_len = *payload.get(off)? as usize;
        off += 1 + scid_len;
        off
    } else {
        // Short header: 1-byte flags + connection id, length unknown to us.
        // We still scan from byte 1 onward — purely a heuristic pass.
        1
    };

    let mut facts = QuicFacts::default();
    let mut offset = frame_start;
    let mut iterations = 0u32;
    while offset < payload.len() && iterations < QUIC_SCAN_MAX_ITERATIONS {
        iterations += 1;
        let frame_type = payload[offset];
        match frame_type {
            QUIC_FRAME_ACK | QUIC_FRAME_ACK_ECN => {
                facts.ack_frame_count += 1;
                if let Some((largest, consumed)) = read_varint(&payload[offset + 1..]) {
                    facts.largest_acked_pn = facts.largest_acked_pn.max(largest);
                    offset += 1 + consumed.max(1);
                    continue;
                }
                offset += 1;
            }
            QUIC_FRAME_PADDING => {
                offset += 1;
            }
            _ => {
                offset += 1;
            }
        }
    }

    Some(facts)
}

/// RFC 9000 variable-length integer decode: the top two bits of the first
/// byte select a 1/2/4/8-byte encoding. Returns `(value, bytes_consumed)`.
fn read_varint(buf: &[u8]) -> Option<(u64, usize)> {
    let first = *buf.first()?;
    let len = 1usize << (first >> 6);
    if buf.len() < len {
        return None;
    }
    let mut value = (first & 0x3F) as u64;
    for &b in &buf[1..len] {
        value = (value << 8) | b as u64;
    }
    Some((value, len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClassificationConfig;

    fn cfg() -> ClassificationConfig {
        ClassificationConfig::new("10.10.1.0/24", "10.10.2.0/24").unwrap()
    }

    fn eth_ipv4_tcp(src: [u8; 4], dst: [u8; 4], flags: u8, payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![0u8; 14];
        frame[12] = 0x08;
        frame[13] = 0x00;

        let mut ip = vec![0u8; 20];
        ip[0] = 0x45;
        ip[9] = IPPROTO_TCP;
        ip[12..16].copy_from_slice(&src);
        ip[16..20].copy_from_slice(&dst);

        let mut tcp = vec![0u8; 20];
        tcp[0..2].copy_from_slice(&1234u16.to_be_bytes());
        tcp[2..4].copy_from_slice(&80u16.to_be_bytes());
        tcp[12] = 5 << 4;
        tcp[13] = flags;

        frame.extend(ip);
        frame.extend(tcp);
        frame.extend(payload);
        frame
    }

    #[test]
    fn too_short_is_non_ipv4() {
        let frame = vec![0u8; 10];
        assert_eq!(Parser::parse(&frame, &cfg()), Err(ParseError::NonIpv4));
    }

    #[test]
    fn non_ipv4_ethertype_is_non_ipv4() {
        let mut frame = vec![0u8; 14];
        frame[12] = 0x86;
        frame[13] = 0xDD; // IPv6
        assert_eq!(Parser::parse(&frame, &cfg()), Err(ParseError::NonIpv4));
    }

    #[test]
    fn syn_packet_from_attack_net_classified() {
        let frame = eth_ipv4_tcp([10, 10, 2, 5], [10, 10, 1, 1], TCP_FLAG_SYN, &[]);
        let facts = Parser::parse(&frame, &cfg()).unwrap();
        assert!(facts.is_syn());
        assert!(!facts.is_syn_ack());
        assert!(facts.is_attack);
        assert!(!facts.is_baseline);
    }

    #[test]
    fn pure_ack_detected() {
        let frame = eth_ipv4_tcp([10, 10, 1, 5], [10, 10, 1, 1], TCP_FLAG_ACK, &[]);
        let facts = Parser::parse(&frame, &cfg()).unwrap();
        assert!(facts.is_pure_ack());
        assert!(facts.is_baseline);
    }

    #[test]
    fn fragmented_packet_detected() {
        let mut frame = eth_ipv4_tcp([10, 10, 1, 5], [10, 10, 1, 1], 0, &[]);
        // Set MF bit in the IPv4 flags/frag-offset field (byte offset 14+6).
        frame[14 + 6] = 0x20;
        let facts = Parser::parse(&frame, &cfg()).unwrap();
        assert!(facts.fragmented);
    }

    #[test]
    fn non_fragmented_packet_not_flagged() {
        let frame = eth_ipv4_tcp([10, 10, 1, 5], [10, 10, 1, 1], 0, &[]);
        let facts = Parser::parse(&frame, &cfg()).unwrap();
        assert!(!facts.fragmented);
    }

    #[test]
    fn http_get_parsed_on_port_80() {
        let frame = eth_ipv4_tcp([10, 10, 1, 5], [10, 10, 1, 1], TCP_FLAG_ACK, b"GET /foo HTTP/1.1\r\n");
        let facts = Parser::parse(&frame, &cfg()).unwrap();
        let http = facts.http.expect("http facts present");
        assert_eq!(http.method, Some(HttpMethod::Get));
    }

    #[test]
    fn quic_varint_one_byte() {
        let buf = [0x25u8];
        assert_eq!(read_varint(&buf), Some((0x25, 1)));
    }

    #[test]
    fn quic_varint_two_byte() {
        let buf = [0x7b, 0xbd];
        let (val, len) = read_varint(&buf).unwrap();
        assert_eq!(len, 2);
        assert_eq!(val, 0x3bbd);
    }

    #[test]
    fn quic_scan_never_exceeds_bound_on_adversarial_input() {
        // Every byte is a frame type that advances by exactly 1 — the
        // pathological case for an unbounded scanner.
        let long_header = {
            let mut v = vec![QUIC_FIXED_BIT | QUIC_LONG_HEADER_BIT];
            v.extend_from_slice(&1u32.to_be_bytes());
            v.push(0); // dcid_len = 0
            v.push(0); // scid_len = 0
            v.extend(std::iter::repeat(0xFFu8).take(10_000));
            v
        };
        let facts = parse_quic(&long_header).expect("fixed bit set, recognised version");
        // Bound is enforced internally; reaching here without hanging is the
        // property under test.
        assert!(facts.ack_frame_count <= QUIC_SCAN_MAX_ITERATIONS);
    }
}
