use serde::Deserialize;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::error::{DetectorError, Result};

/// An IPv4 network expressed as `a.b.c.d/n`, per §6's "baseline and attack
/// are /24 (or /16) masks supplied by configuration".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Net {
    network: u32,
    mask: u32,
}

impl Ipv4Net {
    pub fn new(addr: Ipv4Addr, prefix_len: u8) -> Result<Self> {
        if prefix_len > 32 {
            return Err(DetectorError::Config(format!("invalid prefix length /{prefix_len}")));
        }
        let mask = if prefix_len == 0 { 0 } else { u32::MAX << (32 - prefix_len) };
        let network = u32::from(addr) & mask;
        Ok(Self { network, mask })
    }

    pub fn contains(&self, ip_host_order: u32) -> bool {
        ip_host_order & self.mask == self.network
    }
}

impl FromStr for Ipv4Net {
    type Err = DetectorError;

    fn from_str(s: &str) -> Result<Self> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| DetectorError::Config(format!("'{s}' is not in CIDR form a.b.c.d/n")))?;
        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|e| DetectorError::Config(format!("invalid address '{addr}': {e}")))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|e| DetectorError::Config(format!("invalid prefix '{prefix}': {e}")))?;
        Ipv4Net::new(addr, prefix)
    }
}

impl<'de> Deserialize<'de> for Ipv4Net {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Per-worker classification masks (§3, §6). Defaults match the included
/// test topologies.
#[derive(Debug, Clone, Copy)]
pub struct ClassificationConfig {
    pub baseline_net: Ipv4Net,
    pub attack_net: Ipv4Net,
}

impl ClassificationConfig {
    pub fn new(baseline: &str, attack: &str) -> Result<Self> {
        Ok(Self { baseline_net: baseline.parse()?, attack_net: attack.parse()? })
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct NetworksConfig {
    #[serde(default = "default_baseline_net")]
    pub baseline: String,
    #[serde(default = "default_attack_net")]
    pub attack: String,
}

impl Default for NetworksConfig {
    fn default() -> Self {
        Self { baseline: default_baseline_net(), attack: default_attack_net() }
    }
}

fn default_baseline_net() -> String {
    "10.10.1.0/24".to_string()
}

fn default_attack_net() -> String {
    "10.10.2.0/24".to_string()
}

/// A `{baseline, attack}` threshold pair, per §4.4's rule table.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct Threshold {
    pub baseline: f64,
    pub attack: f64,
}

/// Thresholds for every rule in §4.4's table. Units are packets/sec unless
/// noted. Defaults carry over the reference detector's baseline-vs-attack
/// threshold table.
#[derive(Debug, Deserialize, Clone)]
pub struct RuleThresholds {
    #[serde(default = "default_udp_pps")]
    pub udp_pps: Threshold,
    #[serde(default = "default_syn_pps")]
    pub syn_pps: Threshold,
    #[serde(default = "default_icmp_pps")]
    pub icmp_pps: Threshold,
    #[serde(default = "default_http_pps")]
    pub http_req_pps: Threshold,
    /// DNS/NTP amplification, ACK flood and fragmentation are only ever
    /// evaluated against attack-net-sourced traffic (§4.4's "AND source in
    /// attack net" gate), so each takes a single rate rather than a
    /// baseline/attack pair.
    #[serde(default = "default_dns_pps")]
    pub dns_pps: f64,
    #[serde(default = "default_ntp_pps")]
    pub ntp_pps: f64,
    #[serde(default = "default_ack_pps")]
    pub pure_ack_pps: f64,
    #[serde(default = "default_frag_pps")]
    pub frag_pps: f64,
    #[serde(default = "default_total_pps")]
    pub total_pps: Threshold,
    /// Soft per-protocol threshold used by the multi-attack rule (≥2 of
    /// udp/syn/icmp above this bar in the same tick).
    #[serde(default = "default_multi_attack_soft")]
    pub multi_attack_soft_pps: f64,
    #[serde(default = "default_url_concentration_ratio")]
    pub url_concentration_ratio: f64,
    #[serde(default = "default_botnet_unique_ips")]
    pub botnet_unique_ips: u32,
    #[serde(default = "default_botnet_avg_pps_per_ip")]
    pub botnet_avg_pps_per_ip: f64,
    #[serde(default = "default_quic_amplification_ratio")]
    pub quic_amplification_ratio: f64,
    #[serde(default = "default_quic_ack_rate")]
    pub quic_ack_rate_threshold: f64,
    #[serde(default = "default_quic_attack_share")]
    pub quic_attack_share_threshold: f64,
    #[serde(default = "default_quic_pn_jump")]
    pub quic_pn_jump_threshold: u64,
}

impl Default for RuleThresholds {
    fn default() -> Self {
        Self {
            udp_pps: default_udp_pps(),
            syn_pps: default_syn_pps(),
            icmp_pps: default_icmp_pps(),
            http_req_pps: default_http_pps(),
            dns_pps: default_dns_pps(),
            ntp_pps: default_ntp_pps(),
            pure_ack_pps: default_ack_pps(),
            frag_pps: default_frag_pps(),
            total_pps: default_total_pps(),
            multi_attack_soft_pps: default_multi_attack_soft(),
            url_concentration_ratio: default_url_concentration_ratio(),
            botnet_unique_ips: default_botnet_unique_ips(),
            botnet_avg_pps_per_ip: default_botnet_avg_pps_per_ip(),
            quic_amplification_ratio: default_quic_amplification_ratio(),
            quic_ack_rate_threshold: default_quic_ack_rate(),
            quic_attack_share_threshold: default_quic_attack_share(),
            quic_pn_jump_threshold: default_quic_pn_jump(),
        }
    }
}

fn default_udp_pps() -> Threshold {
    Threshold { baseline: 5_000.0, attack: 1_000.0 }
}
fn default_syn_pps() -> Threshold {
    Threshold { baseline: 2_000.0, attack: 500.0 }
}
fn default_icmp_pps() -> Threshold {
    Threshold { baseline: 1_000.0, attack: 200.0 }
}
fn default_http_pps() -> Threshold {
    Threshold { baseline: 3_000.0, attack: 500.0 }
}
fn default_dns_pps() -> f64 {
    500.0
}
fn default_ntp_pps() -> f64 {
    300.0
}
fn default_ack_pps() -> f64 {
    800.0
}
fn default_frag_pps() -> f64 {
    100.0
}
fn default_total_pps() -> Threshold {
    Threshold { baseline: 20_000.0, attack: 5_000.0 }
}
fn default_multi_attack_soft() -> f64 {
    300.0
}
fn default_url_concentration_ratio() -> f64 {
    0.80
}
fn default_botnet_unique_ips() -> u32 {
    50
}
fn default_botnet_avg_pps_per_ip() -> f64 {
    200.0
}
fn default_quic_amplification_ratio() -> f64 {
    2.2
}
fn default_quic_ack_rate() -> f64 {
    10_000.0
}
fn default_quic_attack_share() -> f64 {
    0.05
}
fn default_quic_pn_jump() -> u64 {
    1_000
}

/// Sketch dimensions (§4.2). D rows, W columns (power of two), plus the
/// sampling rate R used on the fast path.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct SketchConfig {
    #[serde(default = "default_sketch_rows")]
    pub rows: usize,
    #[serde(default = "default_sketch_cols")]
    pub cols: usize,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
}

impl Default for SketchConfig {
    fn default() -> Self {
        Self {
            rows: default_sketch_rows(),
            cols: default_sketch_cols(),
            sample_rate: default_sample_rate(),
        }
    }
}

fn default_sketch_rows() -> usize {
    8
}
fn default_sketch_cols() -> usize {
    4096
}
fn default_sample_rate() -> u32 {
    32
}

/// Detection timing (§4.4).
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct TimingConfig {
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default = "default_fast_pass_ms")]
    pub fast_pass_ms: u64,
    #[serde(default = "default_snapshot_secs")]
    pub snapshot_secs: u64,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            fast_pass_ms: default_fast_pass_ms(),
            snapshot_secs: default_snapshot_secs(),
            window_secs: default_window_secs(),
        }
    }
}

fn default_tick_ms() -> u64 {
    10
}
fn default_fast_pass_ms() -> u64 {
    50
}
fn default_snapshot_secs() -> u64 {
    5
}
fn default_window_secs() -> u64 {
    5
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Append-only text log path (§6). `None` disables the file sink; the
    /// stdout snapshot is always emitted.
    #[serde(default)]
    pub log_file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TelemetryConfig {
    /// Metrics server port. `None` disables the Prometheus endpoint.
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

/// Top-level detector configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Number of RX queues / worker threads.
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,
    /// Target burst size drained per RX call (§4.3: 512-2048).
    #[serde(default = "default_burst_size")]
    pub burst_size: usize,
    #[serde(default)]
    pub networks: NetworksConfig,
    #[serde(default)]
    pub thresholds: RuleThresholds,
    #[serde(default)]
    pub sketch: SketchConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_workers: default_num_workers(),
            burst_size: default_burst_size(),
            networks: NetworksConfig::default(),
            thresholds: RuleThresholds::default(),
            sketch: SketchConfig::default(),
            timing: TimingConfig::default(),
            logging: LoggingConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

fn default_num_workers() -> usize {
    4
}
fn default_burst_size() -> usize {
    1024
}

impl Config {
    pub fn classification(&self) -> Result<ClassificationConfig> {
        ClassificationConfig::new(&self.networks.baseline, &self.networks.attack)
    }
}
