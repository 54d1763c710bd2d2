//! Prometheus export via `opentelemetry`/`opentelemetry-prometheus`,
//! carried over unchanged in shape from this repo's own proxy metrics
//! (`telemetry::metrics::Metrics`/`init_metrics`), with detector-specific
//! instruments in place of the proxy's connection/backend counters.

use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::Registry;
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    pub packets_total: Counter<u64>,
    pub bytes_total: Counter<u64>,
    pub attack_packets_total: Counter<u64>,
    pub baseline_packets_total: Counter<u64>,

    pub nic_imissed_total: Counter<u64>,
    pub nic_nombuf_total: Counter<u64>,
    pub nic_ierrors_total: Counter<u64>,

    pub alerts_total: Counter<u64>,
    pub detection_latency_ms: Histogram<f64>,

    pub replay_packets_sent_total: Counter<u64>,
    pub replay_packets_dropped_total: Counter<u64>,
}

impl Metrics {
    fn new(meter: Meter) -> Self {
        Self {
            packets_total: meter
                .u64_counter("ddos_detector_packets_total")
                .with_description("Total packets observed across all workers")
                .build(),
            bytes_total: meter
                .u64_counter("ddos_detector_bytes_total")
                .with_description("Total bytes observed across all workers")
                .build(),
            attack_packets_total: meter
                .u64_counter("ddos_detector_attack_packets_total")
                .with_description("Packets sourced from the configured attack network")
                .build(),
            baseline_packets_total: meter
                .u64_counter("ddos_detector_baseline_packets_total")
                .with_description("Packets sourced from the configured baseline network")
                .build(),

            nic_imissed_total: meter
                .u64_counter("ddos_detector_nic_imissed_total")
                .with_description("Hardware-dropped packets (ring full / no matching filter)")
                .build(),
            nic_nombuf_total: meter
                .u64_counter("ddos_detector_nic_nombuf_total")
                .with_description("Packets dropped due to mbuf pool exhaustion")
                .build(),
            nic_ierrors_total: meter
                .u64_counter("ddos_detector_nic_ierrors_total")
                .with_description("NIC-reported receive errors")
                .build(),

            alerts_total: meter
                .u64_counter("ddos_detector_alerts_total")
                .with_description("Total alerts raised, across all rule kinds")
                .build(),
            detection_latency_ms: meter
                .f64_histogram("ddos_detector_detection_latency_ms")
                .with_description("Latency from window/alert boundary to detection, in milliseconds")
                .build(),

            replay_packets_sent_total: meter
                .u64_counter("ddos_replayer_packets_sent_total")
                .with_description("Total packets accepted by the NIC during replay")
                .build(),
            replay_packets_dropped_total: meter
                .u64_counter("ddos_replayer_packets_dropped_total")
                .with_description("Total replay packets the NIC did not accept")
                .build(),
        }
    }
}

pub fn init_metrics() -> Result<(Arc<Metrics>, Registry), Box<dyn std::error::Error + Send + Sync>> {
    let registry = Registry::default();

    let exporter = opentelemetry_prometheus::exporter().with_registry(registry.clone()).build()?;
    let meter_provider = SdkMeterProvider::builder().with_reader(exporter).build();
    global::set_meter_provider(meter_provider);

    let meter = global::meter("ddos-detector");
    let metrics = Arc::new(Metrics::new(meter));

    Ok((metrics, registry))
}
