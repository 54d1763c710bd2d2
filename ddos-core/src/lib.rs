#![forbid(unsafe_code)]

pub mod config;
pub mod detector;
pub mod error;
pub mod nic;
pub mod packet;
pub mod pacer;
pub mod replayer;
pub mod sketch;
pub mod telemetry;
pub mod worker;

pub use config::{load_from_path, Config};
pub use detector::{Alert, AlertKind, AlertLevel, DetectionState, Detector};
pub use error::{DetectorError, Result};
pub use nic::{EthStats, NicPort, SoftNic, TxBurstGuard};
pub use packet::{HttpMethod, L4Proto, PacketFacts, Parser};
pub use pacer::Pacer;
pub use replayer::{BurstOutcome, PacingMode, PcapReader, PcapRecord, PhaseSchedule, Replayer};
pub use sketch::Sketch;
pub use worker::{Worker, WorkerCounters, WorkerHandle};
