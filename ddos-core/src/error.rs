use thiserror::Error;

/// Errors that can occur while bringing the detector or replayer up.
///
/// Per the fast-path propagation policy, these are only ever constructed on
/// the slow path (startup, config, signal-driven shutdown) — the worker and
/// parser hot paths never allocate an error value.
#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to parse phases file: {0}")]
    PhasesFile(#[from] serde_json::Error),

    #[error("invalid phase schedule: {0}")]
    InvalidPhases(String),

    #[error("NIC initialisation failed: {0}")]
    Nic(String),

    #[error("no workers configured")]
    NoWorkers,

    #[error("sustained TX failure: {0} consecutive empty tx_burst calls")]
    TxNonRecoverable(u32),
}

pub type Result<T> = std::result::Result<T, DetectorError>;
