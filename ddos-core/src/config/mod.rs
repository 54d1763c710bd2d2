mod loader;
mod types;

pub use loader::load_from_path;
pub use types::{
    ClassificationConfig, Config, Ipv4Net, LoggingConfig, NetworksConfig, RuleThresholds,
    SketchConfig, TelemetryConfig, Threshold, TimingConfig,
};
