pub mod metrics;
pub mod report;
pub mod server;
pub mod tracing;

pub use metrics::{init_metrics, Metrics};
pub use report::{render_snapshot, Snapshot};
pub use server::start_metrics_server;
pub use tracing::{init_tracing, shutdown_tracing};
