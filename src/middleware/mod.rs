pub mod logging;
pub mod metrics;
pub mod upgrade_gate;

pub use logging::RequestLogging;
pub use metrics::MetricsMiddleware;
pub use upgrade_gate::UpgradeGate;
