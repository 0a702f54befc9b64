pub mod metrics;
pub mod metrics_server;
pub mod telemetry;
