//! Observability module
//!
//! Structured lifecycle logging, metrics and one-time subscriber setup for
//! the binary. Library code only emits events; it never installs a subscriber.

pub mod logging_setup;
pub mod metrics_collector;
pub mod structured_logger;

pub use logging_setup::init_logging;
pub use metrics_collector::MetricsCollector;
pub use structured_logger::StructuredLogger;
