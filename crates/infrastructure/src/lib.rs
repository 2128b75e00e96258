pub mod in_memory_repository;
pub mod in_memory_transport;
pub mod observability;

pub use in_memory_repository::{InMemoryExecutionStore, InMemoryJobRepository};
pub use in_memory_transport::InMemoryTransport;
pub use observability::{init_logging, MetricsCollector, StructuredLogger};
