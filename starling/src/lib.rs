// Starling Node Runtime
//
// This crate implements the Starling API: a windowed, concurrency-bounded task
// scheduler, load-aware service discovery, and the node runtime that
// correlates requests and responses over a pluggable pub/sub transport.
// In-memory collaborators are provided for single-process use and tests.

pub mod config;
pub mod discovery;
pub mod logging;
pub mod memory;
pub mod node;
pub mod scheduler;

// Re-export commonly used types
pub use config::{ConfigError, NodeConfig, SchedulerConfig};
pub use discovery::{FnHealthCheck, ServiceDiscovery};
pub use memory::{InMemoryBroker, InMemoryServiceRegistry, InMemoryTransport};
pub use node::{HandlerTable, Node, NodeClient, NodeService, RequestOptions, TimeoutContext};
pub use scheduler::{FifoQueue, QueueStrategy, SchedulerStats, TaskOutcome, TaskScheduler};
pub use starling_api::*;
