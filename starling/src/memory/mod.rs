//! In-process collaborators.
//!
//! Reference implementations of the transport and registry contracts that keep
//! everything inside one process. They back single-process deployments and
//! every test in this crate.

pub mod registry;
pub mod transport;

pub use registry::InMemoryServiceRegistry;
pub use transport::{InMemoryBroker, InMemoryTransport};
