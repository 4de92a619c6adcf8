//! # Starling API
//!
//! Starling is a framework for building addressable microservice nodes that
//! exchange correlated request/response messages over an abstract
//! publish/subscribe transport, with load-aware service discovery and per-node
//! admission control.
//!
//! This crate holds everything a node and its collaborators must agree on,
//! and no runtime policy:
//!
//! - [`address`]: Node identity and channel naming
//! - [`message`]: The request/response wire envelope
//! - [`transport`]: The pub/sub backend contract and channel handles
//! - [`registry`]: The service registry contract and health checks
//! - [`errors`]: Error types and handling
//! - [`types`]: Common type definitions
//!
//! The runtime itself (task scheduler, discovery, node) lives in the `starling` crate.

pub mod address;
pub mod errors;
pub mod message;
pub mod registry;
pub mod transport;
pub mod types;

pub use address::Address;
pub use errors::{AddressError, HandlerError, NodeError, RegistryError, TaskError, TransportError};
pub use message::{
    Envelope, ErrorInfo, Request, RequestHeader, Response, ResponseBody, ResponseHeader, ServerStatus,
    StatusUpdate,
};
pub use registry::{AlwaysHealthy, HealthCheck, NodeLoad, ServiceRegistry};
pub use transport::{Channel, Transport, TransportMessage};
pub use types::{BoxedFuture, MessageHandler, NodeResult};
