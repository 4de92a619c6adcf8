//! # Service Registry Contract
//!
//! Shared read/write storage of which instances serve a logical service and
//! what each instance's current load is. The registry is owned by an external
//! backend and shared by every node of a namespace; no single node owns it.
//!
//! ## Atomicity
//!
//! Implementations must make every operation atomic per `(service_id, node_id)`
//! key: loads are written periodically by the owning node and read by any node
//! doing placement.
//!
//! ## Health Checks
//!
//! [`HealthCheck`] is consulted by discovery at selection time. The baseline
//! check, [`AlwaysHealthy`], reports every node as healthy.

use std::fmt::Debug;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::RegistryError;

/// One instance's discovery record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeLoad {
    pub node_id: String,
    /// Queue depth last reported by the node
    pub load: u64,
}

#[async_trait]
pub trait ServiceRegistry: Send + Sync + Debug + 'static {
    /// Adds a node, or replaces its load if it is already registered.
    async fn register_service(&self, service_id: &str, node_id: &str, load: u64) -> Result<(), RegistryError>;

    /// Removes a node. Removing an unknown node is not an error.
    async fn deregister_service(&self, service_id: &str, node_id: &str) -> Result<(), RegistryError>;

    async fn update_service_load(&self, service_id: &str, node_id: &str, load: u64) -> Result<(), RegistryError>;

    /// Node with the minimum load for `service_id`, or `None` if none are registered.
    async fn get_least_loaded_node(&self, service_id: &str) -> Result<Option<String>, RegistryError>;

    async fn get_all_nodes(&self, service_id: &str) -> Result<Vec<NodeLoad>, RegistryError>;

    /// Services that currently have at least one registered node.
    async fn get_online_services(&self) -> Result<Vec<String>, RegistryError>;

    async fn is_service_online(&self, service_id: &str) -> Result<bool, RegistryError>;
}

/// Check run against a placement candidate before it is returned.
#[async_trait]
pub trait HealthCheck: Send + Sync + Debug + 'static {
    async fn is_healthy(&self, service_id: &str, node_id: &str) -> bool;
}

/// Baseline check: every node is healthy.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysHealthy;

#[async_trait]
impl HealthCheck for AlwaysHealthy {
    async fn is_healthy(&self, _service_id: &str, _node_id: &str) -> bool {
        true
    }
}
