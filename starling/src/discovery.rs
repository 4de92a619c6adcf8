//! # Service Discovery
//!
//! Load-aware placement on top of a [`ServiceRegistry`] backend.
//!
//! Registration, deregistration and load reports are thin pass-throughs. The
//! interesting part is [`ServiceDiscovery::get_least_loaded_node`]: every call
//! re-reads the current minimum, checks it, and lazily prunes instances that
//! fail the check exactly when they would have been chosen. There is no
//! background sweep, no weighting and no session affinity.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use starling_api::errors::RegistryError;
use starling_api::registry::{AlwaysHealthy, HealthCheck, NodeLoad, ServiceRegistry};
use tracing::{debug, warn};

/// Placement and bookkeeping of service instances.
#[derive(Debug, Clone)]
pub struct ServiceDiscovery {
    registry: Arc<dyn ServiceRegistry>,
    health: Arc<dyn HealthCheck>,
}

impl ServiceDiscovery {
    /// Creates a discovery layer using the baseline check, which reports every node healthy.
    pub fn new(registry: Arc<dyn ServiceRegistry>) -> Self {
        Self {
            registry,
            health: Arc::new(AlwaysHealthy),
        }
    }

    /// Replaces the health check run against placement candidates.
    pub fn with_health_check(mut self, health: Arc<dyn HealthCheck>) -> Self {
        self.health = health;
        self
    }

    pub fn registry(&self) -> &Arc<dyn ServiceRegistry> {
        &self.registry
    }

    pub async fn register_node(&self, service_id: &str, node_id: &str, load: u64) -> Result<(), RegistryError> {
        self.registry.register_service(service_id, node_id, load).await
    }

    pub async fn unregister_node(&self, service_id: &str, node_id: &str) -> Result<(), RegistryError> {
        self.registry.deregister_service(service_id, node_id).await
    }

    pub async fn update_node_load(&self, service_id: &str, node_id: &str, load: u64) -> Result<(), RegistryError> {
        self.registry.update_service_load(service_id, node_id, load).await
    }

    /// Returns the healthy node with the lowest load, or `None` if none remain.
    ///
    /// Candidates failing the health check are deregistered before the next
    /// candidate is considered.
    pub async fn get_least_loaded_node(&self, service_id: &str) -> Result<Option<String>, RegistryError> {
        loop {
            let Some(node_id) = self.registry.get_least_loaded_node(service_id).await? else {
                debug!(service_id, "No nodes registered for service");
                return Ok(None);
            };

            if self.health.is_healthy(service_id, &node_id).await {
                return Ok(Some(node_id));
            }

            warn!(service_id, node_id = %node_id, "Pruning unhealthy node");
            self.registry.deregister_service(service_id, &node_id).await?;
        }
    }

    pub async fn get_all_nodes(&self, service_id: &str) -> Result<Vec<NodeLoad>, RegistryError> {
        self.registry.get_all_nodes(service_id).await
    }

    pub async fn get_online_services(&self) -> Result<Vec<String>, RegistryError> {
        self.registry.get_online_services().await
    }

    pub async fn is_service_online(&self, service_id: &str) -> Result<bool, RegistryError> {
        self.registry.is_service_online(service_id).await
    }
}

/// Health check backed by a plain closure `(service_id, node_id) -> healthy`.
pub struct FnHealthCheck<F> {
    check: F,
}

impl<F> FnHealthCheck<F>
where
    F: Fn(&str, &str) -> bool + Send + Sync + 'static,
{
    pub fn new(check: F) -> Self {
        Self { check }
    }
}

impl<F> fmt::Debug for FnHealthCheck<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHealthCheck").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> HealthCheck for FnHealthCheck<F>
where
    F: Fn(&str, &str) -> bool + Send + Sync + 'static,
{
    async fn is_healthy(&self, service_id: &str, node_id: &str) -> bool {
        (self.check)(service_id, node_id)
    }
}
