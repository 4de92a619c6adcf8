use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use starling_api::errors::RegistryError;
use starling_api::registry::{NodeLoad, ServiceRegistry};

/// In-process registry shared by every node of a test or single-process deployment.
///
/// Nodes of a service are kept in registration order, so the first registered
/// node wins among equal minimum loads. A service disappears with its last node.
#[derive(Debug, Default)]
pub struct InMemoryServiceRegistry {
    services: RwLock<HashMap<String, Vec<NodeLoad>>>,
}

impl InMemoryServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Vec<NodeLoad>>> {
        self.services.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Vec<NodeLoad>>> {
        self.services.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ServiceRegistry for InMemoryServiceRegistry {
    async fn register_service(&self, service_id: &str, node_id: &str, load: u64) -> Result<(), RegistryError> {
        let mut services = self.write();
        let nodes = services.entry(service_id.to_string()).or_default();
        match nodes.iter_mut().find(|node| node.node_id == node_id) {
            Some(node) => node.load = load,
            None => nodes.push(NodeLoad {
                node_id: node_id.to_string(),
                load,
            }),
        }
        Ok(())
    }

    async fn deregister_service(&self, service_id: &str, node_id: &str) -> Result<(), RegistryError> {
        let mut services = self.write();
        if let Some(nodes) = services.get_mut(service_id) {
            nodes.retain(|node| node.node_id != node_id);
            if nodes.is_empty() {
                services.remove(service_id);
            }
        }
        Ok(())
    }

    /// Updates a known node's load. Reports for unknown nodes are ignored so a
    /// late report cannot resurrect a pruned node.
    async fn update_service_load(&self, service_id: &str, node_id: &str, load: u64) -> Result<(), RegistryError> {
        let mut services = self.write();
        if let Some(node) = services
            .get_mut(service_id)
            .and_then(|nodes| nodes.iter_mut().find(|node| node.node_id == node_id))
        {
            node.load = load;
        }
        Ok(())
    }

    async fn get_least_loaded_node(&self, service_id: &str) -> Result<Option<String>, RegistryError> {
        let services = self.read();
        // min_by_key keeps the first of equal minima.
        let least = services
            .get(service_id)
            .and_then(|nodes| nodes.iter().min_by_key(|node| node.load));
        Ok(least.map(|node| node.node_id.clone()))
    }

    async fn get_all_nodes(&self, service_id: &str) -> Result<Vec<NodeLoad>, RegistryError> {
        Ok(self.read().get(service_id).cloned().unwrap_or_default())
    }

    async fn get_online_services(&self) -> Result<Vec<String>, RegistryError> {
        let mut services: Vec<String> = self.read().keys().cloned().collect();
        services.sort();
        Ok(services)
    }

    async fn is_service_online(&self, service_id: &str) -> Result<bool, RegistryError> {
        Ok(self.read().get(service_id).is_some_and(|nodes| !nodes.is_empty()))
    }
}
