//! Shared in-memory service catalog, keyed by service id.
//!
//! The only resource shared across sources. Discovery fan-out reads and
//! writes go through this single `RwLock`; only the aggregation commit
//! step writes.

use crate::domain::{DiscoveredService, ServiceType};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct ServiceStore {
    services: RwLock<HashMap<String, DiscoveredService>>,
}

impl ServiceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite; returns true when the id was already present.
    pub async fn upsert(&self, service: DiscoveredService) -> bool {
        let mut services = self.services.write().await;
        services.insert(service.id.clone(), service).is_some()
    }

    pub async fn remove(&self, id: &str) -> Option<DiscoveredService> {
        self.services.write().await.remove(id)
    }

    pub async fn get(&self, id: &str) -> Option<DiscoveredService> {
        self.services.read().await.get(id).cloned()
    }

    pub async fn all(&self) -> Vec<DiscoveredService> {
        let mut services: Vec<_> = self.services.read().await.values().cloned().collect();
        services.sort_by(|a, b| a.id.cmp(&b.id));
        services
    }

    pub async fn by_type(&self, service_type: ServiceType) -> Vec<DiscoveredService> {
        let mut services: Vec<_> = self
            .services
            .read()
            .await
            .values()
            .filter(|service| service.service_type == service_type)
            .cloned()
            .collect();
        services.sort_by(|a, b| a.id.cmp(&b.id));
        services
    }

    pub async fn by_source(&self, source: &str) -> Vec<DiscoveredService> {
        let mut services: Vec<_> = self
            .services
            .read()
            .await
            .values()
            .filter(|service| service.source == source)
            .cloned()
            .collect();
        services.sort_by(|a, b| a.id.cmp(&b.id));
        services
    }

    pub async fn len(&self) -> usize {
        self.services.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.services.read().await.is_empty()
    }
}
