//! Built-in source that reads service manifests from a YAML file.
//!
//! Useful for seeding a catalog from hand-maintained inventory and as a
//! realistic end-to-end source in tests. The file is re-read on every
//! discovery pass so edits show up on the next cycle.

use crate::config::SourceSettings;
use crate::domain::{
    clamp_confidence, service_id, Deployment, DiscoveredService, Endpoint, Ownership, Repository,
    ServiceType,
};
use crate::source::{DiscoverySource, SourceError};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::path::PathBuf;

pub const SOURCE_NAME: &str = "static";

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    services: Vec<ManifestService>,
}

#[derive(Debug, Deserialize)]
struct ManifestService {
    name: String,
    #[serde(rename = "type", default = "default_service_type")]
    service_type: ServiceType,
    #[serde(default = "default_confidence")]
    confidence: f64,
    #[serde(default)]
    endpoints: Vec<Endpoint>,
    #[serde(default)]
    metadata: BTreeMap<String, JsonValue>,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    owner: Option<Ownership>,
    #[serde(default)]
    repository: Option<Repository>,
    #[serde(default)]
    deployment: Option<Deployment>,
}

const fn default_service_type() -> ServiceType {
    ServiceType::Other
}

const fn default_confidence() -> f64 {
    0.8
}

#[derive(Default)]
pub struct StaticFileSource {
    path: Option<PathBuf>,
}

impl StaticFileSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    fn manifest_path(&self) -> Result<&PathBuf, SourceError> {
        self.path.as_ref().ok_or_else(|| SourceError::NotInitialized {
            source_name: SOURCE_NAME.to_string(),
        })
    }
}

#[async_trait]
impl DiscoverySource for StaticFileSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    async fn initialize(&mut self, settings: &SourceSettings) -> Result<(), SourceError> {
        if self.path.is_none() {
            let path = settings
                .extra
                .get("path")
                .and_then(JsonValue::as_str)
                .ok_or_else(|| {
                    SourceError::initialization(SOURCE_NAME, "missing required `path` setting")
                })?;
            self.path = Some(PathBuf::from(path));
        }

        let path = self.manifest_path()?;
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(SourceError::initialization(
                SOURCE_NAME,
                format!("manifest file not found: {}", path.display()),
            ));
        }
        Ok(())
    }

    async fn discover(&self) -> Result<Vec<DiscoveredService>, SourceError> {
        let path = self.manifest_path()?;
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|err| SourceError::upstream(SOURCE_NAME, err.to_string()))?;
        let manifest: Manifest = serde_yaml::from_str(&raw)
            .map_err(|err| SourceError::upstream(SOURCE_NAME, err.to_string()))?;

        let now = Utc::now();
        let services = manifest
            .services
            .into_iter()
            .map(|entry| DiscoveredService {
                id: service_id(SOURCE_NAME, &entry.name),
                name: entry.name,
                service_type: entry.service_type,
                source: SOURCE_NAME.to_string(),
                discovered_at: now,
                last_seen: now,
                confidence: clamp_confidence(entry.confidence),
                metadata: entry.metadata,
                endpoints: entry.endpoints,
                dependencies: entry.dependencies,
                owner: entry.owner,
                repository: entry.repository,
                deployment: entry.deployment,
                metrics: None,
            })
            .collect();
        Ok(services)
    }

    async fn health_check(&self) -> Result<bool, SourceError> {
        let path = self.manifest_path()?;
        Ok(tokio::fs::try_exists(path).await.unwrap_or(false))
    }

    async fn dispose(&mut self) {
        self.path = None;
    }
}
