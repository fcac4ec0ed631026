use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Closed set of service categories a source may report.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Api,
    Web,
    Database,
    Queue,
    Microservice,
    Function,
    Storage,
    Other,
}

impl ServiceType {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceType::Api => "api",
            ServiceType::Web => "web",
            ServiceType::Database => "database",
            ServiceType::Queue => "queue",
            ServiceType::Microservice => "microservice",
            ServiceType::Function => "function",
            ServiceType::Storage => "storage",
            ServiceType::Other => "other",
        }
    }
}

impl std::fmt::Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub url: String,
    #[serde(rename = "type", default)]
    pub endpoint_type: Option<String>,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub health_status: Option<String>,
}

impl Endpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            endpoint_type: None,
            protocol: None,
            health_status: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Ownership {
    #[serde(default)]
    pub team: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub url: String,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceMetrics {
    #[serde(default)]
    pub request_rate: Option<f64>,
    #[serde(default)]
    pub error_rate: Option<f64>,
    #[serde(default)]
    pub latency_p99_ms: Option<f64>,
}

/// One observation of a real-world service, as reported by a single source.
///
/// Ids are source-namespaced and only become catalog-unique after the
/// aggregation pipeline has merged observations that share a dedup key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredService {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub service_type: ServiceType,
    pub source: String,
    pub discovered_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub confidence: f64,
    #[serde(default)]
    pub metadata: BTreeMap<String, JsonValue>,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub owner: Option<Ownership>,
    #[serde(default)]
    pub repository: Option<Repository>,
    #[serde(default)]
    pub deployment: Option<Deployment>,
    #[serde(default)]
    pub metrics: Option<ServiceMetrics>,
}

impl DiscoveredService {
    pub fn new(
        source: impl Into<String>,
        raw_identifier: &str,
        name: impl Into<String>,
        service_type: ServiceType,
        confidence: f64,
    ) -> Self {
        let source = source.into();
        let now = Utc::now();
        Self {
            id: service_id(&source, raw_identifier),
            name: name.into(),
            service_type,
            source,
            discovered_at: now,
            last_seen: now,
            confidence: clamp_confidence(confidence),
            metadata: BTreeMap::new(),
            endpoints: Vec::new(),
            dependencies: Vec::new(),
            owner: None,
            repository: None,
            deployment: None,
            metrics: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_dependency(mut self, dependency: impl Into<String>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }

    /// URL of the first endpoint, used as part of the deduplication key.
    pub fn primary_endpoint_url(&self) -> &str {
        self.endpoints
            .first()
            .map(|endpoint| endpoint.url.as_str())
            .unwrap_or("")
    }

    /// Record a fresh observation of an already-known service.
    pub fn touch(&mut self, seen_at: DateTime<Utc>) {
        if seen_at > self.last_seen {
            self.last_seen = seen_at;
        }
    }
}

/// Deterministic source-namespaced id: `"<source>:<slug>"`.
///
/// Re-running discovery against the same resource must reproduce the same
/// id, so the slug depends only on the raw identifier text.
pub fn service_id(source: &str, raw_identifier: &str) -> String {
    format!("{}:{}", source, slugify(raw_identifier))
}

fn slugify(raw: &str) -> String {
    let mut slug = String::with_capacity(raw.len());
    let mut last_was_dash = true;
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_was_dash = false;
        } else if !last_was_dash {
            slug.push('-');
            last_was_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// Clamp a confidence estimate into [0, 1]; NaN collapses to 0.
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Apply a heuristic confidence boost, preserving the [0, 1] bound.
pub fn boost_confidence(base: f64, boost: f64) -> f64 {
    clamp_confidence(clamp_confidence(base) + boost)
}

/// Union two endpoint lists, dropping later entries that repeat a URL.
pub fn merge_endpoints(base: &mut Vec<Endpoint>, extra: &[Endpoint]) {
    for endpoint in extra {
        if !base.iter().any(|existing| existing.url == endpoint.url) {
            base.push(endpoint.clone());
        }
    }
}

/// Union two dependency lists by value equality.
pub fn merge_dependencies(base: &mut Vec<String>, extra: &[String]) {
    for dependency in extra {
        if !base.iter().any(|existing| existing == dependency) {
            base.push(dependency.clone());
        }
    }
}
