//! Discovery orchestration: source lifecycle, concurrent fan-out,
//! scheduling and the commit side of the aggregation pipeline.

use crate::config::{ScoutConfig, ScoutConfigError};
use crate::domain::{DiscoveredService, ServiceType};
use crate::engine::aggregation::Aggregator;
use crate::engine::events::{DiscoveryEvent, EventBus, EventKind};
use crate::engine::store::ServiceStore;
use crate::engine::EngineState;
use crate::source::registry::SourceRegistry;
use crate::source::resilient::{HealthSnapshot, ResilientSource};
use crate::source::SourceError;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("cannot {operation} while engine is {actual}, expected {expected}")]
    IllegalState {
        operation: &'static str,
        expected: &'static str,
        actual: EngineState,
    },
    #[error(transparent)]
    Config(#[from] ScoutConfigError),
}

#[derive(Clone, Copy, Debug)]
pub struct SourceHealth {
    pub healthy: bool,
    pub last_check: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<HealthSnapshot> for SourceHealth {
    fn from(snapshot: HealthSnapshot) -> Self {
        Self {
            healthy: snapshot.healthy,
            last_check: snapshot.last_check,
        }
    }
}

struct EngineInner {
    config: ScoutConfig,
    registry: SourceRegistry,
    sources: std::sync::Mutex<HashMap<String, Arc<ResilientSource>>>,
    aggregator: Aggregator,
    store: ServiceStore,
    events: EventBus,
    state: std::sync::Mutex<EngineState>,
    shutdown: CancellationToken,
}

/// Owns the initialized sources and the shared service store. Explicitly
/// constructed by the caller; there is no process-wide instance. Cloning
/// yields another handle to the same engine.
#[derive(Clone)]
pub struct DiscoveryEngine {
    inner: Arc<EngineInner>,
}

impl DiscoveryEngine {
    pub fn new(config: ScoutConfig, registry: SourceRegistry) -> Self {
        let priorities: HashMap<String, i32> = config
            .sources
            .iter()
            .map(|(name, entry)| (name.clone(), entry.priority))
            .collect();
        let aggregator = Aggregator::new(config.aggregation, priorities);
        Self {
            inner: Arc::new(EngineInner {
                config,
                registry,
                sources: std::sync::Mutex::new(HashMap::new()),
                aggregator,
                store: ServiceStore::new(),
                events: EventBus::new(),
                state: std::sync::Mutex::new(EngineState::Uninitialized),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn state(&self) -> EngineState {
        *self.inner.state.lock().expect("engine state")
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.inner.events.subscribe()
    }

    fn transition(
        &self,
        operation: &'static str,
        expected: EngineState,
        next: EngineState,
    ) -> Result<(), EngineError> {
        let mut state = self.inner.state.lock().expect("engine state");
        if *state != expected {
            return Err(EngineError::IllegalState {
                operation,
                expected: expected.as_str(),
                actual: *state,
            });
        }
        *state = next;
        Ok(())
    }

    fn sources_snapshot(&self) -> Vec<(String, Arc<ResilientSource>)> {
        self.inner
            .sources
            .lock()
            .expect("sources map")
            .iter()
            .map(|(name, source)| (name.clone(), Arc::clone(source)))
            .collect()
    }

    /// Resolve and initialize every enabled source. A source that is
    /// unknown to the registry or fails initialization is logged and
    /// skipped; it never prevents the engine from starting.
    pub async fn initialize(&self) -> Result<(), EngineError> {
        {
            let state = self.inner.state.lock().expect("engine state");
            if *state != EngineState::Uninitialized {
                return Err(EngineError::IllegalState {
                    operation: "initialize",
                    expected: EngineState::Uninitialized.as_str(),
                    actual: *state,
                });
            }
        }
        self.inner.config.validate()?;

        let mut initialized = HashMap::new();
        for name in self.inner.config.enabled_sources() {
            let entry = &self.inner.config.sources[name];
            let Some(raw) = self.inner.registry.create(name) else {
                tracing::warn!(source = name, "no factory registered, skipping source");
                continue;
            };
            let source = Arc::new(ResilientSource::new(raw));
            match source.initialize(&entry.config).await {
                Ok(()) => {
                    Arc::clone(&source).spawn_health_task();
                    crate::discovery_event!(
                        info,
                        "scout::engine",
                        "source_initialised",
                        source = name,
                        priority = entry.priority,
                    );
                    initialized.insert(name.to_string(), source);
                }
                Err(err) => {
                    tracing::warn!(
                        source = name,
                        error = %err,
                        "source failed to initialise, excluded from discovery"
                    );
                }
            }
        }

        *self.inner.sources.lock().expect("sources map") = initialized;
        self.transition(
            "initialize",
            EngineState::Uninitialized,
            EngineState::Initialized,
        )
    }

    /// Run one pass now and start per-source schedules. Only valid from
    /// the initialized state.
    pub async fn start_discovery(&self) -> Result<Vec<DiscoveredService>, EngineError> {
        self.transition(
            "start discovery",
            EngineState::Initialized,
            EngineState::Running,
        )?;

        for (name, source) in self.sources_snapshot() {
            let Some(interval) = self
                .inner
                .config
                .sources
                .get(&name)
                .and_then(|entry| entry.schedule)
            else {
                continue;
            };
            let engine = self.clone();
            let shutdown = self.inner.shutdown.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = ticker.tick() => {
                            engine.run_scheduled_pass(&name, &source).await;
                        }
                    }
                }
            });
        }

        self.discover_now_unchecked().await
    }

    async fn run_scheduled_pass(&self, name: &str, source: &Arc<ResilientSource>) {
        match source.discover().await {
            Ok(batch) => {
                let count = batch.len();
                let committed = self.aggregate_and_commit(batch).await;
                self.inner.events.emit(
                    DiscoveryEvent::for_source(EventKind::DiscoveryCompleted, name)
                        .with_metadata("services", count.to_string())
                        .with_metadata("trigger", "schedule"),
                );
                tracing::debug!(
                    source = name,
                    services = committed.len(),
                    "scheduled discovery pass committed"
                );
            }
            Err(err) => self.emit_discovery_error(name, &err),
        }
    }

    /// Fan out one discovery pass over every source concurrently. One
    /// source failing terminally never cancels or fails the others; its
    /// failure becomes a `discovery_error` event. Returns the aggregated,
    /// committed records from this pass.
    pub async fn discover_now(&self) -> Result<Vec<DiscoveredService>, EngineError> {
        let state = self.state();
        if !matches!(state, EngineState::Initialized | EngineState::Running) {
            return Err(EngineError::IllegalState {
                operation: "discover",
                expected: EngineState::Initialized.as_str(),
                actual: state,
            });
        }
        self.discover_now_unchecked().await
    }

    async fn discover_now_unchecked(&self) -> Result<Vec<DiscoveredService>, EngineError> {
        let mut join_set = JoinSet::new();
        for (name, source) in self.sources_snapshot() {
            join_set.spawn(async move {
                let result = source.discover().await;
                (name, result)
            });
        }

        let mut collected = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            let Ok((name, result)) = joined else {
                // A panicking source task is contained like any other failure.
                tracing::error!("discovery task panicked");
                continue;
            };
            match result {
                Ok(batch) => {
                    self.inner.events.emit(
                        DiscoveryEvent::for_source(EventKind::DiscoveryCompleted, &name)
                            .with_metadata("services", batch.len().to_string()),
                    );
                    collected.extend(batch);
                }
                Err(err) => self.emit_discovery_error(&name, &err),
            }
        }

        Ok(self.aggregate_and_commit(collected).await)
    }

    async fn aggregate_and_commit(
        &self,
        records: Vec<DiscoveredService>,
    ) -> Vec<DiscoveredService> {
        let aggregated = self.inner.aggregator.aggregate(records);
        for service in &aggregated {
            let existed = self.inner.store.upsert(service.clone()).await;
            let kind = if existed {
                EventKind::ServiceUpdated
            } else {
                EventKind::ServiceDiscovered
            };
            self.inner
                .events
                .emit(DiscoveryEvent::new(kind).with_service(service.clone()));
        }
        aggregated
    }

    fn emit_discovery_error(&self, name: &str, err: &SourceError) {
        crate::discovery_event!(
            warn,
            "scout::engine",
            "discovery_error",
            source = name,
            error = err,
        );
        self.inner.events.emit(
            DiscoveryEvent::for_source(EventKind::DiscoveryError, name)
                .with_metadata("error", err.to_string()),
        );
    }

    /// Fan out health checks; a failing check marks its source unhealthy
    /// and never propagates.
    pub async fn health_status(&self) -> BTreeMap<String, SourceHealth> {
        let mut join_set = JoinSet::new();
        for (name, source) in self.sources_snapshot() {
            join_set.spawn(async move {
                source.health_check().await;
                (name, source.health_snapshot())
            });
        }

        let mut statuses = BTreeMap::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((name, snapshot)) => {
                    statuses.insert(name, SourceHealth::from(snapshot));
                }
                Err(_) => {
                    tracing::error!("health check task panicked");
                }
            }
        }
        statuses
    }

    /// Cancel schedules and dispose every source. Idempotent.
    pub async fn stop(&self) {
        self.inner.shutdown.cancel();
        let sources = {
            let mut map = self.inner.sources.lock().expect("sources map");
            std::mem::take(&mut *map)
        };
        for (name, source) in sources {
            source.dispose().await;
            tracing::info!(source = %name, "source disposed");
        }
        *self.inner.state.lock().expect("engine state") = EngineState::Stopped;
    }

    /// Explicit eviction surface; the engine never removes services on its
    /// own.
    pub async fn remove_service(&self, id: &str) -> bool {
        match self.inner.store.remove(id).await {
            Some(service) => {
                self.inner
                    .events
                    .emit(DiscoveryEvent::new(EventKind::ServiceRemoved).with_service(service));
                true
            }
            None => false,
        }
    }

    pub async fn discovered_services(&self) -> Vec<DiscoveredService> {
        self.inner.store.all().await
    }

    pub async fn services_by_type(&self, service_type: ServiceType) -> Vec<DiscoveredService> {
        self.inner.store.by_type(service_type).await
    }

    pub async fn services_by_source(&self, source: &str) -> Vec<DiscoveredService> {
        self.inner.store.by_source(source).await
    }

    pub async fn service(&self, id: &str) -> Option<DiscoveredService> {
        self.inner.store.get(id).await
    }
}
