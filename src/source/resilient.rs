//! Resilience layer wrapped around every concrete discovery source.
//!
//! Layering for one `discover()` call: initialized check, cache read,
//! admission control, retry loop with a per-attempt timeout race, then a
//! write-through cache update. Health checks run on their own timer and
//! never interfere with discovery.

use crate::config::SourceSettings;
use crate::domain::DiscoveredService;
use crate::source::admission::AdmissionController;
use crate::source::cache::ResultCache;
use crate::source::{DiscoverySource, SourceError};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Copy, Debug, Default)]
pub struct HealthSnapshot {
    pub healthy: bool,
    pub last_check: Option<DateTime<Utc>>,
}

struct ResilienceState {
    retry_attempts: u32,
    retry_delay: Duration,
    timeout: Duration,
    admission: Option<Arc<AdmissionController>>,
    cache_ttl: Option<Duration>,
    health_interval: Option<Duration>,
}

pub struct ResilientSource {
    name: String,
    inner: AsyncMutex<Box<dyn DiscoverySource>>,
    state: std::sync::Mutex<Option<Arc<ResilienceState>>>,
    cache: ResultCache,
    health: std::sync::Mutex<HealthSnapshot>,
    initialized: AtomicBool,
    shutdown: CancellationToken,
}

impl ResilientSource {
    pub fn new(inner: Box<dyn DiscoverySource>) -> Self {
        Self {
            name: inner.name().to_string(),
            inner: AsyncMutex::new(inner),
            state: std::sync::Mutex::new(None),
            cache: ResultCache::new(),
            health: std::sync::Mutex::new(HealthSnapshot::default()),
            initialized: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn health_snapshot(&self) -> HealthSnapshot {
        *self.health.lock().expect("health state")
    }

    /// Validate the resilience schema and run source-specific setup.
    /// A source that fails here stays unusable until reconfigured.
    pub async fn initialize(&self, settings: &SourceSettings) -> Result<(), SourceError> {
        settings
            .validate(&self.name)
            .map_err(|err| SourceError::initialization(&self.name, err.to_string()))?;

        {
            let mut inner = self.inner.lock().await;
            inner.initialize(settings).await?;
        }

        let state = ResilienceState {
            retry_attempts: settings.retry_attempts,
            retry_delay: settings.retry_delay,
            timeout: settings.timeout,
            admission: settings
                .rate_limit
                .map(|rl| Arc::new(AdmissionController::new(rl.max_requests, rl.window))),
            cache_ttl: settings.cache.map(|cache| cache.ttl),
            health_interval: settings.health_check.map(|health| health.interval),
        };
        *self.state.lock().expect("resilience state") = Some(Arc::new(state));
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    fn state(&self) -> Result<Arc<ResilienceState>, SourceError> {
        self.state
            .lock()
            .expect("resilience state")
            .clone()
            .filter(|_| self.is_initialized())
            .ok_or_else(|| SourceError::NotInitialized {
                source_name: self.name.clone(),
            })
    }

    pub async fn discover(&self) -> Result<Vec<DiscoveredService>, SourceError> {
        let state = self.state()?;

        if state.cache_ttl.is_some() {
            if let Some(batch) = self.cache.get(&self.name) {
                tracing::debug!(source = %self.name, services = batch.len(), "discovery served from cache");
                return Ok(batch);
            }
        }

        if let Some(admission) = &state.admission {
            admission.admit().await;
        }

        let batch = self.discover_with_retry(&state).await?;

        if let Some(ttl) = state.cache_ttl {
            self.cache.set(&self.name, batch.clone(), ttl);
        }
        Ok(batch)
    }

    /// Up to `retry_attempts + 1` tries, each racing the configured timeout.
    /// Dropping the attempt future on timeout guarantees a late result from
    /// a timed-out call can never reach a later attempt or the caller.
    async fn discover_with_retry(
        &self,
        state: &ResilienceState,
    ) -> Result<Vec<DiscoveredService>, SourceError> {
        let attempts = state.retry_attempts + 1;
        let mut last_error = None;

        for attempt in 0..attempts {
            let result = {
                let inner = self.inner.lock().await;
                tokio::time::timeout(state.timeout, inner.discover()).await
            };

            let error = match result {
                Ok(Ok(batch)) => return Ok(batch),
                Ok(Err(err)) => err,
                Err(_elapsed) => SourceError::Timeout {
                    source_name: self.name.clone(),
                    timeout: state.timeout,
                },
            };

            tracing::warn!(
                source = %self.name,
                attempt = attempt + 1,
                attempts,
                error = %error,
                "discovery attempt failed"
            );
            last_error = Some(error);

            if attempt + 1 < attempts {
                let backoff = state.retry_delay.saturating_mul(1u32 << attempt.min(16));
                tokio::time::sleep(backoff).await;
            }
        }

        Err(SourceError::FailedAfterRetries {
            source_name: self.name.clone(),
            attempts,
            last_error: Box::new(last_error.unwrap_or_else(|| {
                SourceError::upstream(&self.name, "discovery failed without an error")
            })),
        })
    }

    /// Probe the backing system. Errors mark the source unhealthy and are
    /// never surfaced to the caller.
    pub async fn health_check(&self) -> bool {
        let healthy = {
            let inner = self.inner.lock().await;
            matches!(inner.health_check().await, Ok(true))
        };
        let mut health = self.health.lock().expect("health state");
        health.healthy = healthy;
        health.last_check = Some(Utc::now());
        healthy
    }

    /// Start the periodic health probe if the source configured one.
    pub fn spawn_health_task(self: Arc<Self>) {
        let Ok(state) = self.state() else {
            return;
        };
        let Some(interval) = state.health_interval else {
            return;
        };

        let source = self;
        let shutdown = source.shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let healthy = source.health_check().await;
                        if !healthy {
                            tracing::warn!(source = %source.name, "health check reported unhealthy");
                        }
                    }
                }
            }
        });
    }

    /// Idempotent teardown: stops the health task, clears the cache and
    /// de-initializes the wrapped source.
    pub async fn dispose(&self) {
        self.shutdown.cancel();
        self.cache.clear();
        self.initialized.store(false, Ordering::Release);
        *self.state.lock().expect("resilience state") = None;
        let mut inner = self.inner.lock().await;
        inner.dispose().await;
    }
}
