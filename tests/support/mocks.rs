#![allow(dead_code)]

use async_trait::async_trait;
use scout::config::SourceSettings;
use scout::domain::{DiscoveredService, Endpoint, ServiceType};
use scout::source::{DiscoverySource, SourceError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scripted discovery source shared between a test and the engine under
/// test. The handle side inspects call counts after the engine has taken
/// ownership of the boxed source.
#[derive(Clone)]
pub struct ScriptedSource {
    name: String,
    state: Arc<Mutex<ScriptState>>,
}

#[derive(Default)]
struct ScriptState {
    scripted_batches: VecDeque<Result<Vec<DiscoveredService>, String>>,
    default_batch: Option<Vec<DiscoveredService>>,
    default_error: Option<String>,
    discover_delay: Option<Duration>,
    pending_delays: VecDeque<Duration>,
    init_error: Option<String>,
    healthy: bool,
    discover_calls: u32,
    health_calls: u32,
    disposed: bool,
}

#[derive(Clone)]
pub struct ScriptHandle {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptHandle {
    pub fn discover_calls(&self) -> u32 {
        self.state.lock().expect("script state").discover_calls
    }

    pub fn health_calls(&self) -> u32 {
        self.state.lock().expect("script state").health_calls
    }

    pub fn disposed(&self) -> bool {
        self.state.lock().expect("script state").disposed
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.state.lock().expect("script state").healthy = healthy;
    }

    pub fn push_batch(&self, batch: Vec<DiscoveredService>) {
        self.state
            .lock()
            .expect("script state")
            .scripted_batches
            .push_back(Ok(batch));
    }

    pub fn push_error(&self, message: &str) {
        self.state
            .lock()
            .expect("script state")
            .scripted_batches
            .push_back(Err(message.to_string()));
    }

    /// Delay only the next discover call, e.g. to force a single timeout.
    pub fn delay_next_discover(&self, delay: Duration) {
        self.state
            .lock()
            .expect("script state")
            .pending_delays
            .push_back(delay);
    }
}

impl ScriptedSource {
    pub fn new(name: &str) -> (Self, ScriptHandle) {
        let state = Arc::new(Mutex::new(ScriptState {
            healthy: true,
            ..ScriptState::default()
        }));
        (
            Self {
                name: name.to_string(),
                state: Arc::clone(&state),
            },
            ScriptHandle { state },
        )
    }

    /// Every unscripted discover call returns this batch.
    pub fn with_default_batch(self, batch: Vec<DiscoveredService>) -> Self {
        self.state.lock().expect("script state").default_batch = Some(batch);
        self
    }

    /// Every unscripted discover call fails with this message.
    pub fn always_failing(self, message: &str) -> Self {
        {
            let mut state = self.state.lock().expect("script state");
            state.default_batch = None;
            state.scripted_batches.clear();
            state.default_error = Some(message.to_string());
        }
        self
    }

    /// Simulate a slow backend; discover sleeps this long before answering.
    pub fn with_discover_delay(self, delay: Duration) -> Self {
        self.state.lock().expect("script state").discover_delay = Some(delay);
        self
    }

    pub fn failing_initialization(self, message: &str) -> Self {
        self.state.lock().expect("script state").init_error = Some(message.to_string());
        self
    }
}

#[async_trait]
impl DiscoverySource for ScriptedSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&mut self, _settings: &SourceSettings) -> Result<(), SourceError> {
        let state = self.state.lock().expect("script state");
        match &state.init_error {
            Some(message) => Err(SourceError::initialization(&self.name, message)),
            None => Ok(()),
        }
    }

    async fn discover(&self) -> Result<Vec<DiscoveredService>, SourceError> {
        let (delay, result) = {
            let mut state = self.state.lock().expect("script state");
            state.discover_calls += 1;
            let result = state
                .scripted_batches
                .pop_front()
                .or_else(|| state.default_batch.clone().map(Ok))
                .or_else(|| state.default_error.clone().map(Err))
                .unwrap_or(Ok(Vec::new()));
            let delay = state.pending_delays.pop_front().or(state.discover_delay);
            (delay, result)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        result.map_err(|message| SourceError::upstream(&self.name, message))
    }

    async fn health_check(&self) -> Result<bool, SourceError> {
        let mut state = self.state.lock().expect("script state");
        state.health_calls += 1;
        if state.healthy {
            Ok(true)
        } else {
            Err(SourceError::upstream(&self.name, "backend unreachable"))
        }
    }

    async fn dispose(&mut self) {
        self.state.lock().expect("script state").disposed = true;
    }
}

/// A service observation the way a thin scanner would report it.
pub fn observation(source: &str, name: &str, confidence: f64) -> DiscoveredService {
    DiscoveredService::new(source, name, name, ServiceType::Microservice, confidence)
}

pub fn observation_with_endpoint(
    source: &str,
    name: &str,
    confidence: f64,
    url: &str,
) -> DiscoveredService {
    observation(source, name, confidence).with_endpoint(Endpoint::new(url))
}
