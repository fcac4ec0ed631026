//! Broadcast event fan-out to external subscribers.
//!
//! Subscribers alive at emission time each see every event at least once;
//! a subscriber that falls behind the channel capacity observes a `Lagged`
//! gap rather than blocking the engine.

use crate::domain::DiscoveredService;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    ServiceDiscovered,
    ServiceUpdated,
    ServiceRemoved,
    DiscoveryCompleted,
    DiscoveryError,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::ServiceDiscovered => "service_discovered",
            EventKind::ServiceUpdated => "service_updated",
            EventKind::ServiceRemoved => "service_removed",
            EventKind::DiscoveryCompleted => "discovery_completed",
            EventKind::DiscoveryError => "discovery_error",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug)]
pub struct DiscoveryEvent {
    pub kind: EventKind,
    pub source: Option<String>,
    pub service: Option<DiscoveredService>,
    pub timestamp: DateTime<Utc>,
    pub metadata: BTreeMap<String, String>,
}

impl DiscoveryEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            source: None,
            service: None,
            timestamp: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn for_source(kind: EventKind, source: impl Into<String>) -> Self {
        let mut event = Self::new(kind);
        event.source = Some(source.into());
        event
    }

    pub fn with_service(mut self, service: DiscoveredService) -> Self {
        self.source = Some(service.source.clone());
        self.service = Some(service);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

pub struct EventBus {
    sender: broadcast::Sender<DiscoveryEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.sender.subscribe()
    }

    /// A send with no live subscribers is not an error; the event is simply
    /// unobserved.
    pub fn emit(&self, event: DiscoveryEvent) {
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_emitted_events() {
        let bus = EventBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.emit(DiscoveryEvent::for_source(EventKind::DiscoveryCompleted, "k8s"));

        let event = first.recv().await.expect("first subscriber");
        assert_eq!(event.kind, EventKind::DiscoveryCompleted);
        assert_eq!(event.source.as_deref(), Some("k8s"));
        assert!(second.recv().await.is_ok());
    }

    #[test]
    fn emit_without_subscribers_is_a_no_op() {
        let bus = EventBus::new();
        bus.emit(DiscoveryEvent::new(EventKind::ServiceRemoved));
    }
}
