//! Name-to-factory indirection for concrete discovery sources.
//!
//! Lets the engine be driven entirely by configuration keys; nothing in the
//! orchestration layer imports a concrete scanner type.

use crate::source::static_file::StaticFileSource;
use crate::source::DiscoverySource;
use std::collections::BTreeMap;

type SourceFactory = Box<dyn Fn() -> Box<dyn DiscoverySource> + Send + Sync>;

#[derive(Default)]
pub struct SourceRegistry {
    factories: BTreeMap<String, SourceFactory>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the sources this crate ships.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("static", || Box::new(StaticFileSource::new()));
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn DiscoverySource> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    pub fn create(&self, name: &str) -> Option<Box<dyn DiscoverySource>> {
        self.factories.get(name).map(|factory| factory())
    }

    pub fn available_sources(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}
