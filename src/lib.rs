#![forbid(unsafe_code)]

pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod logging;
pub mod source;
pub mod telemetry;

pub use domain::{DiscoveredService, Endpoint, ServiceType};
pub use engine::core::DiscoveryEngine;
pub use engine::events::{DiscoveryEvent, EventKind};
pub use source::{DiscoverySource, SourceError};
