pub mod admission;
pub mod cache;
pub mod registry;
pub mod resilient;
pub mod static_file;

use crate::config::SourceSettings;
use crate::domain::DiscoveredService;
use async_trait::async_trait;
use thiserror::Error;

/// Contract every concrete scanner satisfies.
///
/// Implementations stay thin: transport, authentication and provider quirks
/// live behind these four calls, while rate limiting, caching, retries and
/// timeouts are layered on by [`resilient::ResilientSource`].
#[async_trait]
pub trait DiscoverySource: Send + Sync {
    /// Stable key the source is registered and configured under.
    fn name(&self) -> &str;

    /// Source-specific setup from the opaque config blob.
    async fn initialize(&mut self, settings: &SourceSettings) -> Result<(), SourceError>;

    /// Produce one discovery batch.
    async fn discover(&self) -> Result<Vec<DiscoveredService>, SourceError>;

    /// Cheap liveness probe against the backing system.
    async fn health_check(&self) -> Result<bool, SourceError>;

    /// Release any held resources. Must be safe to call more than once.
    async fn dispose(&mut self);
}

// Field is `source_name` rather than `source`: thiserror reserves a field
// named `source` for the error cause, and these carry a plain string.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source `{source_name}` has not been initialised")]
    NotInitialized { source_name: String },
    #[error("source `{source_name}` discovery attempt timed out after {timeout:?}")]
    Timeout {
        source_name: String,
        timeout: std::time::Duration,
    },
    #[error("source `{source_name}` discovery failed after {attempts} attempts: {last_error}")]
    FailedAfterRetries {
        source_name: String,
        attempts: u32,
        #[source]
        last_error: Box<SourceError>,
    },
    #[error("source `{source_name}` failed to initialise: {reason}")]
    InitializationFailed { source_name: String, reason: String },
    #[error("source `{source_name}`: {message}")]
    Upstream { source_name: String, message: String },
}

impl SourceError {
    pub fn upstream(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Upstream {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    pub fn initialization(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InitializationFailed {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }
}
