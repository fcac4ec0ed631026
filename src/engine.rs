pub mod aggregation;
pub mod core;
pub mod events;
pub mod store;

/// Engine lifecycle. Transitions only move forward; `stop` is idempotent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Initialized,
    Running,
    Stopped,
}

impl EngineState {
    pub fn as_str(self) -> &'static str {
        match self {
            EngineState::Uninitialized => "UNINITIALIZED",
            EngineState::Initialized => "INITIALIZED",
            EngineState::Running => "RUNNING",
            EngineState::Stopped => "STOPPED",
        }
    }
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
