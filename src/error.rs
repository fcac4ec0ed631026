use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Top-level error for callers driving the engine through the library
/// surface; module errors convert in via `?`.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Config(#[from] crate::config::ScoutConfigError),
    #[error(transparent)]
    Source(#[from] crate::source::SourceError),
    #[error(transparent)]
    Engine(#[from] crate::engine::core::EngineError),
}

impl Error {
    pub fn msg<M>(message: M) -> Self
    where
        M: Into<String>,
    {
        Self::Message(message.into())
    }
}

#[macro_export]
macro_rules! err {
    ($fmt:literal $(, $arg:expr)* $(,)?) => {{
        $crate::error::Error::msg(format!($fmt $(, $arg)*))
    }};
}
