use crate::error::Result;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

const SERVICE_NAME: &str = "scout";

/// Install the global tracing subscriber.
///
/// INFO and below go to stdout, WARN and above to stderr, so operators can
/// split streams without losing the shared key=value shape.
pub fn init_tracing() -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("scout=info,info"));

    let stdout = std::io::stdout;
    let stderr = std::io::stderr;

    let writer = stderr
        .with_max_level(tracing::Level::WARN)
        .or_else(stdout);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(writer)
        .try_init()
        .map_err(|err| crate::err!("failed to initialise tracing subscriber: {err}"))?;

    tracing::info!(service = SERVICE_NAME, "telemetry initialised");
    Ok(())
}
