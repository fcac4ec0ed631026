use anyhow::Context;
use scout::config::ScoutConfig;
use scout::engine::core::DiscoveryEngine;
use scout::source::registry::SourceRegistry;
use scout::telemetry;
use tracing::info;

enum CliCommand {
    Run { config_path: Option<String> },
    Validate { config_paths: Vec<String> },
    Help,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_tracing().context("failed to initialise telemetry")?;

    match parse_cli_args()? {
        CliCommand::Run { config_path } => run(config_path).await,
        CliCommand::Validate { config_paths } => validate(config_paths),
        CliCommand::Help => {
            print_help();
            Ok(())
        }
    }
}

async fn run(config_path: Option<String>) -> anyhow::Result<()> {
    let config = match config_path {
        Some(path) => ScoutConfig::load_from(&path),
        None => ScoutConfig::load(),
    }
    .context("failed to load configuration")?;

    let registry = SourceRegistry::with_builtins();
    let engine = DiscoveryEngine::new(config, registry);

    engine
        .initialize()
        .await
        .context("failed to initialise discovery engine")?;

    let discovered = engine
        .start_discovery()
        .await
        .context("failed to start discovery")?;
    info!(services = discovered.len(), "initial discovery pass complete");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received");

    engine.stop().await;
    let catalog = engine.discovered_services().await;
    info!(services = catalog.len(), "engine stopped");
    Ok(())
}

fn validate(config_paths: Vec<String>) -> anyhow::Result<()> {
    let mut failures = 0usize;
    for path in &config_paths {
        match ScoutConfig::load_from(path) {
            Ok(config) => {
                println!(
                    "{path}: OK ({} sources, {} enabled)",
                    config.sources.len(),
                    config.enabled_sources().len()
                );
            }
            Err(err) => {
                failures += 1;
                eprintln!("{path}: {err}");
            }
        }
    }
    if failures > 0 {
        anyhow::bail!("{failures} configuration file(s) failed validation");
    }
    Ok(())
}

fn parse_cli_args() -> anyhow::Result<CliCommand> {
    let mut args = std::env::args().skip(1);
    let Some(first) = args.next() else {
        return Ok(CliCommand::Run { config_path: None });
    };

    match first.as_str() {
        "validate" => {
            let config_paths: Vec<String> = args.collect();
            if config_paths.is_empty() {
                anyhow::bail!("validate requires at least one configuration file path");
            }
            Ok(CliCommand::Validate { config_paths })
        }
        "run" => {
            let mut config_path = None;
            while let Some(arg) = args.next() {
                match arg.as_str() {
                    "--config" => {
                        config_path = Some(
                            args.next()
                                .ok_or_else(|| anyhow::anyhow!("--config requires a path"))?,
                        );
                    }
                    "--help" | "-h" => return Ok(CliCommand::Help),
                    other => anyhow::bail!("unknown argument: {other}"),
                }
            }
            Ok(CliCommand::Run { config_path })
        }
        "--help" | "-h" | "help" => Ok(CliCommand::Help),
        other => anyhow::bail!("unknown command: {other} (try `scout help`)"),
    }
}

fn print_help() {
    println!(
        "scout - discovery orchestration engine

USAGE:
    scout [run [--config <path>]]    start discovery with the given config
    scout validate <path>...         validate configuration files and exit
    scout help                       show this message

Configuration defaults to config/scout.{{yaml,toml}} plus SCOUT__ environment
overrides (e.g. SCOUT__AGGREGATION__CONFIDENCE_THRESHOLD=0.7)."
    );
}
