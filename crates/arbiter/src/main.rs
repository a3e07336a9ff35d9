//! xapp-arbiter binary entry point
//!
//! Loads configuration and replays either the built-in demo or a scenario file
//! through the arbiter engine, printing engine events as JSON lines on stdout.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use xapp_arbiter::{
    tracing_setup, FanoutNotifier, FanoutSink, Notifier, Scenario, ScenarioRun, TracingNotifier,
    VERSION,
};
use xapp_arbiter_common::{EngineEvent, NotifyResult, SystemConfig};

#[derive(Parser)]
#[command(name = "xapp-arbiter")]
#[command(version = VERSION)]
#[command(about = "Conflict detection and resolution for competing xApp ratio requests")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.dev.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "RUST_LOG")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate configuration
    ValidateConfig,
    /// Run the built-in two-xApp demo
    Demo,
    /// Replay a scenario file
    Replay {
        /// Path to the scenario TOML file
        scenario: PathBuf,
    },
}

/// Prints each event as one JSON line on stdout.
struct JsonLinesNotifier;

impl Notifier for JsonLinesNotifier {
    fn notify(&self, event: &EngineEvent) -> NotifyResult<()> {
        let line = serde_json::to_string(event)?;
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", line)?;
        stdout.flush()?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = SystemConfig::from_file(&cli.config);
    let log_level = cli
        .log_level
        .clone()
        .or_else(|| loaded.as_ref().ok().map(|c| c.logging.level.clone()))
        .unwrap_or_else(|| "info".to_string());
    tracing_setup::init_tracing_with_level(&log_level)?;

    info!("xapp-arbiter v{} starting", VERSION);

    let config = loaded.map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;
    info!("Configuration loaded from {}", cli.config.display());

    match cli.command {
        Some(Commands::ValidateConfig) => {
            println!("✓ Configuration is valid");
            println!("  Detection window: {}ms", config.engine.detection_window_ms);
            println!("  Buffer delay: {}ms", config.engine.buffer_delay_ms);
            println!("  Onboarding scan: {}", config.engine.onboarding_scan);
            println!("  Strict onboarding: {}", config.engine.strict_onboarding);
            if let Some(path) = &config.sink.decision_log {
                println!("  Decision log: {}", path.display());
            }
            Ok(())
        }
        Some(Commands::Replay { scenario }) => {
            let scenario = Scenario::from_file(&scenario).map_err(|e| {
                error!("Failed to load scenario {}: {}", scenario.display(), e);
                e
            })?;
            replay(&config, scenario).await
        }
        Some(Commands::Demo) | None => replay(&config, Scenario::demo()).await,
    }
}

async fn replay(config: &SystemConfig, scenario: Scenario) -> Result<()> {
    let sink = FanoutSink::from_config(&config.sink);
    let notifier = FanoutNotifier::new(vec![
        Arc::new(TracingNotifier) as Arc<dyn Notifier>,
        Arc::new(JsonLinesNotifier) as Arc<dyn Notifier>,
    ]);

    let ScenarioRun { steps, events, dropped } = scenario
        .run(&config.engine, Arc::new(sink), Arc::new(notifier))
        .await?;

    info!(
        "Scenario '{}' finished: {} steps, {} events, {} dropped",
        scenario.name,
        steps.len(),
        events.len(),
        dropped.len()
    );
    Ok(())
}
