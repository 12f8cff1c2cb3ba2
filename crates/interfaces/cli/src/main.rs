use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use soms_brain::Brain;
use soms_bus::Bus;
use soms_config::SomsConfig;

#[derive(Debug, Parser)]
#[command(
    name = "soms",
    version,
    about = "Self-optimizing office management system"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "soms.toml")]
    config: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the cognitive core (ReAct loop over the message bus).
    Brain,
    /// Run the task store HTTP service.
    Taskstore,
    /// Run the wallet/ledger HTTP service.
    Ledger,
    /// Run the voice pipeline HTTP service.
    Voice,
    /// Run every service in one process sharing one message bus.
    Up,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = SomsConfig::load_from(&cli.config)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.telemetry.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // One pooled client per process; every outbound call reuses it.
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;

    match cli.command {
        Commands::Brain => {
            let bus = Bus::new();
            let brain = Brain::new(config.brain, config.llm, bus, http)?;
            brain.run().await
        }
        Commands::Taskstore => {
            soms_taskstore::serve(config.taskstore, http, None).await
        }
        Commands::Ledger => soms_ledger::serve(config.ledger).await,
        Commands::Voice => soms_voice::serve(config.voice, config.llm, http).await,
        Commands::Up => {
            let bus = Bus::new();

            let taskstore_config = config.taskstore.clone();
            let taskstore_http = http.clone();
            let taskstore_bus = bus.clone();
            let taskstore = tokio::spawn(async move {
                soms_taskstore::serve(taskstore_config, taskstore_http, Some(taskstore_bus)).await
            });

            let ledger_config = config.ledger.clone();
            let ledger = tokio::spawn(async move { soms_ledger::serve(ledger_config).await });

            let voice_config = config.voice.clone();
            let voice_llm = config.llm.clone();
            let voice_http = http.clone();
            let voice = tokio::spawn(async move {
                soms_voice::serve(voice_config, voice_llm, voice_http).await
            });

            let brain = Brain::new(config.brain, config.llm, bus, http)?;
            let brain_task = tokio::spawn(async move { brain.run().await });

            for (name, handle) in [
                ("taskstore", taskstore),
                ("ledger", ledger),
                ("voice", voice),
                ("brain", brain_task),
            ] {
                handle.await??;
                tracing::warn!(service = name, "service exited");
            }
            Ok(())
        }
    }
}
