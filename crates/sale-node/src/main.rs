// sale-node/src/main.rs
use clap::{Parser, Subcommand};
use sale_node::{runtime, NodeConfig, NodeState};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "sale-node")]
#[command(about = "Capped two-rate token sale runner", version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration
    Init {
        /// Data directory
        #[arg(short, long, default_value = "./data")]
        data_dir: String,
    },

    /// Execute an action script against the sale
    Replay {
        /// Configuration file path
        #[arg(short, long, default_value = "./data/config.toml")]
        config: String,

        /// JSON array of steps
        #[arg(short, long)]
        script: String,

        /// Persisted sale; defaults to `sale.bin` in the data directory
        #[arg(long)]
        state: Option<String>,
    },

    /// Print the snapshot of a persisted sale
    Inspect {
        /// Persisted sale
        #[arg(long)]
        state: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug {
        "debug".to_string()
    } else {
        configured_level(&cli.command).unwrap_or_else(|| "info".to_string())
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "sale_node={lvl},token_sale={lvl},sale_core={lvl}",
                    lvl = log_level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Init { data_dir } => {
            init_node(&data_dir)?;
        }
        Commands::Replay {
            config,
            script,
            state,
        } => {
            replay(&config, &script, state)?;
        }
        Commands::Inspect { state } => {
            inspect(&state)?;
        }
    }

    Ok(())
}

/// Logging level from the configuration file, when the command reads one
fn configured_level(command: &Commands) -> Option<String> {
    match command {
        Commands::Replay { config, .. } => NodeConfig::from_file(config)
            .ok()
            .map(|config| config.logging.level),
        _ => None,
    }
}

fn init_node(data_dir: &str) -> anyhow::Result<()> {
    tracing::info!("Initializing sale at {}", data_dir);

    std::fs::create_dir_all(data_dir)?;

    let config = NodeConfig {
        data_dir: data_dir.to_string(),
        ..NodeConfig::default()
    };
    let path = PathBuf::from(data_dir).join("config.toml");
    config.to_file(&path)?;

    tracing::info!("Sale initialized successfully at {}", data_dir);
    tracing::info!("Edit {} to configure the sale", path.display());

    Ok(())
}

fn replay(config_path: &str, script_path: &str, state_path: Option<String>) -> anyhow::Result<()> {
    tracing::info!("Loading configuration from {}", config_path);
    let config = NodeConfig::from_file(config_path)?;

    let state_path = state_path
        .map(PathBuf::from)
        .unwrap_or_else(|| config.state_path());

    let mut state = NodeState::open(&config, &state_path)?;
    let steps = runtime::load_script(script_path)?;
    tracing::info!("Replaying {} steps from {}", steps.len(), script_path);

    let report = state.replay(&steps);
    tracing::info!(
        "Replay complete: {} applied, {} rejected",
        report.applied,
        report.rejected
    );

    state.save(&state_path)?;
    println!("{}", serde_json::to_string_pretty(&report.snapshot)?);

    Ok(())
}

fn inspect(state_path: &str) -> anyhow::Result<()> {
    let state = NodeState::load(state_path)?;
    let snapshot = state.sale.snapshot();

    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    tracing::info!(
        "Escrow holds {} wei across {} contributors",
        state.settlement.escrow_balance(),
        snapshot.contributors
    );

    Ok(())
}
