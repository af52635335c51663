use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use relay_core::{
    AgentRole, OpenAiCompatAdapter, RelayConfig, RelayService, RouteRequest, TaskType,
    format_report,
};

mod config;

#[derive(Parser)]
#[command(name = "relay")]
#[command(version)]
#[command(about = "Capacity-aware model routing and agent delegation")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize config directory and default config
    Init,

    /// Validate the configuration and summarize it
    Check,

    /// Show current configuration (API keys masked)
    Config,

    /// Route one prompt through the provider fallback chain
    Route {
        /// The prompt to send
        prompt: String,

        /// Calling agent role
        #[arg(long, default_value = "supervisor")]
        role: AgentRole,

        /// Task type used to pick the routing rule
        #[arg(long, default_value = "reasoning")]
        task: TaskType,

        /// Print the utilization report afterwards
        #[arg(long)]
        report: bool,
    },

    /// Decide whether a query should be delegated, and to whom
    Delegate {
        /// The user query
        query: String,

        /// Capability the delegate must advertise
        #[arg(long)]
        capability: Option<String>,

        /// Skip the model classification tier and match keywords only
        #[arg(long)]
        no_reasoning: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init => cmd_init().await,
        Commands::Check => cmd_check(&cli.config),
        Commands::Config => cmd_config(&cli.config),
        Commands::Route {
            prompt,
            role,
            task,
            report,
        } => cmd_route(&cli.config, &prompt, role, task, report).await,
        Commands::Delegate {
            query,
            capability,
            no_reasoning,
        } => cmd_delegate(&cli.config, &query, capability.as_deref(), no_reasoning).await,
    }
}

async fn cmd_init() -> Result<()> {
    let config_dir = config::config_dir();
    tokio::fs::create_dir_all(&config_dir)
        .await
        .with_context(|| format!("Failed to create config dir: {}", config_dir.display()))?;

    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        warn!("Config already exists at {}", config_path.display());
    } else {
        let default_config = include_str!("../../../config/default.toml");
        tokio::fs::write(&config_path, default_config).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&config_path, std::fs::Permissions::from_mode(0o600))
                .await
                .with_context(|| format!("Failed to restrict {}", config_path.display()))?;
        }
        info!("Created default config at {}", config_path.display());
    }

    println!("Relay initialized at {}", config_dir.display());
    println!(
        "Edit {} to configure providers, routing rules and delegates.",
        config_path.display()
    );
    Ok(())
}

fn cmd_check(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = config::load(config_path)?;
    println!(
        "Configuration OK: {} providers, {} routing rules, {} delegates",
        cfg.providers.len(),
        cfg.routing.rules.len(),
        cfg.delegates.len()
    );
    println!("Universal fallback: {}", cfg.routing.universal_fallback);
    for (id, provider) in &cfg.providers {
        if provider.api_key.is_empty() {
            println!("  warning: provider '{}' has no API key set", id);
        }
    }
    Ok(())
}

fn cmd_config(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = config::load(config_path)?;
    println!(
        "{}",
        toml::to_string_pretty(&config::redacted(&cfg)).context("Failed to render config")?
    );
    Ok(())
}

fn build_service(cfg: &RelayConfig) -> Result<RelayService> {
    let adapter = Arc::new(
        OpenAiCompatAdapter::from_config(cfg).context("Failed to set up provider endpoints")?,
    );
    RelayService::from_config(cfg, adapter).context("Failed to start routing service")
}

/// Token cancelled on Ctrl+C
fn ctrl_c_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, cancelling");
            trigger.cancel();
        }
    });
    cancel
}

async fn cmd_route(
    config_path: &Option<PathBuf>,
    prompt: &str,
    role: AgentRole,
    task: TaskType,
    report: bool,
) -> Result<()> {
    let cfg = config::load(config_path)?;
    let service = build_service(&cfg)?;
    let cancel = ctrl_c_token();

    let request = RouteRequest::new(role, task, prompt);
    let result = service.route(&request, &cancel).await;

    if report {
        let reporter = service.reporter();
        eprintln!("{}", format_report(&reporter.stats(), &service.health()));
    }

    let outcome = result.context("Routing failed")?;
    println!("{}", outcome.text);
    eprintln!(
        "-- served by {} (fallback depth {}, {}ms)",
        outcome.provider,
        outcome.fallback_depth,
        outcome.latency.as_millis()
    );
    Ok(())
}

async fn cmd_delegate(
    config_path: &Option<PathBuf>,
    query: &str,
    capability: Option<&str>,
    no_reasoning: bool,
) -> Result<()> {
    let mut cfg = config::load(config_path)?;
    if no_reasoning {
        cfg.delegation.reasoning_enabled = false;
    }
    let service = build_service(&cfg)?;
    let cancel = ctrl_c_token();

    let decision = service.delegate(query, capability, &cancel).await;
    println!(
        "{}",
        serde_json::to_string_pretty(&decision).context("Failed to render decision")?
    );
    Ok(())
}
