use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;
use std::sync::Arc;
use taskwarden::{
    config::{credential_flags, EnvSnapshot},
    logging,
    registry::{env_endpoints, EndpointStatus, HttpProber, ServiceEndpoint, ServiceRegistry},
    Config, OperationMode, Platform,
};
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to <config dir>/taskwarden/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level: error, warn, info, debug, trace
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the controller, registry and observability hub until Ctrl-C
    Run {
        /// Operation mode override
        #[arg(short, long)]
        mode: Option<OperationMode>,

        /// Skip network discovery at startup
        #[arg(long)]
        no_discovery: bool,
    },
    /// Show services and credentials found in the environment
    Env,
    /// Probe the discovery matrix once and print what answered
    Discover {
        /// Per-probe timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Command::Run { mode, no_discovery } => {
            logging::init(&config.logging.level, config.logging.format)?;
            run(config, mode, no_discovery).await
        }
        Command::Env => {
            print_env(&EnvSnapshot::from_process());
            Ok(())
        }
        Command::Discover { timeout_ms } => {
            logging::init(&config.logging.level, config.logging.format)?;
            discover(config, timeout_ms).await
        }
        Command::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::load().context("failed to load config")?,
    };
    config
        .apply_env_overrides(&EnvSnapshot::from_process())
        .context("invalid TASKWARDEN_* override")?;
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    config.validate()?;
    Ok(config)
}

async fn run(mut config: Config, mode: Option<OperationMode>, no_discovery: bool) -> anyhow::Result<()> {
    if let Some(mode) = mode {
        config.controller.mode = mode;
    }
    if no_discovery {
        config.registry.auto_discovery = false;
    }

    let platform = Platform::builder(config).build()?;
    platform.start().await?;

    println!("{}", "taskwarden running".bright_green().bold());
    println!(
        "  {} {}",
        "mode:".bright_white().bold(),
        platform.controller().mode().await.to_string().bright_cyan()
    );
    print_services(&platform.registry().services().await);
    println!("{}", "Press Ctrl-C to stop".bright_yellow());

    tokio::signal::ctrl_c().await.context("failed to listen for Ctrl-C")?;
    info!("shutdown requested");
    platform.stop().await;

    let status = platform.controller().status().await;
    println!(
        "\n{} {} completed, {} failed, {} cancelled, {} still queued",
        "Summary:".bright_white().bold(),
        status.completed.to_string().bright_green(),
        status.failed.to_string().bright_red(),
        status.cancelled,
        status.queued
    );
    Ok(())
}

fn print_env(env: &EnvSnapshot) {
    let endpoints = env_endpoints(env);
    println!("{}", "Services:".bright_yellow());
    if endpoints.is_empty() {
        println!("  none configured");
    }
    for endpoint in &endpoints {
        println!(
            "  {:<28} {:<18} {}",
            endpoint.id.bright_white(),
            endpoint.service_type.as_str(),
            endpoint.url
        );
    }

    println!("\n{}", "Credentials:".bright_yellow());
    for flag in credential_flags(env) {
        let marker = if flag.present { "present".bright_green() } else { "missing".bright_red() };
        println!("  {:<22} {}", flag.name, marker);
    }
}

async fn discover(mut config: Config, timeout_ms: Option<u64>) -> anyhow::Result<()> {
    if let Some(timeout_ms) = timeout_ms {
        config.registry.probe_timeout_ms = timeout_ms;
    }

    let prober = Arc::new(HttpProber::new(config.registry.probe_timeout())?);
    let registry = ServiceRegistry::builder(config.registry)
        .prober(prober)
        .env(EnvSnapshot::default())
        .build()?;

    println!("{}", "Probing discovery matrix...".bright_cyan());
    let found = registry.discover().await;
    if found.is_empty() {
        println!("{}", "No services answered.".bright_yellow());
    } else {
        print_services(&found);
    }
    Ok(())
}

fn print_services(endpoints: &[ServiceEndpoint]) {
    for endpoint in endpoints {
        let status = match endpoint.status {
            EndpointStatus::Healthy => endpoint.status.to_string().bright_green(),
            EndpointStatus::Degraded => endpoint.status.to_string().bright_yellow(),
            EndpointStatus::Unhealthy => endpoint.status.to_string().bright_red(),
            _ => endpoint.status.to_string().normal(),
        };
        let latency = endpoint
            .latency_ms
            .map(|ms| format!("{} ms", ms))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<40} {:<18} {:<10} {:>8}  {}",
            endpoint.id.bright_white(),
            endpoint.service_type.as_str(),
            status,
            latency,
            endpoint.url
        );
    }
}
