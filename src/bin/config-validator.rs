//! # Fleet Configuration Validator
//!
//! Command-line tool for checking a fleet configuration file, with
//! `FLEET__SECTION__KEY` environment overrides applied, before an
//! orchestrator process is started with it.

use clap::{Parser, Subcommand};
use fleet_core::config::{ConfigManager, FleetConfig};
use std::path::PathBuf;
use std::process;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate fleet orchestrator configuration files")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Configuration file (TOML). Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output format (table, json)
    #[arg(long, default_value = "table")]
    format: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load and validate the configuration
    Validate,
    /// Print the effective configuration after layering
    Show,
    /// Print the built-in defaults
    Defaults,
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let _ = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .try_init();

    let result = match &cli.command {
        Some(Commands::Validate) | None => validate(&cli),
        Some(Commands::Show) => show(&cli),
        Some(Commands::Defaults) => print_config(&FleetConfig::default(), &cli.format),
    };

    match result {
        Ok(()) => {
            info!("Configuration validation completed successfully");
            process::exit(0);
        }
        Err(e) => {
            error!("Configuration validation failed: {}", e);
            process::exit(1);
        }
    }
}

fn load(cli: &Cli) -> Result<ConfigManager, Box<dyn std::error::Error>> {
    match ConfigManager::load_from_file(cli.config.as_deref()) {
        Ok(manager) => Ok(manager),
        Err(e) => {
            println!("❌ {e}");
            Err(Box::new(e))
        }
    }
}

fn validate(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔧 Validating Fleet Configuration");
    match &cli.config {
        Some(path) => println!("Config File: {}", path.display()),
        None => println!("Config File: (built-in defaults)"),
    }
    println!();

    let manager = load(cli)?;
    let config = manager.config();

    println!("✅ Configuration loaded and validated");
    println!("   Environment: {}", manager.environment());
    println!("   Node: {}", config.leadership.node_id);
    println!(
        "   Reconciliation: {} every {}ms",
        if config.reconciliation.enabled {
            "enabled"
        } else {
            "disabled"
        },
        config.reconciliation.interval_ms
    );
    println!(
        "   Unreachable: inactive after {}s, expunge after {}s",
        config.unreachable.inactive_after_seconds, config.unreachable.expunge_after_seconds
    );
    println!(
        "   Deployment: step timeout {}s, capacity {}/{}",
        config.deployment.step_timeout_seconds,
        config.deployment.minimum_health_capacity,
        config.deployment.maximum_over_capacity
    );

    println!("\n🎉 All configuration validation checks passed!");
    Ok(())
}

fn show(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let manager = load(cli)?;
    print_config(manager.config(), &cli.format)
}

fn print_config(config: &FleetConfig, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(config)?);
        }
        "table" => {
            let value = serde_json::to_value(config)?;
            let Some(sections) = value.as_object() else {
                return Err("configuration did not serialize to an object".into());
            };
            for (section, fields) in sections {
                println!("[{section}]");
                if let Some(fields) = fields.as_object() {
                    for (key, value) in fields {
                        println!("  {key:<36} {value}");
                    }
                }
                println!();
            }
        }
        other => return Err(format!("Unknown output format: {other}").into()),
    }
    Ok(())
}
