//! Fleetcheck - convergence validation for provisioned storage fleets
//!
//! The `fleetcheck` command provisions each scenario's fleet in its own
//! workspace, waits for the arrays to converge, cross-checks the evidence
//! and tears everything down again.
//!
//! ## Commands
//!
//! - `run`: run the selected scenarios and report the verdicts
//! - `scenarios`: list the scenario matrix
//! - `check-env`: resolve the required parameters without provisioning

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use fleet_adapters::{Ec2Inventory, SshExecutor, TerraformCli};
use fleet_interfaces::ParameterValue;
use fleetcheck_core::{
    render_json, render_text, Collaborators, EnvironmentResolver, FleetConfig, FleetError,
    Layered, ProcessEnv, ScenarioRunner,
};
use serde::Serialize;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "fleetcheck")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Convergence validation for provisioned storage fleets", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision, validate and tear down the selected scenarios
    Run {
        /// Configuration file (TOML); built-in defaults when omitted
        #[arg(short, long, env = "FLEETCHECK_CONFIG")]
        config: Option<PathBuf>,

        /// Scenario to run (repeatable); all scenarios when omitted
        #[arg(short, long = "scenario")]
        scenarios: Vec<String>,

        /// Report format
        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// List the scenario matrix
    Scenarios {
        /// Configuration file (TOML); built-in defaults when omitted
        #[arg(short, long, env = "FLEETCHECK_CONFIG")]
        config: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Resolve the required parameters and report what is missing
    CheckEnv {
        /// Configuration file (TOML); built-in defaults when omitted
        #[arg(short, long, env = "FLEETCHECK_CONFIG")]
        config: Option<PathBuf>,

        /// Output format
        #[arg(long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    fleetcheck_core::init_tracing(cli.json_logs, level);

    match cli.command {
        Commands::Run {
            config,
            scenarios,
            format,
        } => {
            let config = load_config(config.as_deref())?;
            let resolver = resolver_for(&config);
            cmd_run(config, resolver, &scenarios, format).await
        }
        Commands::Scenarios { config, format } => {
            let config = load_config(config.as_deref())?;
            cmd_scenarios(&config, format)
        }
        Commands::CheckEnv { config, format } => {
            let config = load_config(config.as_deref())?;
            let resolver = resolver_for(&config);
            cmd_check_env(&config, &resolver, format)
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<FleetConfig> {
    FleetConfig::load_or_default(path).with_context(|| match path {
        Some(path) => format!("Failed to load configuration from {}", path.display()),
        None => "Invalid built-in configuration".to_string(),
    })
}

/// Process environment first, then the configuration's fixed defaults.
fn resolver_for(config: &FleetConfig) -> EnvironmentResolver {
    EnvironmentResolver::new(
        Layered::new()
            .then(ProcessEnv::with_prefix(config.environment.prefix.clone()))
            .then(config.environment.defaults.clone()),
    )
}

/// Real collaborators configured from the adapter settings.
async fn collaborators(config: &FleetConfig, resolver: &EnvironmentResolver) -> Collaborators {
    let adapters = &config.adapters;

    let provisioner = TerraformCli::new(
        adapters.terraform_binary.clone(),
        Duration::from_secs(adapters.command_timeout_secs),
    );

    let region = config
        .environment
        .required
        .iter()
        .find(|spec| spec.parameter_name() == adapters.region_parameter)
        .and_then(|spec| resolver.lookup(&spec.key));
    let inventory =
        Ec2Inventory::load(region, Duration::from_secs(adapters.query_timeout_secs)).await;

    let remote = SshExecutor::new(
        adapters.ssh_binary.clone(),
        Duration::from_secs(adapters.connect_timeout_secs),
        Duration::from_secs(adapters.remote_timeout_secs),
    );

    Collaborators::new(Arc::new(provisioner), Arc::new(inventory), Arc::new(remote))
}

/// Run the selected scenarios and print the report.
async fn cmd_run(
    config: FleetConfig,
    resolver: EnvironmentResolver,
    names: &[String],
    format: Format,
) -> Result<()> {
    let scenarios = config
        .select_scenarios(names)
        .context("Failed to select scenarios")?;
    info!(
        scenarios = scenarios.len(),
        max_concurrent = config.max_concurrent,
        "starting fleetcheck run"
    );

    let collaborators = collaborators(&config, &resolver).await;
    let runner = ScenarioRunner::new(config, resolver, collaborators);
    let report = runner.run_all(scenarios).await;

    match format {
        Format::Text => print!("{}", render_text(&report)),
        Format::Json => println!("{}", render_json(&report).context("Failed to render report")?),
    }

    if report.passed() {
        Ok(())
    } else {
        anyhow::bail!(
            "{} of {} scenario(s) failed",
            report.failed_count(),
            report.outcomes.len()
        )
    }
}

/// Print the scenario matrix.
fn cmd_scenarios(config: &FleetConfig, format: Format) -> Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&config.scenarios)?),
        Format::Text => print!("{}", render_scenarios(config)),
    }
    Ok(())
}

fn render_scenarios(config: &FleetConfig) -> String {
    let mut out = String::new();
    for scenario in &config.scenarios {
        out.push_str(&format!(
            "{:<12} {:<7} members={} resources={}",
            scenario.name,
            scenario.level_label(),
            scenario.members,
            scenario.resources
        ));
        if let Some(class) = &scenario.compute_class {
            out.push_str(&format!(" class={class}"));
        }
        out.push('\n');
    }
    out
}

#[derive(Debug, Serialize)]
struct ResolvedParameter {
    name: String,
    value: String,
}

/// Resolve the required parameters and list them, or fail naming what is
/// missing.
fn cmd_check_env(config: &FleetConfig, resolver: &EnvironmentResolver, format: Format) -> Result<()> {
    let resolved = check_env(config, resolver).context("Environment is incomplete")?;
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&resolved)?),
        Format::Text => {
            for parameter in &resolved {
                println!("  {:<24} {}", parameter.name, parameter.value);
            }
            println!("All {} required parameter(s) resolved", resolved.len());
        }
    }
    Ok(())
}

fn check_env(
    config: &FleetConfig,
    resolver: &EnvironmentResolver,
) -> std::result::Result<Vec<ResolvedParameter>, FleetError> {
    let resolved = resolver.resolve(&config.required_for_all(&config.scenarios))?;
    Ok(resolved
        .iter()
        .map(|(name, value)| ResolvedParameter {
            name: name.clone(),
            value: display_value(value),
        })
        .collect())
}

fn display_value(value: &ParameterValue) -> String {
    match value {
        ParameterValue::String(s) => s.clone(),
        ParameterValue::Integer(n) => n.to_string(),
        ParameterValue::List(items) => items.join(","),
    }
}
