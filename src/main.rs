use std::io::Read;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::Serialize;

use relay::config::{Config, ProviderConfig, ProviderKind};
use relay::dispatch::{Dispatcher, HealthReport, ParsedResult};
use relay::{rlog, rlog_error, ExecutionResult, Result};

/// Relay - route review and code-generation prompts across AI providers
#[derive(Parser, Debug)]
#[command(name = "relay")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    RELAY_DEBUG=1   Enable debug logging (alternative to --debug)")]
pub struct Cli {
    /// Config file (default: ~/.relay/relay.toml)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging (writes to ~/.relay/relay.log)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Review a file, or stdin when no file is given
    Review {
        path: Option<PathBuf>,
    },

    /// Run a code-generation prompt
    Exec {
        prompt: String,
    },

    /// Probe every configured provider
    Health,

    /// List configured providers in priority order
    Providers,
}

#[derive(Debug, Serialize)]
struct ProviderSummary<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    kind: ProviderKind,
    capabilities: &'a [String],
    endpoint: &'a str,
}

impl<'a> From<&'a ProviderConfig> for ProviderSummary<'a> {
    fn from(provider: &'a ProviderConfig) -> Self {
        let endpoint = match provider.kind {
            ProviderKind::Cli => provider.command.as_deref(),
            ProviderKind::Api => provider.url.as_deref(),
        };
        Self {
            name: &provider.name,
            kind: provider.kind,
            capabilities: &provider.capabilities,
            endpoint: endpoint.unwrap_or_default(),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    relay::log::init_with_debug(cli.debug);
    if relay::log::is_debug() {
        rlog!("relay starting (debug mode enabled): {:?}", cli.command);
    } else {
        rlog!("relay starting: {:?}", cli.command);
    }

    if let Err(e) = run(cli).await {
        rlog_error!("relay failed: {}", e);
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    if cli.command == Command::Providers {
        return print_providers(&config, cli.json);
    }

    let dispatcher = Dispatcher::from_config(&config)?;
    let result = match cli.command {
        Command::Review { path } => {
            let content = read_input(path)?;
            let parsed = dispatcher.review(&content).await?;
            print_review(&parsed, cli.json)
        }
        Command::Exec { prompt } => {
            let result = dispatcher.execute(&prompt).await?;
            print_execution(&result, cli.json)
        }
        Command::Health => {
            let report = dispatcher.health().await;
            print_health(&report, cli.json)
        }
        Command::Providers => Ok(()),
    };
    dispatcher.shutdown();
    result
}

fn read_input(path: Option<PathBuf>) -> Result<String> {
    match path {
        Some(path) => Ok(std::fs::read_to_string(path)?),
        None => {
            let mut content = String::new();
            std::io::stdin().read_to_string(&mut content)?;
            Ok(content)
        }
    }
}

fn print_providers(config: &Config, json: bool) -> Result<()> {
    let summaries: Vec<ProviderSummary> = config.providers.values().map(Into::into).collect();
    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }
    if summaries.is_empty() {
        println!("No providers configured");
        return Ok(());
    }
    for s in summaries {
        println!(
            "{:<16} {:<4} {:<32} {}",
            s.name,
            s.kind,
            s.endpoint,
            s.capabilities.join(",")
        );
    }
    Ok(())
}

fn print_review(parsed: &ParsedResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(parsed)?);
        return Ok(());
    }
    for finding in &parsed.findings {
        let location = match (&finding.file, finding.line) {
            (Some(file), Some(line)) => format!("{file}:{line}"),
            (Some(file), None) => file.clone(),
            _ => "-".to_string(),
        };
        println!(
            "[{}] {} {}",
            finding.severity.as_deref().unwrap_or("info"),
            location,
            finding.message.as_deref().unwrap_or_default()
        );
    }
    if !parsed.summary.is_empty() {
        if !parsed.findings.is_empty() {
            println!();
        }
        println!("{}", parsed.summary);
    }
    Ok(())
}

fn print_execution(result: &ExecutionResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
    } else {
        println!("{}", result.response.trim_end());
    }
    Ok(())
}

fn print_health(report: &HealthReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    for (name, health) in &report.providers {
        match (health.available, health.latency_ms) {
            (true, Some(ms)) => println!("{:<16} ok    {}ms", name, ms),
            _ => println!(
                "{:<16} down  {}",
                name,
                health.error.as_deref().unwrap_or("unavailable")
            ),
        }
    }
    println!(
        "{}/{} providers available",
        report.available_count(),
        report.providers.len()
    );
    Ok(())
}
