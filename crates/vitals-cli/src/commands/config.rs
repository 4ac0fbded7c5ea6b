use anyhow::Result;
use clap::{Args, ValueEnum};
use console::style;
use resilience::{ConfigLoader, EngineConfig};
use std::path::PathBuf;
use tracing::info;

use super::load_config;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ConfigFormat {
    Toml,
    Json,
}

#[derive(Debug, Args)]
pub struct ExampleConfigCommand {
    #[arg(short, long, value_enum, default_value = "toml")]
    format: ConfigFormat,

    /// Write to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,
}

impl ExampleConfigCommand {
    pub async fn execute(&self) -> Result<()> {
        let content = match self.format {
            ConfigFormat::Toml => ConfigLoader::generate_example_config()?,
            ConfigFormat::Json => serde_json::to_string_pretty(&ConfigLoader::example_config())?,
        };

        match &self.output {
            Some(path) => {
                tokio::fs::write(path, content).await?;
                info!(path = %path.display(), "Wrote example configuration");
                println!("Example configuration written to {}", path.display());
            }
            None => println!("{content}"),
        }
        Ok(())
    }
}

#[derive(Debug, Args)]
pub struct CheckConfigCommand {
    /// Configuration file; the standard locations are searched when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,
}

impl CheckConfigCommand {
    pub async fn execute(&self) -> Result<()> {
        let config = match load_config(self.config.as_deref()).await {
            Ok(config) => config,
            Err(e) => {
                println!("{} {e:#}", style("Configuration is invalid:").red().bold());
                return Err(e);
            }
        };

        println!("{}", style("Configuration is valid").green().bold());
        print_summary(&config);
        Ok(())
    }
}

fn print_summary(config: &EngineConfig) {
    println!(
        "  evaluation interval: {} ms, health check timeout: {} ms",
        config.evaluation_interval.as_millis(),
        config.health_check_timeout.as_millis()
    );
    println!(
        "  breaker: {} failures, reset after {} ms",
        config.breaker.failure_threshold,
        config.breaker.reset_timeout.as_millis()
    );

    println!("  components ({}):", config.components.len());
    for component in &config.components {
        let mut metrics: Vec<&String> = component.thresholds.keys().collect();
        metrics.sort();
        let metrics: Vec<&str> = metrics.iter().map(|m| m.as_str()).collect();
        println!(
            "    {} [{}]{}",
            style(&component.id).cyan(),
            metrics.join(", "),
            if component.breaker.is_some() {
                " (custom breaker)"
            } else {
                ""
            }
        );
    }

    println!("  strategies ({}):", config.strategies.len());
    let mut strategies: Vec<_> = config.strategies.iter().collect();
    strategies.sort_by_key(|s| s.priority);
    for strategy in strategies {
        let scope = strategy
            .component
            .as_ref()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "any".to_string());
        println!(
            "    {} priority {} on {} ({} action(s), max {} retries)",
            style(&strategy.id).cyan(),
            strategy.priority,
            scope,
            strategy.actions.len(),
            strategy.max_retries
        );
    }
}
