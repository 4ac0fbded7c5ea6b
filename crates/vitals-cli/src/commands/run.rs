use anyhow::{Context, Result};
use clap::Args;
use resilience::{ComponentId, HealthEvent, HealthMonitor, MetricSample};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use super::load_config;
use crate::render::{print_event, print_snapshot, OutputFormat};

#[derive(Debug, Args)]
pub struct RunCommand {
    /// Configuration file; the standard locations are searched when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// How often to print a health snapshot
    #[arg(long, default_value_t = 5000)]
    snapshot_interval_ms: u64,

    /// Snapshot and event output format
    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Also print alert, status and recovery events as they happen
    #[arg(long)]
    events: bool,
}

/// One stdin line. `timestamp_ms` defaults to the time the line is read.
#[derive(Debug, Deserialize)]
struct SampleLine {
    #[serde(alias = "component")]
    component_id: ComponentId,
    #[serde(default)]
    timestamp_ms: Option<i64>,
    values: HashMap<String, f64>,
}

impl From<SampleLine> for MetricSample {
    fn from(line: SampleLine) -> Self {
        match line.timestamp_ms {
            Some(ts) => MetricSample::new(line.component_id, ts, line.values),
            None => MetricSample::now(line.component_id, line.values),
        }
    }
}

impl RunCommand {
    /// Runs until Ctrl-C or end of input, then prints a final snapshot
    pub async fn execute(&self) -> Result<()> {
        let config = load_config(self.config.as_deref()).await?;
        let interval = config.evaluation_interval;
        let monitor = HealthMonitor::new(config).context("failed to build health monitor")?;

        let mut events = monitor.subscribe();
        monitor.start(interval);
        info!(
            components = monitor.config().components.len(),
            strategies = monitor.config().strategies.len(),
            "Monitoring started; reading samples from stdin"
        );

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut ticker = tokio::time::interval(Duration::from_millis(self.snapshot_interval_ms.max(1)));
        ticker.tick().await;
        let mut line_number = 0u64;

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted, shutting down");
                    break;
                }
                line = lines.next_line() => match line? {
                    Some(line) => {
                        line_number += 1;
                        self.ingest(&monitor, line_number, &line);
                    }
                    None => {
                        info!(lines = line_number, "End of input");
                        break;
                    }
                },
                _ = ticker.tick() => print_snapshot(&monitor.snapshot(), self.format)?,
                event = events.recv(), if self.events => match event {
                    Ok(event) => print_event(&event, self.format)?,
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event output lagged"),
                    Err(RecvError::Closed) => {}
                },
            }
        }

        monitor.stop().await;
        if self.events {
            self.drain_events(&mut events)?;
        }
        print_snapshot(&monitor.snapshot(), self.format)?;
        Ok(())
    }

    fn ingest(&self, monitor: &HealthMonitor, line_number: u64, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        match serde_json::from_str::<SampleLine>(line) {
            Ok(sample) => {
                let component = sample.component_id.clone();
                if !monitor.submit_sample(sample.into()) {
                    warn!(line = line_number, component = %component, "Sample for unknown component");
                }
            }
            Err(e) => warn!(line = line_number, error = %e, "Skipping malformed sample"),
        }
    }

    fn drain_events(&self, events: &mut tokio::sync::broadcast::Receiver<HealthEvent>) -> Result<()> {
        while let Ok(event) = events.try_recv() {
            print_event(&event, self.format)?;
        }
        Ok(())
    }
}
