use anyhow::Result;
use clap::ValueEnum;
use console::{style, StyledObject};
use resilience::{AlertSeverity, HealthEvent, HealthStatus, SystemHealth};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    /// One JSON document per line
    Json,
}

fn status_style(status: HealthStatus) -> StyledObject<String> {
    let label = status.to_string();
    match status {
        HealthStatus::Healthy => style(label).green(),
        HealthStatus::Warning => style(label).yellow(),
        HealthStatus::Unhealthy => style(label).red(),
        HealthStatus::Critical => style(label).red().bold(),
    }
}

fn severity_style(severity: AlertSeverity) -> StyledObject<String> {
    let label = severity.to_string();
    match severity {
        AlertSeverity::Info => style(label).dim(),
        AlertSeverity::Warning => style(label).yellow(),
        AlertSeverity::Error => style(label).red(),
        AlertSeverity::Critical => style(label).red().bold(),
    }
}

pub fn print_snapshot(snapshot: &SystemHealth, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string(snapshot)?);
        return Ok(());
    }

    println!(
        "{} overall {} | {} component(s) | {} active alert(s) | up {}s",
        style(snapshot.generated_at.format("%H:%M:%S")).dim(),
        status_style(snapshot.overall),
        snapshot.components.len(),
        snapshot.active_alerts.len(),
        snapshot.uptime_ms / 1000
    );

    let mut components: Vec<_> = snapshot.components.values().collect();
    components.sort_by(|a, b| a.component_id.cmp(&b.component_id));
    for component in components {
        let mut metrics: Vec<_> = component.metrics.iter().collect();
        metrics.sort_by(|a, b| a.0.cmp(b.0));
        let metrics: Vec<String> = metrics
            .into_iter()
            .map(|(name, value)| format!("{name}={value:.1}"))
            .collect();
        let breaker = component
            .breaker
            .map(|state| format!(" breaker={state}"))
            .unwrap_or_default();
        println!(
            "  {:<12} {:<10} {}{}",
            component.component_id,
            status_style(component.status),
            metrics.join(" "),
            breaker
        );
        if let Some(message) = &component.message {
            println!("               {}", style(message).dim());
        }
    }

    for alert in &snapshot.active_alerts {
        println!(
            "  [{}] {}{}",
            severity_style(alert.severity),
            alert.message,
            if alert.occurrences > 1 {
                format!(" (x{})", alert.occurrences)
            } else {
                String::new()
            }
        );
    }
    Ok(())
}

pub fn print_event(event: &HealthEvent, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }

    let line = match event {
        HealthEvent::AlertRaised { alert } => format!(
            "alert raised [{}] {}",
            severity_style(alert.severity),
            alert.message
        ),
        HealthEvent::AlertEscalated { alert } => format!(
            "alert escalated [{}] {}",
            severity_style(alert.severity),
            alert.message
        ),
        HealthEvent::AlertResolved { alert } => {
            format!("alert resolved {}.{}", alert.component_id, alert.metric)
        }
        HealthEvent::StatusChanged {
            component_id,
            from,
            to,
        } => format!("{component_id}: {} -> {}", status_style(*from), status_style(*to)),
        HealthEvent::RecoveryStarted {
            strategy_id,
            component_id,
            attempt_number,
        } => format!("recovery '{strategy_id}' started on {component_id} (attempt {attempt_number})"),
        HealthEvent::RecoveryFinished { result } => format!(
            "recovery '{}' on {} {}{}",
            result.strategy_id,
            result.component_id,
            if result.success {
                style("succeeded").green()
            } else {
                style("failed").red()
            },
            if result.exhausted { ", retries exhausted" } else { "" }
        ),
        HealthEvent::Notification {
            component_id,
            severity,
            message,
        } => format!("[{}] {component_id}: {message}", severity_style(*severity)),
    };
    println!("{} {line}", style(event.topic()).dim());
    Ok(())
}
