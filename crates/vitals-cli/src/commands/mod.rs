mod config;
mod run;

pub use config::{CheckConfigCommand, ExampleConfigCommand};
pub use run::RunCommand;

use anyhow::{Context, Result};
use resilience::{ConfigLoader, EngineConfig};
use std::path::Path;

/// Explicit file when given, otherwise the standard search path; env overrides
/// apply either way
pub(crate) async fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let loader = ConfigLoader::new();
    let Some(path) = path else {
        return loader.load().await.context("failed to load configuration");
    };

    let config = ConfigLoader::load_file(path)
        .await
        .with_context(|| format!("failed to load {}", path.display()))?;
    let config = loader.apply_overrides(config, |key| std::env::var(key).ok())?;
    config
        .validate()
        .with_context(|| format!("invalid configuration in {}", path.display()))?;
    Ok(config)
}
