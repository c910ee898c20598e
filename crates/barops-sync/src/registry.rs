use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use barops_adapters::{SourceEndpoint, SOURCE_SYSTEMS};
use barops_core::{BarId, SyncError};
use serde::Deserialize;
use tokio::fs;

/// Tenants and the sources configured for each, loaded from `bars.yaml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BarRegistry {
    #[serde(default)]
    pub bars: Vec<BarConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BarConfig {
    pub bar_id: BarId,
    pub name: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub sources: Vec<BarSourceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BarSourceConfig {
    pub source_system: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// Environment variable holding the bearer token for this source.
    #[serde(default)]
    pub token_env: Option<String>,
    #[serde(flatten)]
    pub endpoint: SourceEndpoint,
}

fn enabled_by_default() -> bool {
    true
}

impl BarSourceConfig {
    /// Bearer token for the source, read through `lookup`.
    pub fn resolve_token(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Option<String>, SyncError> {
        let Some(var) = &self.token_env else {
            return Ok(None);
        };
        match lookup(var).filter(|v| !v.trim().is_empty()) {
            Some(token) => Ok(Some(token)),
            None => Err(SyncError::Configuration(format!(
                "credential variable {var} for source {} is not set",
                self.source_system
            ))),
        }
    }
}

impl BarRegistry {
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let registry: BarRegistry = serde_yaml::from_str(text).context("parsing bar registry")?;
        registry.validate()?;
        Ok(registry)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("loading {}", path.display()))
    }

    fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for bar in &self.bars {
            if !seen.insert(bar.bar_id) {
                bail!("bar_id {} is listed twice", bar.bar_id);
            }
            let mut sources = BTreeSet::new();
            for source in &bar.sources {
                if !SOURCE_SYSTEMS.contains(&source.source_system.as_str()) {
                    bail!(
                        "bar {} lists unknown source {:?}",
                        bar.bar_id,
                        source.source_system
                    );
                }
                if !sources.insert(source.source_system.as_str()) {
                    bail!(
                        "bar {} lists source {} twice",
                        bar.bar_id,
                        source.source_system
                    );
                }
            }
        }
        Ok(())
    }

    pub fn enabled_bars(&self) -> impl Iterator<Item = &BarConfig> {
        self.bars.iter().filter(|b| b.enabled)
    }

    pub fn bar(&self, bar_id: BarId) -> Option<&BarConfig> {
        self.bars.iter().find(|b| b.bar_id == bar_id)
    }

    /// Enabled source configuration for an enabled bar.
    pub fn source(&self, bar_id: BarId, source_system: &str) -> Option<&BarSourceConfig> {
        self.bar(bar_id)
            .filter(|bar| bar.enabled)?
            .sources
            .iter()
            .find(|s| s.enabled && s.source_system == source_system)
    }
}

impl BarConfig {
    pub fn enabled_sources(&self) -> impl Iterator<Item = &BarSourceConfig> {
        self.sources.iter().filter(|s| s.enabled)
    }
}
