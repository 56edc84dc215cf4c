//! CLI command implementations

pub mod baseline;
pub mod patterns;
pub mod run;
pub mod schedule;

use anyhow::Context as _;
use launchgate_common::{default_store_path, FsBlobStore, RunStore};
use launchgate_engine::{EngineConfig, RealityRunner};
use std::path::PathBuf;
use std::sync::Arc;

use crate::output::OutputFormat;

/// Settings shared by every command
pub struct Context {
    pub store_path: PathBuf,
    pub config_path: PathBuf,
    pub format: OutputFormat,
}

impl Context {
    pub fn new(store: Option<PathBuf>, config: Option<PathBuf>, format: OutputFormat) -> Self {
        let store_path = store.unwrap_or_else(default_store_path);
        let config_path = config.unwrap_or_else(|| store_path.join("launchgate.toml"));
        Self {
            store_path,
            config_path,
            format,
        }
    }

    pub fn load_config(&self) -> anyhow::Result<EngineConfig> {
        EngineConfig::load(&self.config_path)
            .with_context(|| format!("failed to load {}", self.config_path.display()))
    }

    pub async fn open_store(&self) -> anyhow::Result<RunStore> {
        let blobs = FsBlobStore::open(&self.store_path)
            .await
            .with_context(|| format!("failed to open store {}", self.store_path.display()))?;
        Ok(RunStore::new(Arc::new(blobs)))
    }

    pub async fn runner(&self, config: EngineConfig) -> anyhow::Result<RealityRunner> {
        Ok(RealityRunner::new(config, self.open_store().await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_inside_store() {
        let ctx = Context::new(Some(PathBuf::from("/tmp/lg")), None, OutputFormat::Table);
        assert_eq!(ctx.config_path, PathBuf::from("/tmp/lg/launchgate.toml"));
    }
}
