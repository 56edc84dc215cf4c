//! Engine configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

use crate::attempt::AttemptSettings;
use crate::error::{EngineError, EngineResult};
use crate::patterns::PatternPolicy;
use crate::playwright::PlaywrightConfig;

/// Engine configuration, normally read from `launchgate.toml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub engine: RunSettings,

    /// Per-attempt timing and retry budget
    pub attempt: AttemptSettings,

    pub browser: PlaywrightConfig,

    /// Thresholds for cross-run pattern detection
    pub patterns: PatternPolicy,

    pub policy: RunPolicy,
}

/// Run-level execution settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    /// Attempts in flight at once
    pub concurrency: usize,

    /// Stop dispatching once a critical attempt fails
    pub fail_fast: bool,

    /// Prior snapshots consulted for frequency scoring
    pub history_window: usize,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            concurrency: 2,
            fail_fast: false,
            history_window: 10,
        }
    }
}

/// Which attempts a run may execute
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunPolicy {
    /// Attempt ids never executed
    pub skip: BTreeSet<String>,

    /// When non-empty, only these attempt ids are executed
    pub only: BTreeSet<String>,
}

impl RunPolicy {
    /// Why an attempt is excluded, if it is
    pub fn skip_reason(&self, attempt_id: &str) -> Option<String> {
        if self.skip.contains(attempt_id) {
            Some("skipped by policy".to_string())
        } else if !self.only.is_empty() && !self.only.contains(attempt_id) {
            Some("not in policy allow-list".to_string())
        } else {
            None
        }
    }
}

impl EngineConfig {
    /// Load configuration from file; a missing file yields defaults
    pub fn load(path: &Path) -> EngineResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Self::from_toml_str(&content)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_toml_str(content: &str) -> EngineResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> EngineResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| EngineError::Validation(format!("cannot serialize config: {}", e)))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.engine.concurrency == 0 {
            return Err(EngineError::Validation(
                "engine.concurrency must be at least 1".into(),
            ));
        }
        if self.attempt.poll_interval_ms == 0 {
            return Err(EngineError::Validation(
                "attempt.poll_interval_ms must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.attempt.low_confidence) {
            return Err(EngineError::Validation(
                "attempt.low_confidence must be within [0, 1]".into(),
            ));
        }
        if self.patterns.window < 2 {
            return Err(EngineError::Validation(
                "patterns.window must be at least 2".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playwright::Browser;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = EngineConfig::load(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.engine.concurrency, 2);
        assert_eq!(config.attempt.max_step_retries, 2);
    }

    #[test]
    fn test_partial_file_overrides_only_named_keys() {
        let config = EngineConfig::from_toml_str(
            r#"
[engine]
concurrency = 4
fail_fast = true

[browser]
browser = "webkit"

[policy]
skip = ["pricing"]
"#,
        )
        .unwrap();
        assert_eq!(config.engine.concurrency, 4);
        assert!(config.engine.fail_fast);
        assert_eq!(config.engine.history_window, 10);
        assert_eq!(config.browser.browser, Browser::Webkit);
        assert_eq!(
            config.policy.skip_reason("pricing").as_deref(),
            Some("skipped by policy")
        );
        assert!(config.policy.skip_reason("signup").is_none());
    }

    #[test]
    fn test_only_list() {
        let policy = RunPolicy {
            only: ["signup".to_string()].into_iter().collect(),
            ..Default::default()
        };
        assert!(policy.skip_reason("signup").is_none());
        assert!(policy.skip_reason("landing").is_some());
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(EngineConfig::from_toml_str("[engine]\nconcurrency = 0\n").is_err());
        assert!(EngineConfig::from_toml_str("[attempt]\nlow_confidence = 1.5\n").is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("launchgate.toml");
        let mut config = EngineConfig::default();
        config.engine.concurrency = 3;
        config.save(&path).unwrap();
        assert_eq!(EngineConfig::load(&path).unwrap(), config);
    }
}
