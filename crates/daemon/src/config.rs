//! Daemon configuration

use launchgate_common::Schedule;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Daemon configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Store directory passed to every run
    pub store_path: PathBuf,

    /// Schedule state file
    pub state_file: PathBuf,

    /// Process invoked for each scheduled run
    pub entrypoint: String,

    /// Argument template; `{url}`, `{store}` and `{schedule_id}` are substituted
    pub args: Vec<String>,

    pub backoff: BackoffConfig,

    /// Reconcile when the state file changes on disk
    pub watch: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            store_path: launchgate_common::default_store_path(),
            state_file: launchgate_common::default_schedule_path(),
            entrypoint: "launchgate".to_string(),
            args: vec![
                "run".to_string(),
                "{url}".to_string(),
                "--store".to_string(),
                "{store}".to_string(),
            ],
            backoff: BackoffConfig::default(),
            watch: true,
        }
    }
}

/// Retry backoff after failed runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Floor for every timer delay; values below one second are raised to one
    pub min_secs: u64,

    /// Backoff after the first failure, doubled per further failure
    pub base_secs: u64,

    pub max_secs: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            min_secs: 1,
            base_secs: 60,
            max_secs: 3600,
        }
    }
}

impl BackoffConfig {
    pub fn min_delay(&self) -> Duration {
        Duration::from_secs(self.min_secs.max(1))
    }

    /// Backoff after `failures` consecutive failures
    pub fn backoff_for(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let exponent = (failures - 1).min(32);
        let secs = self
            .base_secs
            .saturating_mul(1u64 << exponent)
            .min(self.max_secs.max(self.min_secs));
        Duration::from_secs(secs).max(self.min_delay())
    }
}

impl DaemonConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Arguments for one scheduled run
    pub fn render_args(&self, schedule: &Schedule) -> Vec<String> {
        let store = self.store_path.display().to_string();
        let mut args: Vec<String> = self
            .args
            .iter()
            .map(|arg| {
                arg.replace("{url}", &schedule.url)
                    .replace("{store}", &store)
                    .replace("{schedule_id}", &schedule.id)
            })
            .collect();
        if let Some(preset) = &schedule.preset {
            args.push("--preset".to_string());
            args.push(preset.clone());
        }
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_to_cap() {
        let backoff = BackoffConfig {
            min_secs: 1,
            base_secs: 60,
            max_secs: 300,
        };
        assert_eq!(backoff.backoff_for(0), Duration::ZERO);
        assert_eq!(backoff.backoff_for(1), Duration::from_secs(60));
        assert_eq!(backoff.backoff_for(2), Duration::from_secs(120));
        assert_eq!(backoff.backoff_for(3), Duration::from_secs(240));
        assert_eq!(backoff.backoff_for(4), Duration::from_secs(300));
        assert_eq!(backoff.backoff_for(60), Duration::from_secs(300));
    }

    #[test]
    fn test_min_delay_is_at_least_one_second() {
        let backoff = BackoffConfig {
            min_secs: 0,
            base_secs: 0,
            max_secs: 0,
        };
        assert_eq!(backoff.min_delay(), Duration::from_secs(1));
        assert_eq!(backoff.backoff_for(1), Duration::from_secs(1));
    }

    #[test]
    fn test_render_args() {
        let config = DaemonConfig {
            store_path: PathBuf::from("/var/lib/launchgate"),
            ..Default::default()
        };
        let schedule = Schedule::new("https://app.test", Some("saas".into()), 10);
        assert_eq!(
            config.render_args(&schedule),
            vec![
                "run",
                "https://app.test",
                "--store",
                "/var/lib/launchgate",
                "--preset",
                "saas"
            ]
        );
    }

    #[test]
    fn test_partial_toml() {
        let config: DaemonConfig = toml::from_str("watch = false\n[backoff]\nmax_secs = 120\n").unwrap();
        assert!(!config.watch);
        assert_eq!(config.backoff.max_secs, 120);
        assert_eq!(config.backoff.base_secs, 60);
        assert_eq!(config.entrypoint, "launchgate");
    }
}
