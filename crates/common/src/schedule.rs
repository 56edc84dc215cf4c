//! Schedule state file
//!
//! The file is the source of truth for live scheduling: the CLI edits it,
//! the daemon watches it and rebuilds its timers from it. Every write goes
//! through a temp file and a rename.

use crate::{parse_target_url, Error, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleStatus {
    Running,
    Stopped,
}

impl std::fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduleStatus::Running => write!(f, "running"),
            ScheduleStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// A recurring run of one target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub id: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,
    pub interval_minutes: u64,
    pub status: ScheduleStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    /// Kept as text so a hand-edited, unparsable value can be quarantined
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<String>,
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default)]
    pub backoff_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_exit_code: Option<i32>,
    /// Set when the schedule can never be armed; cleared on restart
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quarantine_reason: Option<String>,
}

impl Schedule {
    /// A running schedule due immediately
    pub fn new(url: impl Into<String>, preset: Option<String>, interval_minutes: u64) -> Self {
        let now = Utc::now();
        let id = Uuid::new_v4().simple().to_string();
        Self {
            id: format!("sch-{}", &id[..8]),
            url: url.into(),
            preset,
            interval_minutes,
            status: ScheduleStatus::Running,
            created_at: now,
            last_run_at: None,
            next_run_at: Some(now.to_rfc3339()),
            consecutive_failures: 0,
            backoff_seconds: 0,
            last_exit_code: None,
            quarantine_reason: None,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::minutes(self.interval_minutes as i64)
    }

    /// Next fire time; a missing value means due now
    pub fn next_run(&self) -> Result<DateTime<Utc>> {
        match &self.next_run_at {
            None => Ok(Utc::now()),
            Some(raw) => DateTime::parse_from_rfc3339(raw)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| Error::Validation(format!("unparsable nextRunAt '{}': {}", raw, e))),
        }
    }

    /// Why this schedule can never be armed, if anything
    pub fn arming_problem(&self) -> Option<String> {
        if let Err(e) = parse_target_url(&self.url) {
            return Some(e.to_string());
        }
        if self.interval_minutes == 0 {
            return Some("intervalMinutes must be at least 1".to_string());
        }
        self.next_run().err().map(|e| e.to_string())
    }

    pub fn is_quarantined(&self) -> bool {
        self.quarantine_reason.is_some()
    }
}

/// On-disk schedule collection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleFile {
    #[serde(default)]
    pub schedules: Vec<Schedule>,
}

impl ScheduleFile {
    /// Load the file; a missing file is an empty set
    pub async fn load(path: &Path) -> Result<Self> {
        match fs::read(path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomic replace via a sibling temp file
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = temp_sibling(path);
        fs::write(&tmp, serde_json::to_vec_pretty(self)?).await?;
        fs::rename(&tmp, path).await?;
        debug!("Saved {} schedule(s) to {:?}", self.schedules.len(), path);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Schedule> {
        self.schedules.iter().find(|s| s.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Schedule> {
        self.schedules.iter_mut().find(|s| s.id == id)
    }

    pub fn add(&mut self, schedule: Schedule) -> Result<()> {
        if self.get(&schedule.id).is_some() {
            return Err(Error::AlreadyExists {
                kind: "schedule".to_string(),
                id: schedule.id,
            });
        }
        self.schedules.push(schedule);
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> Result<Schedule> {
        let index = self
            .schedules
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| Error::not_found("schedule", id))?;
        Ok(self.schedules.remove(index))
    }

    /// Start or stop a schedule. Starting clears quarantine and backoff.
    pub fn set_status(&mut self, id: &str, status: ScheduleStatus) -> Result<&Schedule> {
        let schedule = self
            .get_mut(id)
            .ok_or_else(|| Error::not_found("schedule", id))?;
        schedule.status = status;
        if status == ScheduleStatus::Running {
            schedule.quarantine_reason = None;
            schedule.consecutive_failures = 0;
            schedule.backoff_seconds = 0;
            schedule.next_run_at = Some(Utc::now().to_rfc3339());
        }
        Ok(schedule)
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "schedules.json".to_string());
    path.with_file_name(format!(".{}.{}.tmp", name, Uuid::new_v4().simple()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_is_empty_and_save_roundtrips() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state").join("schedules.json");

        let mut file = ScheduleFile::load(&path).await.unwrap();
        assert!(file.schedules.is_empty());

        let schedule = Schedule::new("https://app.test", Some("saas".into()), 30);
        let id = schedule.id.clone();
        file.add(schedule).unwrap();
        file.save(&path).await.unwrap();

        let loaded = ScheduleFile::load(&path).await.unwrap();
        assert_eq!(loaded, file);
        assert_eq!(loaded.get(&id).unwrap().status, ScheduleStatus::Running);

        // Only the state file remains; the temp file was renamed away
        let entries: Vec<_> = std::fs::read_dir(path.parent().unwrap()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_arming_problems() {
        let ok = Schedule::new("https://app.test", None, 5);
        assert!(ok.arming_problem().is_none());

        let bad_url = Schedule::new("not a url", None, 5);
        assert!(bad_url.arming_problem().is_some());

        let mut bad_time = Schedule::new("https://app.test", None, 5);
        bad_time.next_run_at = Some("tomorrow-ish".into());
        assert!(bad_time.arming_problem().unwrap().contains("nextRunAt"));

        let mut unset = Schedule::new("https://app.test", None, 5);
        unset.next_run_at = None;
        assert!(unset.arming_problem().is_none());
    }

    #[test]
    fn test_restart_clears_quarantine() {
        let mut file = ScheduleFile::default();
        let mut schedule = Schedule::new("https://app.test", None, 5);
        schedule.status = ScheduleStatus::Stopped;
        schedule.quarantine_reason = Some("bad".into());
        schedule.consecutive_failures = 4;
        let id = schedule.id.clone();
        file.add(schedule).unwrap();

        let started = file.set_status(&id, ScheduleStatus::Running).unwrap();
        assert!(!started.is_quarantined());
        assert_eq!(started.consecutive_failures, 0);

        assert!(file.set_status("missing", ScheduleStatus::Stopped).is_err());
        assert!(file.remove(&id).is_ok());
        assert!(file.remove(&id).unwrap_err().is_not_found());
    }
}
