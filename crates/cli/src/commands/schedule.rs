//! `launchgate schedule`
//!
//! Edits the schedule state file; a running daemon picks up every change
//! through its file watcher.

use anyhow::{bail, Context as _};
use clap::Subcommand;
use launchgate_common::{parse_target_url, Schedule, ScheduleFile, ScheduleStatus};
use launchgate_engine::presets::PRESET_NAMES;
use std::path::{Path, PathBuf};

use super::Context;
use crate::output;

#[derive(Subcommand)]
pub enum ScheduleCommands {
    /// Add a schedule (starts running immediately)
    Add {
        /// Target URL
        url: String,

        /// Minutes between runs
        #[arg(short, long, default_value = "60")]
        interval: u64,

        /// Attempt preset passed to each run
        #[arg(short, long)]
        preset: Option<String>,

        /// Schedule state file
        #[arg(long, env = "LAUNCHGATE_STATE_FILE")]
        state_file: Option<PathBuf>,
    },

    /// List schedules
    List {
        #[arg(long, env = "LAUNCHGATE_STATE_FILE")]
        state_file: Option<PathBuf>,
    },

    /// Resume a schedule; clears quarantine and backoff
    Start {
        /// Schedule ID
        id: String,

        #[arg(long, env = "LAUNCHGATE_STATE_FILE")]
        state_file: Option<PathBuf>,
    },

    /// Stop a schedule; an in-flight run is cancelled
    Stop {
        /// Schedule ID
        id: String,

        #[arg(long, env = "LAUNCHGATE_STATE_FILE")]
        state_file: Option<PathBuf>,
    },

    /// Remove a schedule
    Remove {
        /// Schedule ID
        id: String,

        #[arg(long, env = "LAUNCHGATE_STATE_FILE")]
        state_file: Option<PathBuf>,
    },
}

pub async fn execute(cmd: ScheduleCommands, ctx: &Context) -> anyhow::Result<i32> {
    match cmd {
        ScheduleCommands::Add {
            url,
            interval,
            preset,
            state_file,
        } => {
            let path = state_path(ctx, state_file);
            let schedule = build_schedule(&url, preset, interval)?;
            let mut file = load(&path).await?;
            file.add(schedule.clone())?;
            file.save(&path).await?;

            if ctx.format.is_structured() {
                output::print_value(&schedule, ctx.format);
            } else {
                output::print_success(&format!(
                    "Schedule {} added: {} every {}m",
                    schedule.id, schedule.url, schedule.interval_minutes
                ));
            }
        }

        ScheduleCommands::List { state_file } => {
            let file = load(&state_path(ctx, state_file)).await?;
            output::print_list(&file.schedules, ctx.format);
        }

        ScheduleCommands::Start { id, state_file } => {
            set_status(ctx, state_file, &id, ScheduleStatus::Running).await?;
            output::print_success(&format!("Schedule {} started", id));
        }

        ScheduleCommands::Stop { id, state_file } => {
            set_status(ctx, state_file, &id, ScheduleStatus::Stopped).await?;
            output::print_success(&format!("Schedule {} stopped", id));
        }

        ScheduleCommands::Remove { id, state_file } => {
            let path = state_path(ctx, state_file);
            let mut file = load(&path).await?;
            let removed = file.remove(&id)?;
            file.save(&path).await?;
            output::print_success(&format!("Schedule {} ({}) removed", removed.id, removed.url));
        }
    }
    Ok(0)
}

fn state_path(ctx: &Context, state_file: Option<PathBuf>) -> PathBuf {
    state_file.unwrap_or_else(|| ctx.store_path.join("schedules.json"))
}

async fn load(path: &Path) -> anyhow::Result<ScheduleFile> {
    ScheduleFile::load(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))
}

async fn set_status(
    ctx: &Context,
    state_file: Option<PathBuf>,
    id: &str,
    status: ScheduleStatus,
) -> anyhow::Result<()> {
    let path = state_path(ctx, state_file);
    let mut file = load(&path).await?;
    file.set_status(id, status)?;
    file.save(&path).await?;
    Ok(())
}

/// Validate inputs before anything reaches the state file
fn build_schedule(url: &str, preset: Option<String>, interval: u64) -> anyhow::Result<Schedule> {
    let parsed = parse_target_url(url)?;
    if interval == 0 {
        bail!("interval must be at least 1 minute");
    }
    if let Some(name) = &preset {
        if !PRESET_NAMES.contains(&name.as_str()) {
            bail!(
                "unknown preset '{}' (expected one of: {})",
                name,
                PRESET_NAMES.join(", ")
            );
        }
    }
    Ok(Schedule::new(parsed.as_str(), preset, interval))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputFormat;
    use tempfile::TempDir;

    fn context(tmp: &TempDir) -> Context {
        Context::new(Some(tmp.path().to_path_buf()), None, OutputFormat::Json)
    }

    #[test]
    fn test_build_schedule_rejects_bad_input() {
        assert!(build_schedule("ftp://app.test", None, 5).is_err());
        assert!(build_schedule("https://app.test", None, 0).is_err());
        assert!(build_schedule("https://app.test", Some("blog".into()), 5).is_err());

        let schedule = build_schedule("https://app.test", Some("saas".into()), 5).unwrap();
        assert_eq!(schedule.status, ScheduleStatus::Running);
        assert_eq!(schedule.interval_minutes, 5);
    }

    #[tokio::test]
    async fn test_add_stop_start_remove() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp);
        let path = tmp.path().join("schedules.json");

        let code = execute(
            ScheduleCommands::Add {
                url: "https://app.test".into(),
                interval: 10,
                preset: None,
                state_file: None,
            },
            &ctx,
        )
        .await
        .unwrap();
        assert_eq!(code, 0);

        let file = ScheduleFile::load(&path).await.unwrap();
        assert_eq!(file.schedules.len(), 1);
        let id = file.schedules[0].id.clone();

        execute(ScheduleCommands::Stop { id: id.clone(), state_file: None }, &ctx)
            .await
            .unwrap();
        let file = ScheduleFile::load(&path).await.unwrap();
        assert_eq!(file.schedules[0].status, ScheduleStatus::Stopped);

        execute(ScheduleCommands::Start { id: id.clone(), state_file: None }, &ctx)
            .await
            .unwrap();
        let file = ScheduleFile::load(&path).await.unwrap();
        assert_eq!(file.schedules[0].status, ScheduleStatus::Running);

        execute(ScheduleCommands::Remove { id: id.clone(), state_file: None }, &ctx)
            .await
            .unwrap();
        assert!(ScheduleFile::load(&path).await.unwrap().schedules.is_empty());

        let missing = execute(ScheduleCommands::Remove { id, state_file: None }, &ctx).await;
        assert!(missing.is_err());
    }
}
