//! State file watcher
//!
//! Watches the state file's directory (writes land via rename, which
//! replaces the inode) and triggers a reconcile on every change to the file.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::error::SchedulerResult;
use crate::scheduler::Scheduler;

/// Quiet period that folds a burst of events into one reconcile
const DEBOUNCE: Duration = Duration::from_millis(200);

/// Start watching; the watcher stops when the returned handle is dropped
pub fn watch_state_file(path: &Path) -> SchedulerResult<(RecommendedWatcher, mpsc::UnboundedReceiver<()>)> {
    let (tx, rx) = mpsc::unbounded_channel();
    let file_name = path.file_name().map(|n| n.to_os_string());

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            let relevant = matches!(
                event.kind,
                EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
            ) && event
                .paths
                .iter()
                .any(|p| p.file_name() == file_name.as_deref());
            if relevant {
                let _ = tx.send(());
            }
        }
        Err(e) => warn!("State file watch error: {}", e),
    })?;

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    debug!("Watching {:?} for schedule changes", path);
    Ok((watcher, rx))
}

/// Reconcile on every (debounced) change until the channel closes
pub async fn reconcile_on_change(scheduler: Scheduler, mut changes: mpsc::UnboundedReceiver<()>) {
    while changes.recv().await.is_some() {
        tokio::time::sleep(DEBOUNCE).await;
        while changes.try_recv().is_ok() {}

        debug!("State file changed, reconciling");
        if let Err(e) = scheduler.reconcile().await {
            error!("Reconcile after state change failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use launchgate_common::{Schedule, ScheduleFile};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_state_file_change_is_reported() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("schedules.json");
        let (_watcher, mut changes) = watch_state_file(&path).unwrap();

        std::fs::write(tmp.path().join("unrelated.txt"), b"x").unwrap();
        let file = ScheduleFile {
            schedules: vec![Schedule::new("https://app.test", None, 5)],
        };
        file.save(&path).await.unwrap();

        let changed = tokio::time::timeout(Duration::from_secs(5), changes.recv()).await;
        assert_eq!(changed.unwrap(), Some(()));
    }
}
