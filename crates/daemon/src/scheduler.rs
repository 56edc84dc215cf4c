//! Live scheduler
//!
//! One timer task per running schedule, keyed by schedule id. The state
//! file is the source of truth; the timer table is a cache rebuilt from it
//! by [`Scheduler::reconcile`]. All read-modify-write cycles on the file are
//! serialized through one async lock.

use chrono::Utc;
use launchgate_common::{ScheduleFile, ScheduleStatus, EXIT_SYSTEM_ERROR};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::DaemonConfig;
use crate::error::SchedulerResult;
use crate::invoker::Invoker;

/// What the scheduler did, for observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    Armed {
        id: String,
    },
    Cancelled {
        id: String,
    },
    Quarantined {
        id: String,
        reason: String,
    },
    Completed {
        id: String,
        exit_code: Option<i32>,
        consecutive_failures: u32,
    },
}

struct Timer {
    /// nextRunAt the timer was armed for
    next_run_at: Option<String>,
    generation: u64,
    handle: JoinHandle<()>,
}

struct Inner {
    config: DaemonConfig,
    invoker: Arc<dyn Invoker>,
    timers: Mutex<HashMap<String, Timer>>,
    file_lock: tokio::sync::Mutex<()>,
    generation: AtomicU64,
    events: broadcast::Sender<SchedulerEvent>,
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(config: DaemonConfig, invoker: Arc<dyn Invoker>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                config,
                invoker,
                timers: Mutex::new(HashMap::new()),
                file_lock: tokio::sync::Mutex::new(()),
                generation: AtomicU64::new(0),
                events,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.inner.events.subscribe()
    }

    /// Armed schedule ids with the sequence number of their current timer
    pub fn armed(&self) -> BTreeMap<String, u64> {
        self.inner
            .timers
            .lock()
            .iter()
            .filter(|(_, t)| !t.handle.is_finished())
            .map(|(id, t)| (id.clone(), t.generation))
            .collect()
    }

    /// Bring the timer table in line with the state file: quarantine what
    /// cannot be armed, cancel timers of stopped or removed schedules, arm
    /// new ones, and leave unchanged timers alone.
    pub async fn reconcile(&self) -> SchedulerResult<()> {
        let inner = &self.inner;
        let path = &inner.config.state_file;
        let _guard = inner.file_lock.lock().await;

        let mut file = ScheduleFile::load(path).await?;
        let mut quarantined = Vec::new();
        let mut desired: HashMap<String, Option<String>> = HashMap::new();

        for schedule in file.schedules.iter_mut() {
            if schedule.status != ScheduleStatus::Running || schedule.is_quarantined() {
                continue;
            }
            if let Some(reason) = schedule.arming_problem() {
                warn!(schedule = %schedule.id, "Quarantined: {}", reason);
                schedule.quarantine_reason = Some(reason.clone());
                quarantined.push((schedule.id.clone(), reason));
                continue;
            }
            desired.insert(schedule.id.clone(), schedule.next_run_at.clone());
        }
        if !quarantined.is_empty() {
            file.save(path).await?;
        }
        for (id, reason) in quarantined {
            inner.emit(SchedulerEvent::Quarantined { id, reason });
        }

        let mut timers = inner.timers.lock();
        let mut cancelled = Vec::new();
        timers.retain(|id, timer| {
            let keep =
                !timer.handle.is_finished() && desired.get(id) == Some(&timer.next_run_at);
            if !keep {
                timer.handle.abort();
                cancelled.push(id.clone());
            }
            keep
        });

        let mut armed = Vec::new();
        for (id, next_run_at) in desired {
            if timers.contains_key(&id) {
                continue;
            }
            let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
            let handle = tokio::spawn(run_timer(Arc::clone(inner), id.clone()));
            timers.insert(
                id.clone(),
                Timer {
                    next_run_at,
                    generation,
                    handle,
                },
            );
            armed.push(id);
        }
        let active = timers.len();
        drop(timers);

        for id in cancelled {
            debug!(schedule = %id, "Timer cancelled");
            inner.emit(SchedulerEvent::Cancelled { id });
        }
        for id in armed {
            debug!(schedule = %id, "Timer armed");
            inner.emit(SchedulerEvent::Armed { id });
        }
        info!("Reconciled schedules: {} timer(s) armed", active);
        Ok(())
    }

    /// Cancel every timer
    pub fn shutdown(&self) {
        let mut timers = self.inner.timers.lock();
        for (_, timer) in timers.drain() {
            timer.handle.abort();
        }
        info!("Scheduler stopped");
    }
}

impl Inner {
    fn emit(&self, event: SchedulerEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Persist the outcome of one run and compute the next fire time.
    /// Returns false when the timer should not re-arm.
    async fn record_run(
        &self,
        id: &str,
        exit_code: Option<i32>,
        failed: bool,
    ) -> SchedulerResult<bool> {
        let path = &self.config.state_file;
        let _guard = self.file_lock.lock().await;

        let mut file = ScheduleFile::load(path).await?;
        let Some(schedule) = file.get_mut(id) else {
            return Ok(false);
        };

        let now = Utc::now();
        schedule.last_run_at = Some(now);
        schedule.last_exit_code = exit_code;
        schedule.consecutive_failures = if failed {
            schedule.consecutive_failures.saturating_add(1)
        } else {
            0
        };
        let backoff = self.config.backoff.backoff_for(schedule.consecutive_failures);
        schedule.backoff_seconds = backoff.as_secs();

        let backoff = chrono::Duration::from_std(backoff).unwrap_or_else(|_| chrono::Duration::zero());
        let next_run_at = (now + schedule.interval() + backoff).to_rfc3339();
        schedule.next_run_at = Some(next_run_at.clone());

        let rearm = schedule.status == ScheduleStatus::Running && !schedule.is_quarantined();
        let failures = schedule.consecutive_failures;
        file.save(path).await?;

        if let Some(timer) = self.timers.lock().get_mut(id) {
            timer.next_run_at = Some(next_run_at);
        }
        self.emit(SchedulerEvent::Completed {
            id: id.to_string(),
            exit_code,
            consecutive_failures: failures,
        });
        Ok(rearm)
    }
}

async fn run_timer(inner: Arc<Inner>, id: String) {
    loop {
        let schedule = match ScheduleFile::load(&inner.config.state_file).await {
            Ok(file) => match file.get(&id) {
                Some(schedule) => schedule.clone(),
                None => return,
            },
            Err(e) => {
                warn!(schedule = %id, "Cannot read schedule state: {}", e);
                return;
            }
        };
        if schedule.status != ScheduleStatus::Running || schedule.is_quarantined() {
            return;
        }
        // Reconcile quarantines unparsable times
        let Ok(due) = schedule.next_run() else {
            return;
        };

        let wait = (due - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO)
            .max(inner.config.backoff.min_delay());
        debug!(schedule = %id, "Next run in {:?}", wait);
        tokio::time::sleep(wait).await;

        let args = inner.config.render_args(&schedule);
        info!(schedule = %id, "Starting scheduled run of {}", schedule.url);
        let outcome = inner.invoker.invoke(&inner.config.entrypoint, &args).await;
        let failed = match &outcome {
            Ok(code) => {
                info!(schedule = %id, exit_code = code, "Scheduled run finished");
                *code >= EXIT_SYSTEM_ERROR
            }
            Err(e) => {
                error!(schedule = %id, "Scheduled run could not start: {}", e);
                true
            }
        };

        match inner.record_run(&id, outcome.ok(), failed).await {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                // The next reconcile re-arms a finished timer
                warn!(schedule = %id, "Failed to record scheduled run: {}", e);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackoffConfig;
    use crate::error::SchedulerError;
    use async_trait::async_trait;
    use launchgate_common::Schedule;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    /// Returns the queued exit codes in order, then 0; `None` is a spawn error
    struct MockInvoker {
        outcomes: Mutex<Vec<Option<i32>>>,
        calls: AtomicUsize,
        last_args: Mutex<Vec<String>>,
    }

    impl MockInvoker {
        fn new(outcomes: Vec<Option<i32>>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes),
                calls: AtomicUsize::new(0),
                last_args: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Invoker for MockInvoker {
        async fn invoke(&self, entrypoint: &str, args: &[String]) -> SchedulerResult<i32> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_args.lock() = args.to_vec();
            let mut outcomes = self.outcomes.lock();
            let next = if outcomes.is_empty() {
                Some(0)
            } else {
                outcomes.remove(0)
            };
            next.ok_or_else(|| SchedulerError::Spawn {
                entrypoint: entrypoint.to_string(),
                message: "No such file or directory".to_string(),
            })
        }
    }

    fn config(tmp: &TempDir) -> DaemonConfig {
        DaemonConfig {
            store_path: tmp.path().join("store"),
            state_file: tmp.path().join("schedules.json"),
            backoff: BackoffConfig {
                min_secs: 1,
                base_secs: 60,
                max_secs: 300,
            },
            watch: false,
            ..Default::default()
        }
    }

    async fn write_schedules(config: &DaemonConfig, schedules: Vec<Schedule>) {
        ScheduleFile { schedules }
            .save(&config.state_file)
            .await
            .unwrap();
    }

    async fn read_schedule(config: &DaemonConfig, id: &str) -> Schedule {
        ScheduleFile::load(&config.state_file)
            .await
            .unwrap()
            .get(id)
            .cloned()
            .unwrap()
    }

    async fn next_completion(events: &mut broadcast::Receiver<SchedulerEvent>) -> (Option<i32>, u32) {
        loop {
            if let SchedulerEvent::Completed {
                exit_code,
                consecutive_failures,
                ..
            } = events.recv().await.unwrap()
            {
                return (exit_code, consecutive_failures);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_due_schedule_runs_and_rearms() {
        let tmp = TempDir::new().unwrap();
        let config = config(&tmp);
        let schedule = Schedule::new("https://app.test", None, 15);
        let id = schedule.id.clone();
        write_schedules(&config, vec![schedule]).await;

        let invoker = MockInvoker::new(vec![Some(1)]);
        let scheduler = Scheduler::new(config.clone(), invoker.clone());
        let mut events = scheduler.subscribe();
        scheduler.reconcile().await.unwrap();
        assert!(scheduler.armed().contains_key(&id));

        // A FRICTION verdict is a completed run, not a failure
        assert_eq!(next_completion(&mut events).await, (Some(1), 0));
        assert_eq!(invoker.calls(), 1);
        assert_eq!(invoker.last_args.lock()[1], "https://app.test");

        let stored = read_schedule(&config, &id).await;
        assert_eq!(stored.last_exit_code, Some(1));
        assert_eq!(stored.backoff_seconds, 0);
        let gap = stored.next_run().unwrap() - stored.last_run_at.unwrap();
        assert_eq!(gap, chrono::Duration::minutes(15));
        assert!(scheduler.armed().contains_key(&id));

        scheduler.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_back_off_exponentially() {
        let tmp = TempDir::new().unwrap();
        let config = config(&tmp);
        let schedule = Schedule::new("https://app.test", None, 1);
        let id = schedule.id.clone();
        write_schedules(&config, vec![schedule]).await;

        // Spawn error, then a system error exit, then success
        let invoker = MockInvoker::new(vec![None, Some(EXIT_SYSTEM_ERROR), Some(0)]);
        let scheduler = Scheduler::new(config.clone(), invoker.clone());
        let mut events = scheduler.subscribe();
        scheduler.reconcile().await.unwrap();

        assert_eq!(next_completion(&mut events).await, (None, 1));
        let stored = read_schedule(&config, &id).await;
        assert_eq!(stored.backoff_seconds, 60);
        let gap = stored.next_run().unwrap() - stored.last_run_at.unwrap();
        assert_eq!(gap, chrono::Duration::seconds(120));

        assert_eq!(next_completion(&mut events).await, (Some(EXIT_SYSTEM_ERROR), 2));
        assert_eq!(read_schedule(&config, &id).await.backoff_seconds, 120);

        assert_eq!(next_completion(&mut events).await, (Some(0), 0));
        assert_eq!(read_schedule(&config, &id).await.backoff_seconds, 0);
        assert_eq!(invoker.calls(), 3);

        scheduler.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_schedules_are_quarantined_and_never_run() {
        let tmp = TempDir::new().unwrap();
        let config = config(&tmp);
        let bad_url = Schedule::new("ftp://app.test", None, 5);
        let mut bad_time = Schedule::new("https://app.test", None, 5);
        bad_time.next_run_at = Some("next tuesday".into());
        let (url_id, time_id) = (bad_url.id.clone(), bad_time.id.clone());
        write_schedules(&config, vec![bad_url, bad_time]).await;

        let invoker = MockInvoker::new(Vec::new());
        let scheduler = Scheduler::new(config.clone(), invoker.clone());
        scheduler.reconcile().await.unwrap();

        assert!(scheduler.armed().is_empty());
        assert!(read_schedule(&config, &url_id).await.quarantine_reason.is_some());
        assert!(read_schedule(&config, &time_id)
            .await
            .quarantine_reason
            .unwrap()
            .contains("nextRunAt"));

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(invoker.calls(), 0);

        // Quarantine holds across reconciles
        scheduler.reconcile().await.unwrap();
        assert!(scheduler.armed().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconcile_keeps_unchanged_and_cancels_stopped_or_removed() {
        let tmp = TempDir::new().unwrap();
        let config = config(&tmp);
        let mut later = Schedule::new("https://app.test", None, 60);
        later.next_run_at = Some((Utc::now() + chrono::Duration::hours(1)).to_rfc3339());
        let mut other = Schedule::new("https://shop.test", None, 60);
        other.next_run_at = later.next_run_at.clone();
        let (later_id, other_id) = (later.id.clone(), other.id.clone());
        write_schedules(&config, vec![later, other]).await;

        let invoker = MockInvoker::new(Vec::new());
        let scheduler = Scheduler::new(config.clone(), invoker.clone());
        scheduler.reconcile().await.unwrap();
        let first = scheduler.armed();
        assert_eq!(first.len(), 2);

        scheduler.reconcile().await.unwrap();
        assert_eq!(scheduler.armed(), first);

        let mut file = ScheduleFile::load(&config.state_file).await.unwrap();
        file.set_status(&later_id, ScheduleStatus::Stopped).unwrap();
        file.save(&config.state_file).await.unwrap();
        scheduler.reconcile().await.unwrap();
        assert_eq!(scheduler.armed().keys().collect::<Vec<_>>(), vec![&other_id]);

        let mut file = ScheduleFile::load(&config.state_file).await.unwrap();
        file.remove(&other_id).unwrap();
        file.save(&config.state_file).await.unwrap();
        scheduler.reconcile().await.unwrap();
        assert!(scheduler.armed().is_empty());

        assert_eq!(invoker.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_rearms_with_new_timer() {
        let tmp = TempDir::new().unwrap();
        let config = config(&tmp);
        let mut schedule = Schedule::new("https://app.test", None, 60);
        schedule.next_run_at = Some((Utc::now() + chrono::Duration::hours(1)).to_rfc3339());
        let id = schedule.id.clone();
        write_schedules(&config, vec![schedule]).await;

        let scheduler = Scheduler::new(config.clone(), MockInvoker::new(Vec::new()));
        scheduler.reconcile().await.unwrap();
        let before = scheduler.armed()[&id];

        // `schedule start` resets nextRunAt
        let mut file = ScheduleFile::load(&config.state_file).await.unwrap();
        file.set_status(&id, ScheduleStatus::Running).unwrap();
        file.save(&config.state_file).await.unwrap();
        scheduler.reconcile().await.unwrap();

        assert!(scheduler.armed()[&id] > before);
        scheduler.shutdown();
        assert!(scheduler.armed().is_empty());
    }
}
