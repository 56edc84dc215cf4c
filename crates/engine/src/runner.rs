//! Full run pipeline
//!
//! probe -> attempts (bounded, optionally fail-fast) -> signals -> rules ->
//! market impact -> drift -> snapshot. The browser pool is closed on every
//! exit path.

use chrono::Utc;
use launchgate_common::{
    parse_target_url, site_key, AttemptOutcome, AttemptResult, Baseline, BaselineInfo,
    DriftComparison, ImpactCategory, Snapshot, SnapshotMeta, RunStore,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};
use url::Url;

use crate::attempt::AttemptEngine;
use crate::config::EngineConfig;
use crate::drift::{self, RunSummary};
use crate::driver::BrowserDriver;
use crate::error::{EngineError, EngineResult};
use crate::executor::{ParallelExecutor, StopPredicate};
use crate::patterns::{Pattern, PatternAnalyzer};
use crate::pool::BrowserPool;
use crate::probe::SiteProbe;
use crate::rules::RuleSet;
use crate::scoring;
use crate::signals::{self, SignalContext};
use crate::spec::{ensure_unique_ids, AttemptDefinition};

/// Everything one run needs besides the browser
pub struct RunRequest {
    pub url: String,
    pub attempts: Vec<AttemptDefinition>,
    /// Preset name, recorded in the snapshot
    pub preset: Option<String>,
    pub rules: RuleSet,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub snapshot: Snapshot,
    /// Blob path of the persisted snapshot
    pub snapshot_path: String,
}

impl RunReport {
    pub fn exit_code(&self) -> i32 {
        self.snapshot.decision.exit_code
    }

    pub fn drift(&self) -> Option<&DriftComparison> {
        self.snapshot
            .baseline
            .as_ref()
            .and_then(|b| b.comparison.as_ref())
    }
}

pub struct RealityRunner {
    config: EngineConfig,
    store: RunStore,
}

impl RealityRunner {
    pub fn new(config: EngineConfig, store: RunStore) -> Self {
        Self { config, store }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Execute a full run. Validation errors surface before the browser is
    /// touched; the driver is shut down when this returns.
    pub async fn run(
        &self,
        driver: Arc<dyn BrowserDriver>,
        request: RunRequest,
    ) -> EngineResult<RunReport> {
        let pool = BrowserPool::new(driver);
        let outcome = match Self::validate(&request) {
            Ok(url) => self.execute(&pool, url, &request).await,
            Err(e) => Err(e),
        };
        if let Err(e) = pool.close().await {
            warn!("Failed to close browser pool: {}", e);
        }
        outcome
    }

    fn validate(request: &RunRequest) -> EngineResult<Url> {
        let url = parse_target_url(&request.url)?;
        for attempt in &request.attempts {
            attempt.validate()?;
        }
        ensure_unique_ids(&request.attempts)?;
        Ok(url)
    }

    async fn execute(
        &self,
        pool: &Arc<BrowserPool>,
        url: Url,
        request: &RunRequest,
    ) -> EngineResult<RunReport> {
        let started_at = Utc::now();
        let clock = Instant::now();
        let site = site_key(&url);
        let run_id = SnapshotMeta::new_run_id();
        info!(run_id = %run_id, site = %site, "Run started against {}", url);

        let navigation_timeout = Duration::from_millis(self.config.attempt.navigation_timeout_ms);
        let crawl = SiteProbe::new(pool.clone(), navigation_timeout)
            .probe(url.as_str())
            .await;

        let attempts = self.execute_attempts(pool, &url, &request.attempts).await;

        let baseline = self.store.load_baseline(&site).await?;
        let goal_reached = signals::goal_reached(&attempts);
        let provisional = baseline.as_ref().map(|b| {
            drift::compare(
                b,
                &RunSummary {
                    verdict: None,
                    goal_reached,
                    detected_intent: crawl.detected_intent,
                    attempts: &attempts,
                },
            )
        });

        let signal_map = signals::extract_signals(
            &attempts,
            &SignalContext {
                domain: url.host_str().unwrap_or_default().to_string(),
                detected_intent: crawl.detected_intent,
                has_regressions: provisional.map(|c| c.drift_detected).unwrap_or(false),
            },
        );
        let decision = request.rules.evaluate(&signal_map);

        let history = self
            .store
            .recent_snapshots(&site, self.config.engine.history_window)
            .await?;
        let categories: BTreeMap<String, ImpactCategory> = request
            .attempts
            .iter()
            .filter_map(|a| a.category.map(|c| (a.id.clone(), c)))
            .collect();
        let market_impact = scoring::summarize(&attempts, &categories, url.as_str(), &history);

        let mut snapshot = Snapshot {
            meta: SnapshotMeta {
                run_id: run_id.clone(),
                site_key: site.clone(),
                url: url.to_string(),
                preset: request.preset.clone(),
                started_at,
                finished_at: Utc::now(),
                duration_ms: clock.elapsed().as_millis() as u64,
                goal_reached,
                verdict_confidence: verdict_confidence(&attempts),
                engine_version: crate::VERSION.to_string(),
            },
            crawl,
            attempts,
            signals: signal_map,
            decision,
            market_impact,
            baseline: None,
        };

        snapshot.baseline = Some(self.attach_baseline(baseline, &snapshot).await?);
        let snapshot_path = self.store.save_snapshot(&snapshot).await?;

        info!(
            run_id = %run_id,
            verdict = %snapshot.decision.final_verdict,
            "Run finished in {} ms",
            snapshot.meta.duration_ms
        );
        Ok(RunReport {
            snapshot,
            snapshot_path,
        })
    }

    /// Results in input order; one slot per definition
    async fn execute_attempts(
        &self,
        pool: &Arc<BrowserPool>,
        url: &Url,
        definitions: &[AttemptDefinition],
    ) -> Vec<AttemptResult> {
        let mut slots: Vec<Option<AttemptResult>> = vec![None; definitions.len()];
        let mut runnable: Vec<(usize, &AttemptDefinition)> = Vec::new();
        for (slot, attempt) in definitions.iter().enumerate() {
            match self.config.policy.skip_reason(&attempt.id) {
                Some(reason) => {
                    info!(attempt = %attempt.id, "Attempt skipped: {}", reason);
                    slots[slot] = Some(AttemptResult::skipped(&attempt.id, attempt.critical, reason));
                }
                None => runnable.push((slot, attempt)),
            }
        }

        let engine = AttemptEngine::new(url.clone(), self.config.attempt.clone())
            .with_artifacts(self.store.artifacts().clone());
        let fail_fast = self.config.engine.fail_fast;
        let stop = AtomicBool::new(false);
        let stop_requested: StopPredicate<'_> = &|| stop.load(Ordering::SeqCst);

        let executor = ParallelExecutor::new(self.config.engine.concurrency);
        let (engine, stop_flag) = (&engine, &stop);
        let report = executor
            .run(
                runnable.clone(),
                fail_fast.then_some(stop_requested),
                |_, (slot, attempt)| async move {
                    let result = match pool.create_context().await {
                        Ok(session) => {
                            let result = engine.run(&session, attempt).await;
                            if let Err(e) = session.close().await {
                                warn!(attempt = %attempt.id, "Failed to close context: {}", e);
                            }
                            result
                        }
                        Err(e) => context_failure(attempt, &e),
                    };
                    if attempt.critical && result.outcome == AttemptOutcome::Failure {
                        stop_flag.store(true, Ordering::SeqCst);
                    }
                    (slot, result)
                },
            )
            .await;

        for index in &report.not_dispatched {
            let (slot, attempt) = runnable[*index];
            slots[slot] = Some(AttemptResult::skipped(
                &attempt.id,
                attempt.critical,
                "not run: stopped after a critical failure",
            ));
        }
        if !report.not_dispatched.is_empty() {
            warn!(
                "Fail-fast stopped dispatch; {} attempt(s) not run",
                report.not_dispatched.len()
            );
        }
        for (slot, result) in report.into_results() {
            slots[slot] = Some(result);
        }

        slots
            .into_iter()
            .zip(definitions)
            .map(|(slot, attempt)| {
                slot.unwrap_or_else(|| AttemptResult::skipped(&attempt.id, attempt.critical, "not run"))
            })
            .collect()
    }

    /// Compare against the site's baseline, or create it from this run
    async fn attach_baseline(
        &self,
        baseline: Option<Baseline>,
        snapshot: &Snapshot,
    ) -> EngineResult<BaselineInfo> {
        let baseline = match baseline {
            Some(existing) => existing,
            None => {
                let fresh = Baseline::from_snapshot(snapshot);
                if self.store.create_baseline_if_absent(&fresh).await? {
                    return Ok(BaselineInfo {
                        baseline_run_id: fresh.source_run_id,
                        created: true,
                        comparison: None,
                    });
                }
                // Another run created it first
                self.store
                    .load_baseline(&snapshot.meta.site_key)
                    .await?
                    .unwrap_or(fresh)
            }
        };

        let comparison = drift::compare(
            &baseline,
            &RunSummary {
                verdict: Some(snapshot.decision.final_verdict),
                goal_reached: snapshot.meta.goal_reached,
                detected_intent: snapshot.crawl.detected_intent,
                attempts: &snapshot.attempts,
            },
        );
        if comparison.drift_detected {
            warn!(
                "Drift against baseline {}: {}",
                baseline.source_run_id,
                comparison.reasons.join("; ")
            );
        }
        Ok(BaselineInfo {
            baseline_run_id: baseline.source_run_id,
            created: false,
            comparison: Some(comparison),
        })
    }

    /// Replace the site's baseline with a stored run (latest when `run_id` is `None`)
    pub async fn save_baseline(&self, url: &str, run_id: Option<&str>) -> EngineResult<Baseline> {
        let site = site_key(&parse_target_url(url)?);
        let snapshots = self.store.list_snapshots(&site).await?;
        let source = match run_id {
            Some(id) => snapshots.iter().find(|s| s.meta.run_id == id),
            None => snapshots.last(),
        }
        .ok_or_else(|| {
            EngineError::Common(launchgate_common::Error::not_found(
                "snapshot",
                run_id.unwrap_or(site.as_str()),
            ))
        })?;

        let baseline = Baseline::from_snapshot(source);
        self.store.update_baseline(&baseline).await?;
        Ok(baseline)
    }

    /// Recurring patterns across the site's recent runs
    pub async fn analyze_patterns(&self, url: &str) -> EngineResult<Vec<Pattern>> {
        let site = site_key(&parse_target_url(url)?);
        let analyzer = PatternAnalyzer::new(self.config.patterns.clone());
        let snapshots = self
            .store
            .recent_snapshots(&site, analyzer.policy().window)
            .await?;
        Ok(analyzer.analyze(&snapshots))
    }
}

fn context_failure(attempt: &AttemptDefinition, error: &EngineError) -> AttemptResult {
    warn!(attempt = %attempt.id, "Could not open a browser context: {}", error);
    let mut result = AttemptResult::skipped(&attempt.id, attempt.critical, "");
    result.outcome = AttemptOutcome::Failure;
    result.skip_reason = None;
    result.error = Some(format!("browser context unavailable: {}", error));
    result
}

/// Coverage times mean discovery confidence
pub fn verdict_confidence(attempts: &[AttemptResult]) -> f64 {
    if attempts.is_empty() {
        return 0.0;
    }
    let executed: Vec<&AttemptResult> = attempts.iter().filter(|a| a.is_executed()).collect();
    let coverage = executed.len() as f64 / attempts.len() as f64;

    let confidences: Vec<f64> = executed
        .iter()
        .flat_map(|a| a.steps.iter())
        .filter_map(|s| s.discovery.as_ref().map(|d| d.confidence))
        .collect();
    let discovery = if confidences.is_empty() {
        1.0
    } else {
        confidences.iter().sum::<f64>() / confidences.len() as f64
    };
    coverage * discovery
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::attempt_result;

    #[test]
    fn test_verdict_confidence() {
        assert_eq!(verdict_confidence(&[]), 0.0);

        let ran = attempt_result("signup", AttemptOutcome::Success, &["signup.1"]);
        let skipped = AttemptResult::skipped("pricing", false, "disabled");
        let confidence = verdict_confidence(&[ran.clone(), skipped]);
        assert!((confidence - 0.5 * 0.95).abs() < 1e-9);

        let bare = AttemptResult {
            steps: Vec::new(),
            ..ran
        };
        assert_eq!(verdict_confidence(&[bare]), 1.0);
    }
}
