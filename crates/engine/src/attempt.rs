//! Attempt engine
//!
//! Executes one [`AttemptDefinition`] inside an exclusively owned browser
//! context. Each attempt moves pending -> running -> terminal exactly once.
//!
//! Element waits are adaptive: a target that is provably absent (page
//! settled, zero candidates across the whole discovery chain for several
//! consecutive polls) fails early and is never retried, while a timeout on
//! a page that is still changing is retried up to the step retry budget.

use futures::future::BoxFuture;
use launchgate_common::{
    ArtifactStore, AttemptOutcome, AttemptResult, DiscoveryRecord, FailureClass, FrictionSignal,
    StepOutcome, StepStatus, ValidatorOutcome, ValidatorStatus,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use crate::discovery::{discover, quote, with_page_counts, Discovery};
use crate::driver::{Action, ElementHandle};
use crate::error::{EngineError, EngineResult};
use crate::pool::PageSession;
use crate::spec::{AttemptDefinition, Condition, Interaction, Step, Target};

/// Timing and retry knobs for attempt execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttemptSettings {
    pub navigation_timeout_ms: u64,
    /// Default wait for an element to become visible
    pub wait_timeout_ms: u64,
    pub poll_interval_ms: u64,
    /// Consecutive settled, empty polls before a target counts as absent
    pub settle_checks: u32,
    pub slow_step_ms: u64,
    /// How long success conditions may take to become true
    pub success_timeout_ms: u64,
    pub low_confidence: f64,
    pub max_step_retries: u32,
}

impl Default for AttemptSettings {
    fn default() -> Self {
        Self {
            navigation_timeout_ms: 15_000,
            wait_timeout_ms: 5_000,
            poll_interval_ms: 250,
            settle_checks: 3,
            slow_step_ms: 4_000,
            success_timeout_ms: 3_000,
            low_confidence: 0.5,
            max_step_retries: 2,
        }
    }
}

impl AttemptSettings {
    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Pending,
    Running,
    Finished(AttemptOutcome),
}

impl AttemptState {
    fn advance(self, next: AttemptState) -> AttemptState {
        debug_assert!(
            matches!(
                (self, next),
                (AttemptState::Pending, AttemptState::Running)
                    | (AttemptState::Pending, AttemptState::Finished(_))
                    | (AttemptState::Running, AttemptState::Finished(_))
            ),
            "illegal attempt transition {:?} -> {:?}",
            self,
            next
        );
        next
    }
}

pub struct AttemptEngine {
    base_url: Url,
    settings: AttemptSettings,
    artifacts: Option<ArtifactStore>,
}

impl AttemptEngine {
    pub fn new(base_url: Url, settings: AttemptSettings) -> Self {
        Self {
            base_url,
            settings,
            artifacts: None,
        }
    }

    /// Store failure screenshots in `artifacts`
    pub fn with_artifacts(mut self, artifacts: ArtifactStore) -> Self {
        self.artifacts = Some(artifacts);
        self
    }

    pub fn settings(&self) -> &AttemptSettings {
        &self.settings
    }

    /// Run one attempt to a terminal outcome. Never fails: every error is
    /// folded into the returned result.
    pub async fn run(&self, session: &PageSession, attempt: &AttemptDefinition) -> AttemptResult {
        let started = Instant::now();
        let mut state = AttemptState::Pending;

        if !attempt.enabled {
            state.advance(AttemptState::Finished(AttemptOutcome::Skipped));
            info!(attempt = %attempt.id, "Attempt disabled, skipping");
            return AttemptResult::skipped(&attempt.id, attempt.critical, "disabled");
        }

        state = state.advance(AttemptState::Running);
        info!(attempt = %attempt.id, context = %session.id(), "Attempt started: {}", attempt.goal);

        // Applicability is checked once the first page is loaded
        let check_at = match attempt.steps.first() {
            Some(Step::Navigate { .. }) => 1,
            _ => 0,
        };
        let mut checked = false;

        let mut steps: Vec<StepOutcome> = Vec::with_capacity(attempt.steps.len());
        let mut failure: Option<(usize, String)> = None;

        for (index, step) in attempt.steps.iter().enumerate() {
            if index == check_at {
                checked = true;
                if let Some(reason) = self.not_applicable(session, attempt).await {
                    state.advance(AttemptState::Finished(AttemptOutcome::Skipped));
                    return self.skip_mid_run(attempt, steps, reason, started);
                }
            }

            let outcome = self.run_step(session, &attempt.id, index, step).await;
            if outcome.status == StepStatus::Failed {
                failure = Some((index, outcome.error.clone().unwrap_or_default()));
                steps.push(outcome);
                break;
            }
            steps.push(outcome);
        }

        if !checked && failure.is_none() {
            if let Some(reason) = self.not_applicable(session, attempt).await {
                state.advance(AttemptState::Finished(AttemptOutcome::Skipped));
                return self.skip_mid_run(attempt, steps, reason, started);
            }
        }

        for (index, step) in attempt.steps.iter().enumerate().skip(steps.len()) {
            steps.push(StepOutcome {
                step_id: step.step_id(&attempt.id, index),
                kind: step.kind().to_string(),
                status: StepStatus::NotRun,
                retries: 0,
                duration_ms: 0,
                error: None,
                failure_class: None,
                discovery: None,
            });
        }

        let mut validators = Vec::new();
        let mut friction_signals = Vec::new();
        let mut failed_step_index = None;

        let (outcome, error) = match failure {
            Some((index, error)) => {
                failed_step_index = Some(index);
                (AttemptOutcome::Failure, Some(error))
            }
            None => match self.unmet_success_condition(session, &attempt.success).await {
                Ok(Some(unmet)) => (
                    AttemptOutcome::Failure,
                    Some(format!("goal not reached: {}", unmet)),
                ),
                Err(e) => (AttemptOutcome::Failure, Some(e.to_string())),
                Ok(None) => {
                    validators = self.run_validators(session, &attempt.validators).await;
                    friction_signals = self.friction_signals(&steps, &validators);
                    if friction_signals.is_empty() {
                        (AttemptOutcome::Success, None)
                    } else {
                        (AttemptOutcome::Friction, None)
                    }
                }
            },
        };

        let screenshot = if outcome == AttemptOutcome::Failure {
            self.capture_failure(session, &attempt.id).await
        } else {
            None
        };

        state.advance(AttemptState::Finished(outcome));
        let duration_ms = started.elapsed().as_millis() as u64;
        match &error {
            Some(e) => warn!(attempt = %attempt.id, duration_ms, "Attempt {}: {}", outcome, e),
            None => info!(attempt = %attempt.id, duration_ms, "Attempt {}", outcome),
        }

        AttemptResult {
            attempt_id: attempt.id.clone(),
            outcome,
            critical: attempt.critical,
            duration_ms,
            failed_step_index,
            steps,
            validators,
            friction_signals,
            skip_reason: None,
            error,
            screenshot,
        }
    }

    fn skip_mid_run(
        &self,
        attempt: &AttemptDefinition,
        steps: Vec<StepOutcome>,
        reason: String,
        started: Instant,
    ) -> AttemptResult {
        info!(attempt = %attempt.id, "Attempt skipped: {}", reason);
        let mut result = AttemptResult::skipped(&attempt.id, attempt.critical, reason);
        result.duration_ms = started.elapsed().as_millis() as u64;
        result.steps = steps;
        result
    }

    /// Reason to skip when the attempt's required element is provably absent
    async fn not_applicable(
        &self,
        session: &PageSession,
        attempt: &AttemptDefinition,
    ) -> Option<String> {
        let target = attempt.requires.as_ref()?;
        let timeout = Duration::from_millis(self.settings.wait_timeout_ms);
        match self.wait_for_target(session, target, timeout, &mut None).await {
            Err(EngineError::ElementNotFound {
                class: FailureClass::Deterministic,
                ..
            }) => Some(format!("not applicable: {} is absent", target)),
            _ => None,
        }
    }

    async fn run_step(
        &self,
        session: &PageSession,
        attempt_id: &str,
        index: usize,
        step: &Step,
    ) -> StepOutcome {
        let step_id = step.step_id(attempt_id, index);
        let started = Instant::now();
        let mut retries = 0;

        loop {
            let mut discovery = None;
            match self.execute_step(session, step, &mut discovery).await {
                Ok(()) => {
                    debug!(step = %step_id, retries, "Step passed: {}", step.describe());
                    return StepOutcome {
                        step_id,
                        kind: step.kind().to_string(),
                        status: StepStatus::Passed,
                        retries,
                        duration_ms: started.elapsed().as_millis() as u64,
                        error: None,
                        failure_class: None,
                        discovery,
                    };
                }
                Err(e) => {
                    let class = e.failure_class();
                    if class == FailureClass::Transient
                        && !e.is_fatal()
                        && retries < self.settings.max_step_retries
                    {
                        retries += 1;
                        debug!(step = %step_id, retry = retries, "Retrying step: {}", e);
                        continue;
                    }

                    debug!(step = %step_id, ?class, "Step failed: {}", e);
                    return StepOutcome {
                        step_id,
                        kind: step.kind().to_string(),
                        status: StepStatus::Failed,
                        retries,
                        duration_ms: started.elapsed().as_millis() as u64,
                        error: Some(e.to_string()),
                        failure_class: Some(class),
                        discovery,
                    };
                }
            }
        }
    }

    /// Run one step. Steps that locate an element leave the final discovery
    /// record in `discovery`, whether or not the step passed.
    async fn execute_step(
        &self,
        session: &PageSession,
        step: &Step,
        discovery: &mut Option<DiscoveryRecord>,
    ) -> EngineResult<()> {
        let wait = Duration::from_millis(self.settings.wait_timeout_ms);

        match step {
            Step::Navigate { url, .. } => {
                let url = self.resolve(url)?;
                let timeout = Duration::from_millis(self.settings.navigation_timeout_ms);
                tokio::time::timeout(timeout, session.navigate(&url, timeout))
                    .await
                    .map_err(|_| EngineError::Timeout {
                        what: format!("navigation to {}", url),
                        after_ms: self.settings.navigation_timeout_ms,
                    })??;
                Ok(())
            }
            Step::Interact {
                target,
                interaction,
                ..
            } => {
                let handle = self.wait_for_target(session, target, wait, discovery).await?;
                let action = match interaction {
                    Interaction::Click => Action::Click,
                    Interaction::Hover => Action::Hover,
                    Interaction::Check => Action::Check,
                    Interaction::Uncheck => Action::Uncheck,
                    Interaction::Submit => Action::Press("Enter".to_string()),
                };
                session.interact(&handle, &action, wait).await
            }
            Step::Fill { target, value, .. } => {
                let handle = self.wait_for_target(session, target, wait, discovery).await?;
                session
                    .interact(&handle, &Action::Fill(value.clone()), wait)
                    .await
            }
            Step::WaitFor {
                target, timeout_ms, ..
            } => {
                let timeout = timeout_ms.map(Duration::from_millis).unwrap_or(wait);
                self.wait_for_target(session, target, timeout, discovery)
                    .await
                    .map(|_| ())
            }
            Step::Assert { condition, .. } => {
                let timeout = Duration::from_millis(self.settings.success_timeout_ms);
                if self.wait_condition(session, condition, timeout).await? {
                    Ok(())
                } else {
                    Err(EngineError::AssertionFailed(condition.to_string()))
                }
            }
        }
    }

    fn resolve(&self, raw: &str) -> EngineResult<String> {
        self.base_url
            .join(raw)
            .map(|u| u.to_string())
            .map_err(|e| launchgate_common::Error::InvalidUrl(format!("{}: {}", raw, e)).into())
    }

    /// Poll discovery until the target is visible, provably absent, or the
    /// timeout elapses. The last pass is recorded in `record`.
    async fn wait_for_target(
        &self,
        session: &PageSession,
        target: &Target,
        timeout: Duration,
        record: &mut Option<DiscoveryRecord>,
    ) -> EngineResult<ElementHandle> {
        let deadline = Instant::now() + timeout;
        let settle_checks = self.settings.settle_checks.max(1);
        let mut settled_misses = 0;

        loop {
            let pass = discover(session, target).await?;
            match &pass {
                Discovery::Found { handle, .. } => {
                    *record = Some(with_page_counts(session, pass.record()).await);
                    return Ok(handle.clone());
                }
                Discovery::NotFound {
                    candidates_total, ..
                } => {
                    let page = session.page_state().await?;
                    if page.settled && *candidates_total == 0 {
                        settled_misses += 1;
                    } else {
                        settled_misses = 0;
                    }
                    if settled_misses >= settle_checks {
                        *record = Some(with_page_counts(session, pass.record()).await);
                        return Err(EngineError::ElementNotFound {
                            target: target.to_string(),
                            class: FailureClass::Deterministic,
                        });
                    }
                }
            }

            let now = Instant::now();
            if now >= deadline {
                *record = Some(with_page_counts(session, pass.record()).await);
                return Err(EngineError::Timeout {
                    what: target.to_string(),
                    after_ms: timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(self.settings.poll_interval().min(deadline - now)).await;
        }
    }

    async fn wait_condition(
        &self,
        session: &PageSession,
        condition: &Condition,
        timeout: Duration,
    ) -> EngineResult<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if check_condition(session, condition).await? {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(self.settings.poll_interval().min(deadline - now)).await;
        }
    }

    /// First success condition that did not become true in time
    async fn unmet_success_condition(
        &self,
        session: &PageSession,
        conditions: &[Condition],
    ) -> EngineResult<Option<String>> {
        let timeout = Duration::from_millis(self.settings.success_timeout_ms);
        for condition in conditions {
            if !self.wait_condition(session, condition, timeout).await? {
                return Ok(Some(condition.to_string()));
            }
        }
        Ok(None)
    }

    async fn run_validators(
        &self,
        session: &PageSession,
        validators: &[Condition],
    ) -> Vec<ValidatorOutcome> {
        let mut outcomes = Vec::with_capacity(validators.len());
        for validator in validators {
            let (status, message) = match check_condition(session, validator).await {
                Ok(true) => (ValidatorStatus::Pass, "ok".to_string()),
                Ok(false) => (ValidatorStatus::Warn, "condition not met".to_string()),
                Err(e) => (ValidatorStatus::Warn, e.to_string()),
            };
            outcomes.push(ValidatorOutcome {
                name: validator.to_string(),
                status,
                message,
            });
        }
        outcomes
    }

    fn friction_signals(
        &self,
        steps: &[StepOutcome],
        validators: &[ValidatorOutcome],
    ) -> Vec<FrictionSignal> {
        let mut signals = Vec::new();
        for step in steps.iter().filter(|s| s.status == StepStatus::Passed) {
            if step.retries > 0 {
                signals.push(FrictionSignal::RetriesUsed {
                    step_id: step.step_id.clone(),
                    retries: step.retries,
                });
            }
            if step.duration_ms > self.settings.slow_step_ms {
                signals.push(FrictionSignal::SlowStep {
                    step_id: step.step_id.clone(),
                    duration_ms: step.duration_ms,
                    threshold_ms: self.settings.slow_step_ms,
                });
            }
            if let Some(discovery) = &step.discovery {
                if discovery.confidence < self.settings.low_confidence {
                    signals.push(FrictionSignal::LowConfidenceDiscovery {
                        step_id: step.step_id.clone(),
                        confidence: discovery.confidence,
                    });
                }
            }
        }
        for validator in validators {
            if validator.status != ValidatorStatus::Pass {
                signals.push(FrictionSignal::ValidatorWarning {
                    name: validator.name.clone(),
                });
            }
        }
        signals
    }

    async fn capture_failure(&self, session: &PageSession, attempt_id: &str) -> Option<String> {
        let artifacts = self.artifacts.as_ref()?;
        let png = match session.screenshot().await {
            Ok(png) => png,
            Err(e) => {
                warn!(attempt = %attempt_id, "Failed to capture screenshot: {}", e);
                return None;
            }
        };
        match artifacts.put(&png).await {
            Ok(digest) => {
                debug!(attempt = %attempt_id, "Stored failure screenshot {}", digest);
                Some(digest)
            }
            Err(e) => {
                warn!(attempt = %attempt_id, "Failed to store screenshot: {}", e);
                None
            }
        }
    }
}

/// Evaluate a condition once against the current page
pub fn check_condition<'a>(
    session: &'a PageSession,
    condition: &'a Condition,
) -> BoxFuture<'a, EngineResult<bool>> {
    Box::pin(async move {
        match condition {
            Condition::UrlContains { value } => {
                Ok(session.page_state().await?.url.contains(value.as_str()))
            }
            Condition::TitleContains { value } => {
                let needle = value.to_lowercase();
                Ok(session
                    .page_state()
                    .await?
                    .title
                    .map(|t| t.to_lowercase().contains(&needle))
                    .unwrap_or(false))
            }
            Condition::ElementVisible { target } => Ok(discover(session, target).await?.is_found()),
            Condition::ElementAbsent { target } => Ok(!discover(session, target).await?.is_found()),
            Condition::TextPresent { text } => {
                let selector = format!("body:has-text({})", quote(text));
                Ok(session.query(&selector).await?.first_visible.is_some())
            }
            Condition::AnyOf { conditions } => {
                for inner in conditions {
                    if check_condition(session, inner).await? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    })
}
