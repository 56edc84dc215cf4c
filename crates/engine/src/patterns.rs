//! Cross-run pattern analysis
//!
//! Mines the recent snapshot history of one site for recurring behaviour.
//! Output is a pure function of the snapshots and the policy: snapshots are
//! put in chronological order first, and patterns are sorted before return.

use launchgate_common::{AttemptOutcome, AttemptResult, Snapshot};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Tunable thresholds for pattern detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternPolicy {
    /// Most recent snapshots considered
    pub window: usize,
    /// Skipped in at least this fraction of recent runs
    pub skip_fraction: f64,
    /// Friction in more than this fraction of recent runs
    pub friction_majority: f64,
    /// Drop in mean verdict confidence between the older and newer half
    pub degradation_drop: f64,
    /// Blocking failures in more than this fraction of the attempt's runs
    pub failure_rate: f64,
    pub high_confidence_runs: usize,
    pub high_confidence_consistency: f64,
}

impl Default for PatternPolicy {
    fn default() -> Self {
        Self {
            window: 10,
            skip_fraction: 0.5,
            friction_majority: 0.5,
            degradation_drop: 0.15,
            failure_rate: 0.5,
            high_confidence_runs: 5,
            high_confidence_consistency: 0.8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    RepeatedSkippedAttempts,
    RecurringFriction,
    ConfidenceDegradation,
    SinglePointFailure,
}

impl std::fmt::Display for PatternType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatternType::RepeatedSkippedAttempts => write!(f, "repeated_skipped_attempts"),
            PatternType::RecurringFriction => write!(f, "recurring_friction"),
            PatternType::ConfidenceDegradation => write!(f, "confidence_degradation"),
            PatternType::SinglePointFailure => write!(f, "single_point_failure"),
        }
    }
}

/// High sorts before Medium
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternConfidence {
    High,
    Medium,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternEvidence {
    pub run_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub durations_ms: Vec<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pattern {
    pub pattern_type: PatternType,
    pub subject: String,
    pub summary: String,
    pub why_it_matters: String,
    pub evidence: PatternEvidence,
    pub confidence: PatternConfidence,
    pub limits: Vec<String>,
}

struct Observations<'a> {
    attempt_id: &'a str,
    /// Runs in the window that include this attempt
    runs: Vec<(&'a Snapshot, &'a AttemptResult)>,
    /// Runs in the window, with or without this attempt
    window_runs: usize,
}

impl<'a> Observations<'a> {
    fn with_outcome(&self, outcome: AttemptOutcome) -> Vec<&'a Snapshot> {
        self.runs
            .iter()
            .filter(|(_, a)| a.outcome == outcome)
            .map(|(s, _)| *s)
            .collect()
    }

    fn durations(&self) -> Vec<u64> {
        self.runs.iter().map(|(_, a)| a.duration_ms).collect()
    }
}

fn run_ids(snapshots: &[&Snapshot]) -> Vec<String> {
    snapshots.iter().map(|s| s.meta.run_id.clone()).collect()
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Mean discovery confidence of an attempt's resolved steps
fn discovery_confidence(attempt: &AttemptResult) -> Option<f64> {
    let values: Vec<f64> = attempt
        .steps
        .iter()
        .filter_map(|s| s.discovery.as_ref().map(|d| d.confidence))
        .collect();
    (!values.is_empty()).then(|| mean(&values))
}

pub struct PatternAnalyzer {
    policy: PatternPolicy,
}

impl PatternAnalyzer {
    pub fn new(policy: PatternPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &PatternPolicy {
        &self.policy
    }

    pub fn analyze(&self, snapshots: &[Snapshot]) -> Vec<Pattern> {
        let mut ordered: Vec<&Snapshot> = snapshots.iter().collect();
        ordered.sort_by(|a, b| {
            a.meta
                .started_at
                .cmp(&b.meta.started_at)
                .then_with(|| a.meta.run_id.cmp(&b.meta.run_id))
        });
        let window = self.policy.window.max(2);
        let skip = ordered.len().saturating_sub(window);
        let recent = &ordered[skip..];

        if recent.len() < 2 {
            return Vec::new();
        }

        let attempt_ids: BTreeSet<&str> = recent
            .iter()
            .flat_map(|s| s.attempts.iter().map(|a| a.attempt_id.as_str()))
            .collect();

        let mut patterns = Vec::new();
        for attempt_id in attempt_ids {
            let obs = Observations {
                attempt_id,
                runs: recent
                    .iter()
                    .filter_map(|s| s.attempt(attempt_id).map(|a| (*s, a)))
                    .collect(),
                window_runs: recent.len(),
            };
            if obs.runs.len() < 2 {
                continue;
            }
            patterns.extend(self.repeated_skips(&obs));
            patterns.extend(self.recurring_friction(&obs));
            patterns.extend(self.single_point_failure(&obs));
        }
        patterns.extend(self.confidence_degradation(recent));

        patterns.sort_by(|a, b| {
            a.confidence
                .cmp(&b.confidence)
                .then_with(|| a.pattern_type.cmp(&b.pattern_type))
                .then_with(|| a.subject.cmp(&b.subject))
        });
        patterns
    }

    fn confidence(&self, samples: usize, consistency: f64) -> PatternConfidence {
        if samples >= self.policy.high_confidence_runs
            && consistency >= self.policy.high_confidence_consistency
        {
            PatternConfidence::High
        } else {
            PatternConfidence::Medium
        }
    }

    fn limits(&self, samples: usize) -> Vec<String> {
        let mut limits = vec![format!(
            "Observed over {} run(s) in a window of {}",
            samples, self.policy.window
        )];
        if samples < self.policy.high_confidence_runs {
            limits.push(format!(
                "Fewer than {} runs; treat as a lead, not a conclusion",
                self.policy.high_confidence_runs
            ));
        }
        limits
    }

    fn repeated_skips(&self, obs: &Observations<'_>) -> Option<Pattern> {
        let skipped = obs.with_outcome(AttemptOutcome::Skipped);
        let n = obs.window_runs;
        let rate = skipped.len() as f64 / n as f64;
        if skipped.len() < 2 || rate < self.policy.skip_fraction {
            return None;
        }
        Some(Pattern {
            pattern_type: PatternType::RepeatedSkippedAttempts,
            subject: obs.attempt_id.to_string(),
            summary: format!(
                "'{}' was skipped in {} of {} runs",
                obs.attempt_id,
                skipped.len(),
                n
            ),
            why_it_matters: "A journey that keeps getting skipped is never actually verified, \
                             so its verdict contribution is blind"
                .to_string(),
            evidence: PatternEvidence {
                run_ids: run_ids(&skipped),
                rate: Some(rate),
                ..Default::default()
            },
            confidence: self.confidence(n, rate),
            limits: self.limits(n),
        })
    }

    fn recurring_friction(&self, obs: &Observations<'_>) -> Option<Pattern> {
        let friction = obs.with_outcome(AttemptOutcome::Friction);
        let n = obs.window_runs;
        let rate = friction.len() as f64 / n as f64;
        if friction.len() < 2 || rate <= self.policy.friction_majority {
            return None;
        }
        Some(Pattern {
            pattern_type: PatternType::RecurringFriction,
            subject: obs.attempt_id.to_string(),
            summary: format!(
                "'{}' completed with friction in {} of {} runs",
                obs.attempt_id,
                friction.len(),
                n
            ),
            why_it_matters: "Persistent friction means visitors can finish the journey \
                             but only with retries or delays"
                .to_string(),
            evidence: PatternEvidence {
                run_ids: run_ids(&friction),
                rate: Some(rate),
                durations_ms: obs.durations(),
                values: Vec::new(),
            },
            confidence: self.confidence(n, rate),
            limits: self.limits(n),
        })
    }

    /// Run-level: verdict confidence falling across the ordered window
    fn confidence_degradation(&self, recent: &[&Snapshot]) -> Option<Pattern> {
        let values: Vec<f64> = recent.iter().map(|s| s.meta.verdict_confidence).collect();
        if values.len() < 2 {
            return None;
        }

        let half = (values.len() / 2).max(1);
        let older = mean(&values[..half]);
        let newer = mean(&values[values.len() - half..]);
        let drop = older - newer;
        if drop < self.policy.degradation_drop {
            return None;
        }

        let falling = values.windows(2).filter(|w| w[1] <= w[0]).count();
        let consistency = falling as f64 / (values.len() - 1) as f64;

        let mut limits = self.limits(values.len());
        if let Some((attempt_id, before, after)) = weakest_discovery(recent) {
            limits.push(format!(
                "Discovery confidence for '{}' moved from {:.2} to {:.2} over the same runs",
                attempt_id, before, after
            ));
        } else {
            limits.push(
                "No element discovery in these runs; the drop comes from coverage".to_string(),
            );
        }

        Some(Pattern {
            pattern_type: PatternType::ConfidenceDegradation,
            subject: "verdict".to_string(),
            summary: format!(
                "Verdict confidence fell from {:.2} to {:.2} across {} runs",
                older,
                newer,
                values.len()
            ),
            why_it_matters: "Verdicts rest on less and less evidence; a READY now means \
                             less than it used to"
                .to_string(),
            evidence: PatternEvidence {
                run_ids: run_ids(recent),
                rate: Some(drop),
                durations_ms: Vec::new(),
                values,
            },
            confidence: self.confidence(recent.len(), consistency),
            limits,
        })
    }

    fn single_point_failure(&self, obs: &Observations<'_>) -> Option<Pattern> {
        let blocking: Vec<(&Snapshot, &AttemptResult)> = obs
            .runs
            .iter()
            .filter(|(_, a)| a.outcome == AttemptOutcome::Failure && a.blocked_steps() > 0)
            .copied()
            .collect();
        let n = obs.runs.len();
        let rate = blocking.len() as f64 / n as f64;
        if blocking.len() < 2 || rate <= self.policy.failure_rate {
            return None;
        }

        let blocked: usize = blocking.iter().map(|(_, a)| a.blocked_steps()).sum();
        let failed_runs: Vec<&Snapshot> = blocking.iter().map(|(s, _)| *s).collect();
        let mut limits = self.limits(n);
        if obs.window_runs > n {
            limits.push(format!(
                "Journey absent from {} run(s) in the window",
                obs.window_runs - n
            ));
        }

        Some(Pattern {
            pattern_type: PatternType::SinglePointFailure,
            subject: obs.attempt_id.to_string(),
            summary: format!(
                "'{}' failed in {} of {} runs, blocking {} downstream step(s)",
                obs.attempt_id,
                blocking.len(),
                n,
                blocked
            ),
            why_it_matters: "Everything after the failing step never runs, so one broken \
                             element hides the rest of the journey"
                .to_string(),
            evidence: PatternEvidence {
                run_ids: run_ids(&failed_runs),
                rate: Some(rate),
                durations_ms: obs.durations(),
                values: Vec::new(),
            },
            confidence: self.confidence(n, rate),
            limits,
        })
    }
}

/// Attempt whose discovery confidence fell the most between its first and
/// last appearance in the window
fn weakest_discovery<'a>(recent: &[&'a Snapshot]) -> Option<(&'a str, f64, f64)> {
    let mut first: BTreeMap<&str, f64> = BTreeMap::new();
    let mut last: BTreeMap<&str, f64> = BTreeMap::new();
    for snapshot in recent {
        for attempt in &snapshot.attempts {
            if let Some(c) = discovery_confidence(attempt) {
                first.entry(attempt.attempt_id.as_str()).or_insert(c);
                last.insert(attempt.attempt_id.as_str(), c);
            }
        }
    }
    first
        .into_iter()
        .filter_map(|(id, before)| last.get(id).map(|after| (id, before, *after)))
        .filter(|(_, before, after)| after < before)
        .max_by(|a, b| (a.1 - a.2).total_cmp(&(b.1 - b.2)).then_with(|| b.0.cmp(a.0)))
}
