//! Baseline drift comparison
//!
//! Four independent checks; each contributes its own reason and none
//! depends on another's result.

use launchgate_common::{
    AttemptResult, Baseline, DriftCheck, DriftComparison, SiteIntent, StepStatus, Verdict,
};

/// The facts about the current run that drift checks look at
#[derive(Debug, Clone, Copy)]
pub struct RunSummary<'a> {
    /// `None` while the decision is still being computed
    pub verdict: Option<Verdict>,
    pub goal_reached: bool,
    pub detected_intent: SiteIntent,
    pub attempts: &'a [AttemptResult],
}

pub fn decision_regressed(baseline: &Baseline, verdict: Verdict) -> Option<String> {
    (verdict.rank() > baseline.verdict.rank()).then(|| {
        format!(
            "Decision regressed from {} to {}",
            baseline.verdict, verdict
        )
    })
}

pub fn goal_lost(baseline: &Baseline, goal_reached: bool) -> Option<String> {
    (baseline.goal_reached && !goal_reached)
        .then(|| "Goal was reached in the baseline but not in this run".to_string())
}

pub fn intent_changed(baseline: &Baseline, intent: SiteIntent) -> Option<String> {
    (baseline.detected_intent != intent).then(|| {
        format!(
            "Detected site intent changed from {} to {}",
            baseline.detected_intent, intent
        )
    })
}

/// Baseline critical-path steps that are missing or did not pass
pub fn broken_critical_steps(baseline: &Baseline, attempts: &[AttemptResult]) -> Vec<String> {
    baseline
        .critical_path
        .iter()
        .filter(|step_id| {
            let passed = attempts
                .iter()
                .flat_map(|a| a.steps.iter())
                .any(|s| &s.step_id == *step_id && s.status == StepStatus::Passed);
            !passed
        })
        .cloned()
        .collect()
}

pub fn critical_path_broken(baseline: &Baseline, attempts: &[AttemptResult]) -> Option<String> {
    let broken = broken_critical_steps(baseline, attempts);
    (!broken.is_empty()).then(|| {
        format!(
            "Critical path broken: {} step(s) missing or failed ({})",
            broken.len(),
            broken.join(", ")
        )
    })
}

/// Run every check; with no verdict in `run` the decision check is skipped
pub fn compare(baseline: &Baseline, run: &RunSummary<'_>) -> DriftComparison {
    let fired = [
        (
            DriftCheck::DecisionRegressed,
            run.verdict.and_then(|v| decision_regressed(baseline, v)),
        ),
        (DriftCheck::GoalLost, goal_lost(baseline, run.goal_reached)),
        (
            DriftCheck::IntentChanged,
            intent_changed(baseline, run.detected_intent),
        ),
        (
            DriftCheck::CriticalPathBroken,
            critical_path_broken(baseline, run.attempts),
        ),
    ];

    let mut comparison = DriftComparison::default();
    for (check, reason) in fired {
        if let Some(reason) = reason {
            comparison.checks.push(check);
            comparison.reasons.push(reason);
        }
    }
    comparison.drift_detected = !comparison.checks.is_empty();
    comparison
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use launchgate_common::{AttemptOutcome, StepOutcome};

    fn baseline() -> Baseline {
        Baseline {
            site_key: "shop-test".into(),
            source_run_id: "run-0".into(),
            created_at: Utc::now(),
            verdict: Verdict::Ready,
            detected_intent: SiteIntent::Ecommerce,
            goal_reached: true,
            critical_path: vec!["checkout.1.navigate".into(), "checkout.2.interact".into()],
        }
    }

    fn checkout(second_step: StepStatus) -> AttemptResult {
        let step = |id: &str, status| StepOutcome {
            step_id: id.into(),
            kind: "x".into(),
            status,
            retries: 0,
            duration_ms: 1,
            error: None,
            failure_class: None,
            discovery: None,
        };
        let mut result = AttemptResult::skipped("checkout", true, "");
        result.outcome = AttemptOutcome::Success;
        result.steps = vec![
            step("checkout.1.navigate", StepStatus::Passed),
            step("checkout.2.interact", second_step),
        ];
        result
    }

    #[test]
    fn test_identical_run_has_no_drift() {
        let attempts = vec![checkout(StepStatus::Passed)];
        let run = RunSummary {
            verdict: Some(Verdict::Ready),
            goal_reached: true,
            detected_intent: SiteIntent::Ecommerce,
            attempts: &attempts,
        };
        let comparison = compare(&baseline(), &run);
        assert!(!comparison.drift_detected);
        assert!(comparison.reasons.is_empty());
    }

    #[test]
    fn test_checks_are_independent_and_ordered() {
        let attempts = vec![checkout(StepStatus::Failed)];
        let run = RunSummary {
            verdict: Some(Verdict::DoNotLaunch),
            goal_reached: false,
            detected_intent: SiteIntent::Saas,
            attempts: &attempts,
        };
        let comparison = compare(&baseline(), &run);
        assert!(comparison.drift_detected);
        assert_eq!(
            comparison.checks,
            vec![
                DriftCheck::DecisionRegressed,
                DriftCheck::GoalLost,
                DriftCheck::IntentChanged,
                DriftCheck::CriticalPathBroken
            ]
        );
        assert!(comparison.reasons[3].contains("checkout.2.interact"));
    }

    #[test]
    fn test_only_intent_changed() {
        let attempts = vec![checkout(StepStatus::Passed)];
        let run = RunSummary {
            verdict: Some(Verdict::Ready),
            goal_reached: true,
            detected_intent: SiteIntent::Content,
            attempts: &attempts,
        };
        let comparison = compare(&baseline(), &run);
        assert_eq!(comparison.checks, vec![DriftCheck::IntentChanged]);
    }

    #[test]
    fn test_missing_step_breaks_path_and_provisional_skips_decision() {
        let run = RunSummary {
            verdict: None,
            goal_reached: true,
            detected_intent: SiteIntent::Ecommerce,
            attempts: &[],
        };
        let comparison = compare(&baseline(), &run);
        assert_eq!(comparison.checks, vec![DriftCheck::CriticalPathBroken]);
        assert_eq!(
            broken_critical_steps(&baseline(), &[]),
            vec!["checkout.1.navigate", "checkout.2.interact"]
        );
    }

    #[test]
    fn test_improvement_is_not_regression() {
        let mut base = baseline();
        base.verdict = Verdict::Friction;
        assert!(decision_regressed(&base, Verdict::Ready).is_none());
        assert!(decision_regressed(&base, Verdict::DoNotLaunch).is_some());
    }
}
