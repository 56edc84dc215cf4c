//! Signal extraction
//!
//! Flattens a run's attempt results plus context into the map the rules
//! engine evaluates.

use launchgate_common::{AttemptOutcome, AttemptResult, SignalMap, SiteIntent};
use serde_json::{json, Value};

/// Run-level facts that do not come from attempt results
#[derive(Debug, Clone, Default)]
pub struct SignalContext {
    pub domain: String,
    pub detected_intent: SiteIntent,
    /// Provisional drift against the baseline (goal, intent, critical path)
    pub has_regressions: bool,
}

/// All critical executed attempts reached their goal, and at least one ran
pub fn goal_reached(results: &[AttemptResult]) -> bool {
    let executed: Vec<&AttemptResult> = results.iter().filter(|r| r.is_executed()).collect();
    !executed.is_empty()
        && executed
            .iter()
            .filter(|r| r.critical)
            .all(|r| r.reached_goal())
}

fn ids_with(results: &[AttemptResult], outcome: AttemptOutcome) -> Vec<Value> {
    results
        .iter()
        .filter(|r| r.outcome == outcome)
        .map(|r| Value::String(r.attempt_id.clone()))
        .collect()
}

pub fn extract_signals(results: &[AttemptResult], context: &SignalContext) -> SignalMap {
    let count = |outcome: AttemptOutcome| results.iter().filter(|r| r.outcome == outcome).count();

    let total = results.len();
    let skipped = count(AttemptOutcome::Skipped);
    let executed = total - skipped;
    let skipped_ratio = if total == 0 {
        0.0
    } else {
        skipped as f64 / total as f64
    };
    let max_step_retries = results
        .iter()
        .flat_map(|r| r.steps.iter().map(|s| s.retries))
        .max()
        .unwrap_or(0);

    let mut signals = SignalMap::new();
    signals.insert("totalAttempts".into(), json!(total));
    signals.insert("executedCount".into(), json!(executed));
    signals.insert("successCount".into(), json!(count(AttemptOutcome::Success)));
    signals.insert("failedCount".into(), json!(count(AttemptOutcome::Failure)));
    signals.insert("frictionCount".into(), json!(count(AttemptOutcome::Friction)));
    signals.insert("skippedCount".into(), json!(skipped));
    signals.insert("skippedRatio".into(), json!(skipped_ratio));
    signals.insert("goalReached".into(), json!(goal_reached(results)));
    signals.insert("domain".into(), json!(context.domain));
    signals.insert("detectedIntent".into(), json!(context.detected_intent));
    signals.insert("hasRegressions".into(), json!(context.has_regressions));
    signals.insert(
        "failedAttemptIds".into(),
        Value::Array(ids_with(results, AttemptOutcome::Failure)),
    );
    signals.insert(
        "frictionAttemptIds".into(),
        Value::Array(ids_with(results, AttemptOutcome::Friction)),
    );
    signals.insert(
        "skippedAttemptIds".into(),
        Value::Array(ids_with(results, AttemptOutcome::Skipped)),
    );
    signals.insert("maxStepRetries".into(), json!(max_step_retries));
    signals
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str, outcome: AttemptOutcome, critical: bool) -> AttemptResult {
        let mut r = AttemptResult::skipped(id, critical, "n/a");
        r.outcome = outcome;
        r.skip_reason = None;
        r
    }

    #[test]
    fn test_counts_and_ids() {
        let results = vec![
            result("home", AttemptOutcome::Success, true),
            result("signup", AttemptOutcome::Failure, true),
            result("pricing", AttemptOutcome::Friction, false),
            result("blog", AttemptOutcome::Skipped, false),
        ];
        let context = SignalContext {
            domain: "app.example.com".into(),
            detected_intent: SiteIntent::Saas,
            has_regressions: false,
        };
        let signals = extract_signals(&results, &context);

        assert_eq!(signals["totalAttempts"], 4);
        assert_eq!(signals["executedCount"], 3);
        assert_eq!(signals["failedCount"], 1);
        assert_eq!(signals["frictionCount"], 1);
        assert_eq!(signals["skippedRatio"], 0.25);
        assert_eq!(signals["goalReached"], false);
        assert_eq!(signals["detectedIntent"], "saas");
        assert_eq!(signals["failedAttemptIds"], json!(["signup"]));
        assert_eq!(signals["skippedAttemptIds"], json!(["blog"]));
    }

    #[test]
    fn test_goal_requires_an_executed_attempt() {
        assert!(!goal_reached(&[]));
        assert!(!goal_reached(&[result("a", AttemptOutcome::Skipped, true)]));
        assert!(goal_reached(&[
            result("a", AttemptOutcome::Friction, true),
            result("b", AttemptOutcome::Failure, false),
        ]));
    }

    #[test]
    fn test_empty_run() {
        let signals = extract_signals(&[], &SignalContext::default());
        assert_eq!(signals["totalAttempts"], 0);
        assert_eq!(signals["skippedRatio"], 0.0);
        assert_eq!(signals["maxStepRetries"], 0);
    }
}
