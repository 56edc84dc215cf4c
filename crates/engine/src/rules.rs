//! Rules engine
//!
//! Rules are JSON data interpreted with a closed operator set. A rule set is
//! validated and compiled once (regexes included), then evaluated against a
//! signal map. Every rule whose condition holds fires; the final verdict is
//! the worst fired verdict, and reasons come out in priority order.

use launchgate_common::{Decision, ReasonEntry, SignalMap, Verdict};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};

/// Rules shipped with the engine; user documents may replace them by id
pub const DEFAULT_RULES: &str = r#"[
  {
    "id": "critical_failure_on_revenue_path",
    "description": "A journey failed on a checkout, cart, or payment domain",
    "priority": 5,
    "category": "risk",
    "when": {
      "logic": "AND",
      "conditions": [
        { "field": "domain", "operator": "matches", "value": "(checkout|payment|cart)" },
        { "field": "failedCount", "operator": "greaterThan", "value": 0 }
      ]
    },
    "then": {
      "verdict": "DO_NOT_LAUNCH",
      "reason": "{failedCount} journey(s) failed on revenue domain {domain}"
    }
  },
  {
    "id": "attempt_failures",
    "description": "At least one executed journey failed",
    "priority": 10,
    "category": "failure",
    "when": { "field": "failedCount", "operator": "greaterThan", "value": 0 },
    "then": {
      "verdict": "DO_NOT_LAUNCH",
      "reason": "{failedCount} of {executedCount} executed journey(s) failed: {failedAttemptIds}"
    }
  },
  {
    "id": "goal_not_reached",
    "description": "Critical journeys ran but did not reach their goal",
    "priority": 20,
    "category": "failure",
    "when": {
      "logic": "AND",
      "conditions": [
        { "field": "goalReached", "operator": "equals", "value": false },
        { "field": "executedCount", "operator": "greaterThan", "value": 0 }
      ]
    },
    "then": { "verdict": "DO_NOT_LAUNCH", "reason": "Critical journeys did not reach their goal" }
  },
  {
    "id": "regression_against_baseline",
    "description": "The run drifted from the saved baseline",
    "priority": 30,
    "category": "regression",
    "when": { "field": "hasRegressions", "operator": "equals", "value": true },
    "then": { "verdict": "DO_NOT_LAUNCH", "reason": "Run regressed against the saved baseline" }
  },
  {
    "id": "friction_detected",
    "description": "Journeys succeeded only with retries, warnings, or slow steps",
    "priority": 40,
    "category": "friction",
    "when": { "field": "frictionCount", "operator": "greaterThan", "value": 0 },
    "then": {
      "verdict": "FRICTION",
      "reason": "{frictionCount} journey(s) succeeded with friction: {frictionAttemptIds}"
    }
  },
  {
    "id": "nothing_executed",
    "description": "No journey was executed",
    "priority": 50,
    "category": "coverage",
    "when": { "field": "executedCount", "operator": "equals", "value": 0 },
    "then": { "verdict": "FRICTION", "reason": "No journeys were executed" }
  },
  {
    "id": "low_coverage",
    "description": "More than half of the journeys were skipped",
    "priority": 60,
    "category": "coverage",
    "when": { "field": "skippedRatio", "operator": "greaterThan", "value": 0.5 },
    "then": {
      "verdict": "FRICTION",
      "reason": "{skippedCount} of {totalAttempts} journeys were skipped"
    }
  }
]"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleCategory {
    Coverage,
    Failure,
    Friction,
    Regression,
    Policy,
    Risk,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Logic {
    #[default]
    And,
    Or,
}

/// `when` clause as written in the rule document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionSpec {
    Group {
        #[serde(default)]
        logic: Logic,
        conditions: Vec<ConditionSpec>,
    },
    Leaf {
        field: String,
        operator: String,
        value: Value,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleOutcome {
    pub verdict: Verdict,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleDoc {
    id: String,
    #[serde(default)]
    description: String,
    priority: f64,
    #[serde(default)]
    category: Option<RuleCategory>,
    when: ConditionSpec,
    then: RuleOutcome,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RuleDocument {
    List(Vec<Value>),
    Wrapped { rules: Vec<Value> },
}

#[derive(Debug)]
enum Operator {
    Equals(Value),
    GreaterThan(f64),
    LessThan(f64),
    Matches(Regex),
    Contains(Value),
}

#[derive(Debug)]
enum Compiled {
    Leaf { field: String, op: Operator },
    All(Vec<Compiled>),
    Any(Vec<Compiled>),
}

#[derive(Debug)]
pub struct Rule {
    pub id: String,
    pub description: String,
    /// Lower runs first and ranks its reason higher
    pub priority: f64,
    pub category: Option<RuleCategory>,
    pub when: ConditionSpec,
    pub then: RuleOutcome,
    compiled: Compiled,
}

impl Rule {
    fn compile(doc: RuleDoc) -> EngineResult<Self> {
        if doc.id.trim().is_empty() {
            return Err(EngineError::Validation("rule id must not be empty".into()));
        }
        let compiled = compile_condition(&doc.id, &doc.when)?;
        Ok(Self {
            id: doc.id,
            description: doc.description,
            priority: doc.priority,
            category: doc.category,
            when: doc.when,
            then: doc.then,
            compiled,
        })
    }

    pub fn matches(&self, signals: &SignalMap) -> bool {
        eval(&self.compiled, signals)
    }
}

fn compile_condition(rule_id: &str, spec: &ConditionSpec) -> EngineResult<Compiled> {
    match spec {
        ConditionSpec::Group { logic, conditions } => {
            if conditions.is_empty() {
                return Err(EngineError::Validation(format!(
                    "rule '{}': condition group is empty",
                    rule_id
                )));
            }
            let children = conditions
                .iter()
                .map(|c| compile_condition(rule_id, c))
                .collect::<EngineResult<Vec<_>>>()?;
            Ok(match logic {
                Logic::And => Compiled::All(children),
                Logic::Or => Compiled::Any(children),
            })
        }
        ConditionSpec::Leaf {
            field,
            operator,
            value,
        } => {
            let number = |value: &Value| {
                value.as_f64().ok_or_else(|| {
                    EngineError::Validation(format!(
                        "rule '{}': operator '{}' needs a numeric value",
                        rule_id, operator
                    ))
                })
            };
            let op = match operator.as_str() {
                "equals" => Operator::Equals(value.clone()),
                "greaterThan" => Operator::GreaterThan(number(value)?),
                "lessThan" => Operator::LessThan(number(value)?),
                "contains" => Operator::Contains(value.clone()),
                "matches" => {
                    let pattern = value.as_str().ok_or_else(|| {
                        EngineError::Validation(format!(
                            "rule '{}': operator 'matches' needs a string pattern",
                            rule_id
                        ))
                    })?;
                    let regex = Regex::new(pattern).map_err(|e| EngineError::RegexCompile {
                        rule_id: rule_id.to_string(),
                        pattern: pattern.to_string(),
                        message: e.to_string(),
                    })?;
                    Operator::Matches(regex)
                }
                other => {
                    return Err(EngineError::UnknownOperator {
                        rule_id: rule_id.to_string(),
                        operator: other.to_string(),
                    })
                }
            };
            Ok(Compiled::Leaf {
                field: field.clone(),
                op,
            })
        }
    }
}

fn values_equal(actual: &Value, expected: &Value) -> bool {
    match (actual.as_f64(), expected.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => actual == expected,
    }
}

fn eval(condition: &Compiled, signals: &SignalMap) -> bool {
    match condition {
        Compiled::All(children) => children.iter().all(|c| eval(c, signals)),
        Compiled::Any(children) => children.iter().any(|c| eval(c, signals)),
        Compiled::Leaf { field, op } => {
            // An absent signal never satisfies a leaf
            let Some(actual) = signals.get(field) else {
                return false;
            };
            match op {
                Operator::Equals(expected) => values_equal(actual, expected),
                Operator::GreaterThan(n) => actual.as_f64().map(|a| a > *n).unwrap_or(false),
                Operator::LessThan(n) => actual.as_f64().map(|a| a < *n).unwrap_or(false),
                Operator::Matches(regex) => actual.as_str().map(|s| regex.is_match(s)).unwrap_or(false),
                Operator::Contains(expected) => actual
                    .as_array()
                    .map(|items| items.iter().any(|item| values_equal(item, expected)))
                    .unwrap_or(false),
            }
        }
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(render_value).collect::<Vec<_>>().join(", "),
        other => other.to_string(),
    }
}

/// Replace `{signal}` placeholders with signal values; unknown names stay as written
fn interpolate(template: &str, signals: &SignalMap) -> String {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    let placeholder = PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{([A-Za-z][A-Za-z0-9_]*)\}").expect("placeholder pattern is valid")
    });
    placeholder
        .replace_all(template, |caps: &regex::Captures| match signals.get(&caps[1]) {
            Some(value) => render_value(value),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// A validated rule set ordered by (priority, id)
#[derive(Debug, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Parse a JSON document: an array of rules or `{ "rules": [...] }`
    pub fn from_json(json: &str) -> EngineResult<Self> {
        let document: RuleDocument = serde_json::from_str(json)
            .map_err(|e| EngineError::Validation(format!("rule document: {}", e)))?;
        let raw = match document {
            RuleDocument::List(rules) | RuleDocument::Wrapped { rules } => rules,
        };

        let mut seen = HashSet::new();
        let mut rules = Vec::with_capacity(raw.len());
        for (index, value) in raw.into_iter().enumerate() {
            let label = value
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("#{}", index));
            let doc: RuleDoc = serde_json::from_value(value)
                .map_err(|e| EngineError::Validation(format!("rule '{}': {}", label, e)))?;
            if !seen.insert(doc.id.clone()) {
                return Err(EngineError::Validation(format!(
                    "duplicate rule id '{}'",
                    doc.id
                )));
            }
            rules.push(Rule::compile(doc)?);
        }

        let mut set = Self { rules };
        set.sort();
        Ok(set)
    }

    pub fn from_file(path: &Path) -> EngineResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn builtin() -> EngineResult<Self> {
        Self::from_json(DEFAULT_RULES)
    }

    /// Built-in rules, extended by the user document at `path` if given
    pub fn load(path: Option<&Path>) -> EngineResult<Self> {
        let builtin = Self::builtin()?;
        match path {
            Some(path) => {
                let user = Self::from_file(path)?;
                info!("Loaded {} user rule(s) from {}", user.len(), path.display());
                Ok(builtin.extend_with(user))
            }
            None => Ok(builtin),
        }
    }

    /// Merge `other` into this set; rules with the same id are replaced
    pub fn extend_with(mut self, other: RuleSet) -> Self {
        for rule in other.rules {
            if let Some(existing) = self.rules.iter_mut().find(|r| r.id == rule.id) {
                debug!("Rule '{}' overridden", rule.id);
                *existing = rule;
            } else {
                self.rules.push(rule);
            }
        }
        self.sort();
        self
    }

    fn sort(&mut self) {
        self.rules
            .sort_by(|a, b| a.priority.total_cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn evaluate(&self, signals: &SignalMap) -> Decision {
        let mut verdict = Verdict::Ready;
        let mut triggered_rule_ids = Vec::new();
        let mut reasons = Vec::new();

        for rule in self.rules.iter().filter(|r| r.matches(signals)) {
            verdict = verdict.merge(rule.then.verdict);
            triggered_rule_ids.push(rule.id.clone());
            reasons.push(ReasonEntry {
                rule_id: rule.id.clone(),
                reason: interpolate(&rule.then.reason, signals),
            });
        }

        debug!(
            verdict = %verdict,
            fired = triggered_rule_ids.len(),
            "Rules evaluated"
        );
        Decision {
            final_verdict: verdict,
            exit_code: verdict.exit_code(),
            triggered_rule_ids,
            reasons,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn signals(value: Value) -> SignalMap {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_revenue_failure_blocks_launch() {
        let rules = RuleSet::from_json(
            r#"[{
                "id": "checkout_down",
                "priority": 1,
                "when": {
                    "logic": "AND",
                    "conditions": [
                        { "field": "domain", "operator": "matches", "value": "(checkout|payment)" },
                        { "field": "failedCount", "operator": "greaterThan", "value": 0 }
                    ]
                },
                "then": { "verdict": "DO_NOT_LAUNCH", "reason": "checkout failed" }
            }]"#,
        )
        .unwrap();

        let decision = rules.evaluate(&signals(json!({
            "failedCount": 1,
            "executedCount": 3,
            "domain": "checkout.example.com"
        })));
        assert_eq!(decision.final_verdict, Verdict::DoNotLaunch);
        assert_eq!(decision.exit_code, 2);
        assert_eq!(decision.triggered_rule_ids, vec!["checkout_down"]);
    }

    #[test]
    fn test_no_rules_fired_is_ready() {
        let rules = RuleSet::builtin().unwrap();
        let decision = rules.evaluate(&signals(json!({
            "executedCount": 2, "failedCount": 0, "frictionCount": 0,
            "skippedRatio": 0.0, "goalReached": true, "hasRegressions": false,
            "domain": "example.com"
        })));
        assert_eq!(decision.final_verdict, Verdict::Ready);
        assert_eq!(decision.exit_code, 0);
        assert!(decision.reasons.is_empty());
    }

    #[test]
    fn test_reasons_ordered_by_priority_then_id() {
        let rules = RuleSet::from_json(
            r#"{ "rules": [
                { "id": "z_late", "priority": 50,
                  "when": { "field": "x", "operator": "equals", "value": 1 },
                  "then": { "verdict": "FRICTION", "reason": "late" } },
                { "id": "b_tie", "priority": 10,
                  "when": { "field": "x", "operator": "equals", "value": 1 },
                  "then": { "verdict": "FRICTION", "reason": "tie b" } },
                { "id": "a_tie", "priority": 10,
                  "when": { "field": "x", "operator": "equals", "value": 1 },
                  "then": { "verdict": "DO_NOT_LAUNCH", "reason": "tie a" } }
            ] }"#,
        )
        .unwrap();

        let decision = rules.evaluate(&signals(json!({ "x": 1.0 })));
        assert_eq!(decision.triggered_rule_ids, vec!["a_tie", "b_tie", "z_late"]);
        assert_eq!(decision.final_verdict, Verdict::DoNotLaunch);
        assert_eq!(decision.reasons[0].reason, "tie a");
    }

    #[test]
    fn test_fractional_priority_slots_between_integers() {
        let rules = RuleSet::from_json(
            r#"[
                { "id": "second", "priority": 2,
                  "when": { "field": "x", "operator": "equals", "value": 1 },
                  "then": { "verdict": "FRICTION", "reason": "second" } },
                { "id": "between", "priority": 1.5,
                  "when": { "field": "x", "operator": "equals", "value": 1 },
                  "then": { "verdict": "FRICTION", "reason": "between" } },
                { "id": "first", "priority": 1,
                  "when": { "field": "x", "operator": "equals", "value": 1 },
                  "then": { "verdict": "FRICTION", "reason": "first" } }
            ]"#,
        )
        .unwrap();

        assert_eq!(rules.rules()[1].priority, 1.5);
        let decision = rules.evaluate(&signals(json!({ "x": 1.0 })));
        assert_eq!(decision.triggered_rule_ids, vec!["first", "between", "second"]);
    }

    #[test]
    fn test_missing_field_is_false() {
        let rules = RuleSet::from_json(
            r#"[{ "id": "r", "priority": 1,
                  "when": { "field": "absent", "operator": "lessThan", "value": 10 },
                  "then": { "verdict": "FRICTION", "reason": "r" } }]"#,
        )
        .unwrap();
        let decision = rules.evaluate(&SignalMap::new());
        assert_eq!(decision.final_verdict, Verdict::Ready);
    }

    #[test]
    fn test_or_group_and_contains() {
        let rules = RuleSet::from_json(
            r#"[{ "id": "pricing_watch", "priority": 1, "category": "policy",
                  "when": { "logic": "OR", "conditions": [
                      { "field": "failedAttemptIds", "operator": "contains", "value": "pricing" },
                      { "field": "maxStepRetries", "operator": "greaterThan", "value": 2 }
                  ] },
                  "then": { "verdict": "FRICTION", "reason": "watch {failedAttemptIds}" } }]"#,
        )
        .unwrap();

        let decision = rules.evaluate(&signals(json!({
            "failedAttemptIds": ["signup", "pricing"],
            "maxStepRetries": 0
        })));
        assert_eq!(decision.final_verdict, Verdict::Friction);
        assert_eq!(decision.reasons[0].reason, "watch signup, pricing");
    }

    #[test]
    fn test_invalid_rules_rejected() {
        let unknown_op = r#"[{ "id": "r", "priority": 1,
            "when": { "field": "x", "operator": "approximately", "value": 1 },
            "then": { "verdict": "READY", "reason": "r" } }]"#;
        assert!(matches!(
            RuleSet::from_json(unknown_op),
            Err(EngineError::UnknownOperator { .. })
        ));

        let bad_regex = r#"[{ "id": "r", "priority": 1,
            "when": { "field": "x", "operator": "matches", "value": "(" },
            "then": { "verdict": "READY", "reason": "r" } }]"#;
        assert!(matches!(
            RuleSet::from_json(bad_regex),
            Err(EngineError::RegexCompile { .. })
        ));

        let bad_verdict = r#"[{ "id": "r", "priority": 1,
            "when": { "field": "x", "operator": "equals", "value": 1 },
            "then": { "verdict": "MAYBE", "reason": "r" } }]"#;
        assert!(matches!(
            RuleSet::from_json(bad_verdict),
            Err(EngineError::Validation(_))
        ));

        let text_priority = r#"[{ "id": "r", "priority": "high",
            "when": { "field": "x", "operator": "equals", "value": 1 },
            "then": { "verdict": "READY", "reason": "r" } }]"#;
        assert!(RuleSet::from_json(text_priority).is_err());

        let bad_category = r#"[{ "id": "r", "priority": 1, "category": "vibes",
            "when": { "field": "x", "operator": "equals", "value": 1 },
            "then": { "verdict": "READY", "reason": "r" } }]"#;
        assert!(RuleSet::from_json(bad_category).is_err());

        let duplicate = r#"[
            { "id": "r", "priority": 1, "when": { "field": "x", "operator": "equals", "value": 1 },
              "then": { "verdict": "READY", "reason": "r" } },
            { "id": "r", "priority": 2, "when": { "field": "x", "operator": "equals", "value": 1 },
              "then": { "verdict": "READY", "reason": "r" } }
        ]"#;
        assert!(matches!(
            RuleSet::from_json(duplicate),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn test_user_rule_overrides_default() {
        let user = RuleSet::from_json(
            r#"[{ "id": "friction_detected", "priority": 40, "category": "friction",
                  "when": { "field": "frictionCount", "operator": "greaterThan", "value": 5 },
                  "then": { "verdict": "FRICTION", "reason": "lots of friction" } }]"#,
        )
        .unwrap();
        let builtin = RuleSet::builtin().unwrap();
        let count = builtin.len();
        let merged = builtin.extend_with(user);
        assert_eq!(merged.len(), count);

        let decision = merged.evaluate(&signals(json!({
            "executedCount": 3, "failedCount": 0, "frictionCount": 2,
            "goalReached": true, "skippedRatio": 0.0
        })));
        assert_eq!(decision.final_verdict, Verdict::Ready);
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let rules = RuleSet::builtin().unwrap();
        let map = signals(json!({
            "executedCount": 2, "failedCount": 1, "frictionCount": 1,
            "failedAttemptIds": ["signup"], "frictionAttemptIds": ["home"],
            "goalReached": false, "hasRegressions": true, "domain": "cart.shop.test",
            "skippedRatio": 0.0, "skippedCount": 0, "totalAttempts": 2
        }));
        let first = rules.evaluate(&map);
        for _ in 0..10 {
            assert_eq!(rules.evaluate(&map), first);
        }
        assert_eq!(
            first.triggered_rule_ids,
            vec![
                "critical_failure_on_revenue_path",
                "attempt_failures",
                "goal_not_reached",
                "regression_against_baseline",
                "friction_detected"
            ]
        );
        assert_eq!(first.reasons[1].reason, "1 of 2 executed journey(s) failed: signup");
    }
}
