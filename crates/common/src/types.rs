//! Core types for LaunchGate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

// ============================================================================
// Verdicts
// ============================================================================

/// Launch verdict, totally ordered: READY < FRICTION < DO_NOT_LAUNCH
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Ready,
    Friction,
    DoNotLaunch,
}

impl Default for Verdict {
    fn default() -> Self {
        Self::Ready
    }
}

impl Verdict {
    /// Position in the verdict hierarchy (also the process exit code)
    pub fn rank(self) -> u8 {
        match self {
            Verdict::Ready => 0,
            Verdict::Friction => 1,
            Verdict::DoNotLaunch => 2,
        }
    }

    pub fn exit_code(self) -> i32 {
        self.rank() as i32
    }

    /// The worse of two verdicts
    pub fn merge(self, other: Verdict) -> Verdict {
        self.max(other)
    }

    pub fn parse(raw: &str) -> Option<Verdict> {
        match raw {
            "READY" => Some(Verdict::Ready),
            "FRICTION" => Some(Verdict::Friction),
            "DO_NOT_LAUNCH" => Some(Verdict::DoNotLaunch),
            _ => None,
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Ready => write!(f, "READY"),
            Verdict::Friction => write!(f, "FRICTION"),
            Verdict::DoNotLaunch => write!(f, "DO_NOT_LAUNCH"),
        }
    }
}

/// Exit code reserved for system and validation errors
pub const EXIT_SYSTEM_ERROR: i32 = 3;

/// One reason contributed by a fired rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasonEntry {
    pub rule_id: String,
    pub reason: String,
}

/// Output of the rules engine for one signal map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub final_verdict: Verdict,
    pub exit_code: i32,
    pub triggered_rule_ids: Vec<String>,
    pub reasons: Vec<ReasonEntry>,
}

/// Flat signal map fed to the rules engine
pub type SignalMap = BTreeMap<String, serde_json::Value>;

// ============================================================================
// Attempt results
// ============================================================================

/// Terminal outcome of one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptOutcome {
    Success,
    Failure,
    Friction,
    Skipped,
}

impl std::fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptOutcome::Success => write!(f, "SUCCESS"),
            AttemptOutcome::Failure => write!(f, "FAILURE"),
            AttemptOutcome::Friction => write!(f, "FRICTION"),
            AttemptOutcome::Skipped => write!(f, "SKIPPED"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Passed,
    Failed,
    NotRun,
}

/// How a step failure was classified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Timed out while the page was still changing; worth retrying
    Transient,
    /// Target provably absent from a settled page; retrying cannot help
    Deterministic,
}

/// What a discovery pass saw on the page
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoverySignals {
    pub forms: usize,
    pub links: usize,
    pub buttons: usize,
    /// Chain selectors tried
    pub scanned: usize,
    /// Matches across the tried selectors, visible or not
    pub candidates: usize,
}

/// Which link of the discovery chain resolved a target, or that none did
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryRecord {
    pub strategy: String,
    pub position: usize,
    pub confidence: f64,
    pub selector: String,
    #[serde(default)]
    pub signals: DiscoverySignals,
}

impl DiscoveryRecord {
    pub const NOT_FOUND: &'static str = "not_found";

    /// The whole chain missed; position is one past the last link
    pub fn not_found(signals: DiscoverySignals) -> Self {
        Self {
            strategy: Self::NOT_FOUND.to_string(),
            position: signals.scanned,
            confidence: 0.0,
            selector: String::new(),
            signals,
        }
    }

    pub fn is_found(&self) -> bool {
        self.strategy != Self::NOT_FOUND
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOutcome {
    pub step_id: String,
    pub kind: String,
    pub status: StepStatus,
    pub retries: u32,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_class: Option<FailureClass>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovery: Option<DiscoveryRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidatorStatus {
    Pass,
    Warn,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorOutcome {
    pub name: String,
    pub status: ValidatorStatus,
    pub message: String,
}

/// Degraded-but-working signals that turn a success into FRICTION
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FrictionSignal {
    RetriesUsed { step_id: String, retries: u32 },
    SlowStep { step_id: String, duration_ms: u64, threshold_ms: u64 },
    LowConfidenceDiscovery { step_id: String, confidence: f64 },
    ValidatorWarning { name: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptResult {
    pub attempt_id: String,
    pub outcome: AttemptOutcome,
    pub critical: bool,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step_index: Option<usize>,
    #[serde(default)]
    pub steps: Vec<StepOutcome>,
    #[serde(default)]
    pub validators: Vec<ValidatorOutcome>,
    #[serde(default)]
    pub friction_signals: Vec<FrictionSignal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Digest of the failure screenshot in the artifact store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
}

impl AttemptResult {
    pub fn skipped(attempt_id: impl Into<String>, critical: bool, reason: impl Into<String>) -> Self {
        Self {
            attempt_id: attempt_id.into(),
            outcome: AttemptOutcome::Skipped,
            critical,
            duration_ms: 0,
            failed_step_index: None,
            steps: Vec::new(),
            validators: Vec::new(),
            friction_signals: Vec::new(),
            skip_reason: Some(reason.into()),
            error: None,
            screenshot: None,
        }
    }

    pub fn is_executed(&self) -> bool {
        self.outcome != AttemptOutcome::Skipped
    }

    /// Reached the journey's goal, possibly with friction
    pub fn reached_goal(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Success | AttemptOutcome::Friction)
    }

    /// Steps that never ran because an earlier step failed
    pub fn blocked_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::NotRun)
            .count()
    }
}

// ============================================================================
// Market impact
// ============================================================================

/// Business category a journey belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImpactCategory {
    Revenue,
    Lead,
    Trust,
    Ux,
}

impl std::fmt::Display for ImpactCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImpactCategory::Revenue => write!(f, "REVENUE"),
            ImpactCategory::Lead => write!(f, "LEAD"),
            ImpactCategory::Trust => write!(f, "TRUST"),
            ImpactCategory::Ux => write!(f, "UX"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn rank(self) -> u8 {
        match self {
            Severity::Info => 0,
            Severity::Warning => 1,
            Severity::Critical => 2,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Warning => write!(f, "WARNING"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRisk {
    pub attempt_id: String,
    pub category: ImpactCategory,
    pub outcome: AttemptOutcome,
    pub frequency: u32,
    pub score: u8,
    pub severity: Severity,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub info: usize,
    pub warning: usize,
    pub critical: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketImpactSummary {
    pub risks: Vec<AttemptRisk>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highest_severity: Option<Severity>,
    pub counts: SeverityCounts,
}

// ============================================================================
// Site probe
// ============================================================================

/// What the landing page appears to be for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteIntent {
    Ecommerce,
    Saas,
    LeadGeneration,
    Content,
    Unknown,
}

impl Default for SiteIntent {
    fn default() -> Self {
        Self::Unknown
    }
}

impl std::fmt::Display for SiteIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SiteIntent::Ecommerce => write!(f, "ecommerce"),
            SiteIntent::Saas => write!(f, "saas"),
            SiteIntent::LeadGeneration => write!(f, "lead_generation"),
            SiteIntent::Content => write!(f, "content"),
            SiteIntent::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlSummary {
    pub url: String,
    pub reachable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub forms: usize,
    pub links: usize,
    pub buttons: usize,
    pub inputs: usize,
    pub detected_intent: SiteIntent,
    /// Probe hits that drove the intent classification
    #[serde(default)]
    pub intent_signals: Vec<String>,
}

// ============================================================================
// Snapshots and baselines
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMeta {
    pub run_id: String,
    pub site_key: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub goal_reached: bool,
    /// Coverage-weighted discovery confidence in [0, 1]
    pub verdict_confidence: f64,
    pub engine_version: String,
}

impl SnapshotMeta {
    pub fn new_run_id() -> String {
        Uuid::new_v4().to_string()
    }
}

/// The drift checks a comparison can fire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftCheck {
    DecisionRegressed,
    GoalLost,
    IntentChanged,
    CriticalPathBroken,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftComparison {
    pub drift_detected: bool,
    pub reasons: Vec<String>,
    pub checks: Vec<DriftCheck>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaselineInfo {
    pub baseline_run_id: String,
    /// This run created the baseline (first run for the site)
    pub created: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comparison: Option<DriftComparison>,
}

/// The persisted record of one full run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub meta: SnapshotMeta,
    pub crawl: CrawlSummary,
    pub attempts: Vec<AttemptResult>,
    pub signals: SignalMap,
    pub decision: Decision,
    pub market_impact: MarketImpactSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline: Option<BaselineInfo>,
}

impl Snapshot {
    pub fn attempt(&self, attempt_id: &str) -> Option<&AttemptResult> {
        self.attempts.iter().find(|a| a.attempt_id == attempt_id)
    }
}

/// Saved reference run for drift comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Baseline {
    pub site_key: String,
    pub source_run_id: String,
    pub created_at: DateTime<Utc>,
    pub verdict: Verdict,
    pub detected_intent: SiteIntent,
    pub goal_reached: bool,
    /// Passed step ids of critical attempts, in execution order
    pub critical_path: Vec<String>,
}

impl Baseline {
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let critical_path = snapshot
            .attempts
            .iter()
            .filter(|a| a.critical && a.reached_goal())
            .flat_map(|a| {
                a.steps
                    .iter()
                    .filter(|s| s.status == StepStatus::Passed)
                    .map(|s| s.step_id.clone())
            })
            .collect();

        Self {
            site_key: snapshot.meta.site_key.clone(),
            source_run_id: snapshot.meta.run_id.clone(),
            created_at: Utc::now(),
            verdict: snapshot.decision.final_verdict,
            detected_intent: snapshot.crawl.detected_intent,
            goal_reached: snapshot.meta.goal_reached,
            critical_path,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_merge_hierarchy() {
        assert_eq!(Verdict::Ready.merge(Verdict::Friction), Verdict::Friction);
        assert_eq!(Verdict::Friction.merge(Verdict::DoNotLaunch), Verdict::DoNotLaunch);
        assert_eq!(Verdict::DoNotLaunch.merge(Verdict::Ready), Verdict::DoNotLaunch);
        for v in [Verdict::Ready, Verdict::Friction, Verdict::DoNotLaunch] {
            assert_eq!(v.merge(v), v);
        }
    }

    #[test]
    fn test_verdict_exit_codes_and_wire_names() {
        assert_eq!(Verdict::Ready.exit_code(), 0);
        assert_eq!(Verdict::Friction.exit_code(), 1);
        assert_eq!(Verdict::DoNotLaunch.exit_code(), 2);
        assert_eq!(
            serde_json::to_string(&Verdict::DoNotLaunch).unwrap(),
            "\"DO_NOT_LAUNCH\""
        );
        assert_eq!(Verdict::parse("FRICTION"), Some(Verdict::Friction));
        assert_eq!(Verdict::parse("friction"), None);
    }

    #[test]
    fn test_decision_serializes_camel_case() {
        let decision = Decision {
            final_verdict: Verdict::Friction,
            exit_code: 1,
            triggered_rule_ids: vec!["friction_detected".to_string()],
            reasons: vec![ReasonEntry {
                rule_id: "friction_detected".to_string(),
                reason: "slow".to_string(),
            }],
        };
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["finalVerdict"], "FRICTION");
        assert_eq!(json["exitCode"], 1);
        assert_eq!(json["reasons"][0]["ruleId"], "friction_detected");
    }
}
