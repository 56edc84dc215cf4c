//! Market impact scoring
//!
//! Pure functions: a failing journey's business category, outcome, URL
//! context and recurrence give a 0-100 impact score and a severity band.

use launchgate_common::{
    AttemptOutcome, AttemptResult, AttemptRisk, ImpactCategory, MarketImpactSummary, Severity,
    SeverityCounts, Snapshot,
};
use std::collections::BTreeMap;

pub fn category_base(category: ImpactCategory) -> f64 {
    match category {
        ImpactCategory::Revenue => 80.0,
        ImpactCategory::Lead => 60.0,
        ImpactCategory::Trust => 50.0,
        ImpactCategory::Ux => 30.0,
    }
}

pub fn outcome_bonus(outcome: AttemptOutcome) -> f64 {
    match outcome {
        AttemptOutcome::Failure => 15.0,
        AttemptOutcome::Friction => 8.0,
        AttemptOutcome::Success | AttemptOutcome::Skipped => 0.0,
    }
}

/// Bonus when the URL confirms the category is on the line
pub fn url_context_bonus(category: ImpactCategory, url: &str) -> f64 {
    let url = url.to_lowercase();
    let hit = |words: &[&str]| words.iter().any(|w| url.contains(w));
    match category {
        ImpactCategory::Revenue if hit(&["checkout", "cart", "payment", "billing"]) => 10.0,
        ImpactCategory::Lead if hit(&["signup", "register", "contact", "demo"]) => 8.0,
        ImpactCategory::Trust if hit(&["login", "account", "auth"]) => 5.0,
        _ => 0.0,
    }
}

/// 1.0 for a first occurrence, growing 15% per repeat up to three
pub fn frequency_factor(frequency: u32) -> f64 {
    let capped = frequency.clamp(1, 3);
    1.0 + 0.15 * (capped - 1) as f64
}

pub fn score_impact(
    category: ImpactCategory,
    outcome: AttemptOutcome,
    url: &str,
    frequency: u32,
) -> u8 {
    let raw = (category_base(category) + outcome_bonus(outcome) + url_context_bonus(category, url))
        * frequency_factor(frequency);
    raw.round().clamp(0.0, 100.0) as u8
}

pub fn severity_for(score: u8) -> Severity {
    match score {
        0..=30 => Severity::Info,
        31..=70 => Severity::Warning,
        _ => Severity::Critical,
    }
}

/// Strictly worse than before
pub fn is_escalation(previous: Severity, current: Severity) -> bool {
    current.rank() > previous.rank()
}

/// Explicit category, else inferred from keywords in the attempt id
pub fn category_for(attempt_id: &str, explicit: Option<ImpactCategory>) -> ImpactCategory {
    if let Some(category) = explicit {
        return category;
    }
    let id = attempt_id.to_lowercase();
    let hit = |words: &[&str]| words.iter().any(|w| id.contains(w));
    if hit(&["checkout", "cart", "payment", "purchase", "billing", "pricing"]) {
        ImpactCategory::Revenue
    } else if hit(&["signup", "register", "contact", "demo", "lead", "newsletter"]) {
        ImpactCategory::Lead
    } else if hit(&["login", "auth", "account", "password"]) {
        ImpactCategory::Trust
    } else {
        ImpactCategory::Ux
    }
}

/// Aggregate risks for the FAILURE and FRICTION attempts of one run.
/// `history` holds recent prior snapshots of the same site.
pub fn summarize(
    results: &[AttemptResult],
    categories: &BTreeMap<String, ImpactCategory>,
    url: &str,
    history: &[Snapshot],
) -> MarketImpactSummary {
    let mut risks: Vec<AttemptRisk> = results
        .iter()
        .filter(|r| matches!(r.outcome, AttemptOutcome::Failure | AttemptOutcome::Friction))
        .map(|r| {
            let category = category_for(&r.attempt_id, categories.get(&r.attempt_id).copied());
            let repeats = history
                .iter()
                .filter_map(|s| s.attempt(&r.attempt_id))
                .filter(|prior| {
                    matches!(
                        prior.outcome,
                        AttemptOutcome::Failure | AttemptOutcome::Friction
                    )
                })
                .count() as u32;
            let frequency = 1 + repeats;
            let score = score_impact(category, r.outcome, url, frequency);
            AttemptRisk {
                attempt_id: r.attempt_id.clone(),
                category,
                outcome: r.outcome,
                frequency,
                score,
                severity: severity_for(score),
            }
        })
        .collect();

    risks.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| a.attempt_id.cmp(&b.attempt_id))
    });

    let mut counts = SeverityCounts::default();
    for risk in &risks {
        match risk.severity {
            Severity::Info => counts.info += 1,
            Severity::Warning => counts.warning += 1,
            Severity::Critical => counts.critical += 1,
        }
    }

    MarketImpactSummary {
        highest_severity: risks.iter().map(|r| r.severity).max(),
        risks,
        counts,
    }
}
