//! Selector discovery
//!
//! Resolves a logical [`Target`] to a concrete element by walking a fixed
//! fallback chain: author selector, test hooks, semantic attributes,
//! visible text, then structural heuristics. The first visible match wins.

use launchgate_common::{DiscoveryRecord, DiscoverySignals};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::driver::ElementHandle;
use crate::error::EngineResult;
use crate::pool::PageSession;
use crate::spec::{Target, TargetKind};

const TEST_HOOK_ATTRIBUTES: [&str; 4] = ["data-testid", "data-test", "data-qa", "data-cy"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Explicit,
    TestHook,
    Semantic,
    Text,
    Structural,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Explicit => "explicit",
            Strategy::TestHook => "test_hook",
            Strategy::Semantic => "semantic",
            Strategy::Text => "text",
            Strategy::Structural => "structural",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub strategy: Strategy,
    pub selector: String,
}

/// Confidence for a match at `position` in the chain; strictly decreasing
pub fn confidence_at(position: usize) -> f64 {
    (0.95 - 0.05 * position as f64).max(0.05)
}

/// Lowercase, dash-separated form of a label (`"Create account"` -> `create-account`)
pub fn slug(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    for c in label.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') && !out.is_empty() {
            out.push('-');
        }
    }
    out.trim_end_matches('-').to_string()
}

pub(crate) fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// The ordered candidate chain for a target, without duplicates
pub fn candidate_chain(target: &Target) -> Vec<Candidate> {
    let mut chain: Vec<Candidate> = Vec::new();
    let mut push = |strategy: Strategy, selector: String| {
        if !chain.iter().any(|c| c.selector == selector) {
            chain.push(Candidate { strategy, selector });
        }
    };

    if let Some(selector) = &target.selector {
        push(Strategy::Explicit, selector.clone());
    }

    let hook = target.test_id.clone().unwrap_or_else(|| slug(&target.label));
    if !hook.is_empty() {
        for attr in TEST_HOOK_ATTRIBUTES {
            push(Strategy::TestHook, format!("[{}={}]", attr, quote(&hook)));
        }
    }

    let name = slug(&target.label);
    let label = quote(&target.label);
    match target.kind {
        TargetKind::Input => {
            if !name.is_empty() {
                push(Strategy::Semantic, format!("input[name={}]", quote(&name)));
                push(Strategy::Semantic, format!("#{}", name));
            }
            push(Strategy::Semantic, format!("[aria-label={} i]", label));
            push(Strategy::Semantic, format!("input[placeholder={} i]", label));
            if let Some(input_type) = &target.input_type {
                push(Strategy::Semantic, format!("input[type={}]", quote(input_type)));
            }
        }
        TargetKind::Button => {
            push(Strategy::Semantic, format!("button[aria-label={} i]", label));
            push(Strategy::Semantic, format!("[role=\"button\"][aria-label={} i]", label));
            if !name.is_empty() {
                push(Strategy::Semantic, format!("button[name={}]", quote(&name)));
            }
        }
        TargetKind::Link => {
            push(Strategy::Semantic, format!("a[aria-label={} i]", label));
            push(Strategy::Semantic, format!("a[title={} i]", label));
        }
        TargetKind::Any => {
            push(Strategy::Semantic, format!("[aria-label={} i]", label));
            if !name.is_empty() {
                push(Strategy::Semantic, format!("[name={}]", quote(&name)));
                push(Strategy::Semantic, format!("#{}", name));
            }
        }
    }

    let text = quote(target.text.as_deref().unwrap_or(&target.label));
    match target.kind {
        TargetKind::Input => {
            push(Strategy::Text, format!("label:has-text({}) input", text));
        }
        TargetKind::Button => {
            push(Strategy::Text, format!("button:has-text({})", text));
            push(Strategy::Text, format!("[role=\"button\"]:has-text({})", text));
            push(Strategy::Text, format!("input[type=\"submit\"][value={} i]", text));
        }
        TargetKind::Link => {
            push(Strategy::Text, format!("a:has-text({})", text));
        }
        TargetKind::Any => {
            push(Strategy::Text, format!("button:has-text({})", text));
            push(Strategy::Text, format!("a:has-text({})", text));
            push(Strategy::Text, format!("text={}", text));
        }
    }

    match target.kind {
        TargetKind::Input => match &target.input_type {
            Some(input_type) => {
                push(Strategy::Structural, format!("form input[type={}]", quote(input_type)))
            }
            None => push(
                Strategy::Structural,
                "form input:not([type=\"hidden\"])".to_string(),
            ),
        },
        TargetKind::Button => {
            push(Strategy::Structural, "form button[type=\"submit\"]".to_string());
            push(Strategy::Structural, "form input[type=\"submit\"]".to_string());
        }
        TargetKind::Link | TargetKind::Any => {
            if !name.is_empty() {
                push(Strategy::Structural, format!("a[href*={}]", quote(&name)));
            }
        }
    }

    chain
}

/// Outcome of one pass over the discovery chain
#[derive(Debug, Clone, PartialEq)]
pub enum Discovery {
    Found {
        handle: ElementHandle,
        record: DiscoveryRecord,
    },
    NotFound {
        /// Matches across the whole chain, visible or not
        candidates_total: usize,
        scanned: usize,
    },
}

impl Discovery {
    pub fn confidence(&self) -> f64 {
        match self {
            Discovery::Found { record, .. } => record.confidence,
            Discovery::NotFound { .. } => 0.0,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Discovery::Found { .. })
    }

    /// The record a step keeps; a miss becomes a NOT_FOUND record
    pub fn record(&self) -> DiscoveryRecord {
        match self {
            Discovery::Found { record, .. } => record.clone(),
            Discovery::NotFound {
                candidates_total,
                scanned,
            } => DiscoveryRecord::not_found(DiscoverySignals {
                scanned: *scanned,
                candidates: *candidates_total,
                ..Default::default()
            }),
        }
    }
}

/// Walk the chain once against the current page
pub async fn discover(session: &PageSession, target: &Target) -> EngineResult<Discovery> {
    let chain = candidate_chain(target);
    let mut candidates_total = 0;

    for (position, candidate) in chain.iter().enumerate() {
        let result = session.query(&candidate.selector).await?;
        candidates_total += result.total;

        if let Some(handle) = result.handle(&candidate.selector) {
            trace!(
                "Resolved '{}' via {} at position {}",
                target,
                candidate.strategy.as_str(),
                position
            );
            return Ok(Discovery::Found {
                handle,
                record: DiscoveryRecord {
                    strategy: candidate.strategy.as_str().to_string(),
                    position,
                    confidence: confidence_at(position),
                    selector: candidate.selector.clone(),
                    signals: DiscoverySignals {
                        scanned: position + 1,
                        candidates: candidates_total,
                        ..Default::default()
                    },
                },
            });
        }
    }

    Ok(Discovery::NotFound {
        candidates_total,
        scanned: chain.len(),
    })
}

/// Counts of interactive structure on the current page
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSignals {
    pub forms: usize,
    pub links: usize,
    pub buttons: usize,
    pub inputs: usize,
}

pub const FORM_SELECTOR: &str = "form";
pub const LINK_SELECTOR: &str = "a[href]";
pub const BUTTON_SELECTOR: &str = "button, input[type=\"submit\"], [role=\"button\"]";
pub const INPUT_SELECTOR: &str = "input:not([type=\"hidden\"]), textarea, select";

impl PageSignals {
    pub async fn scan(session: &PageSession) -> EngineResult<Self> {
        Ok(Self {
            forms: session.query(FORM_SELECTOR).await?.total,
            links: session.query(LINK_SELECTOR).await?.total,
            buttons: session.query(BUTTON_SELECTOR).await?.total,
            inputs: session.query(INPUT_SELECTOR).await?.total,
        })
    }
}

/// Add the page's form, link and button counts to a record. A failed scan
/// leaves them at zero.
pub async fn with_page_counts(session: &PageSession, mut record: DiscoveryRecord) -> DiscoveryRecord {
    match PageSignals::scan(session).await {
        Ok(page) => {
            record.signals.forms = page.forms;
            record.signals.links = page.links;
            record.signals.buttons = page.buttons;
        }
        Err(e) => debug!("Page scan for discovery signals failed: {}", e),
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::BrowserPool;
    use crate::testing::{MockBrowser, MockElement, MockPage};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_slug() {
        assert_eq!(slug("Create account"), "create-account");
        assert_eq!(slug("  E-mail address! "), "e-mail-address");
        assert_eq!(slug("???"), "");
    }

    #[test]
    fn test_confidence_strictly_decreasing_until_floor() {
        for p in 0..17 {
            assert!(confidence_at(p) > confidence_at(p + 1));
        }
        assert_eq!(confidence_at(100), 0.05);
        assert!((confidence_at(0) - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_chain_order_and_explicit_first() {
        let target = Target::labeled("email", TargetKind::Input)
            .with_selector("#signup-email")
            .with_input_type("email");
        let chain = candidate_chain(&target);

        assert_eq!(chain[0].strategy, Strategy::Explicit);
        assert_eq!(chain[0].selector, "#signup-email");
        assert_eq!(chain[1].selector, "[data-testid=\"email\"]");

        let order: Vec<Strategy> = chain.iter().map(|c| c.strategy).collect();
        let mut sorted = order.clone();
        sorted.sort_by_key(|s| *s as u8);
        assert_eq!(order, sorted, "strategies must appear in chain order");
        assert_eq!(chain.last().unwrap().selector, "form input[type=\"email\"]");
    }

    #[test]
    fn test_chain_has_no_duplicates_and_escapes_quotes() {
        let target = Target::labeled("say \"hi\"", TargetKind::Any);
        let chain = candidate_chain(&target);
        let mut selectors: Vec<&str> = chain.iter().map(|c| c.selector.as_str()).collect();
        let before = selectors.len();
        selectors.sort();
        selectors.dedup();
        assert_eq!(selectors.len(), before);
        assert!(chain
            .iter()
            .any(|c| c.selector == "text=\"say \\\"hi\\\"\""));
    }

    async fn session_on(page: MockPage) -> (Arc<BrowserPool>, PageSession) {
        let browser = Arc::new(MockBrowser::new().page("https://shop.test/", page));
        let pool = BrowserPool::new(browser);
        let session = pool.create_context().await.unwrap();
        session
            .navigate("https://shop.test/", Duration::from_secs(1))
            .await
            .unwrap();
        (pool, session)
    }

    #[tokio::test]
    async fn test_first_visible_match_wins() {
        let page = MockPage::new("Shop")
            .element(MockElement::new(&["[data-testid=\"checkout\"]"]).hidden())
            .element(MockElement::new(&["button:has-text(\"checkout\")"]));
        let (pool, session) = session_on(page).await;

        let found = discover(&session, &Target::labeled("checkout", TargetKind::Button))
            .await
            .unwrap();
        match found {
            Discovery::Found { record, handle } => {
                assert_eq!(record.strategy, "text");
                assert_eq!(handle.selector, "button:has-text(\"checkout\")");
                assert!(record.confidence < confidence_at(0));
            }
            other => panic!("expected a match, got {:?}", other),
        }
        pool.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_not_found_counts_hidden_candidates() {
        let page = MockPage::new("Shop")
            .element(MockElement::new(&["[data-testid=\"checkout\"]"]).hidden());
        let (pool, session) = session_on(page).await;

        let result = discover(&session, &Target::labeled("checkout", TargetKind::Button))
            .await
            .unwrap();
        assert_eq!(result.confidence(), 0.0);
        match result {
            Discovery::NotFound {
                candidates_total,
                scanned,
            } => {
                assert_eq!(candidates_total, 1);
                assert!(scanned > 5);
            }
            other => panic!("expected NotFound, got {:?}", other),
        }

        let record = result.record();
        assert!(!record.is_found());
        assert_eq!(record.confidence, 0.0);
        assert_eq!(record.signals.candidates, 1);
        pool.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_page_signals_scan() {
        let page = MockPage::new("Shop")
            .element(MockElement::new(&[FORM_SELECTOR]))
            .element(MockElement::new(&[LINK_SELECTOR]))
            .element(MockElement::new(&[LINK_SELECTOR]))
            .element(MockElement::new(&[BUTTON_SELECTOR]));
        let (pool, session) = session_on(page).await;

        let signals = PageSignals::scan(&session).await.unwrap();
        assert_eq!(
            signals,
            PageSignals {
                forms: 1,
                links: 2,
                buttons: 1,
                inputs: 0
            }
        );
        pool.close().await.unwrap();
    }
}
