//! In-memory browser driver for tests
//!
//! Pages are keyed by exact URL. Each element lists the exact selector
//! strings it answers to, so tests can steer discovery precisely.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::driver::{Action, BrowserDriver, ContextId, ElementHandle, PageState, QueryResult};
use crate::error::{EngineError, EngineResult};

/// Fake PNG returned by screenshots
pub const MOCK_SCREENSHOT: &[u8] = b"\x89PNG\r\n\x1a\nmock";

#[derive(Debug, Clone)]
pub struct MockElement {
    selectors: Vec<String>,
    visible: bool,
    appears_after: usize,
    navigates_to: Option<String>,
}

impl MockElement {
    pub fn new(selectors: &[&str]) -> Self {
        Self {
            selectors: selectors.iter().map(|s| s.to_string()).collect(),
            visible: true,
            appears_after: 0,
            navigates_to: None,
        }
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    /// Element only exists after it has been queried `polls` times
    pub fn appears_after(mut self, polls: usize) -> Self {
        self.appears_after = polls;
        self
    }

    /// Clicking or submitting the element loads another page
    pub fn navigates_to(mut self, url: &str) -> Self {
        self.navigates_to = Some(url.to_string());
        self
    }

    fn answers(&self, selector: &str) -> bool {
        self.selectors.iter().any(|s| s == selector)
    }
}

#[derive(Debug, Clone)]
pub struct MockPage {
    title: String,
    settled: bool,
    elements: Vec<MockElement>,
}

impl MockPage {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            settled: true,
            elements: Vec::new(),
        }
    }

    pub fn element(mut self, element: MockElement) -> Self {
        self.elements.push(element);
        self
    }

    /// The DOM keeps mutating; absence is never provable
    pub fn unsettled(mut self) -> Self {
        self.settled = false;
        self
    }
}

#[derive(Debug, Default)]
struct MockContext {
    url: Option<String>,
    polls: HashMap<(String, usize), usize>,
}

#[derive(Debug, Default)]
struct MockState {
    next_id: u64,
    contexts: HashMap<ContextId, MockContext>,
    peak_contexts: usize,
    shutdown_calls: usize,
    interactions: Vec<String>,
    navigations: Vec<String>,
}

/// Browser driver backed by static page fixtures
pub struct MockBrowser {
    pages: HashMap<String, MockPage>,
    failing: HashSet<String>,
    latency: Duration,
    state: Mutex<MockState>,
}

impl Default for MockBrowser {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBrowser {
    pub fn new() -> Self {
        Self {
            pages: HashMap::new(),
            failing: HashSet::new(),
            latency: Duration::ZERO,
            state: Mutex::new(MockState::default()),
        }
    }

    pub fn page(mut self, url: &str, page: MockPage) -> Self {
        self.pages.insert(url.to_string(), page);
        self
    }

    /// Navigation to `url` fails with a browser error
    pub fn failing_navigation(mut self, url: &str) -> Self {
        self.failing.insert(url.to_string());
        self
    }

    /// Every navigation sleeps this long
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn open_contexts(&self) -> usize {
        self.state.lock().contexts.len()
    }

    pub fn peak_contexts(&self) -> usize {
        self.state.lock().peak_contexts
    }

    pub fn shutdown_calls(&self) -> usize {
        self.state.lock().shutdown_calls
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown_calls() > 0
    }

    /// `<action>:<selector>` for every interaction, in order
    pub fn interactions(&self) -> Vec<String> {
        self.state.lock().interactions.clone()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.state.lock().navigations.clone()
    }

    fn current_url(state: &MockState, ctx: ContextId) -> EngineResult<Option<String>> {
        state
            .contexts
            .get(&ctx)
            .map(|c| c.url.clone())
            .ok_or(EngineError::UnknownContext(ctx.0))
    }
}

#[async_trait]
impl BrowserDriver for MockBrowser {
    async fn new_context(&self) -> EngineResult<ContextId> {
        let mut state = self.state.lock();
        if state.shutdown_calls > 0 {
            return Err(EngineError::Browser("browser has been closed".into()));
        }
        state.next_id += 1;
        let ctx = ContextId(state.next_id);
        state.contexts.insert(ctx, MockContext::default());
        state.peak_contexts = state.peak_contexts.max(state.contexts.len());
        Ok(ctx)
    }

    async fn close_context(&self, ctx: ContextId) -> EngineResult<()> {
        self.state.lock().contexts.remove(&ctx);
        Ok(())
    }

    async fn navigate(&self, ctx: ContextId, url: &str, _timeout: Duration) -> EngineResult<PageState> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        {
            let mut state = self.state.lock();
            Self::current_url(&state, ctx)?;
            state.navigations.push(url.to_string());
            if self.failing.contains(url) {
                return Err(EngineError::Browser(format!(
                    "net::ERR_CONNECTION_REFUSED at {}",
                    url
                )));
            }
            if let Some(context) = state.contexts.get_mut(&ctx) {
                context.url = Some(url.to_string());
            }
        }

        self.page_state(ctx).await
    }

    async fn query(&self, ctx: ContextId, selector: &str) -> EngineResult<QueryResult> {
        let mut state = self.state.lock();
        let Some(url) = Self::current_url(&state, ctx)? else {
            return Ok(QueryResult::default());
        };
        let Some(page) = self.pages.get(&url) else {
            return Ok(QueryResult::default());
        };
        let Some(context) = state.contexts.get_mut(&ctx) else {
            return Err(EngineError::UnknownContext(ctx.0));
        };

        let mut result = QueryResult::default();
        for (idx, element) in page.elements.iter().enumerate() {
            if !element.answers(selector) {
                continue;
            }
            let polls = context.polls.entry((url.clone(), idx)).or_insert(0);
            *polls += 1;
            if *polls <= element.appears_after {
                continue;
            }
            if element.visible && result.first_visible.is_none() {
                result.first_visible = Some(result.total);
            }
            result.total += 1;
        }
        Ok(result)
    }

    async fn interact(
        &self,
        ctx: ContextId,
        handle: &ElementHandle,
        action: &Action,
        _timeout: Duration,
    ) -> EngineResult<()> {
        let mut state = self.state.lock();
        let url = Self::current_url(&state, ctx)?
            .ok_or_else(|| EngineError::Browser("no page loaded".into()))?;
        let page = self
            .pages
            .get(&url)
            .ok_or_else(|| EngineError::Browser(format!("no fixture for {}", url)))?;

        let element = page
            .elements
            .iter()
            .filter(|e| e.answers(&handle.selector))
            .nth(handle.index)
            .ok_or_else(|| EngineError::Browser(format!("stale handle {}", handle.selector)))?
            .clone();

        let label = match action {
            Action::Click => "click",
            Action::Hover => "hover",
            Action::Check => "check",
            Action::Uncheck => "uncheck",
            Action::Press(_) => "press",
            Action::Fill(_) => "fill",
        };
        state
            .interactions
            .push(format!("{}:{}", label, handle.selector));

        let navigates = matches!(action, Action::Click | Action::Press(_));
        if navigates {
            if let Some(target) = element.navigates_to {
                if let Some(context) = state.contexts.get_mut(&ctx) {
                    context.url = Some(target);
                }
            }
        }
        Ok(())
    }

    async fn page_state(&self, ctx: ContextId) -> EngineResult<PageState> {
        let state = self.state.lock();
        let url = Self::current_url(&state, ctx)?.unwrap_or_else(|| "about:blank".to_string());
        let page = self.pages.get(&url);
        Ok(PageState {
            title: Some(
                page.map(|p| p.title.clone())
                    .unwrap_or_else(|| "Not Found".to_string()),
            ),
            settled: page.map(|p| p.settled).unwrap_or(true),
            url,
        })
    }

    async fn screenshot(&self, ctx: ContextId) -> EngineResult<Vec<u8>> {
        let state = self.state.lock();
        Self::current_url(&state, ctx)?;
        Ok(MOCK_SCREENSHOT.to_vec())
    }

    async fn shutdown(&self) -> EngineResult<()> {
        let mut state = self.state.lock();
        state.shutdown_calls += 1;
        state.contexts.clear();
        Ok(())
    }
}

/// Attempt result with the given outcome and one passed step per id in `steps`
pub fn attempt_result(
    attempt_id: &str,
    outcome: launchgate_common::AttemptOutcome,
    steps: &[&str],
) -> launchgate_common::AttemptResult {
    use launchgate_common::{AttemptResult, DiscoveryRecord, StepOutcome, StepStatus};

    let mut result = AttemptResult::skipped(attempt_id, true, "");
    result.outcome = outcome;
    if outcome != launchgate_common::AttemptOutcome::Skipped {
        result.skip_reason = None;
        result.duration_ms = 100;
    }
    result.steps = steps
        .iter()
        .map(|id| StepOutcome {
            step_id: id.to_string(),
            kind: "interact".to_string(),
            status: StepStatus::Passed,
            retries: 0,
            duration_ms: 100,
            error: None,
            failure_class: None,
            discovery: Some(DiscoveryRecord {
                strategy: "test_hook".to_string(),
                position: 0,
                confidence: 0.95,
                selector: format!("[data-testid=\"{}\"]", id),
                signals: Default::default(),
            }),
        })
        .collect();
    result
}

/// Snapshot for `site` started `minutes` after a fixed epoch
pub fn snapshot_with(
    run_id: &str,
    minutes: i64,
    attempts: Vec<launchgate_common::AttemptResult>,
) -> launchgate_common::Snapshot {
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use launchgate_common::{
        CrawlSummary, Decision, MarketImpactSummary, SignalMap, SiteIntent, Snapshot,
        SnapshotMeta, Verdict,
    };

    let started_at = Utc
        .with_ymd_and_hms(2026, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
        + ChronoDuration::minutes(minutes);

    Snapshot {
        meta: SnapshotMeta {
            run_id: run_id.to_string(),
            site_key: "app-test".to_string(),
            url: "https://app.test/".to_string(),
            preset: None,
            started_at,
            finished_at: started_at + ChronoDuration::seconds(5),
            duration_ms: 5_000,
            goal_reached: true,
            verdict_confidence: 0.9,
            engine_version: crate::VERSION.to_string(),
        },
        crawl: CrawlSummary {
            url: "https://app.test/".to_string(),
            reachable: true,
            detected_intent: SiteIntent::Saas,
            ..Default::default()
        },
        attempts,
        signals: SignalMap::new(),
        decision: Decision {
            final_verdict: Verdict::Ready,
            exit_code: 0,
            triggered_rule_ids: Vec::new(),
            reasons: Vec::new(),
        },
        market_impact: MarketImpactSummary::default(),
        baseline: None,
    }
}
