//! Landing page probe
//!
//! Loads the target once in its own context, counts the page's interactive
//! surface, and guesses what the site is for from a fixed set of selector
//! probes.

use launchgate_common::{CrawlSummary, SiteIntent};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::discovery::PageSignals;
use crate::error::EngineResult;
use crate::pool::{BrowserPool, PageSession};

/// Probes per intent; listed in tie-break order
const INTENT_PROBES: &[(SiteIntent, &[&str])] = &[
    (
        SiteIntent::Ecommerce,
        &[
            "a[href*=\"cart\"]",
            "a[href*=\"checkout\"]",
            "button:has-text(\"Add to cart\")",
            "[itemtype*=\"schema.org/Product\"]",
        ],
    ),
    (
        SiteIntent::Saas,
        &[
            "a[href*=\"pricing\"]",
            "a[href*=\"signup\"]",
            "a:has-text(\"Start free trial\")",
            "a[href*=\"login\"]",
        ],
    ),
    (
        SiteIntent::LeadGeneration,
        &[
            "form[action*=\"contact\"]",
            "a[href*=\"contact\"]",
            "a:has-text(\"Book a demo\")",
            "input[type=\"email\"]",
        ],
    ),
];

fn intent_tag(intent: SiteIntent) -> &'static str {
    match intent {
        SiteIntent::Ecommerce => "ecommerce",
        SiteIntent::Saas => "saas",
        SiteIntent::LeadGeneration => "lead_generation",
        SiteIntent::Content => "content",
        SiteIntent::Unknown => "unknown",
    }
}

pub struct SiteProbe {
    pool: Arc<BrowserPool>,
    navigation_timeout: Duration,
}

impl SiteProbe {
    pub fn new(pool: Arc<BrowserPool>, navigation_timeout: Duration) -> Self {
        Self {
            pool,
            navigation_timeout,
        }
    }

    /// Probe `url`. An unreachable site is reported, not raised.
    pub async fn probe(&self, url: &str) -> CrawlSummary {
        let mut summary = CrawlSummary {
            url: url.to_string(),
            ..Default::default()
        };

        let session = match self.pool.create_context().await {
            Ok(session) => session,
            Err(e) => {
                warn!("Probe could not open a browser context: {}", e);
                return summary;
            }
        };

        if let Err(e) = self.inspect(&session, url, &mut summary).await {
            warn!("Probe of {} failed: {}", url, e);
        }
        if let Err(e) = session.close().await {
            debug!("Probe context close failed: {}", e);
        }

        info!(
            "Probed {}: reachable={} intent={}",
            url, summary.reachable, summary.detected_intent
        );
        summary
    }

    async fn inspect(
        &self,
        session: &PageSession,
        url: &str,
        summary: &mut CrawlSummary,
    ) -> EngineResult<()> {
        let state = session.navigate(url, self.navigation_timeout).await?;
        summary.reachable = true;
        summary.final_url = Some(state.url);
        summary.title = state.title;

        let signals = PageSignals::scan(session).await?;
        summary.forms = signals.forms;
        summary.links = signals.links;
        summary.buttons = signals.buttons;
        summary.inputs = signals.inputs;

        let mut best: Option<(SiteIntent, usize)> = None;
        for (intent, probes) in INTENT_PROBES {
            let mut hits = 0;
            for selector in probes.iter() {
                if session.query(selector).await?.total > 0 {
                    hits += 1;
                    summary
                        .intent_signals
                        .push(format!("{}:{}", intent_tag(*intent), selector));
                }
            }
            // Strictly greater keeps the earlier intent on ties
            if hits > 0 && best.map(|(_, n)| hits > n).unwrap_or(true) {
                best = Some((*intent, hits));
            }
        }

        summary.detected_intent = match best {
            Some((intent, _)) => intent,
            None if signals.links > 0 => SiteIntent::Content,
            None => SiteIntent::Unknown,
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockBrowser, MockElement, MockPage};

    async fn probe(browser: MockBrowser, url: &str) -> (Arc<MockBrowser>, CrawlSummary) {
        let browser = Arc::new(browser);
        let pool = BrowserPool::new(browser.clone());
        let summary = SiteProbe::new(pool.clone(), Duration::from_secs(5))
            .probe(url)
            .await;
        pool.close().await.unwrap();
        (browser, summary)
    }

    #[tokio::test]
    async fn test_detects_saas_intent() {
        let page = MockPage::new("Acme")
            .element(MockElement::new(&["a[href]", "a[href*=\"pricing\"]"]))
            .element(MockElement::new(&["a[href]", "a[href*=\"signup\"]"]))
            .element(MockElement::new(&["a[href]", "a[href*=\"cart\"]"]));
        let (browser, summary) = probe(MockBrowser::new().page("https://app.test/", page), "https://app.test/").await;

        assert!(summary.reachable);
        assert_eq!(summary.title.as_deref(), Some("Acme"));
        assert_eq!(summary.links, 3);
        assert_eq!(summary.detected_intent, SiteIntent::Saas);
        assert!(summary
            .intent_signals
            .contains(&"ecommerce:a[href*=\"cart\"]".to_string()));
        assert_eq!(browser.open_contexts(), 0);
    }

    #[tokio::test]
    async fn test_ties_prefer_ecommerce() {
        let page = MockPage::new("Shop")
            .element(MockElement::new(&["a[href*=\"checkout\"]"]))
            .element(MockElement::new(&["a[href*=\"pricing\"]"]));
        let (_, summary) = probe(MockBrowser::new().page("https://shop.test/", page), "https://shop.test/").await;
        assert_eq!(summary.detected_intent, SiteIntent::Ecommerce);
    }

    #[tokio::test]
    async fn test_plain_links_are_content() {
        let page = MockPage::new("Blog").element(MockElement::new(&["a[href]"]));
        let (_, summary) = probe(MockBrowser::new().page("https://blog.test/", page), "https://blog.test/").await;
        assert_eq!(summary.detected_intent, SiteIntent::Content);
    }

    #[tokio::test]
    async fn test_unreachable_site_is_reported() {
        let (browser, summary) = probe(
            MockBrowser::new().failing_navigation("https://down.test/"),
            "https://down.test/",
        )
        .await;
        assert!(!summary.reachable);
        assert_eq!(summary.detected_intent, SiteIntent::Unknown);
        assert_eq!(browser.open_contexts(), 0);
    }
}
