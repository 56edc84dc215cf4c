//! Browser automation capability surface
//!
//! The engine only depends on this narrow trait. One driver instance owns
//! one browser process; contexts are isolated sessions (own cookies and
//! storage) identified by [`ContextId`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::EngineResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContextId(pub u64);

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// A located element: the nth match of a selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementHandle {
    pub selector: String,
    pub index: usize,
}

/// Result of querying a selector on the current page
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    /// Matching elements, visible or not
    pub total: usize,
    /// Index of the first visible match
    pub first_visible: Option<usize>,
}

impl QueryResult {
    pub fn handle(&self, selector: &str) -> Option<ElementHandle> {
        self.first_visible.map(|index| ElementHandle {
            selector: selector.to_string(),
            index,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Click,
    Hover,
    Check,
    Uncheck,
    Press(String),
    Fill(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageState {
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    /// Document loaded and no DOM mutations for the settle window
    pub settled: bool,
}

#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Open a fresh isolated context with one page
    async fn new_context(&self) -> EngineResult<ContextId>;

    async fn close_context(&self, ctx: ContextId) -> EngineResult<()>;

    async fn navigate(&self, ctx: ContextId, url: &str, timeout: Duration) -> EngineResult<PageState>;

    async fn query(&self, ctx: ContextId, selector: &str) -> EngineResult<QueryResult>;

    async fn interact(
        &self,
        ctx: ContextId,
        handle: &ElementHandle,
        action: &Action,
        timeout: Duration,
    ) -> EngineResult<()>;

    async fn page_state(&self, ctx: ContextId) -> EngineResult<PageState>;

    /// PNG bytes of the current viewport
    async fn screenshot(&self, ctx: ContextId) -> EngineResult<Vec<u8>>;

    /// Close the browser process
    async fn shutdown(&self) -> EngineResult<()>;
}
