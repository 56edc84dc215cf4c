//! Shared browser resource pool
//!
//! One browser process, many disposable contexts. The context table is the
//! only shared state; each create/close is a single insert/remove on it.

use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::driver::{Action, BrowserDriver, ContextId, ElementHandle, PageState, QueryResult};
use crate::error::{EngineError, EngineResult};

pub struct BrowserPool {
    driver: Arc<dyn BrowserDriver>,
    contexts: Mutex<BTreeSet<ContextId>>,
    closed: AtomicBool,
}

impl BrowserPool {
    /// Wrap an already launched browser driver
    pub fn new(driver: Arc<dyn BrowserDriver>) -> Arc<Self> {
        Arc::new(Self {
            driver,
            contexts: Mutex::new(BTreeSet::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Issue a new isolated context
    pub async fn create_context(self: &Arc<Self>) -> EngineResult<PageSession> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::PoolClosed);
        }

        let ctx = self.driver.new_context().await?;

        // close() flips the flag under the same lock before draining
        let tracked = {
            let mut contexts = self.contexts.lock();
            !self.closed.load(Ordering::SeqCst) && contexts.insert(ctx)
        };
        if !tracked {
            let _ = self.driver.close_context(ctx).await;
            return Err(EngineError::PoolClosed);
        }
        debug!("Opened browser context {}", ctx);

        Ok(PageSession {
            pool: Arc::clone(self),
            ctx,
        })
    }

    /// Close one context; closing an unknown or already closed context is a no-op
    pub async fn close_context(&self, ctx: ContextId) -> EngineResult<()> {
        let removed = self.contexts.lock().remove(&ctx);
        if !removed {
            return Ok(());
        }

        debug!("Closing browser context {}", ctx);
        if let Err(e) = self.driver.close_context(ctx).await {
            warn!("Failed to close browser context {}: {}", ctx, e);
        }
        Ok(())
    }

    /// Close every outstanding context, then the browser. Idempotent.
    pub async fn close(&self) -> EngineResult<()> {
        let outstanding: Vec<ContextId> = {
            let mut contexts = self.contexts.lock();
            if self.closed.swap(true, Ordering::SeqCst) {
                return Ok(());
            }
            std::mem::take(&mut *contexts).into_iter().collect()
        };
        if !outstanding.is_empty() {
            info!("Closing {} outstanding browser context(s)", outstanding.len());
        }
        for ctx in outstanding {
            if let Err(e) = self.driver.close_context(ctx).await {
                warn!("Failed to close browser context {}: {}", ctx, e);
            }
        }

        self.driver.shutdown().await?;
        info!("Browser pool closed");
        Ok(())
    }

    pub fn active_contexts(&self) -> usize {
        self.contexts.lock().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn driver(&self) -> &dyn BrowserDriver {
        self.driver.as_ref()
    }
}

/// One exclusively owned browser context
pub struct PageSession {
    pool: Arc<BrowserPool>,
    ctx: ContextId,
}

impl PageSession {
    pub fn id(&self) -> ContextId {
        self.ctx
    }

    pub async fn navigate(&self, url: &str, timeout: Duration) -> EngineResult<PageState> {
        self.pool.driver().navigate(self.ctx, url, timeout).await
    }

    pub async fn query(&self, selector: &str) -> EngineResult<QueryResult> {
        self.pool.driver().query(self.ctx, selector).await
    }

    pub async fn interact(
        &self,
        handle: &ElementHandle,
        action: &Action,
        timeout: Duration,
    ) -> EngineResult<()> {
        self.pool
            .driver()
            .interact(self.ctx, handle, action, timeout)
            .await
    }

    pub async fn page_state(&self) -> EngineResult<PageState> {
        self.pool.driver().page_state(self.ctx).await
    }

    pub async fn screenshot(&self) -> EngineResult<Vec<u8>> {
        self.pool.driver().screenshot(self.ctx).await
    }

    /// Return the context to the pool
    pub async fn close(self) -> EngineResult<()> {
        self.pool.close_context(self.ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockBrowser, MockPage};

    fn pool() -> (Arc<MockBrowser>, Arc<BrowserPool>) {
        let browser = Arc::new(MockBrowser::new().page("https://example.com/", MockPage::new("Home")));
        let pool = BrowserPool::new(browser.clone());
        (browser, pool)
    }

    #[tokio::test]
    async fn test_contexts_tracked_and_closed() {
        let (browser, pool) = pool();

        let a = pool.create_context().await.unwrap();
        let b = pool.create_context().await.unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(pool.active_contexts(), 2);

        a.close().await.unwrap();
        assert_eq!(pool.active_contexts(), 1);

        pool.close().await.unwrap();
        assert_eq!(pool.active_contexts(), 0);
        assert_eq!(browser.open_contexts(), 0);
        assert!(browser.is_shut_down());
    }

    #[tokio::test]
    async fn test_close_and_close_context_are_idempotent() {
        let (browser, pool) = pool();

        let session = pool.create_context().await.unwrap();
        let ctx = session.id();
        pool.close_context(ctx).await.unwrap();
        pool.close_context(ctx).await.unwrap();

        pool.close().await.unwrap();
        pool.close().await.unwrap();
        assert_eq!(browser.shutdown_calls(), 1);
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_new_contexts() {
        let (_browser, pool) = pool();
        pool.close().await.unwrap();
        assert!(matches!(
            pool.create_context().await,
            Err(EngineError::PoolClosed)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_close_racing_create_leaves_nothing_tracked() {
        for _ in 0..20 {
            let (_browser, pool) = pool();
            let creators: Vec<_> = (0..16)
                .map(|_| {
                    let pool = Arc::clone(&pool);
                    tokio::spawn(async move { pool.create_context().await })
                })
                .collect();
            let closer = {
                let pool = Arc::clone(&pool);
                tokio::spawn(async move { pool.close().await })
            };

            closer.await.unwrap().unwrap();
            for creator in creators {
                match creator.await.unwrap() {
                    Ok(_) | Err(EngineError::PoolClosed) | Err(EngineError::Browser(_)) => {}
                    Err(e) => panic!("unexpected error: {}", e),
                }
            }
            assert!(pool.is_closed());
            assert_eq!(pool.active_contexts(), 0);
        }
    }

    #[tokio::test]
    async fn test_contexts_are_isolated() {
        let browser = Arc::new(
            MockBrowser::new()
                .page("https://example.com/", MockPage::new("Home"))
                .page("https://example.com/other", MockPage::new("Other")),
        );
        let pool = BrowserPool::new(browser.clone());
        let a = pool.create_context().await.unwrap();
        let b = pool.create_context().await.unwrap();

        a.navigate("https://example.com/other", Duration::from_secs(1))
            .await
            .unwrap();
        b.navigate("https://example.com/", Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(a.page_state().await.unwrap().url, "https://example.com/other");
        assert_eq!(b.page_state().await.unwrap().url, "https://example.com/");
        pool.close().await.unwrap();
    }
}
