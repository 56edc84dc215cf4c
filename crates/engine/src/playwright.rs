//! Playwright browser driver
//!
//! Spawns one long-lived `node` process running a small bridge script. The
//! bridge owns the browser; Rust talks to it with line-delimited JSON over
//! stdio: `{"id", "op", "params"}` in, `{"id", "ok", "result" | "error"}` out.

use async_trait::async_trait;
use base64::Engine as _;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command as TokioCommand};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::driver::{Action, BrowserDriver, ContextId, ElementHandle, PageState, QueryResult};
use crate::error::{EngineError, EngineResult};

const BRIDGE_SCRIPT: &str = r##"
const readline = require('readline');
const pw = require('playwright');

let browser = null;
let settleWindowMs = 500;
let viewport = { width: 1280, height: 720 };
const contexts = new Map();
let nextContext = 1;

const TRACKER = `
  window.__lgLastMutation = Date.now();
  new MutationObserver(() => { window.__lgLastMutation = Date.now(); })
    .observe(document, { subtree: true, childList: true, attributes: true, characterData: true });
`;

function pageOf(ctx) {
  const entry = contexts.get(ctx);
  if (!entry) throw new Error(`unknown context ${ctx}`);
  return entry.page;
}

async function stateOf(page) {
  let settled = false;
  try {
    const info = await page.evaluate(() => ({
      ready: document.readyState === 'complete',
      quietFor: Date.now() - (window.__lgLastMutation || 0),
    }));
    settled = info.ready && info.quietFor >= settleWindowMs;
  } catch (e) {
    settled = false;
  }
  let title = null;
  try { title = await page.title(); } catch (e) { title = null; }
  return { url: page.url(), title, settled };
}

const handlers = {
  async launch(params) {
    settleWindowMs = params.settleWindowMs ?? settleWindowMs;
    viewport = params.viewport || viewport;
    browser = await pw[params.browser || 'chromium'].launch({ headless: params.headless !== false });
    return { version: browser.version() };
  },
  async newContext() {
    const context = await browser.newContext({ viewport });
    await context.addInitScript(TRACKER);
    const page = await context.newPage();
    const id = nextContext++;
    contexts.set(id, { context, page });
    return { id };
  },
  async closeContext({ ctx }) {
    const entry = contexts.get(ctx);
    if (entry) {
      contexts.delete(ctx);
      await entry.context.close();
    }
    return {};
  },
  async goto({ ctx, url, timeoutMs }) {
    const page = pageOf(ctx);
    await page.goto(url, { timeout: timeoutMs, waitUntil: 'domcontentloaded' });
    return stateOf(page);
  },
  async query({ ctx, selector }) {
    const page = pageOf(ctx);
    let locator;
    let total;
    try {
      locator = page.locator(selector);
      total = await locator.count();
    } catch (e) {
      return { total: 0, firstVisible: null };
    }
    for (let i = 0; i < Math.min(total, 25); i++) {
      if (await locator.nth(i).isVisible()) return { total, firstVisible: i };
    }
    return { total, firstVisible: null };
  },
  async interact({ ctx, selector, index, action, value, timeoutMs }) {
    const target = pageOf(ctx).locator(selector).nth(index);
    const opts = { timeout: timeoutMs };
    switch (action) {
      case 'click': await target.click(opts); break;
      case 'hover': await target.hover(opts); break;
      case 'check': await target.check(opts); break;
      case 'uncheck': await target.uncheck(opts); break;
      case 'fill': await target.fill(value ?? '', opts); break;
      case 'press': await target.press(value ?? 'Enter', opts); break;
      default: throw new Error(`unknown action ${action}`);
    }
    return {};
  },
  async state({ ctx }) {
    return stateOf(pageOf(ctx));
  },
  async screenshot({ ctx }) {
    const png = await pageOf(ctx).screenshot({ fullPage: false });
    return { png: png.toString('base64') };
  },
  async shutdown() {
    for (const { context } of contexts.values()) {
      await context.close().catch(() => {});
    }
    contexts.clear();
    if (browser) await browser.close();
    browser = null;
    setImmediate(() => process.exit(0));
    return {};
  },
};

const rl = readline.createInterface({ input: process.stdin });
rl.on('line', async (line) => {
  let msg;
  try { msg = JSON.parse(line); } catch (e) { return; }
  try {
    const handler = handlers[msg.op];
    if (!handler) throw new Error(`unknown op ${msg.op}`);
    const result = await handler(msg.params || {});
    process.stdout.write(JSON.stringify({ id: msg.id, ok: true, result }) + '\n');
  } catch (e) {
    const error = String((e && e.message) || e);
    process.stdout.write(JSON.stringify({ id: msg.id, ok: false, error }) + '\n');
  }
});
rl.on('close', async () => {
  if (browser) await browser.close().catch(() => {});
  process.exit(0);
});
"##;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

/// Configuration for Playwright
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaywrightConfig {
    pub browser: Browser,
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// Node executable used to run the bridge
    pub node_binary: String,
    /// Quiet period without DOM mutations before a page counts as settled
    pub settle_window_ms: u64,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            browser: Browser::Chromium,
            headless: true,
            viewport_width: 1280,
            viewport_height: 720,
            node_binary: "node".to_string(),
            settle_window_ms: 500,
        }
    }
}

#[derive(Debug, Deserialize)]
struct BridgeReply {
    id: u64,
    ok: bool,
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<BridgeReply>>>>;

/// Browser driver backed by a Node Playwright bridge
pub struct PlaywrightBrowser {
    stdin: tokio::sync::Mutex<ChildStdin>,
    child: tokio::sync::Mutex<Child>,
    pending: Pending,
    next_id: AtomicU64,
    _workdir: tempfile::TempDir,
}

impl PlaywrightBrowser {
    /// Start the bridge and launch the browser
    pub async fn launch(config: PlaywrightConfig) -> EngineResult<Self> {
        Self::check_node_installed(&config.node_binary)?;

        let workdir = tempfile::tempdir()?;
        let script_path = workdir.path().join("bridge.js");
        std::fs::write(&script_path, BRIDGE_SCRIPT)?;

        debug!("Starting Playwright bridge: {}", script_path.display());
        let mut child = TokioCommand::new(&config.node_binary)
            .arg(&script_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::DriverUnavailable(format!("failed to spawn node: {}", e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::DriverUnavailable("bridge stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::DriverUnavailable("bridge stdout unavailable".into()))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "playwright", "{}", line);
                }
            });
        }

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        tokio::spawn(read_replies(stdout, pending.clone()));

        let browser = Self {
            stdin: tokio::sync::Mutex::new(stdin),
            child: tokio::sync::Mutex::new(child),
            pending,
            next_id: AtomicU64::new(1),
            _workdir: workdir,
        };

        let launched = browser
            .call(
                "launch",
                json!({
                    "browser": config.browser.as_str(),
                    "headless": config.headless,
                    "viewport": { "width": config.viewport_width, "height": config.viewport_height },
                    "settleWindowMs": config.settle_window_ms,
                }),
            )
            .await
            .map_err(|e| EngineError::DriverUnavailable(format!("browser launch failed: {}", e)))?;

        info!(
            "Launched {} {}",
            config.browser.as_str(),
            launched["version"].as_str().unwrap_or("(unknown version)")
        );
        Ok(browser)
    }

    /// Check that node is available
    fn check_node_installed(node: &str) -> EngineResult<()> {
        let status = Command::new(node)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match status {
            Ok(status) if status.success() => Ok(()),
            _ => Err(EngineError::DriverUnavailable(format!(
                "'{}' not found; install Node.js and `npm i playwright`",
                node
            ))),
        }
    }

    async fn call(&self, op: &str, params: Value) -> EngineResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        let mut line = serde_json::to_string(&json!({ "id": id, "op": op, "params": params }))?;
        line.push('\n');

        let written = {
            let mut stdin = self.stdin.lock().await;
            match stdin.write_all(line.as_bytes()).await {
                Ok(()) => stdin.flush().await,
                Err(e) => Err(e),
            }
        };
        if let Err(e) = written {
            self.pending.lock().remove(&id);
            return Err(EngineError::Browser(format!("bridge write failed: {}", e)));
        }

        let reply = rx
            .await
            .map_err(|_| EngineError::Browser(format!("bridge exited during '{}'", op)))?;
        if reply.ok {
            Ok(reply.result)
        } else {
            Err(EngineError::Browser(
                reply.error.unwrap_or_else(|| format!("'{}' failed", op)),
            ))
        }
    }
}

async fn read_replies(stdout: ChildStdout, pending: Pending) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match serde_json::from_str::<BridgeReply>(&line) {
                Ok(reply) => {
                    if let Some(tx) = pending.lock().remove(&reply.id) {
                        let _ = tx.send(reply);
                    }
                }
                Err(_) => debug!(target: "playwright", "{}", line),
            },
            Ok(None) => break,
            Err(e) => {
                warn!("Playwright bridge read error: {}", e);
                break;
            }
        }
    }
    // Dropping the senders fails every outstanding call
    pending.lock().clear();
}

#[async_trait]
impl BrowserDriver for PlaywrightBrowser {
    async fn new_context(&self) -> EngineResult<ContextId> {
        let result = self.call("newContext", json!({})).await?;
        result["id"]
            .as_u64()
            .map(ContextId)
            .ok_or_else(|| EngineError::Browser("bridge returned no context id".into()))
    }

    async fn close_context(&self, ctx: ContextId) -> EngineResult<()> {
        self.call("closeContext", json!({ "ctx": ctx.0 })).await?;
        Ok(())
    }

    async fn navigate(&self, ctx: ContextId, url: &str, timeout: Duration) -> EngineResult<PageState> {
        let result = self
            .call(
                "goto",
                json!({ "ctx": ctx.0, "url": url, "timeoutMs": timeout.as_millis() as u64 }),
            )
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn query(&self, ctx: ContextId, selector: &str) -> EngineResult<QueryResult> {
        let result = self
            .call("query", json!({ "ctx": ctx.0, "selector": selector }))
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn interact(
        &self,
        ctx: ContextId,
        handle: &ElementHandle,
        action: &Action,
        timeout: Duration,
    ) -> EngineResult<()> {
        let (name, value) = match action {
            Action::Click => ("click", None),
            Action::Hover => ("hover", None),
            Action::Check => ("check", None),
            Action::Uncheck => ("uncheck", None),
            Action::Press(key) => ("press", Some(key.as_str())),
            Action::Fill(text) => ("fill", Some(text.as_str())),
        };
        self.call(
            "interact",
            json!({
                "ctx": ctx.0,
                "selector": handle.selector,
                "index": handle.index,
                "action": name,
                "value": value,
                "timeoutMs": timeout.as_millis() as u64,
            }),
        )
        .await?;
        Ok(())
    }

    async fn page_state(&self, ctx: ContextId) -> EngineResult<PageState> {
        let result = self.call("state", json!({ "ctx": ctx.0 })).await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn screenshot(&self, ctx: ContextId) -> EngineResult<Vec<u8>> {
        let result = self.call("screenshot", json!({ "ctx": ctx.0 })).await?;
        let encoded = result["png"]
            .as_str()
            .ok_or_else(|| EngineError::Browser("bridge returned no screenshot".into()))?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| EngineError::Browser(format!("invalid screenshot encoding: {}", e)))
    }

    async fn shutdown(&self) -> EngineResult<()> {
        if let Err(e) = self.call("shutdown", json!({})).await {
            debug!("Bridge shutdown call failed: {}", e);
        }

        let mut child = self.child.lock().await;
        match tokio::time::timeout(Duration::from_secs(5), child.wait()).await {
            Ok(Ok(status)) => debug!("Playwright bridge exited: {}", status),
            Ok(Err(e)) => warn!("Failed to wait for Playwright bridge: {}", e),
            Err(_) => {
                warn!("Playwright bridge did not exit, killing it");
                child.kill().await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_and_toml() {
        let config: PlaywrightConfig = toml::from_str("browser = \"firefox\"\nheadless = false\n").unwrap();
        assert_eq!(config.browser, Browser::Firefox);
        assert!(!config.headless);
        assert_eq!(config.viewport_width, 1280);
        assert_eq!(config.node_binary, "node");
    }

    #[test]
    fn test_bridge_reply_parsing() {
        let ok: BridgeReply =
            serde_json::from_str(r#"{"id":3,"ok":true,"result":{"total":2,"firstVisible":1}}"#).unwrap();
        assert!(ok.ok);
        let query: QueryResult = serde_json::from_value(ok.result).unwrap();
        assert_eq!(query.first_visible, Some(1));

        let err: BridgeReply =
            serde_json::from_str(r#"{"id":4,"ok":false,"error":"Timeout 500ms exceeded"}"#).unwrap();
        assert_eq!(err.error.as_deref(), Some("Timeout 500ms exceeded"));
    }

    #[tokio::test]
    async fn test_missing_node_is_driver_unavailable() {
        let config = PlaywrightConfig {
            node_binary: "/nonexistent/launchgate-node".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            PlaywrightBrowser::launch(config).await,
            Err(EngineError::DriverUnavailable(_))
        ));
    }
}
