//! [`PageEngine`] implementation that drives the active browser tab through the
//! extension bridge.
//!
//! Element handles are ids in a page-side registry (`window.__harvest`). A handle
//! whose element left the document resolves to `ElementDetached`. Every query drops
//! the registry entries of detached elements.

use crate::bridge::ExtensionBridge;
use crate::errors::HarvestError;
use crate::page::{same_location, ElementRef, PageEngine};
use crate::selector::Selector;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

pub const DEFAULT_SCRIPT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

const SCRIPT_ATTEMPTS: usize = 3;
const NAVIGATION_POLL: Duration = Duration::from_millis(200);

const REGISTRY_PRELUDE: &str = r#"
  const reg = (window.__harvest = window.__harvest || { seq: 0, els: new Map() });
  const handle = (el) => {
    if (!el.__harvestId) { el.__harvestId = 'h' + (++reg.seq); }
    reg.els.set(el.__harvestId, el);
    return el.__harvestId;
  };
  const resolve = (id) => {
    const el = reg.els.get(id);
    if (!el || !el.isConnected) {
      reg.els.delete(id);
      throw { code: 'STALE', message: 'element ' + id + ' is detached' };
    }
    return el;
  };
  const pruneDetached = () => {
    for (const [id, el] of reg.els) { if (!el.isConnected) reg.els.delete(id); }
  };
"#;

/// Wrap an expression so it always yields a JSON envelope
fn wrap_script(expression: &str) -> String {
    format!(
        "(() => {{{REGISTRY_PRELUDE}
  try {{
    return JSON.stringify({{ success: true, value: ({expression}) }});
  }} catch (e) {{
    return JSON.stringify({{ success: false, code: (e && e.code) || 'SCRIPT', message: String((e && e.message) || e) }});
  }}
}})()"
    )
}

/// JavaScript literal for a string argument
fn js_str(value: &str) -> String {
    Value::String(value.to_string()).to_string()
}

/// Decode the reply of a wrapped script into its `value`
pub fn decode_reply(reply: Value) -> Result<Value, HarvestError> {
    let text = match reply {
        Value::String(s) => s,
        Value::Null => return Ok(Value::Null),
        other => other.to_string(),
    };

    let trimmed = text.trim_start();
    if let Some(raw) = trimmed.strip_prefix("ERROR:") {
        let raw = raw.trim();
        let message = serde_json::from_str::<Value>(raw)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
            .unwrap_or_else(|| raw.to_string());
        error!(%message, "Browser script error");
        return Err(HarvestError::PlatformError(format!(
            "JavaScript execution failed: {message}"
        )));
    }

    let envelope: Value = match serde_json::from_str(&text) {
        Ok(v) => v,
        Err(_) => return Ok(Value::String(text)),
    };

    let failed = envelope.get("success") == Some(&Value::Bool(false))
        || matches!(
            envelope.get("status").and_then(|v| v.as_str()),
            Some("failed") | Some("error")
        );
    if failed {
        let message = envelope
            .get("message")
            .or_else(|| envelope.get("error"))
            .and_then(|v| v.as_str())
            .unwrap_or("JavaScript returned failure status")
            .to_string();
        return Err(match envelope.get("code").and_then(|v| v.as_str()) {
            Some("STALE") => HarvestError::ElementDetached(message),
            _ => HarvestError::PlatformError(format!("JavaScript operation failed: {message}")),
        });
    }

    match envelope {
        Value::Object(mut map) if map.contains_key("success") => {
            Ok(map.remove("value").unwrap_or(Value::Null))
        }
        other => Ok(other),
    }
}

pub struct BridgeEngine {
    bridge: Arc<ExtensionBridge>,
    script_timeout: Duration,
    connect_timeout: Duration,
    navigation_timeout: Duration,
}

impl BridgeEngine {
    pub fn new(bridge: Arc<ExtensionBridge>) -> Self {
        Self {
            bridge,
            script_timeout: DEFAULT_SCRIPT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            navigation_timeout: DEFAULT_SCRIPT_TIMEOUT,
        }
    }

    pub fn with_script_timeout(mut self, timeout: Duration) -> Self {
        self.script_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Bound on waiting for a navigation to reach a fully loaded document
    pub fn with_navigation_timeout(mut self, timeout: Duration) -> Self {
        self.navigation_timeout = timeout;
        self
    }

    pub fn bridge(&self) -> &Arc<ExtensionBridge> {
        &self.bridge
    }

    /// Run a wrapped expression, waiting for the extension and retrying while it
    /// reconnects
    async fn execute(&self, expression: &str) -> Result<Value, HarvestError> {
        let script = wrap_script(expression);
        let mut last_error = None;

        for attempt in 0..SCRIPT_ATTEMPTS {
            if !self.bridge.is_client_connected().await {
                debug!(attempt, "Waiting for extension client to connect");
                if !self.bridge.wait_for_client(self.connect_timeout).await {
                    return Err(HarvestError::NotConnected(format!(
                        "extension did not connect within {:?}",
                        self.connect_timeout
                    )));
                }
            }

            match self
                .bridge
                .eval_in_active_tab(&script, self.script_timeout)
                .await
            {
                Ok(reply) => return decode_reply(reply),
                Err(e @ HarvestError::NotConnected(_)) => {
                    warn!(attempt = attempt + 1, error = %e, "Extension went away, retrying");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            HarvestError::NotConnected("extension bridge not connected".to_string())
        }))
    }

    async fn execute_string(&self, expression: &str) -> Result<String, HarvestError> {
        match self.execute(expression).await? {
            Value::String(s) => Ok(s),
            Value::Null => Ok(String::new()),
            other => Ok(other.to_string()),
        }
    }

    fn target_expr(target: Option<&ElementRef>) -> String {
        match target {
            Some(el) => format!("resolve({})", js_str(el.as_str())),
            None => "(document.scrollingElement || document.documentElement)".to_string(),
        }
    }
}

#[async_trait::async_trait]
impl PageEngine for BridgeEngine {
    #[instrument(level = "debug", skip(self, root), fields(selector = %selector))]
    async fn query_all(
        &self,
        selector: &Selector,
        root: Option<&ElementRef>,
    ) -> Result<Vec<ElementRef>, HarvestError> {
        let scope = match root {
            Some(root) => format!("resolve({})", js_str(root.as_str())),
            None => "document".to_string(),
        };

        let expression = match selector {
            Selector::Invalid(reason) => return Err(HarvestError::InvalidSelector(reason.clone())),
            Selector::XPath(xpath) => format!(
                "(() => {{ const ctx = {scope}; const snap = document.evaluate({}, ctx, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null); const out = []; for (let i = 0; i < snap.snapshotLength; i++) {{ const n = snap.snapshotItem(i); if (n && n.nodeType === 1 && n !== ctx) out.push(handle(n)); }} return out; }})()",
                js_str(xpath)
            ),
            other => {
                let css = other.to_css().ok_or_else(|| {
                    HarvestError::InvalidSelector(format!(
                        "{other} cannot be expressed as a CSS selector"
                    ))
                })?;
                format!(
                    "Array.from({scope}.querySelectorAll({})).map(handle)",
                    js_str(&css)
                )
            }
        };

        let value = self
            .execute(&format!("(pruneDetached(), {expression})"))
            .await?;
        let handles: Vec<String> = serde_json::from_value(value)?;
        Ok(handles.into_iter().map(ElementRef::new).collect())
    }

    async fn text(&self, element: &ElementRef) -> Result<String, HarvestError> {
        self.execute_string(&format!(
            "(() => {{ const el = resolve({}); return el.innerText ?? el.textContent ?? ''; }})()",
            js_str(element.as_str())
        ))
        .await
    }

    async fn attribute(
        &self,
        element: &ElementRef,
        name: &str,
    ) -> Result<Option<String>, HarvestError> {
        let value = self
            .execute(&format!(
                "resolve({}).getAttribute({})",
                js_str(element.as_str()),
                js_str(name)
            ))
            .await?;
        Ok(match value {
            Value::Null => None,
            Value::String(s) => Some(s),
            other => Some(other.to_string()),
        })
    }

    async fn tag_name(&self, element: &ElementRef) -> Result<String, HarvestError> {
        self.execute_string(&format!(
            "resolve({}).tagName.toLowerCase()",
            js_str(element.as_str())
        ))
        .await
    }

    async fn scroll_to_bottom(&self, target: Option<&ElementRef>) -> Result<(), HarvestError> {
        self.execute(&format!(
            "(() => {{ const el = {}; el.scrollTop = el.scrollHeight; return el.scrollTop; }})()",
            Self::target_expr(target)
        ))
        .await
        .map(|_| ())
    }

    async fn scroll_to_top(&self, target: Option<&ElementRef>) -> Result<(), HarvestError> {
        self.execute(&format!(
            "(() => {{ const el = {}; el.scrollTop = 0; return el.scrollTop; }})()",
            Self::target_expr(target)
        ))
        .await
        .map(|_| ())
    }

    async fn click(&self, element: &ElementRef) -> Result<(), HarvestError> {
        self.execute(&format!(
            "(() => {{ resolve({}).click(); return null; }})()",
            js_str(element.as_str())
        ))
        .await
        .map(|_| ())
    }

    async fn navigate(&self, url: &str) -> Result<(), HarvestError> {
        let before = self.current_url().await?;
        self.execute(&format!(
            "(() => {{ window.location.assign({}); return null; }})()",
            js_str(url)
        ))
        .await?;

        // An unchanged href is only expected when the target is the current page
        let same_page = same_location(&before, url);
        let deadline = tokio::time::Instant::now() + self.navigation_timeout;
        loop {
            match self
                .execute("({ href: window.location.href, ready: document.readyState })")
                .await
            {
                Ok(state) => {
                    let href = state.get("href").and_then(Value::as_str).unwrap_or_default();
                    let loaded = state.get("ready").and_then(Value::as_str) == Some("complete");
                    if loaded && (same_page || href != before) {
                        debug!(%href, "Navigation finished");
                        return Ok(());
                    }
                }
                // the tab is between documents
                Err(e) => debug!(error = %e, "Page not ready after navigation"),
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(HarvestError::Timeout(format!(
                    "navigation to {url} did not finish within {:?}",
                    self.navigation_timeout
                )));
            }
            tokio::time::sleep(NAVIGATION_POLL).await;
        }
    }

    async fn current_url(&self) -> Result<String, HarvestError> {
        self.execute_string("window.location.href").await
    }

    async fn title(&self) -> Result<String, HarvestError> {
        self.execute_string("document.title").await
    }

    async fn page_source(&self) -> Result<String, HarvestError> {
        self.execute_string("document.documentElement.outerHTML")
            .await
    }
}
