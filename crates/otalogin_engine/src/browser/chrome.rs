use std::sync::{Arc, Weak};
use std::time::Duration;

use agent_logging::{agent_debug, agent_info, agent_trace};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use url::Url;

use super::{Browser, BrowserError, CdpClient, CdpEvent, PageSession, TabHandle, WindowHandle};

pub const DEFAULT_DEVTOOLS_ENDPOINT: &str = "http://127.0.0.1:9222";

/// Events that may change what `document.querySelector` finds, plus the
/// load signals the page-load wait listens for.
const CHANGE_EVENTS: &[&str] = &[
    "DOM.childNodeInserted",
    "DOM.childNodeRemoved",
    "DOM.childNodeCountUpdated",
    "DOM.setChildNodes",
    "DOM.attributeModified",
    "DOM.documentUpdated",
    "Page.loadEventFired",
    "Page.frameNavigated",
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionInfo {
    web_socket_debugger_url: String,
}

/// A Chrome instance started with `--remote-debugging-port`.
///
/// The browser-level socket is opened lazily and reopened if it drops, so
/// the agent survives browser restarts between cycles.
pub struct CdpBrowser {
    endpoint: Url,
    http: reqwest::Client,
    command_timeout: Duration,
    connection: Mutex<Option<Arc<CdpClient>>>,
}

impl CdpBrowser {
    pub fn new(endpoint: &str, command_timeout: Duration) -> Result<Self, BrowserError> {
        let endpoint = Url::parse(endpoint).map_err(|err| BrowserError::ConnectionFailed {
            url: endpoint.to_string(),
            reason: err.to_string(),
        })?;
        let http = reqwest::Client::builder()
            .timeout(command_timeout)
            .build()
            .map_err(|err| BrowserError::ConnectionFailed {
                url: endpoint.to_string(),
                reason: err.to_string(),
            })?;
        Ok(Self {
            endpoint,
            http,
            command_timeout,
            connection: Mutex::new(None),
        })
    }

    async fn browser_socket_url(&self) -> Result<String, BrowserError> {
        let unreachable = |reason: String| BrowserError::ConnectionFailed {
            url: self.endpoint.to_string(),
            reason,
        };
        let version_url = self
            .endpoint
            .join("/json/version")
            .map_err(|err| unreachable(err.to_string()))?;
        let response = self
            .http
            .get(version_url)
            .send()
            .await
            .map_err(|err| unreachable(err.to_string()))?;
        if !response.status().is_success() {
            return Err(unreachable(response.status().to_string()));
        }
        let info: VersionInfo = response
            .json()
            .await
            .map_err(|err| unreachable(err.to_string()))?;
        Ok(info.web_socket_debugger_url)
    }

    async fn connection(&self) -> Result<Arc<CdpClient>, BrowserError> {
        let mut slot = self.connection.lock().await;
        if let Some(client) = slot.as_ref().filter(|client| !client.is_closed()) {
            return Ok(Arc::clone(client));
        }
        let socket_url = self.browser_socket_url().await?;
        let client = Arc::new(CdpClient::connect(&socket_url, self.command_timeout).await?);
        agent_info!("connected to browser at {}", self.endpoint);
        *slot = Some(Arc::clone(&client));
        Ok(client)
    }
}

/// Page sockets live next to the browser socket:
/// `ws://host/devtools/browser/<id>` → `ws://host/devtools/page/<target>`.
fn page_socket_url(browser_socket: &str, target_id: &str) -> Result<String, BrowserError> {
    let mut url = Url::parse(browser_socket).map_err(|err| BrowserError::ConnectionFailed {
        url: browser_socket.to_string(),
        reason: err.to_string(),
    })?;
    url.set_path(&format!("/devtools/page/{target_id}"));
    Ok(url.to_string())
}

fn string_field(value: &Value, field: &str) -> Result<String, BrowserError> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| BrowserError::protocol(format!("response is missing `{field}`")))
}

#[async_trait::async_trait]
impl Browser for CdpBrowser {
    async fn window_exists(&self, window: &WindowHandle) -> Result<bool, BrowserError> {
        let client = self.connection().await?;
        match client
            .send(
                "Browser.getWindowBounds",
                json!({ "windowId": window.window_id }),
            )
            .await
        {
            Ok(_) => Ok(true),
            // Chrome answers an unknown id with an error object.
            Err(BrowserError::Cdp { message, .. }) => {
                agent_debug!("window {} is gone: {message}", window.window_id);
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    async fn create_window(&self) -> Result<WindowHandle, BrowserError> {
        let client = self.connection().await?;
        let context = client
            .send(
                "Target.createBrowserContext",
                json!({ "disposeOnDetach": false }),
            )
            .await?;
        let browser_context_id = string_field(&context, "browserContextId")?;

        let target = client
            .send(
                "Target.createTarget",
                json!({
                    "url": "about:blank",
                    "browserContextId": browser_context_id,
                    "newWindow": true,
                    "background": true,
                }),
            )
            .await?;
        let target_id = string_field(&target, "targetId")?;

        let window = client
            .send(
                "Browser.getWindowForTarget",
                json!({ "targetId": target_id }),
            )
            .await?;
        let window_id = window
            .get("windowId")
            .and_then(Value::as_i64)
            .ok_or_else(|| BrowserError::protocol("response is missing `windowId`"))?;

        Ok(WindowHandle {
            window_id,
            browser_context_id,
        })
    }

    async fn open_tab(&self, window: &WindowHandle, url: &str) -> Result<TabHandle, BrowserError> {
        let client = self.connection().await?;
        let target = client
            .send(
                "Target.createTarget",
                json!({
                    "url": url,
                    "browserContextId": window.browser_context_id,
                    "background": true,
                }),
            )
            .await?;
        Ok(TabHandle {
            target_id: string_field(&target, "targetId")?,
        })
    }

    async fn attach(&self, tab: &TabHandle) -> Result<Arc<dyn PageSession>, BrowserError> {
        let browser = self.connection().await?;
        let socket_url = page_socket_url(browser.url(), &tab.target_id)?;
        let client = CdpClient::connect(&socket_url, self.command_timeout).await?;
        let page = CdpPage::start(client).await?;
        Ok(Arc::new(page))
    }

    async fn close_tab(&self, tab: &TabHandle) -> Result<(), BrowserError> {
        let client = self.connection().await?;
        client
            .send("Target.closeTarget", json!({ "targetId": tab.target_id }))
            .await?;
        Ok(())
    }
}

/// One attached page. Owns the page socket and the task that turns DOM
/// events into the change feed.
pub struct CdpPage {
    client: Arc<CdpClient>,
    changes: watch::Receiver<u64>,
    feed: JoinHandle<()>,
}

impl CdpPage {
    pub async fn start(client: CdpClient) -> Result<Self, BrowserError> {
        let client = Arc::new(client);
        let events = client.subscribe();
        client.send("Page.enable", json!({})).await?;
        client.send("DOM.enable", json!({})).await?;
        // DOM mutation events only flow for nodes the client has seen.
        request_document(&client).await?;

        let (tx, changes) = watch::channel(0);
        let feed = tokio::spawn(feed_changes(Arc::downgrade(&client), events, tx));
        Ok(Self {
            client,
            changes,
            feed,
        })
    }

    async fn evaluate(&self, expression: &str) -> Result<Value, BrowserError> {
        let result = self
            .client
            .send(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                }),
            )
            .await?;

        if let Some(exception) = result.get("exceptionDetails") {
            let message = exception
                .get("exception")
                .and_then(|e| e.get("description"))
                .and_then(Value::as_str)
                .or_else(|| exception.get("text").and_then(Value::as_str))
                .unwrap_or("unknown exception")
                .to_string();
            return Err(BrowserError::JsException { message });
        }

        Ok(result
            .get("result")
            .and_then(|r| r.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn evaluate_bool(&self, expression: &str) -> Result<bool, BrowserError> {
        self.evaluate(expression)
            .await?
            .as_bool()
            .ok_or_else(|| BrowserError::protocol("script did not return a boolean"))
    }

    async fn evaluate_string(&self, expression: &str) -> Result<String, BrowserError> {
        match self.evaluate(expression).await? {
            Value::String(text) => Ok(text),
            other => Err(BrowserError::protocol(format!(
                "script returned {other} instead of a string"
            ))),
        }
    }
}

impl Drop for CdpPage {
    fn drop(&mut self) {
        self.feed.abort();
    }
}

async fn request_document(client: &CdpClient) -> Result<(), BrowserError> {
    client
        .send("DOM.getDocument", json!({ "depth": -1, "pierce": true }))
        .await?;
    Ok(())
}

async fn feed_changes(
    client: Weak<CdpClient>,
    mut events: broadcast::Receiver<CdpEvent>,
    changes: watch::Sender<u64>,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                agent_trace!("change feed skipped {skipped} events");
                changes.send_modify(|seq| *seq = seq.wrapping_add(1));
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        if !CHANGE_EVENTS.contains(&event.method.as_str()) {
            continue;
        }
        if event.method == "DOM.documentUpdated" {
            let Some(client) = client.upgrade() else {
                break;
            };
            if let Err(err) = request_document(&client).await {
                agent_debug!("could not refresh document after update: {err}");
            }
        }
        changes.send_modify(|seq| *seq = seq.wrapping_add(1));
    }
}

fn js_string(value: &str) -> String {
    // JSON string literals are valid JavaScript string literals.
    Value::String(value.to_string()).to_string()
}

fn fill_script(selector: &str, value: &str) -> String {
    format!(
        r#"(() => {{
  const el = document.querySelector({selector});
  if (!el) return false;
  el.focus();
  const desc = Object.getOwnPropertyDescriptor(Object.getPrototypeOf(el), 'value');
  if (desc && desc.set) {{ desc.set.call(el, {value}); }} else {{ el.value = {value}; }}
  el.dispatchEvent(new Event('input', {{ bubbles: true }}));
  el.dispatchEvent(new Event('change', {{ bubbles: true }}));
  return true;
}})()"#,
        selector = js_string(selector),
        value = js_string(value),
    )
}

fn click_script(selector: &str) -> String {
    format!(
        "(() => {{ const el = document.querySelector({}); if (!el) return false; el.click(); return true; }})()",
        js_string(selector)
    )
}

#[async_trait::async_trait]
impl PageSession for CdpPage {
    async fn current_url(&self) -> Result<String, BrowserError> {
        self.evaluate_string("location.href").await
    }

    async fn ready_state(&self) -> Result<String, BrowserError> {
        self.evaluate_string("document.readyState").await
    }

    async fn has_element(&self, selector: &str) -> Result<bool, BrowserError> {
        self.evaluate_bool(&format!(
            "document.querySelector({}) !== null",
            js_string(selector)
        ))
        .await
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<bool, BrowserError> {
        self.evaluate_bool(&fill_script(selector, value)).await
    }

    async fn click(&self, selector: &str) -> Result<bool, BrowserError> {
        self.evaluate_bool(&click_script(selector)).await
    }

    fn changes(&self) -> watch::Receiver<u64> {
        self.changes.clone()
    }
}
