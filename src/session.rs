/// file: src/session.rs
/// description: PageSession contract and the headless-Chromium implementation.
/// Page session — one browser context driven one page at a time.
///
/// The harvester only talks to the `PageSession` trait; everything that needs
/// a real DOM (scroll-container discovery, text extraction) lives behind it.
use crate::config::SessionConfig;
use crate::models::AppError;
use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use futures::StreamExt;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Interval between DOM polls while waiting for an element to (dis)appear.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

#[async_trait]
pub trait PageSession: Send {
    /// Navigate to `url` and wait until the DOM content is loaded.
    async fn load(&mut self, url: &str) -> Result<(), AppError>;

    /// Number of elements currently matching `selector`.
    async fn count_items(&mut self, selector: &str) -> Result<usize, AppError>;

    /// Inner text of every element matching `selector`, in DOM order.
    async fn read_item_texts(&mut self, selector: &str) -> Result<Vec<String>, AppError>;

    /// Scroll the nearest scrollable ancestor of the first `anchor_selector`
    /// match by one viewport, falling back to the document scroller.
    async fn scroll_one_viewport(&mut self, anchor_selector: &str) -> Result<(), AppError>;

    /// Poll until `selector` is present (or absent when `present` is false).
    /// Returns `false` when `timeout` elapses first.
    async fn wait_for_presence(
        &mut self,
        selector: &str,
        present: bool,
        timeout: Duration,
    ) -> Result<bool, AppError> {
        let deadline = Instant::now() + timeout;
        loop {
            let attached = self.count_items(selector).await? > 0;
            if attached == present {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Block until at least one `selector` match is attached.
    async fn wait_for_any_item(
        &mut self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), AppError> {
        if self.wait_for_presence(selector, true, timeout).await? {
            Ok(())
        } else {
            Err(AppError::SelectorTimeout {
                selector: selector.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Chromium
// ---------------------------------------------------------------------------

pub struct ChromiumSession {
    browser: Browser,
    handler: JoinHandle<()>,
    page: Option<Page>,
    cookies: Vec<CookieParam>,
    navigation_timeout: Duration,
}

impl ChromiumSession {
    pub async fn launch(cfg: &SessionConfig) -> Result<Self, AppError> {
        let cookies = match &cfg.storage_state_path {
            Some(path) => load_storage_cookies(path)?,
            None => {
                warn!("STORAGE_STATE_PATH not set; browsing without an authenticated session");
                Vec::new()
            }
        };

        let mut builder = BrowserConfig::builder()
            .arg("--no-sandbox")
            .arg("--disable-setuid-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu");
        if !cfg.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &cfg.chrome_executable {
            builder = builder.chrome_executable(path);
        }

        let browser_cfg = builder
            .build()
            .map_err(|e| AppError::Browser(format!("Browser config error: {e}")))?;

        let (browser, mut handler) = Browser::launch(browser_cfg)
            .await
            .map_err(|e| AppError::Browser(format!("Browser launch failed: {e}")))?;

        let handler = tokio::spawn(async move { while handler.next().await.is_some() {} });

        info!(
            headless = cfg.headless,
            cookies = cookies.len(),
            "Browser session started"
        );

        Ok(Self {
            browser,
            handler,
            page: None,
            cookies,
            navigation_timeout: cfg.navigation_timeout,
        })
    }

    pub async fn shutdown(mut self) {
        self.close_page().await;
        if let Err(e) = self.browser.close().await {
            warn!(error = %e, "Browser close error");
        }
        self.handler.abort();
    }

    async fn close_page(&mut self) {
        if let Some(page) = self.page.take()
            && let Err(e) = page.close().await
        {
            debug!(error = %e, "Page close error (tab leak)");
        }
    }

    fn page(&self) -> Result<&Page, AppError> {
        self.page
            .as_ref()
            .ok_or_else(|| AppError::Browser("no page loaded".to_string()))
    }

    async fn eval<T: DeserializeOwned>(&self, script: String) -> Result<T, AppError> {
        let result = self
            .page()?
            .evaluate(script)
            .await
            .map_err(|e| AppError::Browser(format!("Script evaluation failed: {e}")))?;
        result
            .into_value()
            .map_err(|e| AppError::Browser(format!("Unexpected script result: {e}")))
    }
}

#[async_trait]
impl PageSession for ChromiumSession {
    async fn load(&mut self, url: &str) -> Result<(), AppError> {
        self.close_page().await;

        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| AppError::Browser(format!("Failed to open page: {e}")))?;
        if !self.cookies.is_empty() {
            page.set_cookies(self.cookies.clone())
                .await
                .map_err(|e| AppError::Browser(format!("Failed to set cookies: {e}")))?;
        }

        let outcome = tokio::time::timeout(self.navigation_timeout, navigate(&page, url)).await;
        self.page = Some(page);

        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(AppError::Navigation {
                url: url.to_string(),
                reason,
            }),
            Err(_) => Err(AppError::Navigation {
                url: url.to_string(),
                reason: format!(
                    "DOM content not loaded within {} s",
                    self.navigation_timeout.as_secs()
                ),
            }),
        }
    }

    async fn count_items(&mut self, selector: &str) -> Result<usize, AppError> {
        self.eval(count_script(selector)?).await
    }

    async fn read_item_texts(&mut self, selector: &str) -> Result<Vec<String>, AppError> {
        self.eval(texts_script(selector)?).await
    }

    async fn scroll_one_viewport(&mut self, anchor_selector: &str) -> Result<(), AppError> {
        let container: Option<String> = self.eval(scroll_script(anchor_selector)?).await?;
        debug!(container = container.as_deref().unwrap_or("<none>"), "Scrolled one viewport");
        Ok(())
    }
}

/// Navigate and poll `document.readyState` until the DOM content is loaded.
async fn navigate(page: &Page, url: &str) -> Result<(), String> {
    page.goto(url).await.map_err(|e| e.to_string())?;
    loop {
        let state: String = page
            .evaluate("document.readyState")
            .await
            .map_err(|e| e.to_string())?
            .into_value()
            .map_err(|e| e.to_string())?;
        if state != "loading" {
            return Ok(());
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

// ---------------------------------------------------------------------------
// Scripts
// ---------------------------------------------------------------------------

fn js_string(s: &str) -> Result<String, AppError> {
    Ok(serde_json::to_string(s)?)
}

fn count_script(selector: &str) -> Result<String, AppError> {
    Ok(format!(
        "document.querySelectorAll({}).length",
        js_string(selector)?
    ))
}

fn texts_script(selector: &str) -> Result<String, AppError> {
    Ok(format!(
        "Array.from(document.querySelectorAll({}), el => el.innerText ?? '')",
        js_string(selector)?
    ))
}

/// Returns a short description of the element that was scrolled, or `null`
/// when the anchor is missing.
fn scroll_script(anchor_selector: &str) -> Result<String, AppError> {
    Ok(format!(
        r#"(() => {{
    const anchor = document.querySelector({anchor});
    if (!anchor) return null;
    let box = document.scrollingElement;
    let label = 'document';
    for (let el = anchor; el && el !== document.documentElement; el = el.parentElement) {{
        const st = window.getComputedStyle(el);
        if ((st.overflowY === 'auto' || st.overflowY === 'scroll') &&
            el.scrollHeight > el.clientHeight) {{
            box = el;
            label = el.id || el.className || '<anonymous>';
            break;
        }}
    }}
    box.scrollBy({{ top: box.clientHeight, behavior: 'instant' }});
    return String(label);
}})()"#,
        anchor = js_string(anchor_selector)?
    ))
}

// ---------------------------------------------------------------------------
// Storage state
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct StorageState {
    #[serde(default)]
    cookies: Vec<StoredCookie>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredCookie {
    name: String,
    value: String,
    #[serde(default)]
    domain: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    secure: bool,
    #[serde(default)]
    http_only: bool,
}

fn parse_storage_state(raw: &str) -> Result<Vec<StoredCookie>, AppError> {
    let state: StorageState = serde_json::from_str(raw)?;
    Ok(state.cookies)
}

fn load_storage_cookies(path: &Path) -> Result<Vec<CookieParam>, AppError> {
    let raw = std::fs::read_to_string(path)?;
    parse_storage_state(&raw)?
        .into_iter()
        .map(|c| {
            let mut b = CookieParam::builder()
                .name(c.name)
                .value(c.value)
                .secure(c.secure)
                .http_only(c.http_only);
            if let Some(domain) = c.domain {
                b = b.domain(domain);
            }
            if let Some(path) = c.path {
                b = b.path(path);
            }
            b.build()
                .map_err(|e| AppError::Config(format!("Invalid cookie in storage state: {e}")))
        })
        .collect()
}
