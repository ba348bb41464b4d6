//! Chromium-backed browser sessions over the DevTools protocol.
//!
//! Each [`ChromiumBrowser`] owns its own Chromium process and a single page.
//! Element queries are answered with snapshots taken by a small page
//! script, so the engine never holds live DOM handles across awaits.

use super::{Browser, ElementSnapshot, SessionFactory, SessionKind};
use crate::config::SessionOptions;
use crate::error::{CapesError, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser as CdpBrowser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use rand::seq::SliceRandom;
use rand::Rng;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Pool of desktop user agents rotated when `random_user_agent` is set
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.6 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:133.0) Gecko/20100101 Firefox/133.0",
];

/// Launch flags applied in stealth mode
const STEALTH_ARGS: &[&str] = &[
    "--disable-blink-features=AutomationControlled",
    "--ignore-certificate-errors",
    "--disable-infobars",
];

/// Poll interval while waiting for an element
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Pause between small scrolls in `scroll_for_duration`
const SCROLL_STEP_PAUSE: Duration = Duration::from_millis(200);

/// Upper bound on each close step
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// A single Chromium session
pub struct ChromiumBrowser {
    options: SessionOptions,
    browser: Option<CdpBrowser>,
    page: Option<Page>,
    handler: Option<JoinHandle<()>>,
}

impl ChromiumBrowser {
    pub fn new(options: SessionOptions) -> Self {
        Self {
            options,
            browser: None,
            page: None,
            handler: None,
        }
    }

    fn page(&self) -> Result<&Page> {
        self.page
            .as_ref()
            .ok_or_else(|| CapesError::navigation("browser not initialized, call open first"))
    }

    fn build_config(&self) -> Result<BrowserConfig> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .request_timeout(self.options.request_timeout);

        if !self.options.headless {
            builder = builder.with_head();
        }

        if self.options.stealth {
            for arg in STEALTH_ARGS {
                builder = builder.arg(*arg);
            }

            if self.options.random_user_agent {
                if let Some(agent) = USER_AGENTS.choose(&mut rand::thread_rng()) {
                    debug!(user_agent = agent, "Using random user agent");
                    builder = builder.arg(format!("--user-agent={}", agent));
                }
            }
        }

        if let Some(proxy) = self.options.proxy.as_deref().filter(|p| !p.trim().is_empty()) {
            debug!(proxy = proxy, "Using proxy");
            builder = builder.arg(format!("--proxy-server={}", proxy));
        }

        builder
            .build()
            .map_err(|e| CapesError::navigation_with("failed to build browser config", e))
    }

    async fn navigate_to(&mut self, url: &str) -> Result<()> {
        let page = self.page()?;

        page.goto(url)
            .await
            .map_err(|e| CapesError::navigation_with(format!("failed to navigate to {}", url), e.to_string()))?;

        if self.options.stealth {
            let delay = Duration::from_millis(rand::thread_rng().gen_range(500..1500));
            debug!(delay_ms = delay.as_millis() as u64, "Post-load delay");
            tokio::time::sleep(delay).await;
        }

        info!(url = url, "Page loaded");
        Ok(())
    }

    async fn evaluate<T: serde::de::DeserializeOwned>(&self, script: String) -> Result<T> {
        let page = self.page()?;
        let value = page
            .evaluate(script)
            .await
            .map_err(|e| CapesError::extraction_with("page script failed", e.to_string()))?;
        value
            .into_value::<T>()
            .map_err(|e| CapesError::extraction_with("unexpected page script result", e.to_string()))
    }
}

/// Result of the single-element text lookup script
#[derive(Debug, serde::Deserialize)]
struct TextLookup {
    found: bool,
    #[serde(default)]
    text: String,
}

/// JSON-quote a selector for embedding in a page script
fn js_string(selector: &str) -> String {
    serde_json::to_string(selector).unwrap_or_else(|_| "\"\"".to_string())
}

#[async_trait]
impl Browser for ChromiumBrowser {
    async fn open(&mut self, url: &str) -> Result<()> {
        if self.browser.is_some() {
            self.close().await?;
        }

        info!(headless = self.options.headless, "Launching browser");
        let config = self.build_config()?;

        let (browser, mut handler) = CdpBrowser::launch(config)
            .await
            .map_err(|e| CapesError::navigation_with("failed to launch browser", e.to_string()))?;

        self.handler = Some(tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                trace!(?event, "Chromium event received");
            }
        }));

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                self.browser = Some(browser);
                self.close().await?;
                return Err(CapesError::navigation_with("failed to create page", e.to_string()));
            }
        };

        self.browser = Some(browser);
        self.page = Some(page);

        info!(url = url, "Opening URL");
        self.navigate_to(url).await
    }

    async fn navigate(&mut self, url: &str) -> Result<()> {
        info!(url = url, "Navigating");
        self.navigate_to(url).await
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(page) = self.page.take() {
            match tokio::time::timeout(CLOSE_TIMEOUT, page.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Error closing page (continuing anyway)"),
                Err(_) => warn!("Timeout while closing page"),
            }
        }

        if let Some(mut browser) = self.browser.take() {
            match tokio::time::timeout(CLOSE_TIMEOUT, browser.close()).await {
                Ok(Ok(_)) => {
                    if let Err(e) = browser.wait().await {
                        warn!(error = %e, "Error waiting for browser exit");
                    }
                }
                Ok(Err(e)) => warn!(error = %e, "Error closing browser (continuing anyway)"),
                Err(_) => warn!("Timeout while closing browser"),
            }
            debug!("Browser closed");
        }

        if let Some(handler) = self.handler.take() {
            handler.abort();
        }

        Ok(())
    }

    async fn wait_for_element(&mut self, selector: &str, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.element_exists(selector).await? {
                debug!(selector = selector, "Element appeared");
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(CapesError::navigation(format!(
                    "timeout waiting for element: {}",
                    selector
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn wait_for_navigation(&mut self, timeout: Duration) -> Result<()> {
        let page = self.page()?;
        debug!(timeout_secs = timeout.as_secs(), "Waiting for navigation");

        match tokio::time::timeout(timeout, page.wait_for_navigation()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(CapesError::navigation_with("navigation failed", e.to_string())),
            Err(_) => Err(CapesError::navigation(format!(
                "timeout waiting for navigation after {:?}",
                timeout
            ))),
        }
    }

    async fn element_exists(&mut self, selector: &str) -> Result<bool> {
        let script = format!("document.querySelector({}) !== null", js_string(selector));
        self.evaluate::<bool>(script).await
    }

    async fn click_element(&mut self, selector: &str) -> Result<()> {
        let page = self.page()?;
        let element = page.find_element(selector).await.map_err(|e| {
            CapesError::navigation_with(format!("element not found: {}", selector), e.to_string())
        })?;

        element.scroll_into_view().await.map_err(|e| {
            CapesError::navigation_with(
                format!("failed to scroll element into view: {}", selector),
                e.to_string(),
            )
        })?;

        element.click().await.map_err(|e| {
            CapesError::navigation_with(format!("failed to click element: {}", selector), e.to_string())
        })?;

        debug!(selector = selector, "Clicked element");
        Ok(())
    }

    async fn get_element_text(&mut self, selector: &str) -> Result<String> {
        let script = format!(
            "(() => {{ const el = document.querySelector({}); \
                return {{ found: el !== null, text: el ? (el.innerText || el.textContent || '') : '' }}; }})()",
            js_string(selector)
        );
        let lookup = self.evaluate::<TextLookup>(script).await?;
        if !lookup.found {
            return Err(CapesError::Extraction {
                message: format!("element not found: {}", selector),
                source: None,
            });
        }
        Ok(lookup.text)
    }

    async fn get_elements(&mut self, selector: &str) -> Result<Vec<ElementSnapshot>> {
        let script = format!(
            "Array.from(document.querySelectorAll({})).map(el => ({{ \
                text: el.innerText || el.textContent || '', \
                attributes: Object.fromEntries(Array.from(el.attributes).map(a => [a.name, a.value])) \
            }}))",
            js_string(selector)
        );
        let elements = self.evaluate::<Vec<ElementSnapshot>>(script).await?;
        debug!(selector = selector, count = elements.len(), "Queried elements");
        Ok(elements)
    }

    async fn scroll_to_bottom(&mut self) -> Result<()> {
        debug!("Scrolling to bottom of page");
        self.evaluate::<bool>(
            "(() => { window.scrollTo(0, document.body.scrollHeight); return true; })()".to_string(),
        )
        .await
        .map(|_| ())
    }

    async fn scroll_for_duration(&mut self, duration: Duration) -> Result<()> {
        debug!(duration_ms = duration.as_millis() as u64, "Scrolling continuously");
        let start = Instant::now();
        while start.elapsed() < duration {
            self.evaluate::<bool>("(() => { window.scrollBy(0, 500); return true; })()".to_string())
                .await?;
            tokio::time::sleep(SCROLL_STEP_PAUSE).await;
        }
        Ok(())
    }
}

/// Creates [`ChromiumBrowser`] sessions; detail sessions are always headless
#[derive(Debug, Clone, Default)]
pub struct ChromiumSessionFactory {
    options: SessionOptions,
}

impl ChromiumSessionFactory {
    pub fn new(options: SessionOptions) -> Self {
        Self { options }
    }
}

impl SessionFactory for ChromiumSessionFactory {
    fn create(&self, kind: SessionKind) -> Box<dyn Browser> {
        let options = match kind {
            SessionKind::Primary => self.options.clone(),
            SessionKind::Detail => self.options.headless(),
        };
        Box::new(ChromiumBrowser::new(options))
    }
}
