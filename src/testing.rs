//! In-memory fakes for driving the engine without a real browser.
//!
//! [`FakeSite`] holds a set of scripted pages and records every session
//! event, so tests can assert on open/close counts and on how many sessions
//! were live at once. [`RecordingSink`] captures export calls.

use crate::browser::{Browser, ElementSnapshot, SessionFactory, SessionKind};
use crate::error::{CapesError, OptionExt, Result};
use crate::export::ExportSink;
use crate::model::ResultRecord;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A scripted page: elements by selector, label texts, optional "next" target
#[derive(Debug, Clone, Default)]
pub struct FakePage {
    elements: HashMap<String, Vec<ElementSnapshot>>,
    texts: HashMap<String, String>,
    next: Option<String>,
}

impl FakePage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Elements returned for `selector`
    pub fn with_elements(mut self, selector: impl Into<String>, elements: Vec<ElementSnapshot>) -> Self {
        self.elements.insert(selector.into(), elements);
        self
    }

    /// Single-element text returned for `selector`
    pub fn with_text(mut self, selector: impl Into<String>, text: impl Into<String>) -> Self {
        self.texts.insert(selector.into(), text.into());
        self
    }

    /// URL a successful click on this page leads to
    pub fn with_next(mut self, url: impl Into<String>) -> Self {
        self.next = Some(url.into());
        self
    }

    fn has(&self, selector: &str) -> bool {
        self.elements.get(selector).is_some_and(|els| !els.is_empty())
            || self.texts.contains_key(selector)
    }

    fn text(&self, selector: &str) -> Option<String> {
        self.elements
            .get(selector)
            .and_then(|els| els.first())
            .map(|el| el.text().to_string())
            .or_else(|| self.texts.get(selector).cloned())
    }
}

/// A session lifecycle event recorded by [`FakeSite`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Opened(SessionKind, String),
    OpenFailed(SessionKind, String),
    Closed(SessionKind),
}

#[derive(Default)]
struct SiteState {
    pages: HashMap<String, FakePage>,
    open_failures: HashMap<String, u32>,
    click_failures: u32,
    clicks: u32,
    live: HashMap<SessionKind, u32>,
    max_live: HashMap<SessionKind, u32>,
    events: Vec<SessionEvent>,
    cancel_on_open: HashMap<String, CancellationToken>,
}

/// Shared fake web site; clones share state
#[derive(Clone, Default)]
pub struct FakeSite {
    state: Arc<Mutex<SiteState>>,
}

impl FakeSite {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SiteState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register `page` at `url`. Unknown URLs load as blank pages.
    pub fn add_page(&self, url: impl Into<String>, page: FakePage) {
        self.lock().pages.insert(url.into(), page);
    }

    /// Make the next `times` opens of `url` fail
    pub fn fail_opens(&self, url: impl Into<String>, times: u32) {
        self.lock().open_failures.insert(url.into(), times);
    }

    /// Make the next `times` clicks fail, on any page
    pub fn fail_clicks(&self, times: u32) {
        self.lock().click_failures = times;
    }

    /// Cancel `token` as soon as a session opens `url`
    pub fn cancel_on_open(&self, url: impl Into<String>, token: CancellationToken) {
        self.lock().cancel_on_open.insert(url.into(), token);
    }

    /// A standalone primary session on this site
    pub fn browser(&self) -> FakeBrowser {
        FakeBrowser::new(self.clone(), SessionKind::Primary)
    }

    /// Successful opens of `kind`
    pub fn opened(&self, kind: SessionKind) -> usize {
        self.lock()
            .events
            .iter()
            .filter(|e| matches!(e, SessionEvent::Opened(k, _) if *k == kind))
            .count()
    }

    /// Close calls on sessions of `kind`
    pub fn closed(&self, kind: SessionKind) -> usize {
        self.lock()
            .events
            .iter()
            .filter(|e| matches!(e, SessionEvent::Closed(k) if *k == kind))
            .count()
    }

    /// Sessions of any kind currently open
    pub fn live_sessions(&self) -> u32 {
        self.lock().live.values().sum()
    }

    /// Highest number of simultaneously open sessions of `kind`
    pub fn max_live(&self, kind: SessionKind) -> u32 {
        self.lock().max_live.get(&kind).copied().unwrap_or(0)
    }

    /// Click calls so far, failed ones included
    pub fn clicks(&self) -> u32 {
        self.lock().clicks
    }

    /// URLs successfully opened by sessions of `kind`, in order
    pub fn visits(&self, kind: SessionKind) -> Vec<String> {
        self.lock()
            .events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::Opened(k, url) if *k == kind => Some(url.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn events(&self) -> Vec<SessionEvent> {
        self.lock().events.clone()
    }

    fn page(&self, url: Option<&str>) -> FakePage {
        url.and_then(|u| self.lock().pages.get(u).cloned())
            .unwrap_or_default()
    }
}

/// [`Browser`] backed by a [`FakeSite`]
pub struct FakeBrowser {
    site: FakeSite,
    kind: SessionKind,
    current: Option<String>,
    live: bool,
}

impl FakeBrowser {
    pub fn new(site: FakeSite, kind: SessionKind) -> Self {
        Self {
            site,
            kind,
            current: None,
            live: false,
        }
    }

    pub fn kind(&self) -> SessionKind {
        self.kind
    }

    pub fn current_url(&self) -> Option<String> {
        self.current.clone()
    }

    fn ensure_live(&self) -> Result<()> {
        if self.live {
            Ok(())
        } else {
            Err(CapesError::navigation("session is not open"))
        }
    }

    fn current_page(&self) -> Result<FakePage> {
        self.ensure_live()?;
        Ok(self.site.page(self.current.as_deref()))
    }
}

#[async_trait]
impl Browser for FakeBrowser {
    async fn open(&mut self, url: &str) -> Result<()> {
        let mut state = self.site.lock();

        if let Some(remaining) = state.open_failures.get_mut(url).filter(|n| **n > 0) {
            *remaining -= 1;
            state.events.push(SessionEvent::OpenFailed(self.kind, url.to_string()));
            return Err(CapesError::navigation(format!("failed to open {}", url)));
        }

        if !self.live {
            self.live = true;
            let live = state.live.entry(self.kind).or_insert(0);
            *live += 1;
            let live = *live;
            let max = state.max_live.entry(self.kind).or_insert(0);
            *max = (*max).max(live);
        }
        self.current = Some(url.to_string());
        state.events.push(SessionEvent::Opened(self.kind, url.to_string()));

        if let Some(token) = state.cancel_on_open.get(url) {
            token.cancel();
        }
        Ok(())
    }

    async fn navigate(&mut self, url: &str) -> Result<()> {
        self.ensure_live()?;
        self.current = Some(url.to_string());
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let mut state = self.site.lock();
        if self.live {
            self.live = false;
            if let Some(live) = state.live.get_mut(&self.kind) {
                *live = live.saturating_sub(1);
            }
        }
        self.current = None;
        state.events.push(SessionEvent::Closed(self.kind));
        Ok(())
    }

    async fn wait_for_element(&mut self, selector: &str, timeout: Duration) -> Result<()> {
        if self.current_page()?.has(selector) {
            return Ok(());
        }
        // a fake page never changes while waited on, so a miss costs the full timeout
        tokio::time::sleep(timeout).await;
        Err(CapesError::navigation(format!("timeout waiting for '{}'", selector)))
    }

    async fn wait_for_navigation(&mut self, _timeout: Duration) -> Result<()> {
        self.ensure_live()
    }

    async fn element_exists(&mut self, selector: &str) -> Result<bool> {
        Ok(self.current_page()?.has(selector))
    }

    async fn click_element(&mut self, selector: &str) -> Result<()> {
        let page = self.current_page()?;
        {
            let mut state = self.site.lock();
            state.clicks += 1;
            if state.click_failures > 0 {
                state.click_failures -= 1;
                return Err(CapesError::navigation(format!("click on '{}' failed", selector)));
            }
        }

        if !page.has(selector) {
            return Err(CapesError::navigation(format!("element '{}' not found", selector)));
        }
        if let Some(next) = page.next {
            self.current = Some(next);
        }
        Ok(())
    }

    async fn get_element_text(&mut self, selector: &str) -> Result<String> {
        self.current_page()?
            .text(selector)
            .ok_or_extraction(&format!("element '{}' not found", selector))
    }

    async fn get_elements(&mut self, selector: &str) -> Result<Vec<ElementSnapshot>> {
        Ok(self
            .current_page()?
            .elements
            .get(selector)
            .cloned()
            .unwrap_or_default())
    }

    async fn scroll_to_bottom(&mut self) -> Result<()> {
        self.ensure_live()
    }

    async fn scroll_for_duration(&mut self, _duration: Duration) -> Result<()> {
        self.ensure_live()
    }
}

/// [`SessionFactory`] handing out [`FakeBrowser`]s on one site
#[derive(Clone)]
pub struct FakeSessionFactory {
    site: FakeSite,
}

impl FakeSessionFactory {
    pub fn new(site: FakeSite) -> Self {
        Self { site }
    }
}

impl SessionFactory for FakeSessionFactory {
    fn create(&self, kind: SessionKind) -> Box<dyn Browser> {
        Box::new(FakeBrowser::new(self.site.clone(), kind))
    }
}

/// [`ExportSink`] that keeps everything in memory
#[derive(Debug, Default)]
pub struct RecordingSink {
    /// Method names in call order
    pub calls: Vec<String>,
    /// Rows written through `write_record`
    pub records: Vec<ResultRecord>,
    /// Header rows actually emitted
    pub header_rows: usize,
    /// Make `write_record` fail after this many successful rows
    pub fail_after: Option<usize>,
    initialized: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_after(rows: usize) -> Self {
        Self {
            fail_after: Some(rows),
            ..Default::default()
        }
    }

    /// Number of `write_record` calls, failed ones included
    pub fn write_record_calls(&self) -> usize {
        self.calls.iter().filter(|c| *c == "write_record").count()
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(CapesError::export("sink used before initialize"))
        }
    }
}

impl ExportSink for RecordingSink {
    fn initialize(&mut self) -> Result<()> {
        self.calls.push("initialize".to_string());
        self.initialized = true;
        Ok(())
    }

    fn write_header(&mut self) -> Result<()> {
        self.calls.push("write_header".to_string());
        self.ensure_initialized()?;
        if self.header_rows == 0 {
            self.header_rows = 1;
        }
        Ok(())
    }

    fn write_record(&mut self, record: &ResultRecord) -> Result<()> {
        self.calls.push("write_record".to_string());
        self.ensure_initialized()?;
        if self.fail_after.is_some_and(|limit| self.records.len() >= limit) {
            return Err(CapesError::export("disk full"));
        }
        self.records.push(record.clone());
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.calls.push("flush".to_string());
        self.ensure_initialized()
    }

    fn close(&mut self) -> Result<()> {
        self.calls.push("close".to_string());
        self.initialized = false;
        Ok(())
    }
}
