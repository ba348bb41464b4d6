//! Browser session capability consumed by the harvesting engine.
//!
//! The engine only talks to [`Browser`] and [`SessionFactory`]; the
//! production adapter lives in [`chromium`], the in-memory fake in
//! [`crate::testing`].

pub mod chromium;

use crate::error::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

pub use chromium::{ChromiumBrowser, ChromiumSessionFactory};

/// Snapshot of a DOM element taken when it was queried
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ElementSnapshot {
    #[serde(default)]
    text: String,
    #[serde(default)]
    attributes: HashMap<String, String>,
}

impl ElementSnapshot {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attributes: HashMap::new(),
        }
    }

    /// Builder-style attribute setter
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Visible text of the element
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Attribute value, `None` if the element does not carry it
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// One browser session: a launched browser with a single page.
///
/// Every call is awaited in sequence by the engine. `close` must be safe to
/// call on a session that was never opened or is already closed.
#[async_trait]
pub trait Browser: Send {
    /// Launch the session and navigate to `url`
    async fn open(&mut self, url: &str) -> Result<()>;

    /// Navigate the already-open page to `url`
    async fn navigate(&mut self, url: &str) -> Result<()>;

    /// Release the page and the browser process
    async fn close(&mut self) -> Result<()>;

    /// Wait until at least one element matches `selector`
    async fn wait_for_element(&mut self, selector: &str, timeout: Duration) -> Result<()>;

    /// Wait for an in-flight navigation to settle
    async fn wait_for_navigation(&mut self, timeout: Duration) -> Result<()>;

    async fn element_exists(&mut self, selector: &str) -> Result<bool>;

    async fn click_element(&mut self, selector: &str) -> Result<()>;

    /// Text of the first element matching `selector`
    async fn get_element_text(&mut self, selector: &str) -> Result<String>;

    /// All elements matching `selector`, in document order
    async fn get_elements(&mut self, selector: &str) -> Result<Vec<ElementSnapshot>>;

    async fn scroll_to_bottom(&mut self) -> Result<()>;

    /// Repeated small scrolls for `duration`, to trigger lazy-loaded content
    async fn scroll_for_duration(&mut self, duration: Duration) -> Result<()>;
}

/// Role of a session within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKind {
    /// The listing session driving pagination
    Primary,
    /// An ephemeral, always-headless session for one detail page
    Detail,
}

/// Creates unopened sessions; callers `open` and `close` them.
pub trait SessionFactory: Send + Sync {
    fn create(&self, kind: SessionKind) -> Box<dyn Browser>;
}
