//! Run configuration: retry policy, selectors, session and search options.
//!
//! Everything here is a plain immutable record built once (by the CLI or a
//! test) and read by the engine. Selector strings live in [`Selectors`] so a
//! markup change on the portal never requires touching the algorithms.

use std::time::Duration;

/// Base URL of the CAPES periodicals portal
pub const DEFAULT_SITE_BASE: &str = "https://www.periodicos.capes.gov.br";

/// Number of results the portal renders per listing page
pub const RESULTS_PER_PAGE: u32 = 30;

/// Bounded retry with additively growing timeouts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Timeout applied on the first attempt
    pub base_timeout: Duration,
    /// Added to the timeout for every further attempt
    pub timeout_increment: Duration,
    /// Sleep between a failed attempt and the next one
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Timeout for the 1-based `attempt`
    pub fn timeout_for(&self, attempt: u32) -> Duration {
        self.base_timeout + self.timeout_increment * attempt.saturating_sub(1)
    }

    /// Attempt count, never below one
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_timeout: Duration::from_secs(30),
            timeout_increment: Duration::from_secs(5),
            backoff: Duration::from_secs(1),
        }
    }
}

/// CSS selectors for the listing and detail pages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selectors {
    /// Anchors of individual results on a listing page
    pub result_anchor: String,
    /// The "next page" control
    pub next_page: String,
    /// The "N resultados" label
    pub result_count: String,
    /// Author names on a detail page
    pub detail_author: String,
    /// Publication year on a detail page; also the "metadata rendered" marker
    pub detail_year: String,
}

impl Default for Selectors {
    fn default() -> Self {
        Self {
            result_anchor: "a.titulo-busca".to_string(),
            next_page: r#"button.br-button.circle.page-buscador[aria-label="Página seguinte"]"#
                .to_string(),
            result_count: "span.fw-semibold.text-up-01.text-gray-60".to_string(),
            detail_author: "a.view-autor".to_string(),
            detail_year: "#item-ano".to_string(),
        }
    }
}

/// How the orchestrator reaches listing page N
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PaginationStrategy {
    /// Rewrite the `page` query parameter and open a fresh session per page
    #[default]
    UrlParameter,
    /// Click the "next" control in the current session
    Click,
}

/// Launch options for a browser session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Run without a visible window
    pub headless: bool,
    /// Apply anti-automation launch flags and human-like post-load delays
    pub stealth: bool,
    /// Pick a user agent from a fixed pool for each session
    pub random_user_agent: bool,
    /// Proxy server, e.g. `http://127.0.0.1:7890`
    pub proxy: Option<String>,
    /// Timeout for a single driver request
    pub request_timeout: Duration,
}

impl SessionOptions {
    /// Copy of these options forced to headless, used for detail sessions
    pub fn headless(&self) -> Self {
        Self {
            headless: true,
            ..self.clone()
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            headless: false,
            stealth: true,
            random_user_agent: true,
            proxy: None,
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// Everything one search run needs
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Search term (required)
    pub search_term: String,
    /// Page cap, 0 = unbounded
    pub max_pages: u32,
    /// Politeness delay between listing pages
    pub page_delay: Duration,
    /// Retry policy for page transitions
    pub retry: RetryPolicy,
    /// Bound on waiting for detail-page metadata
    pub detail_timeout: Duration,
    /// Bound on waiting for result anchors after a listing page loads
    pub result_timeout: Duration,
    /// Overall time limit for a run, checked between pages
    pub run_timeout: Option<Duration>,
    /// Pagination strategy
    pub strategy: PaginationStrategy,
    /// Span of repeated small scrolls before clicking "next"
    pub scroll_span: Duration,
    /// Page selectors
    pub selectors: Selectors,
    /// Base used to absolutize relative result URLs
    pub site_base: String,
    /// Results per listing page
    pub page_size: u32,
    /// Options for the primary session
    pub session: SessionOptions,
}

impl SearchConfig {
    /// Config with defaults for everything but the search term
    pub fn new(search_term: impl Into<String>) -> Self {
        Self {
            search_term: search_term.into(),
            ..Default::default()
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            search_term: String::new(),
            max_pages: 0,
            page_delay: Duration::from_secs(2),
            retry: RetryPolicy::default(),
            detail_timeout: Duration::from_secs(15),
            result_timeout: Duration::from_secs(10),
            run_timeout: Some(Duration::from_secs(600)),
            strategy: PaginationStrategy::default(),
            scroll_span: Duration::from_secs(3),
            selectors: Selectors::default(),
            site_base: DEFAULT_SITE_BASE.to_string(),
            page_size: RESULTS_PER_PAGE,
            session: SessionOptions::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_grows_additively() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_timeout: Duration::from_secs(20),
            timeout_increment: Duration::from_secs(5),
            backoff: Duration::ZERO,
        };
        assert_eq!(policy.timeout_for(1), Duration::from_secs(20));
        assert_eq!(policy.timeout_for(2), Duration::from_secs(25));
        assert_eq!(policy.timeout_for(3), Duration::from_secs(30));
    }

    #[test]
    fn test_search_defaults() {
        let config = SearchConfig::new("vacinas");
        assert_eq!(config.run_timeout, Some(Duration::from_secs(600)));
        assert!(config.result_timeout < config.retry.base_timeout);
        assert_eq!(config.page_size, RESULTS_PER_PAGE);
    }

    #[test]
    fn test_attempts_never_zero() {
        let policy = RetryPolicy {
            max_attempts: 0,
            ..Default::default()
        };
        assert_eq!(policy.attempts(), 1);
    }

    #[test]
    fn test_detail_options_are_headless() {
        let primary = SessionOptions {
            proxy: Some("http://127.0.0.1:7890".to_string()),
            ..Default::default()
        };
        let detail = primary.headless();
        assert!(detail.headless);
        assert_eq!(detail.proxy, primary.proxy);
    }
}
