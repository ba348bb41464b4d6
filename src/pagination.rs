//! Pagination controller.
//!
//! Two ways of reaching listing page N:
//!
//! - URL rewrite ([`page_url`]): pure, idempotent, no page state involved.
//!   The orchestrator opens a fresh primary session per page via
//!   [`open_page`], which retries under the run's [`RetryPolicy`].
//! - Click ([`ClickPaginator`]): scroll, click "next", wait for navigation
//!   and for the results to reappear, retrying the whole sequence.
//!
//! Also estimates how many pages a search spans from the result-count label.

use crate::browser::{Browser, SessionFactory, SessionKind};
use crate::config::RetryPolicy;
use crate::error::{CapesError, Result};
use regex::Regex;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Query parameter carrying the listing page number
pub const PAGE_QUERY_KEY: &str = "page";

/// Result count assumed when the label cannot be parsed.
///
/// A last-resort estimate, not a figure reported by the portal.
pub const DEFAULT_RESULT_COUNT: u64 = 100;

/// URL of listing page `page` for `search_url`.
///
/// Rewrites an existing `page` parameter in place or appends one; every
/// other parameter is kept in order.
///
/// # Errors
///
/// Returns a configuration error if `search_url` is not a valid URL.
pub fn page_url(search_url: &str, page: u32) -> Result<String> {
    let mut url = Url::parse(search_url).map_err(|e| CapesError::Configuration {
        message: format!("invalid search URL '{}'", search_url),
        source: Some(Box::new(e)),
    })?;

    let page_value = page.to_string();
    let mut replaced = false;
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .into_owned()
        .map(|(key, value)| {
            if key == PAGE_QUERY_KEY {
                replaced = true;
                (key, page_value.clone())
            } else {
                (key, value)
            }
        })
        .collect();

    if !replaced {
        pairs.push((PAGE_QUERY_KEY.to_string(), page_value));
    }

    url.query_pairs_mut().clear().extend_pairs(pairs);
    Ok(url.into())
}

/// Parse a "3.016 resultados" style label into a count.
///
/// Leading digits may be grouped in thousands by "." or ",".
pub fn parse_result_count(label: &str) -> Option<u64> {
    let re = Regex::new(r"^\s*(\d{1,3}(?:[.,]\d{3})+|\d+)").ok()?;
    let caps = re.captures(label)?;
    let digits: String = caps.get(1)?.as_str().chars().filter(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// Total result count from the listing's label, or [`DEFAULT_RESULT_COUNT`]
pub async fn estimate_total_results(browser: &mut dyn Browser, count_selector: &str) -> u64 {
    let label = match browser.get_element_text(count_selector).await {
        Ok(label) => label,
        Err(e) => {
            warn!(error = %e, "Could not determine total results, using default");
            return DEFAULT_RESULT_COUNT;
        }
    };

    match parse_result_count(&label) {
        Some(count) => count,
        None => {
            warn!(label = %label.trim(), "Failed to parse result count, using default");
            DEFAULT_RESULT_COUNT
        }
    }
}

/// Pages needed for `total` results at `page_size` per page (ceiling)
pub fn total_pages(total: u64, page_size: u32) -> u32 {
    let page_size = u64::from(page_size.max(1));
    u32::try_from(total.div_ceil(page_size)).unwrap_or(u32::MAX)
}

/// Loop bound: the estimate, capped by `max_pages` when that is set (> 0)
pub fn effective_page_bound(estimated_pages: u32, max_pages: u32) -> u32 {
    if max_pages > 0 && max_pages < estimated_pages {
        max_pages
    } else {
        estimated_pages
    }
}

/// Whether the current listing offers a "next" control
pub async fn has_next_page(browser: &mut dyn Browser, next_selector: &str) -> Result<bool> {
    browser
        .element_exists(next_selector)
        .await
        .map_err(|e| CapesError::navigation_with("failed to check for next page button", e))
}

fn exhausted(what: String, attempts: u32, last: Option<CapesError>) -> CapesError {
    let message = format!("{} after {} attempts", what, attempts);
    match last {
        Some(cause) => CapesError::navigation_with(message, cause),
        None => CapesError::navigation(message),
    }
}

/// Open a fresh primary session on `url`, retrying under `policy`.
///
/// A session whose open failed is closed before the next attempt, so at
/// most one primary session is ever live.
///
/// # Errors
///
/// Returns a navigation error once every attempt has failed.
pub async fn open_page(
    sessions: &dyn SessionFactory,
    url: &str,
    policy: &RetryPolicy,
) -> Result<Box<dyn Browser>> {
    let attempts = policy.attempts();
    let mut last_error = None;

    for attempt in 1..=attempts {
        let timeout = policy.timeout_for(attempt);
        let mut session = sessions.create(SessionKind::Primary);

        let opened = match tokio::time::timeout(timeout, session.open(url)).await {
            Ok(result) => result,
            Err(_) => Err(CapesError::navigation(format!(
                "timeout opening {} after {:?}",
                url, timeout
            ))),
        };

        match opened {
            Ok(()) => {
                debug!(url = url, attempt = attempt, "Opened listing page");
                return Ok(session);
            }
            Err(e) => {
                warn!(url = url, attempt = attempt, max = attempts, error = %e, "Failed to open page");
                if let Err(close_err) = session.close().await {
                    warn!(error = %close_err, "Error closing failed session");
                }
                last_error = Some(e);
                if attempt < attempts {
                    tokio::time::sleep(policy.backoff).await;
                }
            }
        }
    }

    Err(exhausted(format!("failed to open {}", url), attempts, last_error))
}

/// Click-based pagination with bounded retry
#[derive(Debug, Clone)]
pub struct ClickPaginator {
    policy: RetryPolicy,
    next_selector: String,
    result_selector: String,
    scroll_span: Duration,
}

impl ClickPaginator {
    pub fn new(
        policy: RetryPolicy,
        next_selector: impl Into<String>,
        result_selector: impl Into<String>,
        scroll_span: Duration,
    ) -> Self {
        Self {
            policy,
            next_selector: next_selector.into(),
            result_selector: result_selector.into(),
            scroll_span,
        }
    }

    /// Move `browser` to the next listing page.
    ///
    /// Returns the 1-based attempt that succeeded.
    ///
    /// # Errors
    ///
    /// Returns a navigation error when every attempt failed.
    pub async fn advance(&self, browser: &mut dyn Browser) -> Result<u32> {
        let attempts = self.policy.attempts();
        let mut last_error = None;

        for attempt in 1..=attempts {
            debug!(attempt = attempt, max = attempts, "Pagination attempt");
            match self.try_advance(browser, attempt).await {
                Ok(()) => {
                    info!(attempt = attempt, "Navigated to next page");
                    return Ok(attempt);
                }
                Err(e) => {
                    warn!(attempt = attempt, max = attempts, error = %e, "Pagination attempt failed");
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(self.policy.backoff).await;
                    }
                }
            }
        }

        Err(exhausted("failed to navigate to next page".to_string(), attempts, last_error))
    }

    async fn try_advance(&self, browser: &mut dyn Browser, attempt: u32) -> Result<()> {
        browser.scroll_to_bottom().await?;
        browser.scroll_for_duration(self.scroll_span).await?;
        browser.click_element(&self.next_selector).await?;

        let timeout = self.policy.timeout_for(attempt);
        browser.wait_for_navigation(timeout).await?;
        browser.wait_for_element(&self.result_selector, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::ElementSnapshot;
    use crate::testing::{FakePage, FakeSessionFactory, FakeSite};

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_timeout: Duration::from_secs(5),
            timeout_increment: Duration::from_secs(1),
            backoff: Duration::ZERO,
        }
    }

    #[test]
    fn test_page_url_appends() {
        let url = page_url(
            "https://www.periodicos.capes.gov.br/index.php/acervo/buscador.html?q=vacinas&source=",
            3,
        )
        .expect("valid url");
        assert_eq!(
            url,
            "https://www.periodicos.capes.gov.br/index.php/acervo/buscador.html?q=vacinas&source=&page=3"
        );
    }

    #[test]
    fn test_page_url_rewrites_in_place() {
        let url = page_url("https://x.org/b?q=a&page=2&lang=pt", 7).expect("valid url");
        assert_eq!(url, "https://x.org/b?q=a&page=7&lang=pt");
    }

    #[test]
    fn test_page_url_without_query() {
        assert_eq!(page_url("https://x.org/b", 2).expect("valid url"), "https://x.org/b?page=2");
    }

    #[test]
    fn test_page_url_is_idempotent() {
        let base = "https://x.org/b?q=vacinas+covid&source=";
        let once = page_url(base, 4).expect("valid url");
        let twice = page_url(&once, 4).expect("valid url");
        assert_eq!(once, twice);
    }

    #[test]
    fn test_page_url_rejects_garbage() {
        assert!(page_url("not a url", 2).is_err());
    }

    #[test]
    fn test_parse_result_count() {
        assert_eq!(parse_result_count("3.016 resultados"), Some(3016));
        assert_eq!(parse_result_count("1,234,567 results"), Some(1_234_567));
        assert_eq!(parse_result_count("42 resultados"), Some(42));
        assert_eq!(parse_result_count("resultados"), None);
        assert_eq!(parse_result_count(""), None);
    }

    #[test]
    fn test_total_pages_ceiling() {
        assert_eq!(total_pages(3016, 30), 101);
        assert_eq!(total_pages(30, 30), 1);
        assert_eq!(total_pages(31, 30), 2);
        assert_eq!(total_pages(0, 30), 0);
    }

    #[test]
    fn test_effective_page_bound() {
        assert_eq!(effective_page_bound(101, 5), 5);
        assert_eq!(effective_page_bound(101, 0), 101);
        assert_eq!(effective_page_bound(3, 10), 3);
    }

    #[tokio::test]
    async fn test_estimate_falls_back_on_unparseable_label() {
        let site = FakeSite::new();
        site.add_page(
            "https://listing/1",
            FakePage::new().with_text("span.count", "muitos resultados"),
        );
        let mut browser = site.browser();
        browser.open("https://listing/1").await.expect("open");

        assert_eq!(estimate_total_results(&mut browser, "span.count").await, DEFAULT_RESULT_COUNT);
        assert_eq!(estimate_total_results(&mut browser, "span.missing").await, DEFAULT_RESULT_COUNT);
    }

    #[tokio::test]
    async fn test_estimate_parses_label() {
        let site = FakeSite::new();
        site.add_page(
            "https://listing/1",
            FakePage::new().with_text("span.count", "3.016 resultados"),
        );
        let mut browser = site.browser();
        browser.open("https://listing/1").await.expect("open");

        assert_eq!(estimate_total_results(&mut browser, "span.count").await, 3016);
    }

    fn clickable_site() -> FakeSite {
        let site = FakeSite::new();
        site.add_page(
            "https://listing/1",
            FakePage::new()
                .with_elements("button.next", vec![ElementSnapshot::new("›")])
                .with_next("https://listing/2"),
        );
        site.add_page(
            "https://listing/2",
            FakePage::new().with_elements("a.result", vec![ElementSnapshot::new("r")]),
        );
        site
    }

    #[tokio::test]
    async fn test_click_succeeds_on_third_attempt() {
        let site = clickable_site();
        site.fail_clicks(2);
        let mut browser = site.browser();
        browser.open("https://listing/1").await.expect("open");

        let paginator = ClickPaginator::new(policy(), "button.next", "a.result", Duration::ZERO);
        let attempt = paginator.advance(&mut browser).await.expect("advance");

        assert_eq!(attempt, 3);
        assert_eq!(browser.current_url().as_deref(), Some("https://listing/2"));
        assert!(has_next_page(&mut browser, "button.next").await.is_ok());
    }

    #[tokio::test]
    async fn test_click_gives_up_after_max_attempts() {
        let site = clickable_site();
        site.fail_clicks(3);
        let mut browser = site.browser();
        browser.open("https://listing/1").await.expect("open");

        let paginator = ClickPaginator::new(policy(), "button.next", "a.result", Duration::ZERO);
        let err = paginator.advance(&mut browser).await.expect_err("should fail");

        assert_eq!(err.kind(), crate::error::ErrorKind::Navigation);
        assert_eq!(site.clicks(), 3);
        assert_eq!(browser.current_url().as_deref(), Some("https://listing/1"));
    }

    #[tokio::test]
    async fn test_has_next_page() {
        let site = clickable_site();
        let mut browser = site.browser();
        browser.open("https://listing/1").await.expect("open");
        assert!(has_next_page(&mut browser, "button.next").await.expect("check"));

        browser.navigate("https://listing/2").await.expect("navigate");
        assert!(!has_next_page(&mut browser, "button.next").await.expect("check"));
    }

    #[tokio::test]
    async fn test_open_page_retries_then_succeeds() {
        let site = FakeSite::new();
        site.add_page("https://listing/2", FakePage::new());
        site.fail_opens("https://listing/2", 2);
        let factory = FakeSessionFactory::new(site.clone());

        let mut session = open_page(&factory, "https://listing/2", &policy())
            .await
            .expect("third attempt opens");
        assert_eq!(site.live_sessions(), 1);
        assert_eq!(site.max_live(SessionKind::Primary), 1);

        session.close().await.expect("close");
        assert_eq!(site.live_sessions(), 0);
    }

    #[tokio::test]
    async fn test_open_page_exhausts_attempts() {
        let site = FakeSite::new();
        site.add_page("https://listing/2", FakePage::new());
        site.fail_opens("https://listing/2", 3);
        let factory = FakeSessionFactory::new(site.clone());

        let result = open_page(&factory, "https://listing/2", &policy()).await;
        assert!(result.is_err());
        assert_eq!(site.closed(SessionKind::Primary), 3);
        assert_eq!(site.live_sessions(), 0);
    }
}
