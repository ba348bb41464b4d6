//! Detail enricher: fills author and year from each record's own page.
//!
//! Every visit happens in a fresh headless session so the primary listing
//! session keeps its navigation state. The session is closed before
//! `enrich` returns, whatever happened inside.

use crate::browser::{Browser, SessionFactory, SessionKind};
use crate::config::Selectors;
use crate::error::Result;
use crate::model::ResultRecord;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Fields read from a detail page
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetailFields {
    pub author: String,
    pub year: String,
}

/// Visits detail pages in isolated sessions
pub struct DetailEnricher {
    sessions: Arc<dyn SessionFactory>,
    author_selector: String,
    year_selector: String,
    timeout: Duration,
}

impl DetailEnricher {
    pub fn new(sessions: Arc<dyn SessionFactory>, selectors: &Selectors, timeout: Duration) -> Self {
        Self {
            sessions,
            author_selector: selectors.detail_author.clone(),
            year_selector: selectors.detail_year.clone(),
            timeout,
        }
    }

    /// Fill `record.author` and `record.year` from its detail page.
    ///
    /// Never fails: on any error the record keeps the fields it already had.
    /// Returns true when the detail page was opened.
    pub async fn enrich(&self, record: &mut ResultRecord) -> bool {
        if record.url.is_empty() {
            return false;
        }

        match self.fetch(&record.url).await {
            Ok(fields) => {
                if !fields.author.is_empty() {
                    record.author = fields.author;
                }
                if !fields.year.is_empty() {
                    record.year = fields.year;
                }
                true
            }
            Err(e) => {
                warn!(url = %record.url, error = %e, "Failed to open details page");
                false
            }
        }
    }

    /// Open a detail session on `url`, read the fields, and close it.
    ///
    /// # Errors
    ///
    /// Returns an error only if the session could not be opened; missing
    /// fields are reported as empty strings.
    pub async fn fetch(&self, url: &str) -> Result<DetailFields> {
        let mut session = self.sessions.create(SessionKind::Detail);

        let outcome = match session.open(url).await {
            Ok(()) => Ok(self.read_fields(session.as_mut(), url).await),
            Err(e) => Err(e),
        };

        if let Err(e) = session.close().await {
            warn!(url = url, error = %e, "Failed to close detail browser");
        }

        outcome
    }

    async fn read_fields(&self, session: &mut dyn Browser, url: &str) -> DetailFields {
        if let Err(e) = session.wait_for_element(&self.year_selector, self.timeout).await {
            debug!(url = url, error = %e, "Year element not found on detail page");
        }

        DetailFields {
            author: self.read_authors(session).await,
            year: self.read_year(session).await,
        }
    }

    async fn read_authors(&self, session: &mut dyn Browser) -> String {
        match session.get_elements(&self.author_selector).await {
            Ok(elements) => join_authors(elements.iter().map(|el| el.text())),
            Err(e) => {
                warn!(error = %e, "Could not extract authors from detail page");
                String::new()
            }
        }
    }

    async fn read_year(&self, session: &mut dyn Browser) -> String {
        match session.get_element_text(&self.year_selector).await {
            Ok(text) => clean_year(&text),
            Err(e) => {
                warn!(error = %e, "Could not extract year from detail page");
                String::new()
            }
        }
    }
}

/// Trim each name, drop empties, join with ", "
pub fn join_authors<'a>(names: impl IntoIterator<Item = &'a str>) -> String {
    names
        .into_iter()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Trim surrounding whitespace and a trailing semicolon
pub fn clean_year(text: &str) -> String {
    let year = text.trim();
    year.strip_suffix(';').unwrap_or(year).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::ElementSnapshot;
    use crate::testing::{FakePage, FakeSessionFactory, FakeSite};

    const DETAIL: &str = "https://www.periodicos.capes.gov.br/index.php?task=detalhes&id=W1";

    fn enricher(site: &FakeSite) -> DetailEnricher {
        DetailEnricher::new(
            Arc::new(FakeSessionFactory::new(site.clone())),
            &Selectors::default(),
            Duration::ZERO,
        )
    }

    fn detail_page() -> FakePage {
        FakePage::new()
            .with_elements(
                "a.view-autor",
                vec![
                    ElementSnapshot::new(" Silva, Ana "),
                    ElementSnapshot::new("   "),
                    ElementSnapshot::new("Souza, Bruno"),
                ],
            )
            .with_text("#item-ano", " 2021; ")
    }

    #[test]
    fn test_clean_year() {
        assert_eq!(clean_year(" 2021; "), "2021");
        assert_eq!(clean_year("2019"), "2019");
        assert_eq!(clean_year("  "), "");
    }

    #[test]
    fn test_join_authors() {
        assert_eq!(join_authors(vec![" A ", "", "B"]), "A, B");
        assert_eq!(join_authors(Vec::<&str>::new()), "");
    }

    #[tokio::test]
    async fn test_enrich_fills_fields_and_closes_session() {
        let site = FakeSite::new();
        site.add_page(DETAIL, detail_page());

        let mut record = ResultRecord {
            url: DETAIL.to_string(),
            ..Default::default()
        };
        assert!(enricher(&site).enrich(&mut record).await);

        assert_eq!(record.author, "Silva, Ana, Souza, Bruno");
        assert_eq!(record.year, "2021");
        assert_eq!(site.opened(SessionKind::Detail), 1);
        assert_eq!(site.live_sessions(), 0);
    }

    #[tokio::test]
    async fn test_missing_marker_leaves_fields_empty() {
        let site = FakeSite::new();
        site.add_page(DETAIL, FakePage::new());

        let mut record = ResultRecord {
            url: DETAIL.to_string(),
            title: "Kept".to_string(),
            ..Default::default()
        };
        assert!(enricher(&site).enrich(&mut record).await);

        assert_eq!(record.title, "Kept");
        assert!(record.author.is_empty());
        assert!(record.year.is_empty());
        assert_eq!(site.live_sessions(), 0);
    }

    #[tokio::test]
    async fn test_open_failure_degrades_gracefully() {
        let site = FakeSite::new();
        site.add_page(DETAIL, detail_page());
        site.fail_opens(DETAIL, 1);

        let mut record = ResultRecord {
            url: DETAIL.to_string(),
            author: "Existing".to_string(),
            ..Default::default()
        };
        assert!(!enricher(&site).enrich(&mut record).await);

        assert_eq!(record.author, "Existing");
        assert_eq!(site.closed(SessionKind::Detail), 1);
        assert_eq!(site.live_sessions(), 0);
    }

    #[tokio::test]
    async fn test_empty_url_skips_session() {
        let site = FakeSite::new();
        let mut record = ResultRecord::default();
        assert!(!enricher(&site).enrich(&mut record).await);
        assert_eq!(site.opened(SessionKind::Detail), 0);
    }
}
