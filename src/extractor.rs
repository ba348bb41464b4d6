//! Page extractor: turns a loaded listing page into result records.
//!
//! Only list-level fields are filled here (title, URL, ID, page, position).
//! Author and year come later from the detail enricher.

use crate::browser::Browser;
use crate::error::{CapesError, Result};
use crate::model::{ResultRecord, SOURCE_TAG};
use tracing::{debug, warn};

/// Query key holding the document ID in detail-page URLs
pub const ID_QUERY_KEY: &str = "id";

/// Extract the records anchored on the current listing page.
///
/// Zero matching anchors is not an error: an empty list is returned and a
/// warning logged. Positions are assigned 1..=N in document order.
///
/// # Errors
///
/// Returns an extraction error if the driver fails to list the anchors.
pub async fn extract_page(
    browser: &mut dyn Browser,
    anchor_selector: &str,
    site_base: &str,
    page: u32,
) -> Result<Vec<ResultRecord>> {
    let anchors = browser.get_elements(anchor_selector).await.map_err(|e| {
        CapesError::extraction_with(format!("failed to list result anchors on page {}", page), e)
    })?;

    if anchors.is_empty() {
        warn!(page = page, selector = anchor_selector, "No results found on page");
        return Ok(Vec::new());
    }

    let records: Vec<ResultRecord> = anchors
        .iter()
        .enumerate()
        .map(|(index, anchor)| {
            let href = anchor.attribute("href").unwrap_or_default();
            ResultRecord {
                title: normalize_title(anchor.text()),
                url: absolute_url(site_base, href),
                id: extract_id(href),
                source: SOURCE_TAG.to_string(),
                page_found: page,
                position: index as u32 + 1,
                ..Default::default()
            }
        })
        .collect();

    debug!(page = page, count = records.len(), "Extracted listing records");
    Ok(records)
}

/// Collapse runs of whitespace to single spaces and trim both ends
pub fn normalize_title(title: &str) -> String {
    title.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Resolve a possibly-relative result URL against the site base.
///
/// URLs that already carry a scheme are returned unchanged.
pub fn absolute_url(base: &str, href: &str) -> String {
    if has_scheme(href) {
        return href.to_string();
    }

    let base = base.trim_end_matches('/');
    if href.starts_with('/') {
        format!("{}{}", base, href)
    } else {
        format!("{}/{}", base, href)
    }
}

fn has_scheme(href: &str) -> bool {
    match href.split_once(':') {
        Some((scheme, _)) => {
            let mut chars = scheme.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
                && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

/// Decoded value of the `id` query parameter, or "" when absent.
///
/// The value ends at the next `&`; a URL without the key yields an empty ID.
pub fn extract_id(url: &str) -> String {
    let query = match url.split_once('?') {
        Some((_, query)) => query,
        None => return String::new(),
    };
    let query = query.split('#').next().unwrap_or_default();

    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == ID_QUERY_KEY)
        .map(|(_, value)| {
            let value = value.replace('+', " ");
            urlencoding::decode(&value)
                .map(|decoded| decoded.into_owned())
                .unwrap_or(value)
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::ElementSnapshot;
    use crate::testing::{FakePage, FakeSite};

    const BASE: &str = "https://www.periodicos.capes.gov.br";

    #[test]
    fn test_extract_id() {
        assert_eq!(
            extract_id("/index.php/acervo/buscador.html?task=detalhes&source=all&id=W2004342886&x=1"),
            "W2004342886"
        );
        assert_eq!(
            extract_id("/index.php/acervo/buscador.html?task=detalhes&id=W2004342886"),
            "W2004342886"
        );
        assert_eq!(extract_id("/index.php/acervo/buscador.html?task=detalhes"), "");
        assert_eq!(extract_id("/no/query"), "");
    }

    #[test]
    fn test_extract_id_ignores_similar_keys() {
        assert_eq!(extract_id("/x?doc_id=A1&id=B2"), "B2");
        assert_eq!(extract_id("/x?doc_id=A1"), "");
    }

    #[test]
    fn test_extract_id_decodes() {
        assert_eq!(extract_id("/x?id=W%2F12%20a"), "W/12 a");
    }

    #[test]
    fn test_absolute_url() {
        assert_eq!(absolute_url(BASE, "/foo"), format!("{}/foo", BASE));
        assert_eq!(absolute_url(BASE, "http://x"), "http://x");
        assert_eq!(absolute_url(BASE, "https://x/y?id=1"), "https://x/y?id=1");
        assert_eq!(absolute_url(BASE, "foo"), format!("{}/foo", BASE));
        assert_eq!(absolute_url(&format!("{}/", BASE), "/foo"), format!("{}/foo", BASE));
    }

    #[test]
    fn test_normalize_title() {
        assert_eq!(normalize_title("  Vacinas \n\t e   saúde  "), "Vacinas e saúde");
        assert_eq!(normalize_title(""), "");
    }

    #[tokio::test]
    async fn test_extract_page_assigns_positions() {
        let site = FakeSite::new();
        site.add_page(
            "https://listing/1",
            FakePage::new().with_elements(
                "a.titulo-busca",
                vec![
                    ElementSnapshot::new(" First   title ")
                        .with_attribute("href", "/index.php?task=detalhes&id=W1"),
                    ElementSnapshot::new("Second").with_attribute("href", "https://other/doc?id=W2&x=1"),
                    ElementSnapshot::new("Third").with_attribute("href", "doc"),
                ],
            ),
        );
        let mut browser = site.browser();
        browser.open("https://listing/1").await.expect("open");

        let records = extract_page(&mut browser, "a.titulo-busca", BASE, 4)
            .await
            .expect("extract");

        assert_eq!(records.len(), 3);
        let positions: Vec<u32> = records.iter().map(|r| r.position).collect();
        assert_eq!(positions, vec![1, 2, 3]);
        assert!(records.iter().all(|r| r.page_found == 4 && r.source == SOURCE_TAG));
        assert_eq!(records[0].title, "First title");
        assert_eq!(records[0].url, format!("{}/index.php?task=detalhes&id=W1", BASE));
        assert_eq!(records[0].id, "W1");
        assert_eq!(records[1].id, "W2");
        assert_eq!(records[2].url, format!("{}/doc", BASE));
        assert_eq!(records[2].id, "");
        assert!(records.iter().all(|r| r.author.is_empty() && r.year.is_empty()));
    }

    #[tokio::test]
    async fn test_extract_empty_page_is_not_an_error() {
        let site = FakeSite::new();
        site.add_page("https://listing/9", FakePage::new());
        let mut browser = site.browser();
        browser.open("https://listing/9").await.expect("open");

        let records = extract_page(&mut browser, "a.titulo-busca", BASE, 9)
            .await
            .expect("extract");
        assert!(records.is_empty());
    }
}
