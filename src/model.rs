//! Result records and the per-run result collection.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Source tag stamped on every record harvested from the portal
pub const SOURCE_TAG: &str = "CAPES";

/// A single publication found in the search listing
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ResultRecord {
    /// Publication title, whitespace-normalized
    pub title: String,
    /// Absolute URL of the detail page
    pub url: String,
    /// Document ID taken from the `id` query parameter of `url`
    pub id: String,
    /// Author names joined with ", " (filled by the detail enricher)
    pub author: String,
    /// Publication year (filled by the detail enricher)
    pub year: String,
    /// Constant source tag
    pub source: String,
    /// 1-based listing page where the record was found
    pub page_found: u32,
    /// 1-based rank within that page
    pub position: u32,
}

impl fmt::Display for ResultRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [Page {}, Pos {}] - {}",
            self.title, self.page_found, self.position, self.url
        )
    }
}

/// All records gathered during one search run.
///
/// Append-only: records are never removed and `total_results` always equals
/// the number of records held.
#[derive(Debug, Clone)]
pub struct ResultCollection {
    search_term: String,
    search_date: DateTime<Local>,
    total_pages: u32,
    total_results: usize,
    results: Vec<ResultRecord>,
}

impl ResultCollection {
    /// Create an empty collection stamped with the current time
    pub fn new(search_term: impl Into<String>) -> Self {
        Self {
            search_term: search_term.into(),
            search_date: Local::now(),
            total_pages: 0,
            total_results: 0,
            results: Vec::new(),
        }
    }

    pub fn search_term(&self) -> &str {
        &self.search_term
    }

    pub fn search_date(&self) -> DateTime<Local> {
        self.search_date
    }

    /// Highest page index recorded so far
    pub fn total_pages(&self) -> u32 {
        self.total_pages
    }

    pub fn total_results(&self) -> usize {
        self.total_results
    }

    pub fn results(&self) -> &[ResultRecord] {
        &self.results
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn add_result(&mut self, record: ResultRecord) {
        self.results.push(record);
        self.total_results = self.results.len();
    }

    pub fn add_results(&mut self, records: impl IntoIterator<Item = ResultRecord>) {
        self.results.extend(records);
        self.total_results = self.results.len();
    }

    /// Raise `total_pages` to `page` if it is higher; never lowers it
    pub fn update_page_count(&mut self, page: u32) {
        if page > self.total_pages {
            self.total_pages = page;
        }
    }

    /// Records discovered on `page`, in discovery order
    pub fn results_from_page(&self, page: u32) -> Vec<&ResultRecord> {
        self.results.iter().filter(|r| r.page_found == page).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(page: u32, position: u32) -> ResultRecord {
        ResultRecord {
            title: format!("Title {}-{}", page, position),
            page_found: page,
            position,
            source: SOURCE_TAG.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_total_results_tracks_appends() {
        let mut collection = ResultCollection::new("vacinas");
        assert_eq!(collection.total_results(), 0);

        collection.add_result(record(1, 1));
        assert_eq!(collection.total_results(), collection.results().len());

        collection.add_results(vec![record(1, 2), record(1, 3)]);
        assert_eq!(collection.total_results(), 3);

        collection.add_results(Vec::new());
        assert_eq!(collection.total_results(), collection.results().len());
    }

    #[test]
    fn test_page_count_is_monotonic() {
        let mut collection = ResultCollection::new("vacinas");
        collection.update_page_count(3);
        collection.update_page_count(2);
        assert_eq!(collection.total_pages(), 3);
        collection.update_page_count(4);
        assert_eq!(collection.total_pages(), 4);
    }

    #[test]
    fn test_results_from_page() {
        let mut collection = ResultCollection::new("vacinas");
        collection.add_results(vec![record(1, 1), record(2, 1), record(1, 2)]);

        let first: Vec<u32> = collection
            .results_from_page(1)
            .iter()
            .map(|r| r.position)
            .collect();
        assert_eq!(first, vec![1, 2]);
        assert!(collection.results_from_page(5).is_empty());
    }

    #[test]
    fn test_display() {
        let mut r = record(2, 7);
        r.url = "https://example.org/x".to_string();
        assert_eq!(r.to_string(), "Title 2-7 [Page 2, Pos 7] - https://example.org/x");
    }
}
