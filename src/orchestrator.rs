//! Search orchestrator: the page loop tying the engine together.
//!
//! Opens the search, estimates how many listing pages to visit, then for
//! each page reaches it, extracts its records, enriches each one in an
//! isolated detail session and appends them to the collection. Finished
//! collections go to an [`ExportSink`].
//!
//! Exactly one primary session is live at a time and it is closed once on
//! every exit path.

use crate::browser::{Browser, SessionFactory};
use crate::config::{PaginationStrategy, SearchConfig};
use crate::enricher::DetailEnricher;
use crate::error::{CapesError, ErrorKind, Result};
use crate::export::ExportSink;
use crate::extractor::extract_page;
use crate::model::ResultCollection;
use crate::pagination::{
    effective_page_bound, estimate_total_results, has_next_page, open_page, page_url, total_pages,
    ClickPaginator,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome of a completed run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub collection: ResultCollection,
    /// Pages whose transition failed after retries, in order
    pub skipped_pages: Vec<u32>,
    /// Number of pages the loop was bounded to
    pub page_bound: u32,
}

/// A run that stopped early: what was collected, and why it stopped
#[derive(Debug, Error)]
#[error("search stopped after {} results: {error}", .collection.total_results())]
pub struct PartialRun {
    pub collection: ResultCollection,
    #[source]
    pub error: CapesError,
}

impl PartialRun {
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }
}

/// Drives one search from the first listing page to export
pub struct SearchOrchestrator {
    sessions: Arc<dyn SessionFactory>,
    config: SearchConfig,
    enricher: DetailEnricher,
}

impl SearchOrchestrator {
    pub fn new(sessions: Arc<dyn SessionFactory>, config: SearchConfig) -> Self {
        let enricher = DetailEnricher::new(sessions.clone(), &config.selectors, config.detail_timeout);
        Self {
            sessions,
            config,
            enricher,
        }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Collect every reachable result for `search_url`, then export them.
    ///
    /// # Errors
    ///
    /// Returns a [`PartialRun`] if collection stopped early or the sink
    /// failed; the records gathered so far travel with the error.
    pub async fn run(
        &self,
        search_url: &str,
        sink: &mut dyn ExportSink,
        cancel: &CancellationToken,
    ) -> std::result::Result<RunSummary, PartialRun> {
        let summary = self.collect(search_url, cancel).await?;

        match export_collection(sink, &summary.collection) {
            Ok(()) => Ok(summary),
            Err(error) => Err(PartialRun {
                collection: summary.collection,
                error,
            }),
        }
    }

    /// Walk the listing pages of `search_url` and gather enriched records.
    ///
    /// `cancel` is checked before each page; a page already started always
    /// finishes.
    ///
    /// # Errors
    ///
    /// Returns a [`PartialRun`] when the first page cannot be opened, on
    /// cancellation, or on a configuration error.
    pub async fn collect(
        &self,
        search_url: &str,
        cancel: &CancellationToken,
    ) -> std::result::Result<RunSummary, PartialRun> {
        let mut collection = ResultCollection::new(self.config.search_term.clone());
        let mut skipped_pages = Vec::new();
        let mut primary: Option<Box<dyn Browser>> = None;

        let outcome = self
            .drive(search_url, cancel, &mut primary, &mut collection, &mut skipped_pages)
            .await;

        if let Some(mut session) = primary.take() {
            if let Err(e) = session.close().await {
                warn!(error = %e, "Failed to close primary browser");
            }
        }

        match outcome {
            Ok(page_bound) => {
                info!(
                    results = collection.total_results(),
                    pages = collection.total_pages(),
                    skipped = skipped_pages.len(),
                    "Search complete"
                );
                Ok(RunSummary {
                    collection,
                    skipped_pages,
                    page_bound,
                })
            }
            Err(error) => {
                warn!(results = collection.total_results(), error = %error, "Search stopped early");
                Err(PartialRun { collection, error })
            }
        }
    }

    async fn drive(
        &self,
        search_url: &str,
        cancel: &CancellationToken,
        primary: &mut Option<Box<dyn Browser>>,
        collection: &mut ResultCollection,
        skipped_pages: &mut Vec<u32>,
    ) -> Result<u32> {
        let selectors = &self.config.selectors;

        let started = Instant::now();

        info!(url = search_url, "Opening search page");
        let session = primary.insert(open_page(self.sessions.as_ref(), search_url, &self.config.retry).await?);
        self.await_results(session.as_mut(), 1).await;

        let total = estimate_total_results(session.as_mut(), &selectors.result_count).await;
        let estimated = total_pages(total, self.config.page_size);
        let bound = effective_page_bound(estimated, self.config.max_pages);
        info!(
            total_results = total,
            estimated_pages = estimated,
            page_bound = bound,
            "Search size estimated"
        );

        let paginator = ClickPaginator::new(
            self.config.retry.clone(),
            selectors.next_page.clone(),
            selectors.result_anchor.clone(),
            self.config.scroll_span,
        );

        for page in 1..=bound {
            self.check_interrupt(page, cancel, started)?;

            match self.visit_page(search_url, page, primary, &paginator, collection).await? {
                PageVisit::Processed => {}
                PageVisit::Skipped => skipped_pages.push(page),
                PageVisit::EndOfListing => {
                    info!(page = page, "No next page control, listing ended early");
                    break;
                }
            }

            if page < bound {
                tokio::time::sleep(self.config.page_delay).await;
            }
        }

        Ok(bound)
    }

    fn check_interrupt(&self, page: u32, cancel: &CancellationToken, started: Instant) -> Result<()> {
        if cancel.is_cancelled() {
            info!(page = page, "Cancellation requested, stopping before page");
            return Err(CapesError::Cancelled);
        }

        if let Some(limit) = self.config.run_timeout {
            if started.elapsed() >= limit {
                warn!(page = page, limit_secs = limit.as_secs(), "Run time limit reached, stopping before page");
                return Err(CapesError::Timeout { limit });
            }
        }
        Ok(())
    }

    async fn visit_page(
        &self,
        search_url: &str,
        page: u32,
        primary: &mut Option<Box<dyn Browser>>,
        paginator: &ClickPaginator,
        collection: &mut ResultCollection,
    ) -> Result<PageVisit> {
        let selectors = &self.config.selectors;

        if page > 1 {
            match self.reach_page(search_url, page, primary, paginator).await {
                Ok(Transition::Reached) => {}
                Ok(Transition::NoNextPage) => return Ok(PageVisit::EndOfListing),
                Err(e) if e.is(ErrorKind::Configuration) => return Err(e),
                Err(e) => {
                    warn!(page = page, error = %e, "Failed to reach page, skipping");
                    return Ok(PageVisit::Skipped);
                }
            }
        }

        let session = primary
            .as_mut()
            .ok_or_else(|| CapesError::navigation("no primary session"))?;

        let mut records =
            match extract_page(session.as_mut(), &selectors.result_anchor, &self.config.site_base, page).await {
                Ok(records) => records,
                Err(e) => {
                    warn!(page = page, error = %e, "Failed to extract page, skipping");
                    return Ok(PageVisit::Skipped);
                }
            };

        let count = records.len();
        for (index, record) in records.iter_mut().enumerate() {
            debug!(page = page, index = index + 1, total = count, url = %record.url, "Enriching result");
            self.enricher.enrich(record).await;
        }

        collection.add_results(records);
        collection.update_page_count(page);
        info!(page = page, results = count, "Page processed");
        Ok(PageVisit::Processed)
    }

    /// Bring the primary session to listing page `page`.
    ///
    /// The click strategy only clicks from a session known to sit on
    /// `page - 1`. When clicking fails, or the previous page was never
    /// reached, the page is opened by URL in a fresh session instead, so
    /// records are never attributed to the wrong page.
    async fn reach_page(
        &self,
        search_url: &str,
        page: u32,
        primary: &mut Option<Box<dyn Browser>>,
        paginator: &ClickPaginator,
    ) -> Result<Transition> {
        if self.config.strategy == PaginationStrategy::Click {
            if let Some(session) = primary.as_mut() {
                let clicked = match has_next_page(session.as_mut(), &self.config.selectors.next_page).await {
                    Ok(false) => return Ok(Transition::NoNextPage),
                    Ok(true) => paginator.advance(session.as_mut()).await.map(|_| ()),
                    Err(e) => Err(e),
                };

                match clicked {
                    Ok(()) => return Ok(Transition::Reached),
                    Err(e) => warn!(page = page, error = %e, "Click pagination failed, opening page by URL"),
                }
            } else {
                debug!(page = page, "Previous page not reached, opening page by URL");
            }
        }

        self.open_by_url(search_url, page, primary).await?;
        Ok(Transition::Reached)
    }

    /// Replace the primary session with a fresh one on `page_url(page)`.
    ///
    /// On failure `primary` is left empty.
    async fn open_by_url(&self, search_url: &str, page: u32, primary: &mut Option<Box<dyn Browser>>) -> Result<()> {
        if let Some(mut previous) = primary.take() {
            if let Err(e) = previous.close().await {
                warn!(error = %e, "Failed to close previous primary browser");
            }
        }

        let url = page_url(search_url, page)?;
        debug!(page = page, url = %url, "Opening page by URL");
        let session = primary.insert(open_page(self.sessions.as_ref(), &url, &self.config.retry).await?);
        self.await_results(session.as_mut(), page).await;
        Ok(())
    }

    async fn await_results(&self, session: &mut dyn Browser, page: u32) {
        let anchor = &self.config.selectors.result_anchor;
        if let Err(e) = session.wait_for_element(anchor, self.config.result_timeout).await {
            debug!(page = page, error = %e, "Results did not appear");
        }
    }
}

/// How a page index was handled by the loop
enum PageVisit {
    Processed,
    Skipped,
    EndOfListing,
}

enum Transition {
    Reached,
    NoNextPage,
}

/// Write `collection` through `sink`: initialize, header, rows, close.
///
/// The sink is closed even when a write fails; the first error wins.
pub fn export_collection(sink: &mut dyn ExportSink, collection: &ResultCollection) -> Result<()> {
    sink.initialize()?;

    let written = sink
        .write_header()
        .and_then(|()| sink.write_collection(collection));
    let closed = sink.close();

    written.and(closed)
}

/// Save what a run collected before it was cancelled or timed out.
///
/// The file is written even when nothing was collected, so the header row
/// is always there. Returns false, writing nothing, for other stop reasons.
pub fn export_partial(sink: &mut dyn ExportSink, partial: &PartialRun) -> Result<bool> {
    match partial.kind() {
        ErrorKind::Cancelled | ErrorKind::Timeout => {
            export_collection(sink, &partial.collection)?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSink;
    use crate::model::ResultRecord;

    fn collection(n: u32) -> ResultCollection {
        let mut collection = ResultCollection::new("vacinas");
        collection.add_results((1..=n).map(|i| ResultRecord {
            title: format!("T{}", i),
            position: i,
            page_found: 1,
            ..Default::default()
        }));
        collection
    }

    #[test]
    fn test_export_call_order() {
        let mut sink = RecordingSink::new();
        export_collection(&mut sink, &collection(2)).expect("export");

        assert_eq!(
            sink.calls,
            vec!["initialize", "write_header", "write_record", "write_record", "flush", "close"]
        );
        assert_eq!(sink.header_rows, 1);
    }

    #[test]
    fn test_export_closes_sink_on_failure() {
        let mut sink = RecordingSink::failing_after(1);
        let err = export_collection(&mut sink, &collection(3)).expect_err("disk full");

        assert_eq!(err.kind(), ErrorKind::Export);
        assert_eq!(sink.records.len(), 1);
        assert_eq!(sink.calls.last().map(String::as_str), Some("close"));
    }

    #[test]
    fn test_partial_run_display() {
        let partial = PartialRun {
            collection: collection(4),
            error: CapesError::Cancelled,
        };
        assert_eq!(partial.to_string(), "search stopped after 4 results: Run cancelled");
        assert_eq!(partial.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_cancelled_empty_run_still_writes_header() {
        let partial = PartialRun {
            collection: ResultCollection::new("vacinas"),
            error: CapesError::Cancelled,
        };
        let mut sink = RecordingSink::new();

        assert!(export_partial(&mut sink, &partial).expect("export"));
        assert_eq!(sink.header_rows, 1);
        assert!(sink.records.is_empty());
        assert_eq!(sink.calls.first().map(String::as_str), Some("initialize"));
        assert_eq!(sink.calls.last().map(String::as_str), Some("close"));
    }

    #[test]
    fn test_timed_out_run_is_saved_but_navigation_failure_is_not() {
        let timed_out = PartialRun {
            collection: collection(3),
            error: CapesError::Timeout {
                limit: std::time::Duration::from_secs(600),
            },
        };
        let mut sink = RecordingSink::new();
        assert!(export_partial(&mut sink, &timed_out).expect("export"));
        assert_eq!(sink.records.len(), 3);

        let failed = PartialRun {
            collection: collection(0),
            error: CapesError::navigation("first page never opened"),
        };
        let mut sink = RecordingSink::new();
        assert!(!export_partial(&mut sink, &failed).expect("nothing to do"));
        assert!(sink.calls.is_empty());
    }
}
