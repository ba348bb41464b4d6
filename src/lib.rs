//! # rustcapes
//!
//! CAPES periodicals search harvester: paginated listing extraction with
//! per-record detail enrichment and CSV export.
//!
//! ## Modules
//!
//! - [`orchestrator`] - The page loop: open, estimate, paginate, extract, enrich
//! - [`extractor`] - Listing page to result records
//! - [`enricher`] - Author/year from each record's detail page
//! - [`pagination`] - Page URLs, click pagination with retry, page estimation
//! - [`browser`] - Browser session trait and the Chromium adapter
//! - [`export`] - Export sink trait and the CSV sink
//! - [`search_url`] - Search filters and URL construction
//! - [`testing`] - In-memory browser and sink fakes
//! - [`error`] - Custom error types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use rustcapes::{
//!     ChromiumSessionFactory, CsvSink, ExportConfig, SearchConfig, SearchOrchestrator,
//! };
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = SearchConfig::new("vacinas");
//!     let sessions = Arc::new(ChromiumSessionFactory::new(config.session.clone()));
//!     let orchestrator = SearchOrchestrator::new(sessions, config);
//!
//!     let mut sink = CsvSink::new(ExportConfig::new("vacinas.csv"));
//!     let url = "https://www.periodicos.capes.gov.br/index.php/acervo/buscador.html?q=vacinas&source=";
//!     let summary = orchestrator.run(url, &mut sink, &CancellationToken::new()).await?;
//!     println!("Found {} results", summary.collection.total_results());
//!     Ok(())
//! }
//! ```

pub mod browser;
pub mod config;
pub mod enricher;
pub mod error;
pub mod export;
pub mod extractor;
pub mod model;
pub mod orchestrator;
pub mod pagination;
pub mod prompt;
pub mod search_url;
pub mod testing;

pub use browser::{Browser, ChromiumBrowser, ChromiumSessionFactory, SessionFactory, SessionKind};
pub use config::{PaginationStrategy, RetryPolicy, SearchConfig, Selectors, SessionOptions};
pub use error::{CapesError, ErrorKind, Result};
pub use export::{CsvSink, ExportConfig, ExportSink};
pub use model::{ResultCollection, ResultRecord};
pub use orchestrator::{PartialRun, RunSummary, SearchOrchestrator};
pub use search_url::{CapesUrlBuilder, SearchParams, ValidatedParams};
