//! rustcapes - CAPES periodicals search harvester
//!
//! Builds a CAPES search URL from command-line filters, walks the result
//! listing page by page, enriches every result from its detail page and
//! writes everything to CSV.
//!
//! ## Usage
//!
//! ### Export Mode
//! ```bash
//! rustcapes --search "vacinas" --oa sim --pymin 2020 --output vacinas.csv --max-pages 5
//! ```
//!
//! ### View Mode
//! Without `--output` the search is opened in a visible browser for a while.
//! ```bash
//! rustcapes --search "vacinas"
//! ```

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use rustcapes::browser::{Browser, ChromiumBrowser};
use rustcapes::export::{CsvSink, ExportConfig};
use rustcapes::orchestrator::{export_partial, PartialRun, SearchOrchestrator};
use rustcapes::prompt::Prompter;
use rustcapes::search_url::{parse_languages, CapesUrlBuilder, SearchParams};
use rustcapes::{
    CapesError, ChromiumSessionFactory, ErrorKind, PaginationStrategy, RetryPolicy, SearchConfig,
    SessionOptions,
};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, EnvFilter};

/// How long view mode keeps the browser open
const VIEW_DURATION: Duration = Duration::from_secs(30);

// ============================================================================
// CLI Definition
// ============================================================================

/// CAPES periodicals search harvester
#[derive(Parser)]
#[command(name = "rustcapes")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Search terms (prompted for when omitted)
    #[arg(long)]
    search: Option<String>,

    /// Open access only: sim or nao
    #[arg(long, default_value = "")]
    oa: String,

    /// Publication type (e.g. Artigo)
    #[arg(short = 't', long, default_value = "")]
    publication_type: String,

    /// Minimum publication year
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pymin: i32,

    /// Maximum publication year
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pymax: i32,

    /// Peer reviewed only: sim or nao
    #[arg(long, default_value = "")]
    pr: String,

    /// Languages separated by "/" (e.g. "Português/Inglês")
    #[arg(long, default_value = "")]
    lang: String,

    /// Output file; enables export mode
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Export format (only csv)
    #[arg(long, default_value = "csv")]
    format: String,

    /// Maximum pages to visit (0 = all)
    #[arg(long, default_value_t = 0)]
    max_pages: u32,

    /// Omit the CSV header row
    #[arg(long)]
    no_headers: bool,

    /// Seconds to wait between listing pages
    #[arg(long, default_value_t = 2)]
    delay: u64,

    /// Attempts per page transition
    #[arg(long, default_value_t = 3)]
    retry_attempts: u32,

    /// Navigation timeout in seconds for the first attempt
    #[arg(long, default_value_t = 30)]
    nav_timeout: u64,

    /// Seconds to wait for results after a listing page loads
    #[arg(long, default_value_t = 10)]
    result_timeout: u64,

    /// Overall run time limit in seconds (0 = no limit)
    #[arg(long, default_value_t = 600)]
    timeout: u64,

    /// Browser request timeout in seconds
    #[arg(long, default_value_t = 30)]
    page_timeout: u64,

    /// How to move between listing pages
    #[arg(long, value_enum, default_value_t = StrategyArg::Url)]
    strategy: StrategyArg,

    /// Run the listing browser without a window
    #[arg(long)]
    headless: bool,

    /// Disable stealth launch flags and delays
    #[arg(long)]
    no_stealth: bool,

    /// Keep Chromium's default user agent
    #[arg(long)]
    no_random_ua: bool,

    /// Proxy URL (e.g., http://127.0.0.1:7890)
    #[arg(long)]
    proxy: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StrategyArg {
    /// Rewrite the page parameter and open each page fresh
    Url,
    /// Click the "next" control
    Click,
}

impl From<StrategyArg> for PaginationStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Url => PaginationStrategy::UrlParameter,
            StrategyArg::Click => PaginationStrategy::Click,
        }
    }
}

impl Cli {
    fn session_options(&self) -> SessionOptions {
        SessionOptions {
            headless: self.headless,
            stealth: !self.no_stealth,
            random_user_agent: !self.no_random_ua,
            proxy: self.proxy.clone(),
            request_timeout: Duration::from_secs(self.page_timeout),
        }
    }

    fn search_config(&self, search_term: &str) -> SearchConfig {
        SearchConfig {
            max_pages: self.max_pages,
            page_delay: Duration::from_secs(self.delay),
            retry: RetryPolicy {
                max_attempts: self.retry_attempts,
                base_timeout: Duration::from_secs(self.nav_timeout),
                ..Default::default()
            },
            result_timeout: Duration::from_secs(self.result_timeout),
            run_timeout: (self.timeout > 0).then_some(Duration::from_secs(self.timeout)),
            strategy: self.strategy.into(),
            session: self.session_options(),
            ..SearchConfig::new(search_term)
        }
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    if cli.log_json {
        fmt().json().with_env_filter(filter).with_target(true).init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .init();
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %format!("{:#}", err), "rustcapes failed");
            eprintln!("Error: {:#}", err);
            ExitCode::from(exit_code(&err))
        }
    }
}

/// Process exit code for a failed run
fn exit_code(err: &anyhow::Error) -> u8 {
    let kind = err
        .downcast_ref::<CapesError>()
        .map(CapesError::kind)
        .or_else(|| err.downcast_ref::<PartialRun>().map(PartialRun::kind));

    match kind {
        Some(ErrorKind::Configuration) | None => 1,
        Some(ErrorKind::Input) => 2,
        Some(ErrorKind::Navigation) | Some(ErrorKind::Extraction) => 3,
        Some(ErrorKind::Export) => 4,
        Some(ErrorKind::Timeout) => 124,
        Some(ErrorKind::Cancelled) => 130,
    }
}

async fn run(cli: Cli) -> Result<()> {
    let search_term = match cli.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(term) => term.to_string(),
        None => {
            info!("Search term not provided via flags, prompting user");
            let mut prompter = Prompter::new(io::stdin().lock(), io::stdout());
            prompter.prompt_required("TERMOS DE BUSCA", "texto livre (obrigatório)")?
        }
    };

    let params = SearchParams {
        search_term,
        access_type: cli.oa.clone(),
        publication_type: cli.publication_type.clone(),
        year_min: cli.pymin,
        year_max: cli.pymax,
        peer_reviewed: cli.pr.clone(),
        languages: parse_languages(&cli.lang),
    }
    .validate()?;

    println!("\n{}\n", params);
    let search_url = CapesUrlBuilder::default().build(&params);
    println!("URL da busca: {}", search_url);

    match cli.output.clone() {
        Some(output) => run_export(&cli, &params.search_term, &search_url, output).await,
        None => run_view(&cli, &search_url).await,
    }
}

// ============================================================================
// Export Mode
// ============================================================================

async fn run_export(cli: &Cli, search_term: &str, search_url: &str, output: PathBuf) -> Result<()> {
    if !cli.format.eq_ignore_ascii_case("csv") {
        return Err(CapesError::config(format!(
            "unsupported export format: {} (only 'csv' is currently supported)",
            cli.format
        ))
        .into());
    }

    let config = cli.search_config(search_term);
    let sessions = Arc::new(ChromiumSessionFactory::new(config.session.clone()));
    let orchestrator = SearchOrchestrator::new(sessions, config);

    let mut sink = CsvSink::new(ExportConfig {
        path: output,
        include_header: !cli.no_headers,
        ..Default::default()
    });

    let cancel = CancellationToken::new();
    let watcher = tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

    let outcome = orchestrator.run(search_url, &mut sink, &cancel).await;
    watcher.abort();

    match outcome {
        Ok(summary) => {
            println!(
                "\nFound {} results across {} pages, saved to {}",
                summary.collection.total_results(),
                summary.collection.total_pages(),
                sink.path().display()
            );
            if !summary.skipped_pages.is_empty() {
                warn!(pages = ?summary.skipped_pages, "Some pages were skipped");
                println!("Skipped pages: {:?}", summary.skipped_pages);
            }
            Ok(())
        }
        Err(partial) => {
            if export_partial(&mut sink, &partial).context("Failed to save partial results")? {
                warn!(
                    results = partial.collection.total_results(),
                    reason = %partial.error,
                    "Run stopped early, partial results saved"
                );
                println!(
                    "\nStopped early ({}): {} partial results saved to {}",
                    partial.error,
                    partial.collection.total_results(),
                    sink.path().display()
                );
            }
            Err(partial.into())
        }
    }
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            warn!("Interrupt received, stopping after the current page");
            cancel.cancel();
        }
        Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C"),
    }
}

// ============================================================================
// View Mode
// ============================================================================

async fn run_view(cli: &Cli, search_url: &str) -> Result<()> {
    let options = SessionOptions {
        headless: false,
        ..cli.session_options()
    };
    let mut browser = ChromiumBrowser::new(options);

    let opened = browser.open(search_url).await;
    if opened.is_ok() {
        println!("Navegador aberto. Mantendo aberto por {} segundos...", VIEW_DURATION.as_secs());
        tokio::select! {
            _ = tokio::time::sleep(VIEW_DURATION) => {}
            _ = tokio::signal::ctrl_c() => info!("Interrupt received, closing browser"),
        }
    }

    if let Err(e) = browser.close().await {
        warn!(error = %e, "Failed to close browser");
    }
    opened.context("Failed to open search page")?;
    Ok(())
}
