//! Poll-and-dispatch loop.
//!
//! One state, `Polling`, repeated until a fatal error or shutdown:
//!
//! ```text
//! load ledger ─▶ for each source ─▶ fetch all ─▶ drop already-processed
//!                                                    │
//!      sleep ◀── mark + persist ◀── print ◀── render ◀── map ◀── resolve ◀── plan
//! ```
//!
//! Records are handled strictly one at a time. A record is marked, and the
//! ledger persisted, as soon as its receipt PDF exists: a lost printout can
//! be reprinted from the work directory, a lost PDF would need the whole
//! enrichment rerun. A record whose enrichment or rendering fails stays
//! unmarked and is retried next cycle, up to `max_record_attempts`.
//! A dry run never marks anything, so a later real run still prints.

use crate::clients::airtable::{AirtableSource, RecordSource};
use crate::clients::assets::HttpAssets;
use crate::clients::github::GitHubClient;
use crate::clients::http_client;
use crate::config::{PollerConfig, RecordOrder, SourceConfig};
use crate::enrich::{attach_qr_codes, EnrichmentResolver};
use crate::error::{ReceiptError, RecordError};
use crate::ledger::LedgerStore;
use crate::mapper::{self, MappingContext};
use crate::model::RawRecord;
use crate::pipeline::preview::CommandToolchain;
use crate::pipeline::render::{PdfiumRenderer, ReceiptRenderer, RECEIPT_FILE};
use crate::print::{DryRunPrinter, LpPrinter, Printer};
use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// External collaborators the dispatcher drives.
#[derive(Clone)]
pub struct Collaborators {
    pub source: Arc<dyn RecordSource>,
    pub resolver: EnrichmentResolver,
    pub renderer: Arc<dyn ReceiptRenderer>,
    pub printer: Arc<dyn Printer>,
}

impl Collaborators {
    /// The production set: Airtable, GitHub, HTTP assets, the configured
    /// preview toolchain, pdfium and `lp` (or the dry-run printer).
    pub fn from_config(config: &PollerConfig) -> Result<Self, ReceiptError> {
        let timeout = config.http_timeout_secs;
        let http = http_client(timeout)?;

        let printer: Arc<dyn Printer> = if config.dry_run {
            Arc::new(DryRunPrinter)
        } else {
            let destination = config.printer.as_deref().ok_or_else(|| {
                ReceiptError::InvalidConfig("a printer destination is required unless dry-running".into())
            })?;
            Arc::new(LpPrinter::new(destination, config.command_timeout_secs))
        };

        Ok(Self {
            source: Arc::new(AirtableSource::new(
                http.clone(),
                config.airtable_api_key.clone(),
                timeout,
            )),
            resolver: EnrichmentResolver::new(
                Arc::new(GitHubClient::new(http.clone(), config.github_token.clone(), timeout)),
                Arc::new(HttpAssets::new(http, timeout)),
                Arc::new(CommandToolchain::new(
                    config.preview.clone(),
                    config.command_timeout_secs,
                )),
            ),
            renderer: Arc::new(PdfiumRenderer::new(
                config.pdfium_library.clone(),
                config.page_width_mm,
                config.page_height_mm,
            )),
            printer,
        })
    }
}

/// Counters for one poll cycle or one-shot run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Sources whose listing could not be fetched.
    pub sources_failed: usize,
    /// Records not yet in the ledger (or selected, for one-shot runs).
    pub new_records: usize,
    /// Records whose receipt PDF was produced.
    pub rendered: usize,
    /// Of those, how many the printer rejected.
    pub print_failures: usize,
    /// Records that failed enrichment or rendering.
    pub record_failures: usize,
    /// Records skipped because they hit the retry cap.
    pub set_aside: usize,
}

/// Result of processing one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordOutcome {
    pub pdf: PathBuf,
    pub printed: bool,
}

/// Which records a one-shot run prints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// The `n` most recently created records of each source.
    MostRecent(usize),
    /// Records created strictly before `before` and/or strictly after
    /// `after`, comparing calendar dates in the display timezone.
    Window {
        before: Option<NaiveDate>,
        after: Option<NaiveDate>,
    },
}

impl Selection {
    /// Pick records and return them oldest first.
    pub fn apply(&self, mut records: Vec<RawRecord>, timezone: Tz) -> Vec<RawRecord> {
        order_records(&mut records, RecordOrder::NewestFirst);
        let mut selected: Vec<RawRecord> = match *self {
            Selection::MostRecent(n) => records.into_iter().take(n).collect(),
            Selection::Window { before, after } => records
                .into_iter()
                .filter(|r| {
                    let day = r.created_time.with_timezone(&timezone).date_naive();
                    before.is_none_or(|b| day < b) && after.is_none_or(|a| day > a)
                })
                .collect(),
        };
        order_records(&mut selected, RecordOrder::OldestFirst);
        selected
    }
}

/// Sort by creation time, ties broken by id, in the requested direction.
pub fn order_records(records: &mut [RawRecord], order: RecordOrder) {
    records.sort_by(|a, b| {
        a.created_time
            .cmp(&b.created_time)
            .then_with(|| a.id.cmp(&b.id))
    });
    if order == RecordOrder::NewestFirst {
        records.reverse();
    }
}

/// Consecutive failure counts per `(source_key, record_id)`.
///
/// Lives only in memory: a restart gives every set-aside record a fresh set
/// of attempts.
#[derive(Debug, Clone, Default)]
pub struct FailureTracker {
    max_attempts: u32,
    counts: HashMap<(String, String), u32>,
}

impl FailureTracker {
    /// `max_attempts == 0` never gives up.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            counts: HashMap::new(),
        }
    }

    /// Count one more failure and return the total so far.
    pub fn record_failure(&mut self, source_key: &str, record_id: &str) -> u32 {
        let count = self
            .counts
            .entry((source_key.to_string(), record_id.to_string()))
            .or_insert(0);
        *count += 1;
        *count
    }

    pub fn attempts(&self, source_key: &str, record_id: &str) -> u32 {
        self.counts
            .get(&(source_key.to_string(), record_id.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Whether the record has used up its attempts.
    pub fn is_exhausted(&self, source_key: &str, record_id: &str) -> bool {
        self.max_attempts > 0 && self.attempts(source_key, record_id) >= self.max_attempts
    }

    pub fn clear(&mut self, source_key: &str, record_id: &str) {
        self.counts
            .remove(&(source_key.to_string(), record_id.to_string()));
    }
}

/// Drives sources through the enrichment, render and print pipeline.
pub struct Dispatcher {
    config: PollerConfig,
    store: LedgerStore,
    collaborators: Collaborators,
    failures: FailureTracker,
}

impl Dispatcher {
    pub fn new(config: PollerConfig, collaborators: Collaborators) -> Self {
        Self {
            store: LedgerStore::new(config.ledger_path.clone()),
            failures: FailureTracker::new(config.max_record_attempts),
            config,
            collaborators,
        }
    }

    /// A dispatcher wired to the production collaborators.
    pub fn from_config(config: PollerConfig) -> Result<Self, ReceiptError> {
        let collaborators = Collaborators::from_config(&config)?;
        Ok(Self::new(config, collaborators))
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    pub fn failures(&self) -> &FailureTracker {
        &self.failures
    }

    /// Poll until `shutdown` resolves or a cycle fails fatally.
    ///
    /// Shutdown is only observed between cycles, so a record in flight is
    /// always finished and marked first.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<(), ReceiptError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let interval = Duration::from_secs(self.config.poll_interval_secs);
        info!(
            "Polling {} source(s) every {}s",
            self.config.sources.len(),
            interval.as_secs()
        );

        loop {
            info!("Polling for new records...");
            let report = self.poll_once().await?;
            if report.new_records > 0 || report.sources_failed > 0 {
                info!(
                    "Cycle done: {} new, {} rendered, {} print failures, {} failed, {} set aside, {} sources unavailable",
                    report.new_records,
                    report.rendered,
                    report.print_failures,
                    report.record_failures,
                    report.set_aside,
                    report.sources_failed
                );
            }

            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping");
                    return Ok(());
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    /// Run one cycle over every configured source.
    ///
    /// # Errors
    /// Only ledger failures are returned; per-source and per-record failures
    /// are logged and counted in the report.
    pub async fn poll_once(&mut self) -> Result<CycleReport, ReceiptError> {
        let mut ledger = self.store.load()?;
        let mut report = CycleReport::default();
        let sources = self.config.sources.clone();

        for source in &sources {
            let key = source.source_key();
            let records = match self.collaborators.source.fetch_all(source).await {
                Ok(records) => records,
                Err(e) => {
                    warn!("{}: listing failed, skipping this cycle: {}", key, e);
                    report.sources_failed += 1;
                    continue;
                }
            };

            let total = records.len();
            let mut pending: Vec<RawRecord> = records
                .into_iter()
                .filter(|r| !ledger.contains(&key, &r.id))
                .collect();
            order_records(&mut pending, source.order);
            debug!(
                "{}: {} records, {} already processed, {} new",
                key,
                total,
                ledger.count(&key),
                pending.len()
            );

            for record in pending {
                if self.failures.is_exhausted(&key, &record.id) {
                    report.set_aside += 1;
                    continue;
                }
                report.new_records += 1;
                info!("New record {} found in {}", record.id, key);

                match self.process_record(source, &record).await {
                    Ok(outcome) => {
                        if self.config.dry_run {
                            info!(
                                "Dry run: record {} rendered to {} but not recorded as processed",
                                record.id,
                                outcome.pdf.display()
                            );
                        } else {
                            ledger.mark(&key, &record.id);
                            self.store.persist(&ledger)?;
                        }
                        self.failures.clear(&key, &record.id);
                        report.rendered += 1;
                        if !outcome.printed {
                            report.print_failures += 1;
                        }
                    }
                    Err(e) => {
                        report.record_failures += 1;
                        let attempts = self.failures.record_failure(&key, &record.id);
                        if self.failures.is_exhausted(&key, &record.id) {
                            error!(
                                "Record {} failed {} times, setting it aside until restart: {}",
                                record.id, attempts, e
                            );
                        } else {
                            warn!("Record {} failed (attempt {}), will retry: {}", record.id, attempts, e);
                        }
                    }
                }
            }
        }
        Ok(report)
    }

    /// Enrich, render and print one record.
    ///
    /// Returns `Ok` once the PDF exists, whether or not the printer took it.
    pub async fn process_record(
        &self,
        source: &SourceConfig,
        record: &RawRecord,
    ) -> Result<RecordOutcome, RecordError> {
        let start = Instant::now();
        let grant = source.grant_type;
        let dir = self.record_dir(source, record)?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| RecordError::Io {
                path: dir.clone(),
                source: e,
            })?;

        let plan = mapper::plan(grant, record)?;
        let artifacts = self
            .collaborators
            .resolver
            .resolve(&record.id, &plan, &dir)
            .await?;
        let ctx = MappingContext::new(Utc::now(), self.config.timezone);
        let mut document = mapper::map_record(grant, record, &artifacts, &ctx)?;
        self.collaborators.resolver.attach_avatar(&mut document, &dir).await;
        attach_qr_codes(&mut document, &dir);

        let pdf = dir.join(RECEIPT_FILE);
        self.collaborators.renderer.render(&document, &pdf).await?;

        let printed = match self.collaborators.printer.print(&pdf).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Record {}: receipt rendered but not printed: {}", record.id, e);
                false
            }
        };
        info!(
            "Record {} ({}) done in {}ms",
            record.id,
            grant,
            start.elapsed().as_millis()
        );
        Ok(RecordOutcome { pdf, printed })
    }

    /// Print a selection from every source once, without touching the ledger.
    pub async fn print_selection(&self, selection: Selection) -> Result<CycleReport, ReceiptError> {
        let mut report = CycleReport::default();
        for source in &self.config.sources {
            let key = source.source_key();
            let records = match self.collaborators.source.fetch_all(source).await {
                Ok(records) => records,
                Err(e) => {
                    warn!("{}: listing failed: {}", key, e);
                    report.sources_failed += 1;
                    continue;
                }
            };

            let selected = selection.apply(records, self.config.timezone);
            info!("{}: printing {} selected record(s)", key, selected.len());
            for record in selected {
                report.new_records += 1;
                match self.process_record(source, &record).await {
                    Ok(outcome) => {
                        report.rendered += 1;
                        if !outcome.printed {
                            report.print_failures += 1;
                        }
                    }
                    Err(e) => {
                        report.record_failures += 1;
                        warn!("Record {} failed: {}", record.id, e);
                    }
                }
            }
        }
        Ok(report)
    }

    /// `<work_dir>/<grant>/<record_id>`, refusing ids that are not a single
    /// plain path component.
    fn record_dir(&self, source: &SourceConfig, record: &RawRecord) -> Result<PathBuf, RecordError> {
        let dir = self.config.work_dir.join(source.grant_type.as_str());
        let valid = !record.id.is_empty()
            && record
                .id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(RecordError::Io {
                path: dir,
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("record id '{}' is not a valid directory name", record.id),
                ),
            });
        }
        Ok(dir.join(&record.id))
    }
}
