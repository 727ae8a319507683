//! # receipt-printer
//!
//! Poll Airtable grant tables and print one receipt per new submission.
//!
//! ## Why this crate?
//!
//! Grant submissions arrive in Airtable; the people reviewing them want a
//! physical receipt for each one, enriched with what the record only points
//! at: the game or PCB project behind a pull request, a thumbnail or board
//! render, the project README, QR codes for the links. Each record must come
//! out of the printer exactly once, across restarts.
//!
//! ## Pipeline Overview
//!
//! ```text
//! Airtable record
//!  │
//!  ├─ 1. Gate     skip ids already in the processed-records ledger
//!  ├─ 2. Plan     decide what the record's grant type needs fetched
//!  ├─ 3. Resolve  PR files → project name, thumbnail, README, PCB preview
//!  ├─ 4. Map      per-grant field names → CanonicalDocument
//!  ├─ 5. Render   QR codes + 80 mm receipt PDF via pdfium (spawn_blocking)
//!  ├─ 6. Print    lp -d <destination>
//!  └─ 7. Mark     ledger updated and persisted atomically
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use receipt_printer::{Dispatcher, GrantType, PollerConfig, SourceConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PollerConfig::builder()
//!         .airtable_api_key(std::env::var("AIRTABLE_API_KEY")?)
//!         .source(SourceConfig::new(GrantType::Sprig, "appSprig", "Submissions"))
//!         .printer("receipt")
//!         .build()?;
//!     let mut dispatcher = Dispatcher::from_config(config)?;
//!     dispatcher.run(async { tokio::signal::ctrl_c().await.ok(); }).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `receipt-printer` binary (clap + anyhow + tracing-subscriber + dotenvy) |
//!
//! ## Runtime requirements
//!
//! Rendering binds to a pdfium shared library at runtime (system-installed,
//! or the path in `PDFIUM_LIB_PATH`). OnBoard PCB previews shell out to
//! `gerbv` unless another toolchain is configured.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod clients;
pub mod config;
pub mod dispatch;
pub mod enrich;
pub mod error;
pub mod ledger;
pub mod mapper;
pub mod model;
pub mod pipeline;
pub mod print;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{PollerConfig, PollerConfigBuilder, PreviewCommand, RecordOrder, SortDirection, SourceConfig};
pub use dispatch::{Collaborators, CycleReport, Dispatcher, FailureTracker, RecordOutcome, Selection};
pub use enrich::EnrichmentResolver;
pub use error::{
    ArtifactError, EnrichmentError, PrintError, ReceiptError, RecordError, RenderError, ServiceError,
};
pub use ledger::{LedgerStore, ProcessedLedger};
pub use mapper::{map_record, plan, EnrichmentPlan, MappingContext, ProjectSource};
pub use model::{CanonicalDocument, GrantType, ProjectArtifacts, RawRecord};
