//! Field mapping: [`RawRecord`] + [`ProjectArtifacts`] → [`CanonicalDocument`].
//!
//! Mapping happens in two pure steps around the (impure) resolver:
//!
//! ```text
//! plan(record) ──▶ EnrichmentPlan ──▶ resolver ──▶ ProjectArtifacts
//!                                                       │
//!                       map_record(record, artifacts) ◀─┘
//! ```
//!
//! Each grant type has its own adapter module holding its field names; no
//! adapter inspects another's fields. Missing optional fields become empty
//! values. A missing *required* field is an [`EnrichmentError`], since the
//! receipt would be broken without it.

mod onboard;
mod sprig;
mod unified;

use crate::clients::github::PullRequestRef;
use crate::error::EnrichmentError;
use crate::model::{
    CanonicalDocument, GrantType, Location, ProjectArtifacts, QaEntry, QrCode, RawRecord,
};
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Utc};
use chrono_tz::Tz;

/// Receipt header date format, e.g. `03/01/2024 – 07:00AM`.
pub const DATE_DISPLAY_FORMAT: &str = "%m/%d/%Y – %I:%M%p";

/// Inputs to mapping that are not part of the record.
#[derive(Debug, Clone, Copy)]
pub struct MappingContext {
    /// Reference time for age calculations.
    pub now: DateTime<Utc>,
    /// Timezone the receipt shows dates in.
    pub timezone: Tz,
}

impl MappingContext {
    pub fn new(now: DateTime<Utc>, timezone: Tz) -> Self {
        Self { now, timezone }
    }
}

/// Where a record's project details come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectSource {
    /// A gallery pull request adding `games/<name>.js`.
    GalleryPullRequest(PullRequestRef),
    /// A hardware pull request adding `projects/<name>/…`.
    HardwarePullRequest(PullRequestRef),
    /// Project fields stored on the record itself.
    Inline {
        description: Option<String>,
        screenshot_url: Option<String>,
    },
    /// Nothing to resolve.
    None,
}

/// What the resolver has to fetch for one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichmentPlan {
    pub project: ProjectSource,
    /// Whether a failure to resolve the project fails the record.
    pub project_required: bool,
}

/// Decide which project artifacts `record` needs.
///
/// Fails early when a field needed to even start enrichment is missing or
/// malformed.
pub fn plan(grant_type: GrantType, record: &RawRecord) -> Result<EnrichmentPlan, EnrichmentError> {
    match grant_type {
        GrantType::Sprig => sprig::plan(record),
        GrantType::OnBoard => onboard::plan(record),
        GrantType::Unified => unified::plan(record),
    }
}

/// Build the canonical document for `record`.
pub fn map_record(
    grant_type: GrantType,
    record: &RawRecord,
    artifacts: &ProjectArtifacts,
    ctx: &MappingContext,
) -> Result<CanonicalDocument, EnrichmentError> {
    match grant_type {
        GrantType::Sprig => sprig::map(record, artifacts, ctx),
        GrantType::OnBoard => onboard::map(record, artifacts, ctx),
        GrantType::Unified => unified::map(record, artifacts, ctx),
    }
}

// ── Shared helpers ───────────────────────────────────────────────────────────

/// Creation time in the display timezone, plus its formatted form.
fn created_at(record: &RawRecord, ctx: &MappingContext) -> (DateTime<FixedOffset>, String) {
    let local = record.created_time.with_timezone(&ctx.timezone);
    (local.fixed_offset(), local.format(DATE_DISPLAY_FORMAT).to_string())
}

/// Years between `birth` and `now`, counted as a difference of calendar years.
///
/// This ignores month and day, so it can overstate age by one. Receipts only
/// show a rough age; callers must not treat it as exact.
fn years_since(birth: NaiveDate, now: DateTime<Utc>) -> Option<u32> {
    u32::try_from(now.year() - birth.year()).ok()
}

fn avatar_url(handle: Option<&str>) -> Option<String> {
    handle.map(|h| format!("https://github.com/{}.png", h.trim_start_matches('@')))
}

fn location(record: &RawRecord, city: &str, state: &str, country: &str) -> Location {
    Location {
        city: record.text(city),
        state: record.text(state),
        country: record.text(country),
    }
}

/// Q&A entries from `(question, field)` pairs; absent answers stay empty.
fn questions(record: &RawRecord, pairs: &[(&str, &str)]) -> Vec<QaEntry> {
    pairs
        .iter()
        .map(|(question, field)| QaEntry {
            question: question.to_string(),
            answer: record.text_or_empty(field),
        })
        .collect()
}

/// QR codes from `(label, target)` pairs, dropping empty targets.
fn qr_codes(pairs: Vec<(&str, Option<String>)>) -> Vec<QrCode> {
    pairs
        .into_iter()
        .filter_map(|(label, target)| {
            let target = target?.trim().to_string();
            if target.is_empty() {
                return None;
            }
            Some(QrCode {
                label: label.to_string(),
                target,
                image_path: None,
            })
        })
        .collect()
}

fn mailto(record: &RawRecord, field: &str) -> Option<String> {
    record.text(field).map(|email| format!("mailto:{email}"))
}
