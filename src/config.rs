//! Configuration for the poller.
//!
//! Everything the poller needs is collected into one [`PollerConfig`], built
//! via [`PollerConfigBuilder`]. `build()` is the single place where missing
//! credentials, half-configured sources and bad timezones are turned into a
//! fatal [`ReceiptError::InvalidConfig`] before the first poll.

use crate::error::ReceiptError;
use crate::model::GrantType;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Server-side sort direction for a source listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

/// Order in which new records of one source are processed within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RecordOrder {
    /// Print in submission order. (default)
    #[default]
    OldestFirst,
    NewestFirst,
}

/// One independently polled table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub grant_type: GrantType,
    pub base_id: String,
    pub table: String,
    /// Airtable view to read from. Default: the table's default view.
    pub view: Option<String>,
    /// Only fetch records where this field is non-empty.
    pub require_nonempty: Option<String>,
    /// Server-side sort field.
    pub sort_field: Option<String>,
    pub sort_direction: SortDirection,
    pub order: RecordOrder,
}

impl SourceConfig {
    /// A source with the listing defaults of its grant type.
    ///
    /// Sprig only lists submissions that answered the referral question and
    /// sorts by submission time; OnBoard and unified tables sort by creation.
    pub fn new(grant_type: GrantType, base_id: impl Into<String>, table: impl Into<String>) -> Self {
        let (require_nonempty, sort_field) = match grant_type {
            GrantType::Sprig => (Some("How did you hear about Sprig?"), "Submitted AT"),
            GrantType::OnBoard => (None, "Created"),
            GrantType::Unified => (None, "Created"),
        };
        Self {
            grant_type,
            base_id: base_id.into(),
            table: table.into(),
            view: None,
            require_nonempty: require_nonempty.map(str::to_string),
            sort_field: Some(sort_field.to_string()),
            sort_direction: SortDirection::Desc,
            order: RecordOrder::OldestFirst,
        }
    }

    pub fn with_view(mut self, view: impl Into<String>) -> Self {
        self.view = Some(view.into());
        self
    }

    pub fn with_order(mut self, order: RecordOrder) -> Self {
        self.order = order;
        self
    }

    pub fn with_sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort_field = Some(field.into());
        self.sort_direction = direction;
        self
    }

    pub fn without_filter(mut self) -> Self {
        self.require_nonempty = None;
        self
    }

    /// Ledger namespace: `"<base_id>/<table>"`.
    pub fn source_key(&self) -> String {
        format!("{}/{}", self.base_id, self.table)
    }
}

/// External program that renders Gerber files into a preview image.
///
/// The program is invoked as `program <args…> <fabrication files…>` with the
/// working directory set to the scratch directory; `{output}` inside an
/// argument is replaced with the absolute path of `output_name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewCommand {
    pub program: String,
    pub args: Vec<String>,
    pub output_name: String,
}

impl Default for PreviewCommand {
    fn default() -> Self {
        Self {
            program: "gerbv".to_string(),
            args: vec![
                "--export=png".to_string(),
                "--dpi=300".to_string(),
                "--output={output}".to_string(),
            ],
            output_name: "preview.png".to_string(),
        }
    }
}

/// Poller configuration.
///
/// Built via [`PollerConfig::builder()`].
///
/// # Example
/// ```rust
/// use receipt_printer::{GrantType, PollerConfig, SourceConfig};
///
/// let config = PollerConfig::builder()
///     .airtable_api_key("key")
///     .source(SourceConfig::new(GrantType::Sprig, "appSprig", "Submissions"))
///     .printer("receipt")
///     .build()
///     .unwrap();
/// assert_eq!(config.poll_interval_secs, 30);
/// ```
#[derive(Clone)]
pub struct PollerConfig {
    /// Airtable personal access token.
    pub airtable_api_key: String,

    /// Tables to poll, each with its own ledger namespace.
    pub sources: Vec<SourceConfig>,

    /// Timezone receipt dates are shown in. Default: America/New_York.
    pub timezone: Tz,

    /// Seconds to sleep between cycles. Default: 30.
    pub poll_interval_secs: u64,

    /// Processed-records ledger. Default: `processed_records.json`.
    pub ledger_path: PathBuf,

    /// Per-record artifacts and receipt PDFs. Default: `receipts`.
    pub work_dir: PathBuf,

    /// `lp` destination. Required unless `dry_run`.
    pub printer: Option<String>,

    /// Render receipts without sending them to the printer. Default: false.
    pub dry_run: bool,

    /// Timeout for every outbound HTTP request. Default: 30.
    pub http_timeout_secs: u64,

    /// Timeout for external commands (`lp`, preview toolchain). Default: 120.
    pub command_timeout_secs: u64,

    /// Consecutive failures after which a record is set aside until restart.
    /// `0` retries forever. Default: 5.
    pub max_record_attempts: u32,

    /// GitHub token; unauthenticated requests are rate-limited to 60/hour.
    pub github_token: Option<String>,

    /// Explicit pdfium shared library. Default: system library.
    pub pdfium_library: Option<PathBuf>,

    /// PCB preview toolchain.
    pub preview: PreviewCommand,

    /// Receipt page width in millimetres. Default: 80.
    pub page_width_mm: f32,

    /// Receipt page height in millimetres. Default: 297.
    pub page_height_mm: f32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            airtable_api_key: String::new(),
            sources: Vec::new(),
            timezone: chrono_tz::America::New_York,
            poll_interval_secs: 30,
            ledger_path: PathBuf::from("processed_records.json"),
            work_dir: PathBuf::from("receipts"),
            printer: None,
            dry_run: false,
            http_timeout_secs: 30,
            command_timeout_secs: 120,
            max_record_attempts: 5,
            github_token: None,
            pdfium_library: None,
            preview: PreviewCommand::default(),
            page_width_mm: 80.0,
            page_height_mm: 297.0,
        }
    }
}

impl fmt::Debug for PollerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollerConfig")
            .field("airtable_api_key", &"<redacted>")
            .field("sources", &self.sources)
            .field("timezone", &self.timezone.name())
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("ledger_path", &self.ledger_path)
            .field("work_dir", &self.work_dir)
            .field("printer", &self.printer)
            .field("dry_run", &self.dry_run)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .field("command_timeout_secs", &self.command_timeout_secs)
            .field("max_record_attempts", &self.max_record_attempts)
            .field("github_token", &self.github_token.as_ref().map(|_| "<redacted>"))
            .field("pdfium_library", &self.pdfium_library)
            .field("preview", &self.preview)
            .finish()
    }
}

impl PollerConfig {
    pub fn builder() -> PollerConfigBuilder {
        PollerConfigBuilder {
            config: Self::default(),
            timezone: None,
        }
    }
}

/// Builder for [`PollerConfig`].
#[derive(Debug)]
pub struct PollerConfigBuilder {
    config: PollerConfig,
    timezone: Option<String>,
}

impl PollerConfigBuilder {
    pub fn airtable_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.airtable_api_key = key.into();
        self
    }

    pub fn source(mut self, source: SourceConfig) -> Self {
        self.config.sources.push(source);
        self
    }

    /// Add a source from an optional base/table pair.
    ///
    /// Both absent is fine (the grant is not polled). Exactly one present is
    /// a configuration error reported by `build()`.
    pub fn optional_source(
        mut self,
        grant_type: GrantType,
        base_id: Option<String>,
        table: Option<String>,
    ) -> Self {
        match (base_id, table) {
            (Some(base), Some(table)) => {
                self.config.sources.push(SourceConfig::new(grant_type, base, table));
            }
            (None, None) => {}
            (base, table) => {
                // Recorded as an invalid source; build() rejects it.
                self.config.sources.push(SourceConfig::new(
                    grant_type,
                    base.unwrap_or_default(),
                    table.unwrap_or_default(),
                ));
            }
        }
        self
    }

    /// IANA timezone name, validated in `build()`.
    pub fn timezone(mut self, name: impl Into<String>) -> Self {
        self.timezone = Some(name.into());
        self
    }

    pub fn poll_interval_secs(mut self, secs: u64) -> Self {
        self.config.poll_interval_secs = secs;
        self
    }

    pub fn ledger_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.ledger_path = path.into();
        self
    }

    pub fn work_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.work_dir = path.into();
        self
    }

    pub fn printer(mut self, destination: impl Into<String>) -> Self {
        self.config.printer = Some(destination.into());
        self
    }

    pub fn dry_run(mut self, v: bool) -> Self {
        self.config.dry_run = v;
        self
    }

    pub fn http_timeout_secs(mut self, secs: u64) -> Self {
        self.config.http_timeout_secs = secs.max(1);
        self
    }

    pub fn command_timeout_secs(mut self, secs: u64) -> Self {
        self.config.command_timeout_secs = secs.max(1);
        self
    }

    pub fn max_record_attempts(mut self, n: u32) -> Self {
        self.config.max_record_attempts = n;
        self
    }

    pub fn github_token(mut self, token: impl Into<String>) -> Self {
        self.config.github_token = Some(token.into());
        self
    }

    pub fn pdfium_library(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library = Some(path.into());
        self
    }

    pub fn preview(mut self, preview: PreviewCommand) -> Self {
        self.config.preview = preview;
        self
    }

    pub fn page_size_mm(mut self, width: f32, height: f32) -> Self {
        self.config.page_width_mm = width;
        self.config.page_height_mm = height;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(mut self) -> Result<PollerConfig, ReceiptError> {
        if let Some(name) = self.timezone.take() {
            self.config.timezone = name.parse::<Tz>().map_err(|_| {
                ReceiptError::InvalidConfig(format!("Unknown timezone '{name}'"))
            })?;
        }

        let c = &self.config;
        if c.airtable_api_key.trim().is_empty() {
            return Err(ReceiptError::InvalidConfig(
                "AIRTABLE_API_KEY is not set".into(),
            ));
        }
        if c.sources.is_empty() {
            return Err(ReceiptError::InvalidConfig(
                "No sources configured; set at least one <GRANT>_BASE_ID / <GRANT>_TABLE_NAME pair"
                    .into(),
            ));
        }
        for source in &c.sources {
            if source.base_id.trim().is_empty() || source.table.trim().is_empty() {
                return Err(ReceiptError::InvalidConfig(format!(
                    "Source '{}' needs both a base id and a table name",
                    source.grant_type
                )));
            }
        }
        let mut keys: Vec<String> = c.sources.iter().map(SourceConfig::source_key).collect();
        keys.sort();
        if let Some(dup) = keys.windows(2).find(|w| w[0] == w[1]) {
            return Err(ReceiptError::InvalidConfig(format!(
                "Source '{}' is configured twice",
                dup[0]
            )));
        }
        if !c.dry_run && c.printer.as_deref().map_or(true, |p| p.trim().is_empty()) {
            return Err(ReceiptError::InvalidConfig(
                "DEST_RECEIPT_PRINTER is not set (use --dry-run to skip printing)".into(),
            ));
        }
        if c.poll_interval_secs == 0 {
            return Err(ReceiptError::InvalidConfig(
                "Poll interval must be ≥ 1 second".into(),
            ));
        }
        if c.page_width_mm <= 0.0 || c.page_height_mm <= 0.0 {
            return Err(ReceiptError::InvalidConfig(format!(
                "Page size must be positive, got {}×{} mm",
                c.page_width_mm, c.page_height_mm
            )));
        }
        Ok(self.config)
    }
}
