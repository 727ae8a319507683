//! CLI binary for receipt-printer.
//!
//! A thin shim over the library crate that maps flags and environment
//! variables to `PollerConfig`, then either polls forever or prints a
//! one-shot selection.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use receipt_printer::{
    CycleReport, Dispatcher, GrantType, PollerConfig, PreviewCommand, Selection,
};
use std::io;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}

// ── Help text ────────────────────────────────────────────────────────────────

const AFTER_HELP: &str = r#"EXAMPLES:
  # Poll every configured grant table and print new submissions
  receipt-printer

  # Render without printing, with debug logs
  receipt-printer --dry-run -v

  # Reprint the three most recent submissions of each grant
  receipt-printer --count 3

  # Print everything submitted during the first week of March
  receipt-printer --after 2024-02-29 --before 2024-03-08

ENVIRONMENT:
  Every option can also be set in the environment or in a .env file in the
  working directory. A grant is polled when both its base id and table
  name are set:
    SPRIG_BASE_ID / SPRIG_TABLE_NAME
    ONBOARD_BASE_ID / ONBOARD_TABLE_NAME
    UNIFIED_BASE_ID / UNIFIED_TABLE_NAME

  RUST_LOG overrides the log level chosen by --verbose.

ONE-SHOT RUNS:
  --count, --before and --after print their selection once and exit. They
  neither read nor update the processed-records ledger, so the poller will
  still print those records if it has not done so already.

PDF ENGINE:
  Receipts are rendered with pdfium. The system library is used unless
  PDFIUM_LIB_PATH points at a specific libpdfium.
"#;

/// Poll Airtable grant submissions and print one receipt per record.
#[derive(Parser, Debug)]
#[command(
    name = "receipt-printer",
    version,
    about = "Poll Airtable grant submissions and print one receipt per record",
    long_about = "Poll the Sprig, OnBoard and Unified grant tables in Airtable, enrich each new \
submission from its pull request (project name, thumbnail, README, PCB preview), render an \
80 mm receipt PDF with QR codes, and send it to a CUPS printer exactly once.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Airtable personal access token.
    #[arg(long, env = "AIRTABLE_API_KEY", hide_env_values = true)]
    airtable_api_key: String,

    /// Airtable base holding Sprig submissions.
    #[arg(long, env = "SPRIG_BASE_ID")]
    sprig_base_id: Option<String>,

    /// Table name of Sprig submissions.
    #[arg(long, env = "SPRIG_TABLE_NAME")]
    sprig_table_name: Option<String>,

    /// Airtable base holding OnBoard submissions.
    #[arg(long, env = "ONBOARD_BASE_ID")]
    onboard_base_id: Option<String>,

    /// Table name of OnBoard submissions.
    #[arg(long, env = "ONBOARD_TABLE_NAME")]
    onboard_table_name: Option<String>,

    /// Airtable base holding Unified submissions.
    #[arg(long, env = "UNIFIED_BASE_ID")]
    unified_base_id: Option<String>,

    /// Table name of Unified submissions.
    #[arg(long, env = "UNIFIED_TABLE_NAME")]
    unified_table_name: Option<String>,

    /// CUPS destination passed to `lp -d`.
    #[arg(long, env = "DEST_RECEIPT_PRINTER")]
    printer: Option<String>,

    /// IANA timezone for dates printed on receipts.
    #[arg(long, env = "RECEIPT_TIMEZONE", default_value = "America/New_York")]
    timezone: String,

    /// Seconds to sleep between poll cycles.
    #[arg(long, env = "POLL_INTERVAL_SECS", default_value_t = 30,
          value_parser = clap::value_parser!(u64).range(1..))]
    poll_interval: u64,

    /// Processed-records ledger file.
    #[arg(long, env = "LEDGER_PATH", default_value = "processed_records.json")]
    ledger: PathBuf,

    /// Directory for downloaded artefacts and rendered receipts.
    #[arg(long, env = "WORK_DIR", default_value = "receipts")]
    work_dir: PathBuf,

    /// Timeout for outbound HTTP requests, in seconds.
    #[arg(long, env = "HTTP_TIMEOUT_SECS", default_value_t = 30)]
    http_timeout: u64,

    /// Timeout for `lp` and the PCB preview toolchain, in seconds.
    #[arg(long, env = "COMMAND_TIMEOUT_SECS", default_value_t = 120)]
    command_timeout: u64,

    /// Consecutive failures before a record is set aside (0 = never).
    #[arg(long, env = "MAX_RECORD_ATTEMPTS", default_value_t = 5)]
    max_attempts: u32,

    /// GitHub token; raises the API rate limit.
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    github_token: Option<String>,

    /// Path to the pdfium shared library.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// Program that renders Gerber files into a PNG preview.
    #[arg(long, env = "PREVIEW_COMMAND")]
    preview_command: Option<String>,

    /// Print the N most recent records of each source and exit.
    #[arg(long, value_name = "N", conflicts_with_all = ["before", "after"])]
    count: Option<usize>,

    /// Print records created before this date (YYYY-MM-DD) and exit.
    #[arg(long, value_name = "YYYY-MM-DD", value_parser = parse_date)]
    before: Option<NaiveDate>,

    /// Print records created after this date (YYYY-MM-DD) and exit.
    #[arg(long, value_name = "YYYY-MM-DD", value_parser = parse_date)]
    after: Option<NaiveDate>,

    /// Render receipts but do not send them to the printer.
    #[arg(long, env = "RECEIPT_DRY_RUN")]
    dry_run: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "RECEIPT_VERBOSE")]
    verbose: bool,
}

impl Cli {
    /// The one-shot selection requested by flags, if any.
    fn selection(&self) -> Option<Selection> {
        if let Some(n) = self.count {
            return Some(Selection::MostRecent(n));
        }
        if self.before.is_some() || self.after.is_some() {
            return Some(Selection::Window {
                before: self.before,
                after: self.after,
            });
        }
        None
    }
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| format!("expected YYYY-MM-DD, got '{s}': {e}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is normal; real environment variables still apply.
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build config ─────────────────────────────────────────────────────
    let config = build_config(&cli).context("Invalid configuration")?;
    let sources: Vec<String> = config.sources.iter().map(|s| s.source_key()).collect();
    tracing::info!("Configured sources: {}", sources.join(", "));

    let mut dispatcher =
        Dispatcher::from_config(config).context("Failed to set up the receipt pipeline")?;

    // ── One-shot mode ────────────────────────────────────────────────────
    if let Some(selection) = cli.selection() {
        let report = dispatcher
            .print_selection(selection)
            .await
            .context("One-shot print failed")?;
        print_summary(&report);
        return Ok(());
    }

    // ── Poll until Ctrl-C ────────────────────────────────────────────────
    dispatcher
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Cannot listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
        .context("Poller stopped")?;
    Ok(())
}

/// Map CLI args to `PollerConfig`.
fn build_config(cli: &Cli) -> Result<PollerConfig> {
    let mut builder = PollerConfig::builder()
        .airtable_api_key(cli.airtable_api_key.clone())
        .optional_source(
            GrantType::Sprig,
            cli.sprig_base_id.clone(),
            cli.sprig_table_name.clone(),
        )
        .optional_source(
            GrantType::OnBoard,
            cli.onboard_base_id.clone(),
            cli.onboard_table_name.clone(),
        )
        .optional_source(
            GrantType::Unified,
            cli.unified_base_id.clone(),
            cli.unified_table_name.clone(),
        )
        .timezone(cli.timezone.clone())
        .poll_interval_secs(cli.poll_interval)
        .ledger_path(cli.ledger.clone())
        .work_dir(cli.work_dir.clone())
        .dry_run(cli.dry_run)
        .http_timeout_secs(cli.http_timeout)
        .command_timeout_secs(cli.command_timeout)
        .max_record_attempts(cli.max_attempts);

    if let Some(ref printer) = cli.printer {
        builder = builder.printer(printer.clone());
    }
    if let Some(ref token) = cli.github_token {
        builder = builder.github_token(token.clone());
    }
    if let Some(ref path) = cli.pdfium_lib {
        builder = builder.pdfium_library(path.clone());
    }
    if let Some(ref program) = cli.preview_command {
        builder = builder.preview(PreviewCommand {
            program: program.clone(),
            ..PreviewCommand::default()
        });
    }

    Ok(builder.build()?)
}

fn print_summary(report: &CycleReport) {
    let mark = if report.record_failures == 0 && report.print_failures == 0 {
        green("✔")
    } else {
        cyan("⚠")
    };
    eprintln!(
        "{}  {}/{} receipts rendered",
        mark, report.rendered, report.new_records
    );
    if report.print_failures > 0 || report.record_failures > 0 || report.sources_failed > 0 {
        eprintln!(
            "   {}",
            dim(&format!(
                "{} not printed  /  {} failed  /  {} sources unavailable",
                report.print_failures, report.record_failures, report.sources_failed
            ))
        );
    }
}
