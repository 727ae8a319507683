//! Error types for the receipt-printer library.
//!
//! Failures fall into three tiers that map onto how far they propagate:
//!
//! * [`ReceiptError`] (**fatal**): the poller cannot run at all (missing
//!   configuration, a ledger file that exists but cannot be trusted). Returned
//!   from startup and from [`crate::dispatch::Dispatcher::poll_once`].
//!
//! * [`RecordError`] (**per record**): enrichment or rendering failed for one
//!   record. The record stays unmarked and reappears on the next cycle; the
//!   rest of the batch carries on.
//!
//! * [`ArtifactError`] (**per artifact**): one derived value (thumbnail, PCB
//!   preview, QR image, description) could not be produced. The document is
//!   still emitted with that field empty.

use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors that stop the poller.
#[derive(Debug, Error)]
pub enum ReceiptError {
    // ── Config errors ─────────────────────────────────────────────────────
    /// Required configuration is missing or invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Ledger errors ─────────────────────────────────────────────────────
    /// The ledger file exists but does not hold a valid ledger.
    ///
    /// Treating it as empty would reprint every historical record, so an
    /// operator has to repair or remove the file.
    #[error("Processed-records ledger '{path}' is corrupt: {detail}\nRepair or move the file aside before restarting.")]
    LedgerCorrupt { path: PathBuf, detail: String },

    /// The ledger file could not be read or written.
    #[error("Failed to access ledger '{path}': {source}")]
    LedgerIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A failed outbound call to Airtable, GitHub or an asset endpoint.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    /// The service answered with a non-success status.
    #[error("HTTP {status} from '{url}'")]
    Http { status: u16, url: String },

    /// The request did not complete within the configured timeout.
    #[error("Request to '{url}' timed out after {secs}s")]
    Timeout { url: String, secs: u64 },

    /// Connection, TLS or body-read failure.
    #[error("Request to '{url}' failed: {reason}")]
    Transport { url: String, reason: String },

    /// The body arrived but did not have the expected shape.
    #[error("Unexpected response from '{url}': {reason}")]
    Decode { url: String, reason: String },
}

impl ServiceError {
    /// Classify a `reqwest` error, keeping timeouts distinct.
    pub(crate) fn from_reqwest(url: &str, timeout_secs: u64, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ServiceError::Timeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else if err.is_decode() {
            ServiceError::Decode {
                url: url.to_string(),
                reason: err.to_string(),
            }
        } else {
            ServiceError::Transport {
                url: url.to_string(),
                reason: err.to_string(),
            }
        }
    }
}

/// Enrichment failed in a way that makes the record's receipt unusable.
#[derive(Debug, Clone, Error)]
pub enum EnrichmentError {
    /// A change-set reference could not be parsed.
    #[error("Malformed pull request reference '{reference}'")]
    MalformedReference { reference: String },

    /// A required remote call failed.
    #[error("{0}")]
    Service(#[from] ServiceError),

    /// A field the receipt cannot do without is absent.
    #[error("Required field '{field}' is missing")]
    MissingField { field: String },
}

/// One auxiliary artifact could not be produced.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("{0}")]
    Service(#[from] ServiceError),

    #[error("Image processing failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("Raw thumbnail is {actual} bytes, expected {expected} for {width}x{height} RGBA")]
    RawSizeMismatch {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("Thumbnail payload is invalid: {0}")]
    Payload(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Archive contains no fabrication files")]
    NoFabricationFiles,

    #[error("Toolchain '{program}' failed: {detail}")]
    Toolchain { program: String, detail: String },

    #[error("Toolchain '{program}' timed out after {secs}s")]
    ToolchainTimeout { program: String, secs: u64 },

    #[error("Expected toolchain output '{path}' was not produced")]
    MissingOutput { path: PathBuf },

    #[error("QR encoding failed: {0}")]
    Qr(String),

    #[error("QR target is empty")]
    EmptyTarget,

    #[error("Expected a binary file at '{path}' but got text")]
    UnexpectedText { path: String },

    #[error("Expected a text file at '{path}' but got binary data")]
    UnexpectedBinary { path: String },
}

/// The receipt PDF could not be produced.
#[derive(Debug, Error)]
pub enum RenderError {
    /// pdfium could not be loaded.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    Binding(String),

    /// pdfium rejected a page operation.
    #[error("PDF layout failed: {0}")]
    Layout(String),

    /// The finished PDF could not be written.
    #[error("Failed to write '{path}': {detail}")]
    Write { path: PathBuf, detail: String },

    /// The blocking render task died.
    #[error("Render task panicked: {0}")]
    Panicked(String),
}

/// Submitting the PDF to the print spooler failed.
#[derive(Debug, Error)]
pub enum PrintError {
    #[error("Failed to launch '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("'{program}' timed out after {secs}s")]
    Timeout { program: String, secs: u64 },
}

/// A single record could not be turned into a receipt.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("Enrichment failed: {0}")]
    Enrichment(#[from] EnrichmentError),

    #[error("Rendering failed: {0}")]
    Render(#[from] RenderError),

    #[error("Failed to prepare '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_corrupt_display_names_file() {
        let e = ReceiptError::LedgerCorrupt {
            path: PathBuf::from("processed_records.json"),
            detail: "expected value at line 1".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("processed_records.json"), "got: {msg}");
        assert!(msg.contains("line 1"), "got: {msg}");
    }

    #[test]
    fn service_error_wraps_into_enrichment() {
        let e: EnrichmentError = ServiceError::Http {
            status: 502,
            url: "https://api.github.com/x".into(),
        }
        .into();
        assert!(e.to_string().contains("502"));
    }

    #[test]
    fn raw_size_mismatch_display() {
        let e = ArtifactError::RawSizeMismatch {
            width: 2,
            height: 2,
            expected: 16,
            actual: 3,
        };
        let msg = e.to_string();
        assert!(msg.contains("2x2"), "got: {msg}");
        assert!(msg.contains("16"), "got: {msg}");
    }

    #[test]
    fn record_error_from_missing_field() {
        let e: RecordError = EnrichmentError::MissingField {
            field: "game name".into(),
        }
        .into();
        assert!(e.to_string().contains("game name"));
    }
}
