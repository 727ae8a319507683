//! Data types flowing through the pipeline: the raw Airtable record on one
//! end, the renderer-ready [`CanonicalDocument`] on the other.

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;

/// Which field schema a record follows.
///
/// Each configured source declares its grant type explicitly; the mapper
/// dispatches on it rather than sniffing field names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantType {
    /// Sprig game submissions (gallery pull requests).
    Sprig,
    /// OnBoard PCB grant applications.
    OnBoard,
    /// The shared schema used by newer grant programs.
    Unified,
}

impl GrantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantType::Sprig => "sprig",
            GrantType::OnBoard => "onboard",
            GrantType::Unified => "unified",
        }
    }
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One record as returned by the data source.
///
/// Field values are kept as raw JSON; any of them may be absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    pub id: String,
    #[serde(rename = "createdTime")]
    pub created_time: DateTime<Utc>,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl RawRecord {
    /// Read a field as display text.
    ///
    /// Strings are returned trimmed, numbers and booleans stringified, arrays
    /// of scalars joined with `", "`. Empty results are `None`.
    pub fn text(&self, field: &str) -> Option<String> {
        let value = self.fields.get(field)?;
        let text = match value {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => if *b { "Yes" } else { "No" }.to_string(),
            Value::Array(items) => items
                .iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s.trim().to_string()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(", "),
            Value::Null | Value::Object(_) => String::new(),
        };
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    /// Same as [`RawRecord::text`] but never absent.
    pub fn text_or_empty(&self, field: &str) -> String {
        self.text(field).unwrap_or_default()
    }

    /// Read a non-negative integer stored as a number or numeric string.
    pub fn integer(&self, field: &str) -> Option<u32> {
        match self.fields.get(field)? {
            Value::Number(n) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
                .and_then(|v| u32::try_from(v).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Read an ISO `YYYY-MM-DD` date.
    pub fn date(&self, field: &str) -> Option<NaiveDate> {
        let text = self.text(field)?;
        NaiveDate::parse_from_str(&text, "%Y-%m-%d").ok()
    }

    /// URL of the first attachment in an attachment field.
    pub fn first_attachment_url(&self, field: &str) -> Option<String> {
        match self.fields.get(field)? {
            Value::Array(items) => items
                .iter()
                .find_map(|item| item.get("url").and_then(Value::as_str))
                .map(str::to_string),
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            _ => None,
        }
    }
}

/// Physical location; each part may be omitted independently.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
}

impl Location {
    /// Present parts joined with `", "`, e.g. `"Burlington, VT, USA"`.
    pub fn display_line(&self) -> String {
        [&self.city, &self.state, &self.country]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    /// GitHub handle the avatar is derived from.
    pub handle: Option<String>,
    pub avatar_url: Option<String>,
    /// Downloaded avatar, when it could be fetched.
    #[serde(default)]
    pub avatar_path: Option<PathBuf>,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaEntry {
    pub question: String,
    pub answer: String,
}

/// A labelled QR code on the receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrCode {
    pub label: String,
    /// URL or `mailto:` link the code encodes.
    pub target: String,
    /// Generated PNG, filled in after mapping.
    pub image_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectInfo {
    pub name: String,
    /// Local thumbnail or PCB preview.
    pub image_path: Option<PathBuf>,
    pub html_description: Option<String>,
    pub qr_codes: Vec<QrCode>,
}

/// The normalised, renderer-ready form of one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalDocument {
    pub grant_type: GrantType,
    pub record_id: String,
    /// Creation time in the display timezone.
    pub created_at: DateTime<FixedOffset>,
    /// `created_at` formatted for the receipt header.
    pub created_at_display: String,
    pub identity: Identity,
    pub age: Option<u32>,
    pub qa: Vec<QaEntry>,
    pub project_info: Option<ProjectInfo>,
}

impl CanonicalDocument {
    /// Q&A entries with a non-empty answer, in order.
    pub fn visible_qa(&self) -> impl Iterator<Item = &QaEntry> {
        self.qa.iter().filter(|e| !e.answer.trim().is_empty())
    }
}

/// Artifacts the resolver derived for a record's project.
///
/// Everything is optional: a missing artifact leaves its field empty, and the
/// mapper decides whether an absent name is fatal for the grant type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectArtifacts {
    pub name: Option<String>,
    pub image_path: Option<PathBuf>,
    pub html_description: Option<String>,
    /// True when the project could not be resolved and the grant type treats
    /// the project as optional.
    pub skipped: bool,
}
