//! Airtable record listing.
//!
//! `GET https://api.airtable.com/v0/<base>/<table>` returns at most 100
//! records per page plus an `offset` cursor while more remain. A source is
//! only considered fetched once every page has been read; a failure on any
//! page fails the whole listing so the dispatcher never diffs a partial set.

use crate::clients::{get_json, join_segments};
use crate::config::SourceConfig;
use crate::error::ServiceError;
use crate::model::RawRecord;
use async_trait::async_trait;
use serde::Deserialize;
use std::future::Future;
use tracing::debug;

/// Default Airtable REST endpoint.
pub const AIRTABLE_API_BASE: &str = "https://api.airtable.com/v0";

/// Upper bound on pages read per listing; guards against a cursor loop.
const MAX_PAGES: usize = 1_000;

/// Supplies the full current record set of a source.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Every record currently in `source`, across all pages.
    async fn fetch_all(&self, source: &SourceConfig) -> Result<Vec<RawRecord>, ServiceError>;
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    records: Vec<RawRecord>,
    #[serde(default)]
    offset: Option<String>,
}

/// Query parameters for one page of a listing.
pub fn list_query(source: &SourceConfig, offset: Option<&str>) -> Vec<(String, String)> {
    let mut query = Vec::new();
    if let Some(view) = &source.view {
        query.push(("view".to_string(), view.clone()));
    }
    if let Some(field) = &source.require_nonempty {
        query.push(("filterByFormula".to_string(), format!("NOT({{{field}}} = '')")));
    }
    if let Some(field) = &source.sort_field {
        query.push(("sort[0][field]".to_string(), field.clone()));
        query.push((
            "sort[0][direction]".to_string(),
            source.sort_direction.as_str().to_string(),
        ));
    }
    if let Some(offset) = offset {
        query.push(("offset".to_string(), offset.to_string()));
    }
    query
}

/// [`RecordSource`] backed by the Airtable REST API.
#[derive(Debug, Clone)]
pub struct AirtableSource {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
    timeout_secs: u64,
}

impl AirtableSource {
    pub fn new(client: reqwest::Client, api_key: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            api_base: AIRTABLE_API_BASE.to_string(),
            timeout_secs,
        }
    }

    /// Point the client at a different API root.
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }
}

#[async_trait]
impl RecordSource for AirtableSource {
    async fn fetch_all(&self, source: &SourceConfig) -> Result<Vec<RawRecord>, ServiceError> {
        let url = join_segments(&self.api_base, [source.base_id.as_str(), source.table.as_str()])?;
        let url_str = url.to_string();
        let (url, url_str) = (&url, url_str.as_str());

        let records = collect_pages(url_str, MAX_PAGES, move |offset| {
            let request = self
                .client
                .get(url.clone())
                .bearer_auth(&self.api_key)
                .query(&list_query(source, offset.as_deref()));
            get_json::<ListResponse>(request, url_str, self.timeout_secs)
        })
        .await?;
        debug!("{}: {} records listed", source.source_key(), records.len());
        Ok(records)
    }
}

/// Read pages until the cursor runs out.
///
/// A repeated cursor, or a cursor still present after `max_pages` pages,
/// fails the listing instead of returning what was read so far.
async fn collect_pages<F, Fut>(
    url: &str,
    max_pages: usize,
    mut fetch_page: F,
) -> Result<Vec<RawRecord>, ServiceError>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<ListResponse, ServiceError>>,
{
    let mut records = Vec::new();
    let mut offset: Option<String> = None;
    for page in 1..=max_pages {
        let body = fetch_page(offset.clone()).await?;
        debug!("{}: page {} returned {} records", url, page, body.records.len());
        records.extend(body.records);

        match body.offset {
            None => return Ok(records),
            Some(next) if offset.as_deref() == Some(next.as_str()) => {
                return Err(ServiceError::Decode {
                    url: url.to_string(),
                    reason: format!("offset cursor '{next}' repeated on page {page}"),
                });
            }
            Some(next) => offset = Some(next),
        }
    }
    Err(ServiceError::Decode {
        url: url.to_string(),
        reason: format!("listing still has more pages after {max_pages}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SortDirection;
    use crate::model::GrantType;

    fn lookup<'a>(query: &'a [(String, String)], key: &str) -> Option<&'a str> {
        query.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    #[test]
    fn sprig_query_filters_and_sorts() {
        let source = SourceConfig::new(GrantType::Sprig, "appS", "Submissions");
        let q = list_query(&source, None);
        assert_eq!(
            lookup(&q, "filterByFormula"),
            Some("NOT({How did you hear about Sprig?} = '')")
        );
        assert_eq!(lookup(&q, "sort[0][field]"), Some("Submitted AT"));
        assert_eq!(lookup(&q, "sort[0][direction]"), Some("desc"));
        assert_eq!(lookup(&q, "offset"), None);
        assert_eq!(lookup(&q, "view"), None);
    }

    #[test]
    fn onboard_query_has_no_filter() {
        let source = SourceConfig::new(GrantType::OnBoard, "appO", "Grants")
            .with_view("Approved")
            .with_sort("Created", SortDirection::Asc);
        let q = list_query(&source, Some("itr123"));
        assert_eq!(lookup(&q, "filterByFormula"), None);
        assert_eq!(lookup(&q, "view"), Some("Approved"));
        assert_eq!(lookup(&q, "sort[0][direction]"), Some("asc"));
        assert_eq!(lookup(&q, "offset"), Some("itr123"));
    }

    #[test]
    fn list_response_parses_airtable_shape() {
        let body: ListResponse = serde_json::from_str(
            r#"{"records":[{"id":"rec1","createdTime":"2024-01-02T03:04:05.000Z","fields":{"Name":"Ada"}}],"offset":"itr/rec1"}"#,
        )
        .unwrap();
        assert_eq!(body.records.len(), 1);
        assert_eq!(body.records[0].text("Name").as_deref(), Some("Ada"));
        assert_eq!(body.offset.as_deref(), Some("itr/rec1"));

        let last: ListResponse = serde_json::from_str(r#"{"records":[]}"#).unwrap();
        assert!(last.offset.is_none());
    }

    fn page(ids: &[&str], offset: Option<&str>) -> ListResponse {
        ListResponse {
            records: ids
                .iter()
                .map(|id| {
                    serde_json::from_value(serde_json::json!({
                        "id": id,
                        "createdTime": "2024-01-02T03:04:05.000Z",
                    }))
                    .unwrap()
                })
                .collect(),
            offset: offset.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn pages_are_followed_to_the_end() {
        let mut seen = Vec::new();
        let records = collect_pages("https://airtable.test/t", 10, |offset| {
            seen.push(offset.clone());
            let body = match offset.as_deref() {
                None => page(&["rec1", "rec2"], Some("itr1")),
                Some("itr1") => page(&["rec3"], None),
                other => panic!("unexpected cursor {other:?}"),
            };
            async move { Ok(body) }
        })
        .await
        .unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(seen, vec![None, Some("itr1".to_string())]);
    }

    #[tokio::test]
    async fn listing_cut_off_by_the_page_cap_is_an_error() {
        let mut n = 0;
        let err = collect_pages("https://airtable.test/t", 3, |_| {
            n += 1;
            let cursor = format!("itr{n}");
            let body = page(&["rec"], Some(cursor.as_str()));
            async move { Ok(body) }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::Decode { .. }), "got: {err}");
        assert_eq!(n, 3);
    }

    #[tokio::test]
    async fn repeated_cursor_is_an_error() {
        let err = collect_pages("https://airtable.test/t", 10, |_| async {
            Ok(page(&["rec"], Some("itr-same")))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::Decode { .. }), "got: {err}");
    }
}
