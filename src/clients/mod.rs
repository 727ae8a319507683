//! HTTP collaborators: the record source, the code host and asset endpoints.
//!
//! Each client sits behind a trait so the dispatcher can be driven by
//! in-memory fakes. All real clients share one construction path
//! ([`http_client`]) so every outbound request carries the same bounded
//! timeout and User-Agent.

pub mod airtable;
pub mod assets;
pub mod github;

use crate::error::{ReceiptError, ServiceError};
use std::time::Duration;
use tracing::debug;

/// User-Agent sent with every request. GitHub rejects requests without one.
pub const USER_AGENT: &str = concat!("receipt-printer/", env!("CARGO_PKG_VERSION"));

/// Build a `reqwest::Client` with the configured request timeout.
pub fn http_client(timeout_secs: u64) -> Result<reqwest::Client, ReceiptError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| ReceiptError::InvalidConfig(format!("cannot build HTTP client: {e}")))
}

/// Send a request and turn transport failures and non-2xx statuses into
/// [`ServiceError`]s.
pub(crate) async fn send(
    request: reqwest::RequestBuilder,
    url: &str,
    timeout_secs: u64,
) -> Result<reqwest::Response, ServiceError> {
    debug!("GET {}", url);
    let response = request
        .send()
        .await
        .map_err(|e| ServiceError::from_reqwest(url, timeout_secs, e))?;

    if !response.status().is_success() {
        return Err(ServiceError::Http {
            status: response.status().as_u16(),
            url: url.to_string(),
        });
    }
    Ok(response)
}

/// Send a request and deserialise a JSON body.
pub(crate) async fn get_json<T: serde::de::DeserializeOwned>(
    request: reqwest::RequestBuilder,
    url: &str,
    timeout_secs: u64,
) -> Result<T, ServiceError> {
    send(request, url, timeout_secs)
        .await?
        .json::<T>()
        .await
        .map_err(|e| ServiceError::from_reqwest(url, timeout_secs, e))
}

/// Send a request and collect the raw body.
pub(crate) async fn get_bytes(
    request: reqwest::RequestBuilder,
    url: &str,
    timeout_secs: u64,
) -> Result<Vec<u8>, ServiceError> {
    let bytes = send(request, url, timeout_secs)
        .await?
        .bytes()
        .await
        .map_err(|e| ServiceError::from_reqwest(url, timeout_secs, e))?;
    Ok(bytes.to_vec())
}

/// Parse a base URL and append path segments, percent-encoding each one.
pub(crate) fn join_segments<'a>(
    base: &str,
    segments: impl IntoIterator<Item = &'a str>,
) -> Result<reqwest::Url, ServiceError> {
    let invalid = |reason: String| ServiceError::Decode {
        url: base.to_string(),
        reason,
    };
    let mut url = reqwest::Url::parse(base).map_err(|e| invalid(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| invalid("URL cannot be a base".to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segments_are_encoded() {
        let url = join_segments("https://api.airtable.com/v0", ["appX", "Grant Submissions"]).unwrap();
        assert_eq!(url.as_str(), "https://api.airtable.com/v0/appX/Grant%20Submissions");
    }

    #[test]
    fn trailing_slash_is_not_doubled() {
        let url = join_segments("https://raw.githubusercontent.com/", ["o", "r", "main", "a b.md"]).unwrap();
        assert_eq!(url.as_str(), "https://raw.githubusercontent.com/o/r/main/a%20b.md");
    }

    #[test]
    fn client_builds() {
        assert!(http_client(5).is_ok());
    }
}
