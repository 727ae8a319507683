//! Asset endpoints: the Sprig thumbnail service and plain image downloads.

use crate::clients::{get_bytes, get_json};
use crate::error::ServiceError;
use crate::pipeline::thumbnail::ThumbnailPayload;
use async_trait::async_trait;

/// Sprig's thumbnail endpoint; the game name is passed as `key`.
pub const SPRIG_THUMBNAIL_ENDPOINT: &str = "https://sprig.hackclub.com/api/thumbnail";

/// Fetches images referenced by records.
#[async_trait]
pub trait AssetService: Send + Sync {
    /// Thumbnail payload for a Sprig game.
    async fn thumbnail(&self, key: &str) -> Result<ThumbnailPayload, ServiceError>;

    /// Raw bytes behind an image URL.
    async fn download(&self, url: &str) -> Result<Vec<u8>, ServiceError>;
}

/// [`AssetService`] over plain HTTP.
#[derive(Debug, Clone)]
pub struct HttpAssets {
    client: reqwest::Client,
    thumbnail_endpoint: String,
    timeout_secs: u64,
}

impl HttpAssets {
    pub fn new(client: reqwest::Client, timeout_secs: u64) -> Self {
        Self {
            client,
            thumbnail_endpoint: SPRIG_THUMBNAIL_ENDPOINT.to_string(),
            timeout_secs,
        }
    }

    pub fn with_thumbnail_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.thumbnail_endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl AssetService for HttpAssets {
    async fn thumbnail(&self, key: &str) -> Result<ThumbnailPayload, ServiceError> {
        let request = self
            .client
            .get(&self.thumbnail_endpoint)
            .query(&[("key", key)]);
        let url = format!("{}?key={}", self.thumbnail_endpoint, key);
        get_json(request, &url, self.timeout_secs).await
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, ServiceError> {
        get_bytes(self.client.get(url), url, self.timeout_secs).await
    }
}
