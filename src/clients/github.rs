//! GitHub: pull-request file listings and raw file contents.

use crate::clients::{get_bytes, get_json, join_segments};
use crate::error::{ArtifactError, EnrichmentError, ServiceError};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::fmt;
use tracing::debug;

/// Default REST API root.
pub const GITHUB_API_BASE: &str = "https://api.github.com";
/// Default raw-content root.
pub const GITHUB_RAW_BASE: &str = "https://raw.githubusercontent.com";

/// Files per page when listing a pull request. GitHub's maximum.
const FILES_PER_PAGE: usize = 100;
/// GitHub stops listing pull request files after 3000 entries.
const MAX_FILE_PAGES: usize = 30;

static RE_PULL_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:https?://)?(?:www\.)?github\.com/([A-Za-z0-9_.-]+)/([A-Za-z0-9_.-]+)/pull/(\d+)(?:[/?#].*)?$")
        .unwrap()
});

/// A parsed `github.com/<owner>/<repo>/pull/<n>` reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PullRequestRef {
    pub owner: String,
    pub repo: String,
    pub number: u64,
}

impl PullRequestRef {
    /// Parse a pull request URL. Trailing path parts such as `/files` are
    /// accepted; anything that does not name a pull request is rejected.
    pub fn parse(reference: &str) -> Result<Self, EnrichmentError> {
        let malformed = || EnrichmentError::MalformedReference {
            reference: reference.to_string(),
        };
        let caps = RE_PULL_URL.captures(reference.trim()).ok_or_else(malformed)?;
        let number = caps[3].parse().map_err(|_| malformed())?;
        Ok(Self {
            owner: caps[1].to_string(),
            repo: caps[2].to_string(),
            number,
        })
    }
}

impl fmt::Display for PullRequestRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.owner, self.repo, self.number)
    }
}

/// Repository and commit a pull request's head points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub repo: String,
    /// Commit SHA or branch name.
    pub git_ref: String,
}

/// Raw file contents, classified by whether they decode as UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContent {
    Text(String),
    Binary(Vec<u8>),
}

impl FileContent {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        match String::from_utf8(bytes) {
            Ok(text) => FileContent::Text(text),
            Err(e) => FileContent::Binary(e.into_bytes()),
        }
    }

    /// The text of a file expected to be text.
    pub fn into_text(self, path: &str) -> Result<String, ArtifactError> {
        match self {
            FileContent::Text(text) => Ok(text),
            FileContent::Binary(_) => Err(ArtifactError::UnexpectedBinary {
                path: path.to_string(),
            }),
        }
    }

    /// The bytes of a file expected to be binary.
    pub fn into_bytes(self, path: &str) -> Result<Vec<u8>, ArtifactError> {
        match self {
            FileContent::Binary(bytes) => Ok(bytes),
            FileContent::Text(_) => Err(ArtifactError::UnexpectedText {
                path: path.to_string(),
            }),
        }
    }
}

/// A source-code host that can describe pull requests.
#[async_trait]
pub trait CodeHost: Send + Sync {
    /// Paths of every file the pull request touches, in API order.
    async fn changed_files(&self, pr: &PullRequestRef) -> Result<Vec<String>, ServiceError>;

    /// Repository and commit of the pull request's head.
    async fn head(&self, pr: &PullRequestRef) -> Result<RepoRef, ServiceError>;

    /// Contents of `path` at `repo`.
    async fn file(&self, repo: &RepoRef, path: &str) -> Result<FileContent, ServiceError>;
}

#[derive(Debug, Deserialize)]
struct PullFile {
    filename: String,
}

#[derive(Debug, Deserialize)]
struct PullRequest {
    head: PullHead,
}

#[derive(Debug, Deserialize)]
struct PullHead {
    sha: String,
    /// `null` when the head fork has been deleted.
    repo: Option<PullRepo>,
}

#[derive(Debug, Deserialize)]
struct PullRepo {
    name: String,
    owner: PullOwner,
}

#[derive(Debug, Deserialize)]
struct PullOwner {
    login: String,
}

/// [`CodeHost`] backed by the GitHub REST API.
#[derive(Clone)]
pub struct GitHubClient {
    client: reqwest::Client,
    token: Option<String>,
    api_base: String,
    raw_base: String,
    timeout_secs: u64,
}

impl fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitHubClient")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("api_base", &self.api_base)
            .field("raw_base", &self.raw_base)
            .finish()
    }
}

impl GitHubClient {
    pub fn new(client: reqwest::Client, token: Option<String>, timeout_secs: u64) -> Self {
        Self {
            client,
            token,
            api_base: GITHUB_API_BASE.to_string(),
            raw_base: GITHUB_RAW_BASE.to_string(),
            timeout_secs,
        }
    }

    fn get(&self, url: reqwest::Url) -> reqwest::RequestBuilder {
        let request = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json");
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl CodeHost for GitHubClient {
    async fn changed_files(&self, pr: &PullRequestRef) -> Result<Vec<String>, ServiceError> {
        let number = pr.number.to_string();
        let url = join_segments(
            &self.api_base,
            ["repos", pr.owner.as_str(), pr.repo.as_str(), "pulls", number.as_str(), "files"],
        )?;
        let url_str = url.to_string();

        let mut files = Vec::new();
        for page in 1..=MAX_FILE_PAGES {
            let request = self.get(url.clone()).query(&[
                ("per_page", FILES_PER_PAGE.to_string()),
                ("page", page.to_string()),
            ]);
            let batch: Vec<PullFile> = get_json(request, &url_str, self.timeout_secs).await?;
            let n = batch.len();
            files.extend(batch.into_iter().map(|f| f.filename));
            if n < FILES_PER_PAGE {
                break;
            }
        }
        debug!("{}: {} changed files", pr, files.len());
        Ok(files)
    }

    async fn head(&self, pr: &PullRequestRef) -> Result<RepoRef, ServiceError> {
        let number = pr.number.to_string();
        let url = join_segments(
            &self.api_base,
            ["repos", pr.owner.as_str(), pr.repo.as_str(), "pulls", number.as_str()],
        )?;
        let url_str = url.to_string();
        let body: PullRequest = get_json(self.get(url), &url_str, self.timeout_secs).await?;
        let repo = body.head.repo.ok_or_else(|| ServiceError::Decode {
            url: url_str.clone(),
            reason: "pull request head repository no longer exists".to_string(),
        })?;
        Ok(RepoRef {
            owner: repo.owner.login,
            repo: repo.name,
            git_ref: body.head.sha,
        })
    }

    async fn file(&self, repo: &RepoRef, path: &str) -> Result<FileContent, ServiceError> {
        let segments = [repo.owner.as_str(), repo.repo.as_str(), repo.git_ref.as_str()]
            .into_iter()
            .chain(path.split('/').filter(|s| !s.is_empty()));
        let url = join_segments(&self.raw_base, segments)?;
        let url_str = url.to_string();
        let bytes = get_bytes(self.get(url), &url_str, self.timeout_secs).await?;
        Ok(FileContent::from_bytes(bytes))
    }
}
