use super::{CommitRequest, ContentStore, StoreError, StoredDocument};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

const API_VERSION: &str = "2022-11-28";
const CLIENT_NAME: &str = "recipe-publisher";

#[derive(Deserialize)]
struct ContentsResponse {
    sha: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Serialize)]
struct PutContentsRequest<'a> {
    message: &'a str,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

#[derive(Deserialize)]
struct GitHubErrorBody {
    message: String,
}

/// Reads and commits a single file through the GitHub contents API.
/// The version token is the blob sha of the file.
pub struct GitHubStore {
    client: reqwest::Client,
    api_url: Url,
    owner: String,
    repo: String,
    token: String,
}

impl GitHubStore {
    pub fn new(api_url: Url, owner: String, repo: String, token: String) -> Self {
        GitHubStore {
            client: reqwest::Client::new(),
            api_url,
            owner,
            repo,
            token,
        }
    }

    // {api_url}/repos/{owner}/{repo}/contents/{path}
    fn contents_url(&self, path: &str) -> Result<Url, StoreError> {
        let mut url = self.api_url.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::InvalidPath(format!("{} is not a base URL", self.api_url)))?
            .pop_if_empty()
            .extend(["repos", self.owner.as_str(), self.repo.as_str(), "contents"])
            .extend(path.split('/').filter(|segment| !segment.is_empty()));
        Ok(url)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(&self.token)
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT, CLIENT_NAME)
            .header("X-GitHub-Api-Version", API_VERSION)
    }
}

#[async_trait]
impl ContentStore for GitHubStore {
    fn name(&self) -> &'static str {
        "github"
    }

    async fn fetch(&self, path: &str, branch: &str) -> Result<Option<StoredDocument>, StoreError> {
        let mut url = self.contents_url(path)?;
        url.query_pairs_mut().append_pair("ref", branch);

        let response = self.request(Method::GET, url).send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                status: status.as_u16(),
                detail: error_detail(&body),
            });
        }

        let contents = response.json::<ContentsResponse>().await?;
        let content = decode_content(&contents)?;

        Ok(Some(StoredDocument {
            content,
            version: contents.sha,
        }))
    }

    async fn commit(&self, request: CommitRequest) -> Result<(), StoreError> {
        let url = self.contents_url(&request.path)?;
        let body = PutContentsRequest {
            message: &request.message,
            content: STANDARD.encode(request.content.as_bytes()),
            branch: &request.branch,
            sha: request.version.as_deref(),
        };

        let response = self.request(Method::PUT, url).json(&body).send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(());
        }

        let detail = error_detail(&response.text().await.unwrap_or_default());
        match status {
            // Stale sha, or a create that raced with another writer
            StatusCode::CONFLICT
            | StatusCode::PRECONDITION_FAILED
            | StatusCode::UNPROCESSABLE_ENTITY => Err(StoreError::Conflict(detail)),
            _ => Err(StoreError::Status {
                status: status.as_u16(),
                detail,
            }),
        }
    }
}

fn decode_content(contents: &ContentsResponse) -> Result<String, StoreError> {
    match contents.encoding.as_deref() {
        None | Some("base64") => {}
        // Files over the contents API size limit come back with encoding "none"
        Some(other) => {
            return Err(StoreError::Encoding(format!("unsupported encoding {other:?}")));
        }
    }

    // The API wraps the base64 payload across lines
    let compact: String = contents.content.split_whitespace().collect();
    let bytes = STANDARD
        .decode(compact)
        .map_err(|e| StoreError::Encoding(e.to_string()))?;

    String::from_utf8(bytes).map_err(|e| StoreError::Encoding(e.to_string()))
}

fn error_detail(body: &str) -> String {
    serde_json::from_str::<GitHubErrorBody>(body)
        .map(|e| e.message)
        .unwrap_or_else(|_| body.trim().to_string())
}
