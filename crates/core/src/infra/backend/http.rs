use async_trait::async_trait;
use reqwest::{Response, StatusCode, Url};

use super::JobBackend;
use crate::domain::error::ApiError;
use crate::domain::job::JobKind;
use crate::domain::report::StatusReport;
use crate::domain::settings::BackendSettings;
use crate::domain::wire::{ActivityFeed, ErrorBody, FileEntry, FilesResponse, SubmitResponse};

/// HTTP 経由の Backend Job API クライアント
pub struct HttpJobBackend {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpJobBackend {
    pub fn new(settings: &BackendSettings) -> Result<Self, ApiError> {
        let base_url = Url::parse(settings.base_url.trim())
            .map_err(|e| ApiError::Transport(format!("invalid base URL {}: {e}", settings.base_url)))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::Transport(format!(
                "base URL cannot carry a path: {base_url}"
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .build()
            .map_err(|e| ApiError::Transport(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn read_body(response: Response) -> Result<String, ApiError> {
        response.text().await.map_err(map_transport)
    }
}

fn map_transport(e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::Timeout
    } else {
        ApiError::Transport(format!("HTTP request failed: {e}"))
    }
}

/// 非 2xx を `ApiError::Status` に変換する。メッセージは `{ error }` を優先。
async fn ensure_success(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => {
            log::debug!("failed to read error body (HTTP {}): {e}", status.as_u16());
            String::new()
        }
    };
    Err(ApiError::Status {
        status: status.as_u16(),
        message: error_message(status, &body),
    })
}

fn error_message(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => parsed.error,
        Err(_) if body.trim().is_empty() => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
        Err(_) => body.trim().to_string(),
    }
}

fn decode<T: serde::de::DeserializeOwned>(body: &str, what: &str) -> Result<T, ApiError> {
    serde_json::from_str(body).map_err(|e| ApiError::Decode(format!("{what}: {e}")))
}

#[async_trait]
impl JobBackend for HttpJobBackend {
    async fn submit(&self, kind: JobKind, config: &serde_json::Value) -> Result<String, ApiError> {
        let url = self.endpoint(&["jobs", kind.as_str()]);
        log::debug!("POST {url}");

        let response = self
            .client
            .post(url)
            .json(config)
            .send()
            .await
            .map_err(map_transport)?;
        let status = response.status().as_u16();
        let response = ensure_success(response).await?;
        let body = Self::read_body(response).await?;
        let parsed: SubmitResponse = decode(&body, "submit response")?;

        match (parsed.job_id, parsed.error) {
            (Some(job_id), _) if !job_id.trim().is_empty() => Ok(job_id),
            (_, Some(error)) => Err(ApiError::Status {
                status,
                message: error,
            }),
            _ => Err(ApiError::Decode("submit response has no job_id".to_string())),
        }
    }

    async fn job_status(&self, job_id: &str) -> Result<StatusReport, ApiError> {
        let url = self.endpoint(&["job", job_id]);
        let response = self.client.get(url).send().await.map_err(map_transport)?;
        let response = ensure_success(response).await?;
        let body = Self::read_body(response).await?;
        let value: serde_json::Value = decode(&body, "status response")?;
        StatusReport::from_value(&value).map_err(ApiError::Decode)
    }

    async fn kill(&self, job_id: &str) -> Result<(), ApiError> {
        let url = self.endpoint(&["job", job_id, "kill"]);
        log::debug!("POST {url}");
        let response = self.client.post(url).send().await.map_err(map_transport)?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn activities(&self) -> Result<ActivityFeed, ApiError> {
        let url = self.endpoint(&["activities"]);
        let response = self.client.get(url).send().await.map_err(map_transport)?;
        let response = ensure_success(response).await?;
        let body = Self::read_body(response).await?;
        let value: serde_json::Value = decode(&body, "activity feed")?;
        let feed = ActivityFeed::from_value(&value).map_err(ApiError::Decode)?;
        if feed.skipped > 0 {
            log::warn!("activity feed: skipped {} malformed entr(ies)", feed.skipped);
        }
        Ok(feed)
    }

    async fn list_files(&self, directory: &str) -> Result<Vec<FileEntry>, ApiError> {
        let mut url = self.endpoint(&["files"]);
        url.query_pairs_mut().append_pair("directory", directory);
        let response = self.client.get(url).send().await.map_err(map_transport)?;
        let response = ensure_success(response).await?;
        let body = Self::read_body(response).await?;
        let files: FilesResponse = decode(&body, "file listing")?;
        Ok(files.into_entries())
    }

    fn name(&self) -> &str {
        "http"
    }
}
