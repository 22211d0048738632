use serde::Serialize;

use super::job::JobStatus;

/// UI に渡すエラーコード
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorCode {
    #[serde(rename = "E_SUBMISSION")]
    Submission,
    #[serde(rename = "E_POLL")]
    TransientPoll,
    #[serde(rename = "E_CANCEL")]
    Cancellation,
    #[serde(rename = "E_REGISTRY")]
    Registry,
    #[serde(rename = "E_CONFIG")]
    Config,
    #[serde(rename = "E_INTERNAL")]
    Internal,
}

/// Backend Job API 呼び出しの失敗
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request timed out")]
    Timeout,
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("invalid response: {0}")]
    Decode(String),
}

/// ジョブを作成できなかった（終端、自動リトライなし）
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmissionError {
    #[error("backend rejected submission (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("submission request failed: {0}")]
    Transport(String),
    #[error("submission response invalid: {0}")]
    InvalidResponse(String),
    #[error("monitor already in state {0}")]
    AlreadyStarted(JobStatus),
    #[error("monitor has been disposed")]
    Disposed,
}

/// 1 回分のステータス取得の失敗（ティックをスキップして回復）
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransientPollError {
    #[error("status fetch failed: {0}")]
    Transport(String),
    #[error("status response malformed: {0}")]
    Malformed(String),
}

/// kill リクエストの失敗（running のまま、再試行可）
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CancellationError {
    #[error("backend refused cancellation (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("cancellation request failed: {0}")]
    Transport(String),
}

/// 一覧の取得失敗（アクティビティフィード自体が取れない場合のみ）
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("activity feed unavailable: {0}")]
    Feed(#[from] ApiError),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {message}")]
    Parse { path: String, message: String },
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl From<ApiError> for SubmissionError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Status { status, message } => Self::Rejected { status, message },
            ApiError::Decode(msg) => Self::InvalidResponse(msg),
            ApiError::Transport(msg) => Self::Transport(msg),
            ApiError::Timeout => Self::Transport("request timed out".to_string()),
        }
    }
}

impl From<ApiError> for TransientPollError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Decode(msg) => Self::Malformed(msg),
            other => Self::Transport(other.to_string()),
        }
    }
}

impl From<ApiError> for CancellationError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Status { status, message } => Self::Rejected { status, message },
            other => Self::Transport(other.to_string()),
        }
    }
}

impl SubmissionError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::AlreadyStarted(_) | Self::Disposed => ErrorCode::Internal,
            _ => ErrorCode::Submission,
        }
    }
}

impl TransientPollError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::TransientPoll
    }
}

impl CancellationError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::Cancellation
    }
}

impl RegistryError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::Registry
    }
}

impl ConfigError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::Config
    }
}
