pub mod http;

pub use http::HttpJobBackend;

use async_trait::async_trait;

use crate::domain::error::ApiError;
use crate::domain::job::JobKind;
use crate::domain::report::StatusReport;
use crate::domain::wire::{ActivityFeed, FileEntry};

/// Backend Job API trait（監視コアはこの境界越しにのみジョブを観測・操作する）
#[async_trait]
pub trait JobBackend: Send + Sync {
    /// ジョブを投入し、バックエンドが採番した job id を返す
    async fn submit(&self, kind: JobKind, config: &serde_json::Value) -> Result<String, ApiError>;

    /// 現在のステータスとログバッファ全体を取得する
    async fn job_status(&self, job_id: &str) -> Result<StatusReport, ApiError>;

    /// キャンセル要求
    async fn kill(&self, job_id: &str) -> Result<(), ApiError>;

    /// 直近のジョブ一覧（ベストエフォート。壊れたエントリは `skipped` に数える）
    async fn activities(&self) -> Result<ActivityFeed, ApiError>;

    /// 入力ファイルの探索
    async fn list_files(&self, directory: &str) -> Result<Vec<FileEntry>, ApiError>;

    fn name(&self) -> &str;
}
