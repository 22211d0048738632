//! ユニットテスト用のスクリプト化バックエンド。

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::domain::error::ApiError;
use crate::domain::job::JobKind;
use crate::domain::report::StatusReport;
use crate::domain::wire::{Activity, ActivityFeed, FileEntry};
use crate::infra::backend::JobBackend;

/// 呼び出しごとに用意した応答を返すバックエンド。
///
/// ステータス応答のキューが尽きたら `running 0%` を返し続ける。
pub(crate) struct FakeBackend {
    submit: Mutex<Result<String, ApiError>>,
    statuses: Mutex<VecDeque<Result<StatusReport, ApiError>>>,
    status_by_id: Mutex<HashMap<String, Result<StatusReport, ApiError>>>,
    status_gate: Mutex<Option<oneshot::Receiver<()>>>,
    kills: Mutex<VecDeque<Result<(), ApiError>>>,
    kill_gate: Mutex<Option<oneshot::Receiver<()>>>,
    activities: Mutex<Result<ActivityFeed, ApiError>>,
    pub status_calls: AtomicUsize,
    pub kill_calls: AtomicUsize,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            submit: Mutex::new(Ok("abc123".to_string())),
            statuses: Mutex::new(VecDeque::new()),
            status_by_id: Mutex::new(HashMap::new()),
            status_gate: Mutex::new(None),
            kills: Mutex::new(VecDeque::new()),
            kill_gate: Mutex::new(None),
            activities: Mutex::new(Ok(ActivityFeed::default())),
            status_calls: AtomicUsize::new(0),
            kill_calls: AtomicUsize::new(0),
        }
    }

    pub fn failing_submit(self, err: ApiError) -> Self {
        *self.submit.lock() = Err(err);
        self
    }

    pub fn push_status(&self, result: Result<StatusReport, ApiError>) {
        self.statuses.lock().push_back(result);
    }

    pub fn set_status_for(&self, job_id: &str, result: Result<StatusReport, ApiError>) {
        self.status_by_id.lock().insert(job_id.to_string(), result);
    }

    pub fn push_kill(&self, result: Result<(), ApiError>) {
        self.kills.lock().push_back(result);
    }

    pub fn set_activities(&self, result: Result<Vec<Activity>, ApiError>) {
        *self.activities.lock() = result.map(ActivityFeed::new);
    }

    pub fn set_feed(&self, feed: ActivityFeed) {
        *self.activities.lock() = Ok(feed);
    }

    /// 次のステータス取得を、返り値の Sender が送信されるまで保留させる
    pub fn hold_next_status(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.status_gate.lock() = Some(rx);
        tx
    }

    /// 次の kill を、返り値の Sender が送信されるまで保留させる
    pub fn hold_next_kill(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.kill_gate.lock() = Some(rx);
        tx
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn kill_calls(&self) -> usize {
        self.kill_calls.load(Ordering::SeqCst)
    }
}

pub(crate) fn activity(id: &str, kind: &str) -> Activity {
    Activity {
        id: id.to_string(),
        kind: kind.to_string(),
        title: format!("{kind} {id}"),
        status: "running".to_string(),
        progress: None,
        timestamp: "2025-01-15T10:30:00Z".to_string(),
    }
}

#[async_trait]
impl JobBackend for FakeBackend {
    async fn submit(&self, _kind: JobKind, _config: &serde_json::Value) -> Result<String, ApiError> {
        self.submit.lock().clone()
    }

    async fn job_status(&self, job_id: &str) -> Result<StatusReport, ApiError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.status_gate.lock().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        if let Some(result) = self.status_by_id.lock().get(job_id) {
            return result.clone();
        }
        self.statuses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(StatusReport::running(0, Vec::new())))
    }

    async fn kill(&self, _job_id: &str) -> Result<(), ApiError> {
        self.kill_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.kill_gate.lock().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        self.kills.lock().pop_front().unwrap_or(Ok(()))
    }

    async fn activities(&self) -> Result<ActivityFeed, ApiError> {
        self.activities.lock().clone()
    }

    async fn list_files(&self, directory: &str) -> Result<Vec<FileEntry>, ApiError> {
        Ok(vec![FileEntry {
            name: "tasks.json".to_string(),
            path: format!("{directory}/tasks.json"),
            size: None,
            is_dir: false,
        }])
    }

    fn name(&self) -> &str {
        "fake"
    }
}
