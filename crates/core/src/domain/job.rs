use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::report::{ReportedStatus, StatusReport};

// ─── JobKind ─────────────────────────────────────────────────────

/// ジョブ種別（`POST /jobs/{kind}` のパスセグメントに対応）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Generation,
    Verification,
    Evaluation,
    Judging,
    RubricAnalysis,
}

impl JobKind {
    pub const ALL: [JobKind; 5] = [
        JobKind::Generation,
        JobKind::Verification,
        JobKind::Evaluation,
        JobKind::Judging,
        JobKind::RubricAnalysis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generation => "generation",
            Self::Verification => "verification",
            Self::Evaluation => "evaluation",
            Self::Judging => "judging",
            Self::RubricAnalysis => "rubric_analysis",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase().replace('-', "_");
        JobKind::ALL
            .into_iter()
            .find(|k| k.as_str() == key)
            .ok_or_else(|| format!("unknown job kind: {s}"))
    }
}

// ─── JobStatus ───────────────────────────────────────────────────

/// クライアントから観測したジョブ状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    NotStarted,
    Starting,
    Running,
    Completed,
    Failed,
    Cancelled,
    TimedOut,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::TimedOut => "timed_out",
        }
    }

    /// 終端状態か（以後は二度と変化しない）
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::TimedOut
        )
    }

    /// バックエンドの表記ゆれを正規の語彙へ寄せる。未知の文字列は None。
    pub fn normalize(raw: &str) -> Option<JobStatus> {
        let key = raw.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        let status = match key.as_str() {
            "not_started" | "notstarted" | "pending" | "queued" | "idle" | "created"
            | "waiting" => Self::NotStarted,
            "starting" | "initializing" | "submitted" => Self::Starting,
            "running" | "in_progress" | "processing" | "active" => Self::Running,
            "completed" | "complete" | "done" | "success" | "succeeded" | "finished" => {
                Self::Completed
            }
            "failed" | "error" | "errored" | "failure" => Self::Failed,
            "cancelled" | "canceled" | "killed" | "stopped" | "aborted" => Self::Cancelled,
            "timed_out" | "timeout" | "expired" => Self::TimedOut,
            _ => return None,
        };
        Some(status)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 終端理由
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TerminalReason {
    ServerReported,
    UserCancelled,
    Timeout,
    ClientError,
}

// ─── JobHandle ───────────────────────────────────────────────────

/// 1 つのバックエンドジョブの識別子と、観測済みの状態。
///
/// `logs` は常に「最新のサーバースナップショット + ローカル生成行」の順で構成される。
/// サーバー分はポーリングのたびに丸ごと置き換え、ローカル行は保持し続ける。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobHandle {
    pub id: Option<String>,
    pub kind: JobKind,
    pub status: JobStatus,
    pub progress_percent: u8,
    pub logs: Vec<String>,
    pub output_location: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub terminal_reason: Option<TerminalReason>,
    #[serde(skip)]
    server_logs: Vec<String>,
    #[serde(skip)]
    local_logs: Vec<String>,
}

impl JobHandle {
    pub fn new(kind: JobKind) -> Self {
        Self {
            id: None,
            kind,
            status: JobStatus::NotStarted,
            progress_percent: 0,
            logs: Vec::new(),
            output_location: None,
            submitted_at: None,
            terminal_reason: None,
            server_logs: Vec::new(),
            local_logs: Vec::new(),
        }
    }

    /// 単発のステータス取得結果からハンドルを組み立てる（一覧表示用）
    pub fn observed(id: String, kind: JobKind, report: &StatusReport) -> Self {
        let mut handle = Self::new(kind);
        handle.id = Some(id);
        handle.status = match report.status {
            ReportedStatus::Known(status) => status,
            ReportedStatus::Unrecognized(_) => JobStatus::Running,
        };
        if handle.status.is_terminal() {
            handle.terminal_reason = Some(TerminalReason::ServerReported);
        }
        handle.absorb(report);
        handle
    }

    /// レポートの進捗・ログ・出力先を取り込む。ログは追記ではなく置換。
    pub(crate) fn absorb(&mut self, report: &StatusReport) {
        if let Some(progress) = report.progress {
            self.progress_percent = progress;
        }
        if let Some(logs) = &report.logs {
            self.server_logs = logs.clone();
        }
        if let Some(location) = &report.output_location {
            self.output_location = Some(location.clone());
        }
        self.rebuild_logs();
    }

    /// クライアント側で生成した行を追加する。同一テキストは一度だけ。
    pub(crate) fn push_local(&mut self, line: impl Into<String>) -> bool {
        let line = line.into();
        if self.local_logs.contains(&line) {
            return false;
        }
        self.local_logs.push(line);
        self.rebuild_logs();
        true
    }

    pub(crate) fn finish(&mut self, status: JobStatus, reason: TerminalReason) {
        self.status = status;
        self.terminal_reason = Some(reason);
    }

    fn rebuild_logs(&mut self) {
        self.logs = self
            .server_logs
            .iter()
            .chain(self.local_logs.iter())
            .cloned()
            .collect();
    }

    /// 人間向けの 1 行ステータス
    pub fn status_line(&self) -> String {
        let id = self.id.as_deref().unwrap_or("-");
        match (self.status, self.terminal_reason) {
            (JobStatus::Running, _) => {
                format!("[running] {}% {} job={id}", self.progress_percent, self.kind)
            }
            (status, Some(reason)) => {
                let reason = match reason {
                    TerminalReason::ServerReported => "server-reported",
                    TerminalReason::UserCancelled => "user-cancelled",
                    TerminalReason::Timeout => "timeout",
                    TerminalReason::ClientError => "client-error",
                };
                format!(
                    "[{status}] {}% {} job={id} ({reason})",
                    self.progress_percent, self.kind
                )
            }
            (status, None) => format!("[{status}] {} job={id}", self.kind),
        }
    }
}
