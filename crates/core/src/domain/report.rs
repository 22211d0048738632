use serde::Serialize;
use serde_json::Value;

use super::job::JobStatus;

/// 出力先として受け付けるキー（ジョブ種別ごとに名前が異なる）
const OUTPUT_KEYS: [&str; 4] = ["output_location", "output_path", "output_dir", "output_file"];

/// バックエンドが報告したステータス
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportedStatus {
    Known(JobStatus),
    /// 正規の語彙に当てはまらない文字列（running 扱い）
    Unrecognized(String),
}

/// `GET /job/{job_id}` の検証済みレスポンス
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub status: ReportedStatus,
    /// 0–100 に丸め済み。報告が無ければ None。
    pub progress: Option<u8>,
    /// サーバー側のログバッファ全体。報告が無ければ None。
    pub logs: Option<Vec<String>>,
    pub output_location: Option<String>,
}

impl StatusReport {
    pub fn running(progress: u8, logs: Vec<String>) -> Self {
        Self {
            status: ReportedStatus::Known(JobStatus::Running),
            progress: Some(progress),
            logs: Some(logs),
            output_location: None,
        }
    }

    pub fn with_status(status: JobStatus, progress: u8, logs: Vec<String>) -> Self {
        Self {
            status: ReportedStatus::Known(status),
            progress: Some(progress),
            logs: Some(logs),
            output_location: None,
        }
    }

    /// JSON ボディを構造検証しながら読み取る。
    ///
    /// `{ progress: { status: string, progress: number }, logs: string[] }` 形式を期待する。
    /// status の欠落・型違いは不正レスポンスとして Err を返す。
    pub fn from_value(body: &Value) -> Result<Self, String> {
        let progress_obj = body
            .get("progress")
            .and_then(Value::as_object)
            .ok_or_else(|| "missing `progress` object".to_string())?;

        let raw_status = match progress_obj.get("status") {
            Some(Value::String(s)) => s.as_str(),
            Some(other) => return Err(format!("`progress.status` is not a string: {other}")),
            None => return Err("missing `progress.status`".to_string()),
        };
        let status = match JobStatus::normalize(raw_status) {
            Some(s) => ReportedStatus::Known(s),
            None => ReportedStatus::Unrecognized(raw_status.to_string()),
        };

        let progress = match progress_obj.get("progress") {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => {
                let value = n.as_f64().unwrap_or(0.0);
                Some(value.round().clamp(0.0, 100.0) as u8)
            }
            Some(other) => return Err(format!("`progress.progress` is not a number: {other}")),
        };

        let logs = match body.get("logs") {
            None | Some(Value::Null) => None,
            Some(Value::Array(items)) => {
                let mut lines = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::String(s) => lines.push(s.clone()),
                        other => return Err(format!("log entry is not a string: {other}")),
                    }
                }
                Some(lines)
            }
            Some(other) => return Err(format!("`logs` is not an array: {other}")),
        };

        let output_location = OUTPUT_KEYS.iter().find_map(|key| {
            body.get(*key)
                .or_else(|| progress_obj.get(*key))
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        });

        Ok(Self {
            status,
            progress,
            logs,
            output_location,
        })
    }
}
