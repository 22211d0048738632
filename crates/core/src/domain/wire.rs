use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::job::JobKind;

/// `POST /jobs/{kind}` のレスポンス
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitResponse {
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// エラーレスポンス `{ error: string }`
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// アクティビティフィードの 1 件
///
/// フィードはベストエフォートなので、文字列欄の null や数値（エポック秒の timestamp など）も受ける。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    #[serde(deserialize_with = "lenient_string")]
    pub id: String,
    #[serde(rename = "type", default, deserialize_with = "lenient_string")]
    pub kind: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub status: String,
    #[serde(default, deserialize_with = "lenient_number")]
    pub progress: Option<f64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub timestamp: String,
}

impl Activity {
    /// `type` をジョブ種別として解釈する（例: "evaluation", "rubric-analysis"）
    pub fn job_kind(&self) -> Option<JobKind> {
        self.kind.parse().ok()
    }
}

/// null は空文字、数値・真偽値は文字列化する
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(other) => {
            return Err(serde::de::Error::custom(format!(
                "expected a string, got {other}"
            )))
        }
    })
}

fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// `GET /activities` のレスポンス。壊れたエントリは捨てて `skipped` に数える。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActivityFeed {
    pub activities: Vec<Activity>,
    pub skipped: usize,
}

impl ActivityFeed {
    pub fn new(activities: Vec<Activity>) -> Self {
        Self {
            activities,
            skipped: 0,
        }
    }

    /// `{ activities: [...] }` を 1 件ずつ読む。`activities` が配列でなければ Err。
    pub fn from_value(body: &Value) -> Result<Self, String> {
        let items = match body.get("activities") {
            None | Some(Value::Null) => return Ok(Self::default()),
            Some(Value::Array(items)) => items,
            Some(other) => return Err(format!("`activities` is not an array: {other}")),
        };

        let mut feed = Self::default();
        for item in items {
            match Activity::deserialize(item) {
                Ok(activity) => feed.activities.push(activity),
                Err(e) => {
                    log::debug!("skipping activity entry: {e}");
                    feed.skipped += 1;
                }
            }
        }
        Ok(feed)
    }
}

/// ファイル一覧の 1 件
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    pub name: String,
    pub path: String,
    pub size: Option<u64>,
    pub is_dir: bool,
}

/// `GET /files` のレスポンス（包まれた形と裸の配列の両方を受ける）
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FilesResponse {
    Wrapped { files: Vec<FileItem> },
    Bare(Vec<FileItem>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FileItem {
    Path(String),
    Detailed {
        #[serde(default)]
        name: Option<String>,
        path: String,
        #[serde(default)]
        size: Option<u64>,
        #[serde(default, alias = "is_directory")]
        is_dir: bool,
    },
}

impl FilesResponse {
    pub fn into_entries(self) -> Vec<FileEntry> {
        let items = match self {
            Self::Wrapped { files } => files,
            Self::Bare(files) => files,
        };
        items.into_iter().map(FileItem::into_entry).collect()
    }
}

impl FileItem {
    fn into_entry(self) -> FileEntry {
        match self {
            Self::Path(path) => FileEntry {
                name: file_name(&path),
                path,
                size: None,
                is_dir: false,
            },
            Self::Detailed {
                name,
                path,
                size,
                is_dir,
            } => FileEntry {
                name: name.unwrap_or_else(|| file_name(&path)),
                path,
                size,
                is_dir,
            },
        }
    }
}

fn file_name(path: &str) -> String {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
        .to_string()
}
