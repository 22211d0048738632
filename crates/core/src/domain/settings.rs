use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::ConfigError;

/// ダッシュボード設定（TOML から読み込む）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardSettings {
    pub backend: BackendSettings,
    pub monitor: MonitorSettings,
    pub registry: RegistrySettings,
    pub log: LogSettings,
}

/// バックエンド接続設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    /// API のベース URL（例: "http://127.0.0.1:8000"）
    pub base_url: String,
    /// 1 リクエストあたりのタイムアウト秒数
    pub request_timeout_secs: u64,
}

/// 単一ジョブ監視の設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    /// ポーリング間隔（ミリ秒）
    pub poll_interval_ms: u64,
    /// running 突入からのタイムアウト秒数
    pub timeout_secs: u64,
}

/// 一覧表示の設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    /// 自動更新間隔（秒）
    pub refresh_secs: u64,
    /// 一覧に載せる最大件数
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            timeout_secs: 30 * 60,
        }
    }
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            refresh_secs: 30,
            limit: 50,
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl BackendSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl MonitorSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl RegistrySettings {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_secs)
    }
}

impl DashboardSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.backend.base_url.trim();
        if url.is_empty() {
            return Err(ConfigError::Invalid("backend.base_url is empty".to_string()));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "backend.base_url must start with http:// or https://: {url}"
            )));
        }
        if self.monitor.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "monitor.poll_interval_ms must be positive".to_string(),
            ));
        }
        if self.monitor.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "monitor.timeout_secs must be positive".to_string(),
            ));
        }
        if self.monitor.timeout() < self.monitor.poll_interval() {
            return Err(ConfigError::Invalid(
                "monitor.timeout_secs is shorter than the poll interval".to_string(),
            ));
        }
        if self.registry.refresh_secs == 0 {
            return Err(ConfigError::Invalid(
                "registry.refresh_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
