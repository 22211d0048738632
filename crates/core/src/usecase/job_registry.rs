use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;

use crate::domain::error::RegistryError;
use crate::domain::job::{JobHandle, JobKind};
use crate::domain::settings::RegistrySettings;
use crate::domain::wire::Activity;
use crate::infra::backend::JobBackend;
use crate::infra::metrics::Metrics;

/// 自動リフレッシュ間隔の下限
const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// 一覧の絞り込み条件
#[derive(Debug, Clone, Default)]
pub struct ListingFilter {
    pub kind: Option<JobKind>,
    /// 終端状態のジョブを除外する
    pub active_only: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListedJob {
    pub handle: JobHandle,
    pub title: String,
    pub timestamp: String,
}

/// 1 回のリフレッシュ結果。取得に失敗した id は `dropped` に数えるだけで一覧には載せない。
#[derive(Debug, Clone, Serialize)]
pub struct JobListing {
    pub jobs: Vec<ListedJob>,
    pub dropped: usize,
    pub refreshed_at: DateTime<Utc>,
}

/// アクティビティフィードから id を集め、id ごとに単発のステータス取得を並行発行する。
///
/// ジョブごとのタイマーは持たない。各リフレッシュは独立した全件取得。
#[derive(Clone)]
pub struct JobRegistry {
    backend: Arc<dyn JobBackend>,
    limit: usize,
    metrics: Option<Arc<Metrics>>,
}

impl JobRegistry {
    pub fn new(
        backend: Arc<dyn JobBackend>,
        settings: &RegistrySettings,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        Self {
            backend,
            limit: settings.limit,
            metrics,
        }
    }

    pub async fn refresh(&self, filter: &ListingFilter) -> Result<JobListing, RegistryError> {
        let feed = self.backend.activities().await.map_err(|e| {
            log::warn!("activity feed unavailable: {e}");
            RegistryError::from(e)
        })?;
        let candidates = select_candidates(feed.activities, filter, self.limit);
        log::debug!("fetching status for {} job(s)", candidates.len());

        let mut fetches = JoinSet::new();
        for (index, (activity, kind)) in candidates.into_iter().enumerate() {
            let backend = Arc::clone(&self.backend);
            fetches.spawn(async move {
                let result = backend.job_status(&activity.id).await;
                (index, activity, kind, result)
            });
        }

        let mut found = Vec::new();
        // 読めなかったフィードのエントリも取得失敗と同じく数える
        let mut dropped = feed.skipped;
        while let Some(joined) = fetches.join_next().await {
            match joined {
                Ok((index, activity, kind, Ok(report))) => {
                    let handle = JobHandle::observed(activity.id, kind, &report);
                    found.push((
                        index,
                        ListedJob {
                            handle,
                            title: activity.title,
                            timestamp: activity.timestamp,
                        },
                    ));
                }
                Ok((_, activity, _, Err(e))) => {
                    dropped += 1;
                    log::debug!("dropping {} from listing: {e}", activity.id);
                }
                Err(e) => {
                    dropped += 1;
                    log::warn!("status fetch task failed: {e}");
                }
            }
        }

        // 完了順ではなくフィードの順に戻す
        found.sort_by_key(|(index, _)| *index);
        let mut jobs: Vec<ListedJob> = found.into_iter().map(|(_, job)| job).collect();
        if filter.active_only {
            jobs.retain(|job| !job.handle.status.is_terminal());
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_refresh(dropped);
        }
        log::info!("listing refreshed: {} job(s), {dropped} dropped", jobs.len());

        Ok(JobListing {
            jobs,
            dropped,
            refreshed_at: Utc::now(),
        })
    }

    /// 一定間隔で `refresh` を繰り返し、結果をチャネルへ送る。最初の 1 回は即時。
    /// 間隔は 1 秒未満に縮めない。
    pub fn spawn_auto_refresh(&self, filter: ListingFilter, every: Duration) -> AutoRefresh {
        let every = every.max(MIN_REFRESH_INTERVAL);
        let (tx, rx) = mpsc::channel(1);
        let registry = self.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let listing = registry.refresh(&filter).await;
                if tx.send(listing).await.is_err() {
                    break;
                }
            }
        });
        AutoRefresh { listings: rx, task }
    }
}

/// 自動リフレッシュのハンドル。Drop でタスクを止める。
pub struct AutoRefresh {
    listings: mpsc::Receiver<Result<JobListing, RegistryError>>,
    task: JoinHandle<()>,
}

impl AutoRefresh {
    pub async fn next(&mut self) -> Option<Result<JobListing, RegistryError>> {
        self.listings.recv().await
    }
}

impl Drop for AutoRefresh {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// 重複を除き（フィード順を維持）、ジョブ種別で絞り込み、上限で切る。
/// `type` がジョブ種別として解釈できないエントリはジョブではないので除外。
fn select_candidates(
    activities: Vec<Activity>,
    filter: &ListingFilter,
    limit: usize,
) -> Vec<(Activity, JobKind)> {
    let mut seen = HashSet::new();
    activities
        .into_iter()
        .filter(|a| !a.id.trim().is_empty() && seen.insert(a.id.clone()))
        .filter_map(|a| {
            let kind = a.job_kind()?;
            Some((a, kind))
        })
        .filter(|(_, kind)| filter.kind.map_or(true, |wanted| wanted == *kind))
        .take(limit)
        .collect()
}
