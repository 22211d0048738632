use parking_lot::Mutex;
use serde::Serialize;

use crate::domain::job::JobStatus;

const LATENCY_CAP: usize = 1000;
const RECENT_LATENCIES: usize = 20;

/// ローカルメトリクス収集器（複数のモニターで共有する）
pub struct Metrics {
    counters: Mutex<MetricsCounters>,
    latencies: Mutex<Vec<LatencyRecord>>,
}

#[derive(Debug, Default)]
struct MetricsCounters {
    submissions: u64,
    submissions_failed: u64,
    polls_ok: u64,
    polls_failed: u64,
    cancels_requested: u64,
    cancels_failed: u64,
    registry_refreshes: u64,
    registry_dropped: u64,
    completed: u64,
    failed: u64,
    cancelled: u64,
    timed_out: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LatencyRecord {
    pub operation: String,
    pub duration_ms: u64,
    pub timestamp: String,
}

/// メトリクスサマリー
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub submissions: u64,
    pub submissions_failed: u64,
    pub polls_ok: u64,
    pub polls_failed: u64,
    pub cancels_requested: u64,
    pub cancels_failed: u64,
    pub registry_refreshes: u64,
    pub registry_dropped: u64,
    pub outcomes: OutcomeCounts,
    pub avg_poll_latency_ms: Option<f64>,
    pub recent_latencies: Vec<LatencyRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutcomeCounts {
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub timed_out: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(MetricsCounters::default()),
            latencies: Mutex::new(Vec::new()),
        }
    }

    pub fn inc_submissions(&self, ok: bool) {
        let mut c = self.counters.lock();
        c.submissions += 1;
        if !ok {
            c.submissions_failed += 1;
        }
    }

    pub fn inc_polls(&self, ok: bool) {
        let mut c = self.counters.lock();
        if ok {
            c.polls_ok += 1;
        } else {
            c.polls_failed += 1;
        }
    }

    pub fn inc_cancels_requested(&self) {
        self.counters.lock().cancels_requested += 1;
    }

    pub fn inc_cancels_failed(&self) {
        self.counters.lock().cancels_failed += 1;
    }

    pub fn record_refresh(&self, dropped: usize) {
        let mut c = self.counters.lock();
        c.registry_refreshes += 1;
        c.registry_dropped += dropped as u64;
    }

    /// 終端状態を 1 件記録する。非終端は無視。
    pub fn record_outcome(&self, status: JobStatus) {
        let mut c = self.counters.lock();
        match status {
            JobStatus::Completed => c.completed += 1,
            JobStatus::Failed => c.failed += 1,
            JobStatus::Cancelled => c.cancelled += 1,
            JobStatus::TimedOut => c.timed_out += 1,
            _ => {}
        }
    }

    pub fn record_latency(&self, operation: &str, duration_ms: u64) {
        let record = LatencyRecord {
            operation: operation.to_string(),
            duration_ms,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        let mut latencies = self.latencies.lock();
        latencies.push(record);
        if latencies.len() > LATENCY_CAP {
            let excess = latencies.len() - LATENCY_CAP;
            latencies.drain(0..excess);
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        let c = self.counters.lock();
        let latencies = self.latencies.lock();

        let polls: Vec<f64> = latencies
            .iter()
            .filter(|r| r.operation == "poll")
            .map(|r| r.duration_ms as f64)
            .collect();
        let avg_poll_latency_ms = if polls.is_empty() {
            None
        } else {
            Some(polls.iter().sum::<f64>() / polls.len() as f64)
        };

        let recent: Vec<LatencyRecord> = latencies
            .iter()
            .rev()
            .take(RECENT_LATENCIES)
            .cloned()
            .collect();

        MetricsSummary {
            submissions: c.submissions,
            submissions_failed: c.submissions_failed,
            polls_ok: c.polls_ok,
            polls_failed: c.polls_failed,
            cancels_requested: c.cancels_requested,
            cancels_failed: c.cancels_failed,
            registry_refreshes: c.registry_refreshes,
            registry_dropped: c.registry_dropped,
            outcomes: OutcomeCounts {
                completed: c.completed,
                failed: c.failed,
                cancelled: c.cancelled,
                timed_out: c.timed_out,
            },
            avg_poll_latency_ms,
            recent_latencies: recent,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
