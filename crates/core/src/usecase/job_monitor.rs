use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Sleep};
use uuid::Uuid;

use crate::domain::error::{ApiError, CancellationError, SubmissionError, TransientPollError};
use crate::domain::job::{JobHandle, JobKind, JobStatus};
use crate::domain::machine::{JobMachine, MonitorEvent, TimerDirective, Transition};
use crate::domain::report::StatusReport;
use crate::domain::settings::MonitorSettings;
use crate::infra::backend::JobBackend;
use crate::infra::metrics::Metrics;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// UI へ通知する更新（ハンドルが変化するたびに 1 件）
#[derive(Debug, Clone, Serialize)]
pub struct JobUpdate {
    pub monitor_id: Uuid,
    pub transition: Transition,
    pub handle: JobHandle,
}

enum Command {
    Cancel,
}

/// 状態機械と通知チャネル。すべてのイベントはここを通して適用される。
struct Shared {
    monitor_id: Uuid,
    machine: Mutex<JobMachine>,
    updates: mpsc::UnboundedSender<JobUpdate>,
    metrics: Option<Arc<Metrics>>,
}

impl Shared {
    /// イベントを適用し、変化があれば同じロックの中で通知する。
    /// 破棄後は状態機械が no-op を返すため、何も送られない。
    fn dispatch(&self, event: MonitorEvent) -> Transition {
        let mut machine = self.machine.lock();
        let transition = machine.apply(event, chrono::Utc::now());

        if transition.mutated && !machine.is_disposed() {
            log::debug!(
                "[{}] {}: {} -> {}",
                self.monitor_id,
                transition.event,
                transition.prev_status,
                transition.new_status
            );
            if transition.new_status.is_terminal() {
                if let Some(metrics) = &self.metrics {
                    metrics.record_outcome(transition.new_status);
                }
            }
            let _ = self.updates.send(JobUpdate {
                monitor_id: self.monitor_id,
                transition: transition.clone(),
                handle: machine.handle().clone(),
            });
        }

        transition
    }

    fn is_settled(&self) -> bool {
        self.machine.lock().is_settled()
    }
}

/// 1 ジョブ分のポーリング・タイムアウト・キャンセルを管理するモニター。
///
/// 所有者（画面）が破棄されるときは `dispose()`（または Drop）で必ずタイマーを止める。
pub struct JobMonitor {
    kind: JobKind,
    shared: Arc<Shared>,
    backend: Arc<dyn JobBackend>,
    settings: MonitorSettings,
    commands: Option<mpsc::UnboundedSender<Command>>,
    driver: Option<JoinHandle<()>>,
}

impl JobMonitor {
    pub fn new(
        kind: JobKind,
        backend: Arc<dyn JobBackend>,
        settings: MonitorSettings,
        metrics: Option<Arc<Metrics>>,
    ) -> (Self, mpsc::UnboundedReceiver<JobUpdate>) {
        let (updates, updates_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            monitor_id: Uuid::new_v4(),
            machine: Mutex::new(JobMachine::new(kind, settings.timeout())),
            updates,
            metrics,
        });

        let monitor = Self {
            kind,
            shared,
            backend,
            settings,
            commands: None,
            driver: None,
        };
        (monitor, updates_rx)
    }

    pub fn monitor_id(&self) -> Uuid {
        self.shared.monitor_id
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    /// 現在のハンドルのコピー
    pub fn snapshot(&self) -> JobHandle {
        self.shared.machine.lock().handle().clone()
    }

    pub fn status(&self) -> JobStatus {
        self.shared.machine.lock().status()
    }

    /// ジョブを投入する。成功すれば running へ遷移し、ポーリングを開始する。
    pub async fn submit(&mut self, config: serde_json::Value) -> Result<String, SubmissionError> {
        let t = self.shared.dispatch(MonitorEvent::SubmitRequested);
        if !t.mutated {
            let machine = self.shared.machine.lock();
            return Err(if machine.is_disposed() {
                SubmissionError::Disposed
            } else {
                SubmissionError::AlreadyStarted(machine.status())
            });
        }

        log::info!("[{}] submitting {} job", self.shared.monitor_id, self.kind);
        match self.backend.submit(self.kind, &config).await {
            Ok(job_id) => {
                if let Some(metrics) = &self.shared.metrics {
                    metrics.inc_submissions(true);
                }
                let t = self.shared.dispatch(MonitorEvent::SubmitSucceeded {
                    job_id: job_id.clone(),
                });
                if t.timers != TimerDirective::Arm {
                    return Err(SubmissionError::Disposed);
                }
                log::info!("[{}] job {job_id} accepted", self.shared.monitor_id);
                self.spawn_driver(job_id.clone());
                Ok(job_id)
            }
            Err(err) => {
                if let Some(metrics) = &self.shared.metrics {
                    metrics.inc_submissions(false);
                }
                let err = SubmissionError::from(err);
                log::warn!("[{}] submission failed: {err}", self.shared.monitor_id);
                self.shared.dispatch(MonitorEvent::SubmitFailed {
                    message: err.to_string(),
                });
                Err(err)
            }
        }
    }

    /// 既存のジョブ id に再接続して監視を始める（ページ再読み込み後の復帰用）
    pub fn attach(&mut self, job_id: impl Into<String>) -> bool {
        let job_id = job_id.into();
        let t = self.shared.dispatch(MonitorEvent::Attached {
            job_id: job_id.clone(),
        });
        if t.timers != TimerDirective::Arm {
            return false;
        }
        log::info!("[{}] attached to job {job_id}", self.shared.monitor_id);
        self.spawn_driver(job_id);
        true
    }

    /// キャンセルを要求する。running 以外では何もしない。
    pub fn cancel(&self) -> bool {
        {
            let machine = self.shared.machine.lock();
            if machine.is_disposed() || machine.status() != JobStatus::Running {
                return false;
            }
        }
        match &self.commands {
            Some(commands) => commands.send(Command::Cancel).is_ok(),
            None => false,
        }
    }

    /// タイマーを同期的に止め、以後の応答をすべて破棄する。
    pub fn dispose(&mut self) {
        self.shared.dispatch(MonitorEvent::TornDown);
        self.commands = None;
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }

    fn spawn_driver(&mut self, job_id: String) {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let driver = Driver {
            shared: Arc::clone(&self.shared),
            backend: Arc::clone(&self.backend),
            job_id,
            poll_interval: self.settings.poll_interval(),
            timeout: self.settings.timeout(),
            commands: commands_rx,
            consecutive_poll_failures: 0,
        };
        self.commands = Some(commands);
        self.driver = Some(tokio::spawn(driver.run()));
    }
}

impl Drop for JobMonitor {
    fn drop(&mut self) {
        self.dispose();
    }
}

// ─── Driver ──────────────────────────────────────────────────────

/// ポーリングの段階。待機中と取得中を交互に繰り返すので、取得が重なることはない。
enum PollPhase {
    Waiting(Pin<Box<Sleep>>),
    InFlight {
        started: Instant,
        fetch: BoxFuture<Result<StatusReport, ApiError>>,
    },
}

enum PollStep {
    Due,
    Done {
        elapsed: Duration,
        result: Result<StatusReport, ApiError>,
    },
}

impl PollPhase {
    fn waiting(interval: Duration) -> Self {
        Self::Waiting(Box::pin(tokio::time::sleep(interval)))
    }

    async fn step(&mut self) -> PollStep {
        match self {
            Self::Waiting(sleep) => {
                sleep.as_mut().await;
                PollStep::Due
            }
            Self::InFlight { started, fetch } => {
                let result = fetch.as_mut().await;
                PollStep::Done {
                    elapsed: started.elapsed(),
                    result,
                }
            }
        }
    }
}

type KillFuture = BoxFuture<(Duration, Result<(), ApiError>)>;

async fn next_kill(kill: &mut Option<KillFuture>) -> (Duration, Result<(), ApiError>) {
    match kill {
        Some(fut) => fut.as_mut().await,
        None => std::future::pending().await,
    }
}

struct Driver {
    shared: Arc<Shared>,
    backend: Arc<dyn JobBackend>,
    job_id: String,
    poll_interval: Duration,
    timeout: Duration,
    commands: mpsc::UnboundedReceiver<Command>,
    consecutive_poll_failures: u32,
}

impl Driver {
    async fn run(mut self) {
        let timeout = tokio::time::sleep(self.timeout);
        tokio::pin!(timeout);
        let mut poll = PollPhase::waiting(self.poll_interval);
        let mut kill: Option<KillFuture> = None;
        let mut commands_open = true;

        loop {
            tokio::select! {
                biased;
                _ = &mut timeout => {
                    log::warn!(
                        "[{}] job {} exceeded {:?}",
                        self.shared.monitor_id, self.job_id, self.timeout
                    );
                    self.shared.dispatch(MonitorEvent::TimedOut);
                }
                step = poll.step() => match step {
                    PollStep::Due => {
                        poll = PollPhase::InFlight {
                            started: Instant::now(),
                            fetch: self.fetch_status(),
                        };
                    }
                    PollStep::Done { elapsed, result } => {
                        self.on_poll_result(elapsed, result);
                        poll = PollPhase::waiting(self.poll_interval);
                    }
                },
                (elapsed, result) = next_kill(&mut kill) => {
                    kill = None;
                    self.on_kill_result(elapsed, result);
                }
                command = self.commands.recv(), if commands_open => match command {
                    Some(Command::Cancel) => {
                        let t = self.shared.dispatch(MonitorEvent::CancelRequested);
                        if t.send_kill {
                            log::info!("[{}] cancelling job {}", self.shared.monitor_id, self.job_id);
                            if let Some(metrics) = &self.shared.metrics {
                                metrics.inc_cancels_requested();
                            }
                            kill = Some(self.start_kill());
                        }
                    }
                    None => commands_open = false,
                },
            }

            if self.shared.is_settled() {
                break;
            }
        }

        log::debug!(
            "[{}] driver for job {} stopped",
            self.shared.monitor_id,
            self.job_id
        );
    }

    fn fetch_status(&self) -> BoxFuture<Result<StatusReport, ApiError>> {
        let backend = Arc::clone(&self.backend);
        let job_id = self.job_id.clone();
        Box::pin(async move { backend.job_status(&job_id).await })
    }

    fn start_kill(&self) -> KillFuture {
        let backend = Arc::clone(&self.backend);
        let job_id = self.job_id.clone();
        Box::pin(async move {
            let started = Instant::now();
            let result = backend.kill(&job_id).await;
            (started.elapsed(), result)
        })
    }

    fn on_poll_result(&mut self, elapsed: Duration, result: Result<StatusReport, ApiError>) {
        let metrics = self.shared.metrics.as_ref();
        if let Some(metrics) = metrics {
            metrics.record_latency("poll", elapsed.as_millis() as u64);
        }

        match result {
            Ok(report) => {
                if let Some(metrics) = metrics {
                    metrics.inc_polls(true);
                }
                if self.consecutive_poll_failures > 0 {
                    log::info!(
                        "[{}] status fetch recovered after {} failure(s)",
                        self.shared.monitor_id,
                        self.consecutive_poll_failures
                    );
                    self.consecutive_poll_failures = 0;
                }
                let t = self.shared.dispatch(MonitorEvent::PollSucceeded(report));
                if t.mutated && t.new_status.is_terminal() {
                    log::info!(
                        "[{}] job {} finished: {}",
                        self.shared.monitor_id,
                        self.job_id,
                        t.new_status
                    );
                }
            }
            Err(err) => {
                if let Some(metrics) = metrics {
                    metrics.inc_polls(false);
                }
                self.consecutive_poll_failures += 1;
                let err = TransientPollError::from(err);
                if self.consecutive_poll_failures == 1 {
                    log::debug!("[{}] skipping tick: {err}", self.shared.monitor_id);
                } else {
                    log::warn!(
                        "[{}] skipping tick ({} in a row): {err}",
                        self.shared.monitor_id,
                        self.consecutive_poll_failures
                    );
                }
                self.shared.dispatch(MonitorEvent::PollFailed {
                    message: err.to_string(),
                });
            }
        }
    }

    fn on_kill_result(&mut self, elapsed: Duration, result: Result<(), ApiError>) {
        if let Some(metrics) = &self.shared.metrics {
            metrics.record_latency("kill", elapsed.as_millis() as u64);
        }
        match result {
            Ok(()) => {
                self.shared.dispatch(MonitorEvent::CancelSucceeded);
            }
            Err(err) => {
                if let Some(metrics) = &self.shared.metrics {
                    metrics.inc_cancels_failed();
                }
                let err = CancellationError::from(err);
                log::warn!("[{}] {err}", self.shared.monitor_id);
                self.shared.dispatch(MonitorEvent::CancelFailed {
                    message: err.to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::TerminalReason;
    use crate::testing::FakeBackend;

    fn settings() -> MonitorSettings {
        MonitorSettings::default()
    }

    fn monitor(
        backend: &Arc<FakeBackend>,
        settings: MonitorSettings,
    ) -> (JobMonitor, mpsc::UnboundedReceiver<JobUpdate>) {
        let backend: Arc<dyn JobBackend> = backend.clone();
        JobMonitor::new(JobKind::Generation, backend, settings, None)
    }

    async fn until_terminal(rx: &mut mpsc::UnboundedReceiver<JobUpdate>) -> JobUpdate {
        loop {
            let update = rx.recv().await.expect("update channel closed");
            if update.handle.status.is_terminal() {
                return update;
            }
        }
    }

    fn lines(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_poll_complete() {
        let fake = Arc::new(FakeBackend::new());
        fake.push_status(Ok(StatusReport::running(40, lines(&["loading"]))));
        let mut done = StatusReport::with_status(
            JobStatus::Completed,
            100,
            lines(&["loading", "done"]),
        );
        done.output_location = Some("/runs/abc123".to_string());
        fake.push_status(Ok(done));

        let metrics = Arc::new(Metrics::new());
        let backend: Arc<dyn JobBackend> = fake.clone();
        let (mut monitor, mut rx) = JobMonitor::new(
            JobKind::Generation,
            backend,
            settings(),
            Some(Arc::clone(&metrics)),
        );
        let job_id = monitor.submit(serde_json::json!({"count": 3})).await.unwrap();
        assert_eq!(job_id, "abc123");

        let update = until_terminal(&mut rx).await;
        let handle = update.handle;
        assert_eq!(handle.status, JobStatus::Completed);
        assert_eq!(handle.progress_percent, 100);
        assert_eq!(handle.terminal_reason, Some(TerminalReason::ServerReported));
        assert_eq!(handle.output_location.as_deref(), Some("/runs/abc123"));
        assert_eq!(handle.logs, lines(&["loading", "done"]));
        assert!(handle.submitted_at.is_some());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fake.status_calls(), 2);
        assert!(rx.try_recv().is_err());

        let summary = metrics.summary();
        assert_eq!(summary.submissions, 1);
        assert_eq!(summary.polls_ok, 2);
        assert_eq!(summary.outcomes.completed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_updates_follow_state_table() {
        let fake = Arc::new(FakeBackend::new());
        fake.push_status(Ok(StatusReport::with_status(JobStatus::Failed, 12, vec![])));
        let (mut monitor, mut rx) = monitor(&fake, settings());
        monitor.submit(serde_json::json!({})).await.unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.transition.new_status, JobStatus::Starting);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.transition.new_status, JobStatus::Running);
        let last = until_terminal(&mut rx).await;
        assert_eq!(last.handle.status, JobStatus::Failed);
        assert_eq!(
            last.handle.terminal_reason,
            Some(TerminalReason::ServerReported)
        );
        assert_eq!(last.monitor_id, monitor.monitor_id());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_next_poll() {
        let fake = Arc::new(FakeBackend::new());
        let (mut monitor, mut rx) = monitor(&fake, settings());
        monitor.submit(serde_json::json!({})).await.unwrap();

        assert!(monitor.cancel());
        let update = until_terminal(&mut rx).await;
        assert_eq!(update.handle.status, JobStatus::Cancelled);
        assert_eq!(
            update.handle.terminal_reason,
            Some(TerminalReason::UserCancelled)
        );
        assert_eq!(fake.kill_calls(), 1);
        assert_eq!(fake.status_calls(), 0);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fake.status_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_failure_keeps_polling() {
        let fake = Arc::new(FakeBackend::new());
        fake.push_kill(Err(ApiError::Status {
            status: 409,
            message: "job busy".to_string(),
        }));
        let (mut monitor, mut rx) = monitor(&fake, settings());
        monitor.submit(serde_json::json!({})).await.unwrap();
        assert!(monitor.cancel());

        let update = loop {
            let update = rx.recv().await.unwrap();
            if update.transition.event == "cancel_failed" {
                break update;
            }
        };
        assert_eq!(update.handle.status, JobStatus::Running);
        assert_eq!(update.handle.logs.len(), 1);
        assert!(update.handle.logs[0].contains("job busy"));

        fake.push_status(Ok(StatusReport::with_status(
            JobStatus::Completed,
            100,
            lines(&["finished"]),
        )));
        let done = until_terminal(&mut rx).await;
        assert_eq!(done.handle.status, JobStatus::Completed);
        assert_eq!(done.handle.logs.len(), 2);
        assert_eq!(done.handle.logs[0], "finished");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_retry_after_failure() {
        let fake = Arc::new(FakeBackend::new());
        fake.push_kill(Err(ApiError::Transport("connection refused".to_string())));
        let (mut monitor, mut rx) = monitor(&fake, settings());
        monitor.submit(serde_json::json!({})).await.unwrap();

        assert!(monitor.cancel());
        loop {
            let update = rx.recv().await.unwrap();
            if update.transition.event == "cancel_failed" {
                break;
            }
        }
        assert!(monitor.cancel());
        let update = until_terminal(&mut rx).await;
        assert_eq!(update.handle.status, JobStatus::Cancelled);
        assert_eq!(fake.kill_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_not_started_is_noop() {
        let fake = Arc::new(FakeBackend::new());
        let (monitor, mut rx) = monitor(&fake, settings());
        let before = monitor.snapshot();
        assert!(!monitor.cancel());
        assert_eq!(monitor.snapshot(), before);
        assert!(rx.try_recv().is_err());
        assert_eq!(fake.kill_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_after_terminal_is_noop() {
        let fake = Arc::new(FakeBackend::new());
        fake.push_status(Ok(StatusReport::with_status(JobStatus::Completed, 100, vec![])));
        let (mut monitor, mut rx) = monitor(&fake, settings());
        monitor.submit(serde_json::json!({})).await.unwrap();
        until_terminal(&mut rx).await;

        let before = monitor.snapshot();
        assert!(!monitor.cancel());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(monitor.snapshot(), before);
        assert_eq!(fake.kill_calls(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_at_configured_window() {
        let fake = Arc::new(FakeBackend::new());
        let settings = settings();
        let window = settings.timeout();
        let (mut monitor, mut rx) = monitor(&fake, settings);

        let started = Instant::now();
        monitor.submit(serde_json::json!({})).await.unwrap();
        let update = until_terminal(&mut rx).await;
        let elapsed = started.elapsed();

        assert_eq!(update.handle.status, JobStatus::TimedOut);
        assert_eq!(update.handle.terminal_reason, Some(TerminalReason::Timeout));
        assert!(elapsed >= window, "timed out early: {elapsed:?}");
        assert!(elapsed < window + Duration::from_secs(1), "timed out late: {elapsed:?}");
        let synthetic = update
            .handle
            .logs
            .iter()
            .filter(|l| l.contains("30-minute"))
            .count();
        assert_eq!(synthetic, 1);

        let calls = fake.status_calls();
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(fake.status_calls(), calls);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_poll_after_timeout_is_dropped() {
        let fake = Arc::new(FakeBackend::new());
        let gate = fake.hold_next_status();
        fake.push_status(Ok(StatusReport::with_status(JobStatus::Completed, 100, vec![])));
        let settings = MonitorSettings {
            poll_interval_ms: 2000,
            timeout_secs: 5,
        };
        let (mut monitor, mut rx) = monitor(&fake, settings);
        monitor.submit(serde_json::json!({})).await.unwrap();

        let update = until_terminal(&mut rx).await;
        assert_eq!(update.handle.status, JobStatus::TimedOut);
        assert_eq!(fake.status_calls(), 1);

        let _ = gate.send(());
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(monitor.status(), JobStatus::TimedOut);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_snapshot_does_not_duplicate_logs() {
        let fake = Arc::new(FakeBackend::new());
        let report = StatusReport::running(50, lines(&["a", "b"]));
        fake.push_status(Ok(report.clone()));
        fake.push_status(Ok(report));
        let (mut monitor, mut rx) = monitor(&fake, settings());
        monitor.submit(serde_json::json!({})).await.unwrap();

        let mut polls = Vec::new();
        while polls.len() < 2 {
            let update = rx.recv().await.unwrap();
            if update.transition.event == "poll_succeeded" {
                polls.push(update.handle);
            }
        }
        assert_eq!(polls[0].logs, lines(&["a", "b"]));
        assert_eq!(polls[1].logs, polls[0].logs);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_skip_ticks() {
        let fake = Arc::new(FakeBackend::new());
        fake.push_status(Ok(StatusReport::running(10, lines(&["x"]))));
        fake.push_status(Err(ApiError::Transport("connection reset".to_string())));
        fake.push_status(Err(ApiError::Decode("missing `progress.status`".to_string())));
        fake.push_status(Ok(StatusReport::with_status(
            JobStatus::Completed,
            100,
            lines(&["x", "y"]),
        )));
        let (mut monitor, mut rx) = monitor(&fake, settings());
        monitor.submit(serde_json::json!({})).await.unwrap();

        let mut events = Vec::new();
        let done = loop {
            let update = rx.recv().await.unwrap();
            events.push(update.transition.event);
            if update.handle.status.is_terminal() {
                break update;
            }
        };
        assert!(!events.contains(&"poll_failed"));
        assert_eq!(done.handle.status, JobStatus::Completed);
        assert_eq!(done.handle.logs, lines(&["x", "y"]));
        assert_eq!(fake.status_calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_during_inflight_poll() {
        let fake = Arc::new(FakeBackend::new());
        let gate = fake.hold_next_status();
        fake.push_status(Ok(StatusReport::with_status(JobStatus::Completed, 100, vec![])));
        let (mut monitor, mut rx) = monitor(&fake, settings());
        monitor.submit(serde_json::json!({})).await.unwrap();

        while fake.status_calls() == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        while rx.try_recv().is_ok() {}

        monitor.dispose();
        let after_dispose = monitor.snapshot();
        assert_eq!(after_dispose.status, JobStatus::NotStarted);

        let _ = gate.send(());
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(monitor.snapshot(), after_dispose);
        assert!(rx.try_recv().is_err());
        assert_eq!(fake.status_calls(), 1);
        assert!(!monitor.cancel());
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_wins_over_inflight_cancel() {
        let fake = Arc::new(FakeBackend::new());
        let kill_gate = fake.hold_next_kill();
        fake.push_status(Ok(StatusReport::with_status(JobStatus::Completed, 100, vec![])));
        let (mut monitor, mut rx) = monitor(&fake, settings());
        monitor.submit(serde_json::json!({})).await.unwrap();

        assert!(monitor.cancel());
        let update = until_terminal(&mut rx).await;
        assert_eq!(update.handle.status, JobStatus::Completed);

        let _ = kill_gate.send(());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(monitor.status(), JobStatus::Completed);
        assert_eq!(
            monitor.snapshot().terminal_reason,
            Some(TerminalReason::ServerReported)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_failure() {
        let fake = Arc::new(FakeBackend::new().failing_submit(ApiError::Status {
            status: 500,
            message: "boom".to_string(),
        }));
        let (mut monitor, _rx) = monitor(&fake, settings());
        let err = monitor.submit(serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, SubmissionError::Rejected { status: 500, .. }));

        let handle = monitor.snapshot();
        assert_eq!(handle.status, JobStatus::Failed);
        assert_eq!(handle.terminal_reason, Some(TerminalReason::ClientError));
        assert!(handle.id.is_none());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fake.status_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_twice_rejected() {
        let fake = Arc::new(FakeBackend::new());
        let (mut monitor, _rx) = monitor(&fake, settings());
        monitor.submit(serde_json::json!({})).await.unwrap();
        let err = monitor.submit(serde_json::json!({})).await.unwrap_err();
        assert_eq!(err, SubmissionError::AlreadyStarted(JobStatus::Running));
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_after_dispose() {
        let fake = Arc::new(FakeBackend::new());
        let (mut monitor, _rx) = monitor(&fake, settings());
        monitor.dispose();
        let err = monitor.submit(serde_json::json!({})).await.unwrap_err();
        assert_eq!(err, SubmissionError::Disposed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_polls_existing_job() {
        let fake = Arc::new(FakeBackend::new());
        fake.push_status(Ok(StatusReport::with_status(
            JobStatus::Completed,
            100,
            lines(&["restored"]),
        )));
        let (mut monitor, mut rx) = monitor(&fake, settings());
        assert!(monitor.attach("job-9"));
        assert!(!monitor.attach("job-10"));

        let update = until_terminal(&mut rx).await;
        assert_eq!(update.handle.id.as_deref(), Some("job-9"));
        assert!(update.handle.submitted_at.is_none());
        assert_eq!(update.handle.logs, lines(&["restored"]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_do_not_overlap() {
        let fake = Arc::new(FakeBackend::new());
        let gate = fake.hold_next_status();
        let (mut monitor, _rx) = monitor(&fake, settings());
        monitor.submit(serde_json::json!({})).await.unwrap();

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(fake.status_calls(), 1);

        let _ = gate.send(());
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(fake.status_calls(), 2);
    }
}
