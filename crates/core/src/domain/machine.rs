use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::job::{JobHandle, JobKind, JobStatus, TerminalReason};
use super::report::{ReportedStatus, StatusReport};

/// 監視ループが生成するイベント。タイマーやネットワーク呼び出しの結果はすべてここを通る。
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    SubmitRequested,
    SubmitSucceeded { job_id: String },
    SubmitFailed { message: String },
    /// 既存ジョブへの再接続（インスペクタ用）
    Attached { job_id: String },
    PollSucceeded(StatusReport),
    PollFailed { message: String },
    TimedOut,
    CancelRequested,
    CancelSucceeded,
    CancelFailed { message: String },
    TornDown,
}

impl MonitorEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SubmitRequested => "submit_requested",
            Self::SubmitSucceeded { .. } => "submit_succeeded",
            Self::SubmitFailed { .. } => "submit_failed",
            Self::Attached { .. } => "attached",
            Self::PollSucceeded(_) => "poll_succeeded",
            Self::PollFailed { .. } => "poll_failed",
            Self::TimedOut => "timed_out",
            Self::CancelRequested => "cancel_requested",
            Self::CancelSucceeded => "cancel_succeeded",
            Self::CancelFailed { .. } => "cancel_failed",
            Self::TornDown => "torn_down",
        }
    }
}

/// タイマーへの指示
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerDirective {
    Unchanged,
    /// running への突入: ポーリングとタイムアウトの両方を起動
    Arm,
    /// 次のポーリングだけを再設定
    Rearm,
    /// 両方を解除
    Disarm,
}

/// 状態遷移の結果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transition {
    pub event: &'static str,
    pub prev_status: JobStatus,
    pub new_status: JobStatus,
    /// ハンドルが変化したか
    pub mutated: bool,
    pub timers: TimerDirective,
    /// kill リクエストを送る必要があるか
    pub send_kill: bool,
}

impl Transition {
    fn ignored(event: &'static str, status: JobStatus) -> Self {
        Self {
            event,
            prev_status: status,
            new_status: status,
            mutated: false,
            timers: TimerDirective::Unchanged,
            send_kill: false,
        }
    }
}

/// 1 ジョブ分の純粋な状態機械。タイマーもネットワークも持たない。
#[derive(Debug, Clone)]
pub struct JobMachine {
    handle: JobHandle,
    timeout: Duration,
    cancel_in_flight: bool,
    disposed: bool,
}

impl JobMachine {
    pub fn new(kind: JobKind, timeout: Duration) -> Self {
        Self {
            handle: JobHandle::new(kind),
            timeout,
            cancel_in_flight: false,
            disposed: false,
        }
    }

    pub fn handle(&self) -> &JobHandle {
        &self.handle
    }

    pub fn status(&self) -> JobStatus {
        self.handle.status
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn cancel_in_flight(&self) -> bool {
        self.cancel_in_flight
    }

    /// これ以上イベントを受け付けない状態か
    pub fn is_settled(&self) -> bool {
        self.disposed || self.handle.status.is_terminal()
    }

    /// イベントを 1 つ適用する。終端後・破棄後のイベントは常に no-op。
    pub fn apply(&mut self, event: MonitorEvent, now: DateTime<Utc>) -> Transition {
        let name = event.name();
        let prev = self.handle.status;

        if self.disposed {
            return Transition::ignored(name, prev);
        }
        if prev.is_terminal() {
            // 破棄だけは受け付ける（ステータスは保持）
            if matches!(event, MonitorEvent::TornDown) {
                self.disposed = true;
                self.cancel_in_flight = false;
            }
            return Transition::ignored(name, prev);
        }

        let mut timers = TimerDirective::Unchanged;
        let mut send_kill = false;
        let mut mutated = true;

        match (prev, event) {
            (JobStatus::NotStarted, MonitorEvent::SubmitRequested) => {
                self.handle.status = JobStatus::Starting;
                self.handle.submitted_at = Some(now);
            }
            (JobStatus::Starting, MonitorEvent::SubmitSucceeded { job_id }) => {
                self.handle.id = Some(job_id);
                self.handle.status = JobStatus::Running;
                timers = TimerDirective::Arm;
            }
            (JobStatus::Starting, MonitorEvent::SubmitFailed { message }) => {
                self.handle.push_local(format!("[monitor] submission failed: {message}"));
                self.handle.finish(JobStatus::Failed, TerminalReason::ClientError);
                timers = TimerDirective::Disarm;
            }
            (JobStatus::NotStarted, MonitorEvent::Attached { job_id }) => {
                self.handle.id = Some(job_id);
                self.handle.status = JobStatus::Running;
                timers = TimerDirective::Arm;
            }
            (JobStatus::Running, MonitorEvent::PollSucceeded(report)) => {
                self.handle.absorb(&report);
                match report.status {
                    ReportedStatus::Known(status) if status.is_terminal() => {
                        self.handle.finish(status, TerminalReason::ServerReported);
                        self.cancel_in_flight = false;
                        timers = TimerDirective::Disarm;
                    }
                    ReportedStatus::Known(_) => {
                        timers = TimerDirective::Rearm;
                    }
                    ReportedStatus::Unrecognized(raw) => {
                        self.handle.push_local(format!(
                            "[monitor] unrecognized status `{raw}` reported; treating job as running"
                        ));
                        timers = TimerDirective::Rearm;
                    }
                }
            }
            (JobStatus::Running, MonitorEvent::PollFailed { .. }) => {
                mutated = false;
                timers = TimerDirective::Rearm;
            }
            (JobStatus::Running, MonitorEvent::TimedOut) => {
                self.handle.push_local(format!(
                    "[monitor] job exceeded the {} monitoring window; polling stopped",
                    describe_window(self.timeout)
                ));
                self.handle.finish(JobStatus::TimedOut, TerminalReason::Timeout);
                self.cancel_in_flight = false;
                timers = TimerDirective::Disarm;
            }
            (JobStatus::Running, MonitorEvent::CancelRequested) => {
                mutated = false;
                if !self.cancel_in_flight {
                    self.cancel_in_flight = true;
                    send_kill = true;
                }
            }
            (JobStatus::Running, MonitorEvent::CancelSucceeded) => {
                self.cancel_in_flight = false;
                self.handle
                    .finish(JobStatus::Cancelled, TerminalReason::UserCancelled);
                timers = TimerDirective::Disarm;
            }
            (JobStatus::Running, MonitorEvent::CancelFailed { message }) => {
                self.cancel_in_flight = false;
                self.handle
                    .push_local(format!("[monitor] cancel request failed: {message}"));
            }
            (_, MonitorEvent::TornDown) => {
                self.disposed = true;
                self.cancel_in_flight = false;
                self.handle.status = JobStatus::NotStarted;
                timers = TimerDirective::Disarm;
            }
            _ => return Transition::ignored(name, prev),
        }

        Transition {
            event: name,
            prev_status: prev,
            new_status: self.handle.status,
            mutated,
            timers,
            send_kill,
        }
    }
}

fn describe_window(window: Duration) -> String {
    let secs = window.as_secs();
    if secs >= 60 && secs % 60 == 0 {
        format!("{}-minute", secs / 60)
    } else {
        format!("{secs}-second")
    }
}
