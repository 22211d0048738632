use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;

use jd_core::domain::error::{
    ApiError, CancellationError, ConfigError, ErrorCode, RegistryError, SubmissionError,
};
use jd_core::domain::job::{JobKind, JobStatus};
use jd_core::domain::machine::Transition;
use jd_core::domain::settings::DashboardSettings;
use jd_core::infra::backend::{HttpJobBackend, JobBackend};
use jd_core::infra::metrics::Metrics;
use jd_core::usecase::job_monitor::{JobMonitor, JobUpdate};
use jd_core::usecase::job_registry::{JobRegistry, ListingFilter};

use crate::cli::{Args, Command};
use crate::render::{self, ErrorPayload, UpdateRenderer};
use crate::{config, logging};

/// コマンドエラー型
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Submission(#[from] SubmissionError),
    #[error(transparent)]
    Cancellation(#[from] CancellationError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("backend request failed: {0}")]
    Api(#[from] ApiError),
    #[error("failed to read job config {path}: {source}")]
    JobConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("job config {path} is not valid JSON: {message}")]
    JobConfigParse { path: String, message: String },
    #[error("{0}")]
    Logging(String),
    #[error("job finished as {0}")]
    Unfinished(JobStatus),
    #[error("stopped watching job {0}")]
    Interrupted(String),
    #[error("cannot attach to job {job_id}: monitor is already {status}")]
    AttachRejected { job_id: String, status: JobStatus },
}

impl CommandError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Config(_) | Self::JobConfigRead { .. } | Self::JobConfigParse { .. } => {
                ErrorCode::Config
            }
            Self::Submission(e) => e.code(),
            Self::Cancellation(e) => e.code(),
            Self::Registry(e) => e.code(),
            Self::Api(_)
            | Self::Logging(_)
            | Self::Unfinished(_)
            | Self::Interrupted(_)
            | Self::AttachRejected { .. } => ErrorCode::Internal,
        }
    }

    /// 失敗した操作を利用者がそのまま再試行できるか
    pub fn recoverable(&self) -> bool {
        matches!(
            self,
            Self::Cancellation(_) | Self::Registry(_) | Self::Api(_) | Self::Interrupted(_)
        )
    }

    /// 終端状態が completed 以外なら 2、それ以外の失敗は 1
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Unfinished(_) => 2,
            Self::Interrupted(_) => 130,
            _ => 1,
        }
    }

    pub fn payload(&self) -> ErrorPayload {
        ErrorPayload {
            code: self.code(),
            message: self.to_string(),
            recoverable: self.recoverable(),
        }
    }
}

type CmdResult<T> = Result<T, CommandError>;

struct Context {
    settings: DashboardSettings,
    json: bool,
    backend: Arc<dyn JobBackend>,
    metrics: Arc<Metrics>,
}

pub async fn run(args: Args) -> CmdResult<()> {
    let settings = config::load_settings(&args)?;
    logging::init(&settings.log.level).map_err(CommandError::Logging)?;

    let backend = HttpJobBackend::new(&settings.backend)?;
    log::debug!("backend: {}", backend.base_url());

    let ctx = Context {
        settings,
        json: args.json,
        backend: Arc::new(backend),
        metrics: Arc::new(Metrics::new()),
    };

    let result = match args.cmd {
        Command::Submit { kind, config_file } => submit(&ctx, kind, &config_file).await,
        Command::Watch { job_id, kind } => watch(&ctx, kind, job_id).await,
        Command::List {
            kind,
            active,
            watch,
        } => {
            let filter = ListingFilter {
                kind,
                active_only: active,
            };
            list(&ctx, filter, watch).await
        }
        Command::Kill { job_id } => kill(&ctx, &job_id).await,
        Command::Files { directory } => files(&ctx, &directory).await,
    };

    log_summary(&ctx.metrics);
    result
}

fn read_job_config(path: &Path) -> CmdResult<serde_json::Value> {
    let raw = std::fs::read_to_string(path).map_err(|source| CommandError::JobConfigRead {
        path: path.display().to_string(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|e| CommandError::JobConfigParse {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

async fn submit(ctx: &Context, kind: JobKind, config_file: &Path) -> CmdResult<()> {
    let config = read_job_config(config_file)?;
    let (mut monitor, mut updates) = JobMonitor::new(
        kind,
        Arc::clone(&ctx.backend),
        ctx.settings.monitor.clone(),
        Some(Arc::clone(&ctx.metrics)),
    );
    let mut renderer = UpdateRenderer::new(ctx.json);

    let submitted = monitor.submit(config).await;
    while let Ok(update) = updates.try_recv() {
        renderer.show(&update);
    }
    let job_id = submitted?;
    log::info!("submitted {kind} job {job_id}");

    follow(monitor, updates, renderer).await
}

async fn watch(ctx: &Context, kind: JobKind, job_id: String) -> CmdResult<()> {
    let (mut monitor, updates) = JobMonitor::new(
        kind,
        Arc::clone(&ctx.backend),
        ctx.settings.monitor.clone(),
        Some(Arc::clone(&ctx.metrics)),
    );
    start_watch(&mut monitor, job_id)?;
    follow(monitor, updates, UpdateRenderer::new(ctx.json)).await
}

fn start_watch(monitor: &mut JobMonitor, job_id: String) -> CmdResult<()> {
    if monitor.attach(job_id.clone()) {
        log::info!("watching {} job {job_id}", monitor.kind());
        Ok(())
    } else {
        Err(CommandError::AttachRejected {
            job_id,
            status: monitor.status(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InterruptAction {
    Cancel,
    Stop,
}

/// Ctrl-C の扱い。kill が応答待ちの間に押されたら監視をやめる。
/// kill が失敗したら次の Ctrl-C で再度キャンセルを送る。
#[derive(Debug, Default)]
struct InterruptPolicy {
    cancel_pending: bool,
}

impl InterruptPolicy {
    fn observe(&mut self, transition: &Transition) {
        if transition.event == "cancel_failed" {
            self.cancel_pending = false;
        }
    }

    fn decide(&self, status: JobStatus) -> InterruptAction {
        if status == JobStatus::Running && !self.cancel_pending {
            InterruptAction::Cancel
        } else {
            InterruptAction::Stop
        }
    }

    fn cancel_sent(&mut self) {
        self.cancel_pending = true;
    }
}

/// 終端状態まで更新を描画する。Ctrl-C でキャンセル、キャンセル中にもう一度押すと監視を止める。
async fn follow(
    mut monitor: JobMonitor,
    mut updates: UnboundedReceiver<JobUpdate>,
    mut renderer: UpdateRenderer,
) -> CmdResult<()> {
    let mut interrupts = InterruptPolicy::default();

    let status = loop {
        tokio::select! {
            update = updates.recv() => {
                let Some(update) = update else {
                    break monitor.status();
                };
                renderer.show(&update);
                interrupts.observe(&update.transition);
                if update.handle.status.is_terminal() {
                    break update.handle.status;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                if interrupts.decide(monitor.status()) == InterruptAction::Cancel
                    && monitor.cancel()
                {
                    interrupts.cancel_sent();
                    log::warn!("cancel requested; press Ctrl-C again to stop watching");
                    continue;
                }
                let job_id = monitor.snapshot().id.unwrap_or_default();
                monitor.dispose();
                return Err(CommandError::Interrupted(job_id));
            }
        }
    };

    match status {
        JobStatus::Completed => Ok(()),
        other => Err(CommandError::Unfinished(other)),
    }
}

async fn list(ctx: &Context, filter: ListingFilter, watch: bool) -> CmdResult<()> {
    let registry = JobRegistry::new(
        Arc::clone(&ctx.backend),
        &ctx.settings.registry,
        Some(Arc::clone(&ctx.metrics)),
    );

    if !watch {
        let listing = registry.refresh(&filter).await?;
        render::show_listing(&listing, ctx.json);
        return Ok(());
    }

    let mut auto = registry.spawn_auto_refresh(filter, ctx.settings.registry.refresh_interval());
    loop {
        tokio::select! {
            listing = auto.next() => match listing {
                Some(Ok(listing)) => render::show_listing(&listing, ctx.json),
                Some(Err(e)) => log::warn!("refresh failed, keeping previous listing: {e}"),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

async fn kill(ctx: &Context, job_id: &str) -> CmdResult<()> {
    ctx.backend
        .kill(job_id)
        .await
        .map_err(CancellationError::from)?;
    log::info!("kill requested for job {job_id}");
    if ctx.json {
        println!("{}", serde_json::json!({ "job_id": job_id, "killed": true }));
    } else {
        println!("kill requested for job {job_id}");
    }
    Ok(())
}

async fn files(ctx: &Context, directory: &str) -> CmdResult<()> {
    let entries = ctx.backend.list_files(directory).await?;
    log::debug!("{} entries under {directory}", entries.len());
    render::show_files(&entries, ctx.json);
    Ok(())
}

fn log_summary(metrics: &Metrics) {
    let summary = metrics.summary();
    log::info!(
        "session: {} submission(s), {} poll(s) ok, {} failed, outcomes completed={} failed={} cancelled={} timed_out={}",
        summary.submissions,
        summary.polls_ok,
        summary.polls_failed,
        summary.outcomes.completed,
        summary.outcomes.failed,
        summary.outcomes.cancelled,
        summary.outcomes.timed_out,
    );
    if let Some(avg) = summary.avg_poll_latency_ms {
        log::debug!("average poll latency: {avg:.1} ms");
    }
}
