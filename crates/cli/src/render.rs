use std::collections::HashMap;

use serde::Serialize;

use jd_core::domain::error::ErrorCode;
use jd_core::domain::job::JobHandle;
use jd_core::domain::wire::FileEntry;
use jd_core::usecase::job_monitor::JobUpdate;
use jd_core::usecase::job_registry::JobListing;

/// job_update ペイロード（`--json` 時に 1 行 1 オブジェクトで出力）
#[derive(Debug, Clone, Serialize)]
pub struct JobUpdatePayload<'a> {
    pub monitor_id: String,
    pub event: &'a str,
    pub prev_status: &'a str,
    pub new_status: &'a str,
    pub handle: &'a JobHandle,
    pub timestamp: String,
}

impl<'a> From<&'a JobUpdate> for JobUpdatePayload<'a> {
    fn from(update: &'a JobUpdate) -> Self {
        Self {
            monitor_id: update.monitor_id.to_string(),
            event: update.transition.event,
            prev_status: update.transition.prev_status.as_str(),
            new_status: update.transition.new_status.as_str(),
            handle: &update.handle,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// error ペイロード
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub message: String,
    pub recoverable: bool,
}

fn print_json<S: Serialize>(payload: &S) {
    match serde_json::to_string(payload) {
        Ok(line) => println!("{line}"),
        Err(e) => log::error!("failed to serialize payload: {e}"),
    }
}

/// 1 ジョブ分の更新を端末へ描く。ログはバッファごと置き換わるので、前回との差分だけを出す。
pub struct UpdateRenderer {
    json: bool,
    last_status_line: Option<String>,
    shown_logs: Vec<String>,
}

impl UpdateRenderer {
    pub fn new(json: bool) -> Self {
        Self {
            json,
            last_status_line: None,
            shown_logs: Vec::new(),
        }
    }

    pub fn show(&mut self, update: &JobUpdate) {
        if self.json {
            print_json(&JobUpdatePayload::from(update));
            return;
        }
        for line in self.lines_for(&update.handle) {
            println!("{line}");
        }
    }

    fn lines_for(&mut self, handle: &JobHandle) -> Vec<String> {
        let mut out = Vec::new();
        let status_line = handle.status_line();
        if self.last_status_line.as_deref() != Some(status_line.as_str()) {
            out.push(status_line.clone());
            self.last_status_line = Some(status_line);
        }
        out.extend(
            fresh_lines(&self.shown_logs, &handle.logs)
                .into_iter()
                .map(|line| format!("  | {line}")),
        );
        self.shown_logs = handle.logs.clone();

        if handle.status.is_terminal() {
            if let Some(location) = &handle.output_location {
                out.push(format!("output: {location}"));
            }
        }
        out
    }
}

/// 前回のバッファに無い行（重複行は出現回数で数える）
fn fresh_lines<'a>(previous: &[String], current: &'a [String]) -> Vec<&'a str> {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    for line in previous {
        *seen.entry(line.as_str()).or_default() += 1;
    }
    current
        .iter()
        .filter(|line| match seen.get_mut(line.as_str()) {
            Some(count) if *count > 0 => {
                *count -= 1;
                false
            }
            _ => true,
        })
        .map(String::as_str)
        .collect()
}

pub fn show_listing(listing: &JobListing, json: bool) {
    if json {
        print_json(listing);
        return;
    }
    for line in listing_lines(listing) {
        println!("{line}");
    }
}

fn listing_lines(listing: &JobListing) -> Vec<String> {
    let mut out = vec![format!(
        "{:<24} {:<16} {:<10} {:>5}  {}",
        "JOB", "KIND", "STATUS", "PROG", "TITLE"
    )];
    for job in &listing.jobs {
        let handle = &job.handle;
        out.push(format!(
            "{:<24} {:<16} {:<10} {:>4}%  {}",
            handle.id.as_deref().unwrap_or("-"),
            handle.kind.as_str(),
            handle.status.as_str(),
            handle.progress_percent,
            job.title
        ));
    }
    let mut footer = format!(
        "{} job(s) at {}",
        listing.jobs.len(),
        listing.refreshed_at.format("%H:%M:%S")
    );
    if listing.dropped > 0 {
        footer.push_str(&format!(", {} unavailable", listing.dropped));
    }
    out.push(footer);
    out
}

pub fn show_files(files: &[FileEntry], json: bool) {
    if json {
        print_json(&files);
        return;
    }
    for file in files {
        let marker = if file.is_dir { "d" } else { "-" };
        match file.size {
            Some(size) => println!("{marker} {} ({size} bytes)", file.path),
            None => println!("{marker} {}", file.path),
        }
    }
}

pub fn show_error(payload: &ErrorPayload, json: bool) {
    if json {
        print_json(payload);
    } else {
        eprintln!("jobdash: {}", payload.message);
    }
}
