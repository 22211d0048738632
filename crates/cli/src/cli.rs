use std::path::PathBuf;

use clap::{Parser, Subcommand};
use jd_core::domain::job::JobKind;

#[derive(Parser, Debug)]
#[command(name = "jobdash", version)]
#[command(about = "Submit, watch and cancel backend jobs from the terminal")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./jobdash.toml or the user config dir.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Override backend.base_url.
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// Print one JSON object per update instead of human-readable lines.
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Submit a job and follow it until it finishes. Ctrl-C cancels it.
    Submit {
        #[arg(long, value_parser = parse_kind)]
        kind: JobKind,
        /// JSON file holding the job configuration body.
        #[arg(long)]
        config_file: PathBuf,
    },
    /// Attach to an existing job id and follow it.
    Watch {
        job_id: String,
        #[arg(long, value_parser = parse_kind, default_value = "generation")]
        kind: JobKind,
    },
    /// List recent jobs from the activity feed.
    List {
        #[arg(long, value_parser = parse_kind)]
        kind: Option<JobKind>,
        /// Hide finished jobs.
        #[arg(long)]
        active: bool,
        /// Keep refreshing on the configured interval.
        #[arg(long)]
        watch: bool,
    },
    /// Ask the backend to cancel a job.
    Kill { job_id: String },
    /// List input files under a backend directory.
    Files {
        #[arg(long)]
        directory: String,
    },
}

fn parse_kind(raw: &str) -> Result<JobKind, String> {
    raw.parse()
}
