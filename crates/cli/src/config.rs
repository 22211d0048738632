use std::path::{Path, PathBuf};

use jd_core::domain::error::ConfigError;
use jd_core::domain::settings::DashboardSettings;

use crate::cli::Args;

const LOCAL_CONFIG: &str = "jobdash.toml";

/// 設定ファイルの探索: `--config` → `./jobdash.toml` → `<config_dir>/jobdash/config.toml`
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let local = PathBuf::from(LOCAL_CONFIG);
    if local.exists() {
        return Some(local);
    }
    dirs::config_dir()
        .map(|dir| dir.join("jobdash").join("config.toml"))
        .filter(|path| path.exists())
}

pub fn load(path: &Path) -> Result<DashboardSettings, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    parse(&raw, &path.display().to_string())
}

pub fn parse(raw: &str, origin: &str) -> Result<DashboardSettings, ConfigError> {
    toml::from_str(raw).map_err(|e| ConfigError::Parse {
        path: origin.to_string(),
        message: e.to_string(),
    })
}

/// CLI フラグでファイルの値を上書きする
pub fn apply_overrides(settings: &mut DashboardSettings, args: &Args) {
    if let Some(url) = &args.base_url {
        settings.backend.base_url = url.clone();
    }
    if let Some(level) = &args.log_level {
        settings.log.level = level.clone();
    }
}

pub fn load_settings(args: &Args) -> Result<DashboardSettings, ConfigError> {
    let mut settings = match resolve_config_path(args.config.as_deref()) {
        Some(path) => load(&path)?,
        None => DashboardSettings::default(),
    };
    apply_overrides(&mut settings, args);
    settings.validate()?;
    Ok(settings)
}
