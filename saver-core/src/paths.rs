use std::path::{Path, PathBuf};

pub const HOME_ENV: &str = "SAVE_SAVER_HOME";

pub fn base_dir() -> anyhow::Result<PathBuf> {
  if let Ok(home) = std::env::var(HOME_ENV) {
    if !home.trim().is_empty() {
      return Ok(PathBuf::from(home));
    }
  }
  let data = dirs::data_local_dir()
    .ok_or_else(|| anyhow::anyhow!("no local data directory for this user; set {HOME_ENV}"))?;
  Ok(data.join("SaveSaver"))
}

pub fn config_path(base: &Path) -> PathBuf {
  base.join("settings.toml")
}

pub fn logs_dir(base: &Path) -> PathBuf {
  base.join("logs")
}

pub fn default_backup_dir(base: &Path) -> PathBuf {
  base.join("Saves")
}
