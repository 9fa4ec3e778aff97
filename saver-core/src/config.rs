use crate::error::SaverError;
use crate::paths;
use crate::types::Game;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
  /// `None` means the save folder is auto-detected.
  pub save_folder: Option<PathBuf>,
  pub backup_folder: PathBuf,
  pub poll_interval_seconds: u64,
  pub max_backups: usize,
  pub max_backup_age_days: u64,
  pub game: Game,
  pub skip_first_tick: bool,
  pub copy_retries: u32,
  pub retry_delay_ms: u64,
  pub logging: LoggingConfig,
}

impl Settings {
  pub fn with_base(base: &Path) -> Self {
    Self {
      save_folder: None,
      backup_folder: paths::default_backup_dir(base),
      poll_interval_seconds: default_poll_interval_seconds(),
      max_backups: default_max_backups(),
      max_backup_age_days: 0,
      game: Game::Subnautica,
      skip_first_tick: true,
      copy_retries: default_copy_retries(),
      retry_delay_ms: default_retry_delay_ms(),
      logging: LoggingConfig::default(),
    }
  }

  pub fn poll_interval(&self) -> Duration {
    Duration::from_secs(self.poll_interval_seconds)
  }

  pub fn retry_delay(&self) -> Duration {
    Duration::from_millis(self.retry_delay_ms)
  }

  pub fn max_backup_age(&self) -> Option<Duration> {
    if self.max_backup_age_days == 0 {
      return None;
    }
    Some(Duration::from_secs(
      self.max_backup_age_days.saturating_mul(24 * 60 * 60),
    ))
  }

  /// Applies a single `key = value` change as typed by a user.
  pub fn set_value(&mut self, key: &str, value: &str) -> Result<(), SaverError> {
    let invalid = |what: &str| SaverError::ConfigInvalid(format!("{key}: {what}"));
    match key {
      "save_folder" => {
        self.save_folder = if value.trim().is_empty() {
          None
        } else {
          Some(PathBuf::from(value))
        };
      }
      "backup_folder" => {
        if value.trim().is_empty() {
          return Err(invalid("must not be empty"));
        }
        self.backup_folder = PathBuf::from(value);
      }
      "poll_interval_seconds" => {
        self.poll_interval_seconds =
          parse_positive(value).ok_or_else(|| invalid("expected an integer > 0"))?;
      }
      "max_backups" => {
        self.max_backups =
          parse_positive(value).ok_or_else(|| invalid("expected an integer > 0"))? as usize;
      }
      "max_backup_age_days" => {
        self.max_backup_age_days = value
          .trim()
          .parse()
          .map_err(|_| invalid("expected an integer"))?;
      }
      "game" => {
        self.game = match value.trim() {
          "subnautica" => Game::Subnautica,
          "below_zero" => Game::BelowZero,
          _ => return Err(invalid("expected `subnautica` or `below_zero`")),
        };
      }
      "skip_first_tick" => {
        self.skip_first_tick = match value.trim() {
          "true" => true,
          "false" => false,
          _ => return Err(invalid("expected `true` or `false`")),
        };
      }
      "copy_retries" => {
        self.copy_retries = value
          .trim()
          .parse()
          .map_err(|_| invalid("expected an integer"))?;
      }
      "retry_delay_ms" => {
        self.retry_delay_ms = value
          .trim()
          .parse()
          .map_err(|_| invalid("expected an integer"))?;
      }
      "logging.level" => self.logging.level = value.trim().to_string(),
      _ => return Err(SaverError::ConfigInvalid(format!("unknown key `{key}`"))),
    }
    Ok(())
  }
}

fn parse_positive(value: &str) -> Option<u64> {
  value.trim().parse::<u64>().ok().filter(|v| *v > 0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
  #[serde(default = "default_log_level")]
  pub level: String,

  #[serde(default = "default_retention_days")]
  pub retention_days: u64,
}

fn default_log_level() -> String {
  "info".to_string()
}

fn default_retention_days() -> u64 {
  14
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      retention_days: default_retention_days(),
    }
  }
}

fn default_poll_interval_seconds() -> u64 {
  10
}

fn default_max_backups() -> usize {
  10
}

fn default_copy_retries() -> u32 {
  3
}

fn default_retry_delay_ms() -> u64 {
  250
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SettingsFile {
  #[serde(default)]
  pub save_folder: Option<String>,

  #[serde(default)]
  pub backup_folder: Option<String>,

  #[serde(default)]
  pub poll_interval_seconds: Option<u64>,

  #[serde(default)]
  pub max_backups: Option<usize>,

  #[serde(default)]
  pub max_backup_age_days: Option<u64>,

  #[serde(default)]
  pub game: Option<Game>,

  #[serde(default)]
  pub skip_first_tick: Option<bool>,

  #[serde(default)]
  pub copy_retries: Option<u32>,

  #[serde(default)]
  pub retry_delay_ms: Option<u64>,

  #[serde(default)]
  pub logging: Option<LoggingConfig>,

  // Back-compat: the first releases wrote `game_save_folder` / `target_folder`.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub game_save_folder: Option<String>,

  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub target_folder: Option<String>,
}

impl SettingsFile {
  fn normalize(self, base: &Path) -> Settings {
    let mut s = Settings::with_base(base);

    let save = self.save_folder.or(self.game_save_folder);
    s.save_folder = save.filter(|p| !p.trim().is_empty()).map(PathBuf::from);

    if let Some(b) = self
      .backup_folder
      .or(self.target_folder)
      .filter(|p| !p.trim().is_empty())
    {
      s.backup_folder = PathBuf::from(b);
    }
    if let Some(v) = self.poll_interval_seconds {
      s.poll_interval_seconds = v;
    }
    if let Some(v) = self.max_backups {
      s.max_backups = v;
    }
    if let Some(v) = self.max_backup_age_days {
      s.max_backup_age_days = v;
    }
    if let Some(g) = self.game {
      s.game = g;
    }
    if let Some(v) = self.skip_first_tick {
      s.skip_first_tick = v;
    }
    if let Some(v) = self.copy_retries {
      s.copy_retries = v;
    }
    if let Some(v) = self.retry_delay_ms {
      s.retry_delay_ms = v;
    }
    if let Some(l) = self.logging {
      s.logging = l;
    }

    for problem in repair(&mut s) {
      tracing::warn!(problem = %problem, "settings value out of range; default restored");
    }

    s
  }

  fn needs_upgrade(&self) -> bool {
    self.save_folder.is_none()
      || self.backup_folder.is_none()
      || self.poll_interval_seconds.is_none()
      || self.max_backups.is_none()
      || self.max_backup_age_days.is_none()
      || self.game.is_none()
      || self.skip_first_tick.is_none()
      || self.copy_retries.is_none()
      || self.retry_delay_ms.is_none()
      || self.logging.is_none()
      || self.game_save_folder.is_some()
      || self.target_folder.is_some()
  }
}

/// Replaces out-of-range values with defaults and reports what was changed.
fn repair(s: &mut Settings) -> Vec<SaverError> {
  let mut problems = Vec::new();
  if s.poll_interval_seconds == 0 {
    s.poll_interval_seconds = default_poll_interval_seconds();
    problems.push(SaverError::ConfigInvalid(
      "poll_interval_seconds must be > 0".to_string(),
    ));
  }
  if s.max_backups == 0 {
    s.max_backups = default_max_backups();
    problems.push(SaverError::ConfigInvalid(
      "max_backups must be > 0".to_string(),
    ));
  }
  if s.copy_retries > 50 {
    s.copy_retries = default_copy_retries();
    problems.push(SaverError::ConfigInvalid(
      "copy_retries must be <= 50".to_string(),
    ));
  }
  problems
}

pub fn load_or_create_default(path: &Path) -> anyhow::Result<Settings> {
  load_impl(path, true)
}

pub fn load_or_default_readonly(path: &Path) -> anyhow::Result<Settings> {
  load_impl(path, false)
}

fn load_impl(path: &Path, allow_writes: bool) -> anyhow::Result<Settings> {
  let parent = path
    .parent()
    .ok_or_else(|| anyhow::anyhow!("settings path has no parent: {}", path.display()))?;
  if allow_writes {
    fs::create_dir_all(parent)?;
  }

  if !path.exists() {
    let settings = Settings::with_base(parent);
    if allow_writes {
      save(path, &settings)?;
    }
    return Ok(settings);
  }

  let raw = fs::read_to_string(path)?;
  match toml::from_str::<SettingsFile>(&raw) {
    Ok(file) => {
      let settings = file.clone().normalize(parent);
      if allow_writes && file.needs_upgrade() {
        let backup = parent.join(format!("settings.toml.bak-{}", unix_seconds()));
        let _ = fs::copy(path, &backup);
        let _ = save(path, &settings);
        tracing::info!(
          backup = %backup.display(),
          "settings upgraded with new defaults"
        );
      }
      Ok(settings)
    }
    Err(e) => {
      let err = SaverError::ConfigInvalid(e.to_string());
      let settings = Settings::with_base(parent);
      if allow_writes {
        let backup = parent.join(format!("settings.toml.bad-{}", unix_seconds()));
        let _ = fs::rename(path, &backup);
        save(path, &settings)?;
        tracing::warn!(
          error = %err,
          backup = %backup.display(),
          "settings unreadable; defaults regenerated"
        );
      } else {
        tracing::warn!(error = %err, "settings unreadable; using defaults without writing");
      }
      Ok(settings)
    }
  }
}

/// Persists settings, replacing the previous file atomically.
pub fn save(path: &Path, settings: &Settings) -> anyhow::Result<()> {
  let raw = toml::to_string_pretty(&to_settings_file(settings))?;
  write_atomic(path, &raw)
}

fn to_settings_file(s: &Settings) -> SettingsFile {
  SettingsFile {
    save_folder: Some(
      s.save_folder
        .as_ref()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default(),
    ),
    backup_folder: Some(s.backup_folder.to_string_lossy().into_owned()),
    poll_interval_seconds: Some(s.poll_interval_seconds),
    max_backups: Some(s.max_backups),
    max_backup_age_days: Some(s.max_backup_age_days),
    game: Some(s.game),
    skip_first_tick: Some(s.skip_first_tick),
    copy_retries: Some(s.copy_retries),
    retry_delay_ms: Some(s.retry_delay_ms),
    logging: Some(s.logging.clone()),
    game_save_folder: None,
    target_folder: None,
  }
}

fn unix_seconds() -> u64 {
  std::time::SystemTime::now()
    .duration_since(std::time::UNIX_EPOCH)
    .unwrap_or_default()
    .as_secs()
}

fn write_atomic(path: &Path, contents: &str) -> anyhow::Result<()> {
  let parent = path
    .parent()
    .ok_or_else(|| anyhow::anyhow!("file path has no parent: {}", path.display()))?;
  fs::create_dir_all(parent)?;
  let tmp = parent.join(format!(
    ".{}.tmp",
    path.file_name().unwrap_or_default().to_string_lossy()
  ));

  fs::write(&tmp, contents)?;
  fs::rename(&tmp, path)?;
  Ok(())
}
