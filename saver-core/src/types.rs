use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Game {
  Subnautica,
  BelowZero,
}

impl Game {
  pub fn steam_app_id(self) -> u32 {
    match self {
      Game::Subnautica => 264710,
      Game::BelowZero => 848450,
    }
  }

  /// Folder name the game uses both for its install directory and under LocalLow.
  pub fn folder_name(self) -> &'static str {
    match self {
      Game::Subnautica => "Subnautica",
      Game::BelowZero => "SubnauticaZero",
    }
  }

  pub fn display_name(self) -> &'static str {
    match self {
      Game::Subnautica => "Subnautica",
      Game::BelowZero => "Subnautica: Below Zero",
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupEntry {
  pub id: String,
  pub slot: String,
  pub created_at_unix_ms: u64,
  pub size_bytes: u64,
  pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
  Info,
  Warning,
  /// Needs user attention until resolved (e.g. the backup disk is full).
  Persistent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notice {
  BackupCreated {
    entry: BackupEntry,
    pruned: Vec<String>,
  },
  BackupQueued,
  BackupFailed {
    level: NoticeLevel,
    message: String,
  },
  Restored {
    entry_id: String,
    slot: String,
    files: u64,
  },
  RestoreFailed {
    entry_id: String,
    level: NoticeLevel,
    message: String,
  },
  Pruned {
    removed: Vec<String>,
  },
  Rejected {
    message: String,
  },
}

impl Notice {
  pub fn level(&self) -> NoticeLevel {
    match self {
      Notice::BackupFailed { level, .. } | Notice::RestoreFailed { level, .. } => *level,
      Notice::Rejected { .. } => NoticeLevel::Warning,
      _ => NoticeLevel::Info,
    }
  }

  pub fn summary(&self) -> String {
    match self {
      Notice::BackupCreated { entry, pruned } if pruned.is_empty() => {
        format!("backed up {} as {}", entry.slot, entry.id)
      }
      Notice::BackupCreated { entry, pruned } => format!(
        "backed up {} as {} (pruned {} old)",
        entry.slot,
        entry.id,
        pruned.len()
      ),
      Notice::BackupQueued => "backup queued behind the running operation".to_string(),
      Notice::BackupFailed { message, .. } => format!("backup failed: {message}"),
      Notice::Restored {
        entry_id,
        slot,
        files,
      } => format!("restored {slot} from {entry_id} ({files} files)"),
      Notice::RestoreFailed {
        entry_id, message, ..
      } => format!("restore of {entry_id} failed: {message}"),
      Notice::Pruned { removed } => format!("pruned {} backups", removed.len()),
      Notice::Rejected { message } => message.clone(),
    }
  }
}

pub fn redact_path_for_log(path: &std::path::Path) -> String {
  // Save folders sit under the user's profile; log only the last component.
  path
    .file_name()
    .and_then(|s| s.to_str())
    .unwrap_or("<redacted>")
    .to_string()
}

pub fn now_unix_ms() -> u64 {
  use std::time::{SystemTime, UNIX_EPOCH};
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .unwrap_or_default()
    .as_millis() as u64
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::path::Path;

  #[test]
  fn logged_paths_keep_only_the_last_component() {
    let p = Path::new("/home/me/AppData/LocalLow/Unknown Worlds/Subnautica/Subnautica/SavedGames");
    assert_eq!(redact_path_for_log(p), "SavedGames");
    assert_eq!(redact_path_for_log(Path::new("/")), "<redacted>");
  }
}
