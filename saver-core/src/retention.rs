use crate::config::Settings;
use crate::engine::catalog::list_entries;
use crate::error::Result;
use crate::types::BackupEntry;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
  pub max_backups: usize,
  /// Entries older than this go too, except the newest one.
  pub max_age: Option<Duration>,
}

impl RetentionPolicy {
  pub fn keep_last(max_backups: usize) -> Self {
    Self {
      max_backups,
      max_age: None,
    }
  }

  pub fn from_settings(settings: &Settings) -> Self {
    Self {
      max_backups: settings.max_backups,
      max_age: settings.max_backup_age(),
    }
  }
}

/// Picks the entries to delete from a newest-first listing.
pub fn select_for_removal(
  newest_first: &[BackupEntry],
  policy: &RetentionPolicy,
  now_ms: u64,
) -> Vec<BackupEntry> {
  let max_age_ms = policy.max_age.map(|a| a.as_millis() as u64);
  newest_first
    .iter()
    .enumerate()
    .filter(|(i, e)| {
      if *i >= policy.max_backups {
        return true;
      }
      match max_age_ms {
        Some(limit) if *i > 0 => now_ms.saturating_sub(e.created_at_unix_ms) > limit,
        _ => false,
      }
    })
    .map(|(_, e)| e.clone())
    .collect()
}

/// Deletes entries beyond the policy. Callers must hold the engine's operation guard.
pub fn prune(root: &Path, policy: &RetentionPolicy, now_ms: u64) -> Result<Vec<BackupEntry>> {
  let entries = list_entries(root)?;
  let mut removed = Vec::new();
  for victim in select_for_removal(&entries, policy, now_ms) {
    match fs::remove_dir_all(&victim.path) {
      Ok(()) => {
        tracing::info!(
          entry = %victim.id,
          slot = %victim.slot,
          "pruned backup"
        );
        removed.push(victim);
      }
      Err(e) => {
        tracing::warn!(entry = %victim.id, error = %e, "could not prune backup");
      }
    }
  }
  Ok(removed)
}
