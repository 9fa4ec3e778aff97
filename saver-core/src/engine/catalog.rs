use super::stamp::parse_stamp;
use crate::detector::Fingerprint;
use crate::error::{Result, SaverError};
use crate::types::BackupEntry;
use std::fs;
use std::path::{Path, PathBuf};

/// Prefix of the scratch directory a backup is written into before it is renamed.
pub const TEMP_PREFIX: &str = ".inprogress-";

/// Completed entries in `root`, newest first.
pub fn list_entries(root: &Path) -> Result<Vec<BackupEntry>> {
  let rd = fs::read_dir(root).map_err(|_| SaverError::PathNotFound(root.to_path_buf()))?;

  let mut out = Vec::new();
  for dirent in rd.flatten() {
    let path = dirent.path();
    let name = dirent.file_name().to_string_lossy().into_owned();
    let Some(created_at_unix_ms) = parse_stamp(&name) else {
      continue;
    };
    if !path.is_dir() {
      continue;
    }
    let Some(slot) = entry_slot(&path) else {
      tracing::debug!(entry = %name, "backup entry has no slot folder; ignored");
      continue;
    };
    let size_bytes = Fingerprint::of(&path).map(|fp| fp.total_bytes).unwrap_or(0);
    out.push(BackupEntry {
      id: name,
      slot,
      created_at_unix_ms,
      size_bytes,
      path,
    });
  }

  out.sort_by(|a, b| b.id.cmp(&a.id));
  Ok(out)
}

pub fn find_entry(root: &Path, id: &str) -> Result<BackupEntry> {
  list_entries(root)?
    .into_iter()
    .find(|e| e.id == id)
    .ok_or_else(|| SaverError::EntryNotFound(id.to_string()))
}

fn entry_slot(entry_dir: &Path) -> Option<String> {
  let mut names: Vec<String> = fs::read_dir(entry_dir)
    .ok()?
    .flatten()
    .filter(|d| d.path().is_dir())
    .map(|d| d.file_name().to_string_lossy().into_owned())
    .filter(|n| !n.starts_with('.'))
    .collect();
  names.sort();
  names.into_iter().next()
}

/// Removes scratch directories left behind by a backup that never finished.
pub fn sweep_stale_temp(root: &Path) -> Vec<PathBuf> {
  let Ok(rd) = fs::read_dir(root) else {
    return Vec::new();
  };
  let mut removed = Vec::new();
  for dirent in rd.flatten() {
    let name = dirent.file_name().to_string_lossy().into_owned();
    if !name.starts_with(TEMP_PREFIX) {
      continue;
    }
    let path = dirent.path();
    match fs::remove_dir_all(&path) {
      Ok(()) => {
        tracing::warn!(dir = %name, "removed unfinished backup from an earlier run");
        removed.push(path);
      }
      Err(e) => tracing::warn!(dir = %name, error = %e, "could not remove unfinished backup"),
    }
  }
  removed
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn lists_only_completed_entries_newest_first() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    for id in ["2024-06-29_22-07-11.123", "2024-06-30_08-00-00.000"] {
      fs::create_dir_all(root.join(id).join("slot0000")).unwrap();
      fs::write(root.join(id).join("slot0000/gameinfo.json"), "{}").unwrap();
    }
    fs::create_dir_all(root.join(".inprogress-2024-07-01_00-00-00.000/slot0000")).unwrap();
    fs::create_dir_all(root.join("slot0000_20240629220711")).unwrap();
    fs::create_dir_all(root.join("2024-07-02_00-00-00.000")).unwrap();

    let entries = list_entries(root).unwrap();
    let ids: Vec<_> = entries.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["2024-06-30_08-00-00.000", "2024-06-29_22-07-11.123"]);
    assert_eq!(entries[0].slot, "slot0000");
    assert_eq!(entries[0].size_bytes, 2);
  }

  #[test]
  fn missing_entry_is_reported() {
    let tmp = TempDir::new().unwrap();
    assert!(matches!(
      find_entry(tmp.path(), "2024-06-29_22-07-11.123"),
      Err(SaverError::EntryNotFound(_))
    ));
  }

  #[test]
  fn stale_scratch_is_swept() {
    let tmp = TempDir::new().unwrap();
    fs::create_dir_all(tmp.path().join(".inprogress-x/slot0000")).unwrap();
    fs::create_dir_all(tmp.path().join("2024-06-29_22-07-11.123/slot0000")).unwrap();
    assert_eq!(sweep_stale_temp(tmp.path()).len(), 1);
    assert!(!tmp.path().join(".inprogress-x").exists());
    assert!(tmp.path().join("2024-06-29_22-07-11.123").exists());
  }
}
