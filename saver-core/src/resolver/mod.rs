pub mod candidates;

use crate::config::Settings;
use crate::error::{Result, SaverError};
use crate::types::{redact_path_for_log, Game};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// A folder holding one or more save-slot subfolders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavePath {
  root: PathBuf,
}

impl SavePath {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn slot_dir(&self, slot: &str) -> PathBuf {
    self.root.join(slot)
  }

  /// Every visible subdirectory, sorted by name. Hidden ones are restore scratch space.
  pub fn slots(&self) -> io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(&self.root)?.flatten() {
      let path = entry.path();
      let hidden = entry.file_name().to_string_lossy().starts_with('.');
      if !hidden && path.is_dir() {
        out.push(path);
      }
    }
    out.sort();
    Ok(out)
  }
}

/// Slot folders are named `slot` followed by digits, e.g. `slot0000`.
pub fn is_slot_name(name: &str) -> bool {
  let Some(rest) = name.strip_prefix("slot") else {
    return false;
  };
  !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit())
}

pub fn is_save_container(path: &Path) -> bool {
  let Ok(entries) = fs::read_dir(path) else {
    return false;
  };
  entries.flatten().any(|e| {
    e.path().is_dir() && e.file_name().to_str().map(is_slot_name).unwrap_or(false)
  })
}

pub fn resolve_save_path(game: Game) -> Result<SavePath> {
  resolve_from_candidates(&candidates::candidate_paths(game))
}

pub fn resolve_from_candidates(candidates: &[PathBuf]) -> Result<SavePath> {
  for candidate in candidates {
    if is_save_container(candidate) {
      tracing::info!(
        folder = %redact_path_for_log(candidate),
        "save folder detected"
      );
      return Ok(SavePath::new(candidate.clone()));
    }
    tracing::debug!(candidate = %redact_path_for_log(candidate), "not a save folder");
  }
  let first = candidates.first().cloned().unwrap_or_default();
  Err(SaverError::PathNotFound(first))
}

/// A configured folder wins; an unset one is probed for.
pub fn locate_save_path(settings: &Settings) -> Result<SavePath> {
  match &settings.save_folder {
    Some(folder) if folder.is_dir() => Ok(SavePath::new(folder.clone())),
    Some(folder) => Err(SaverError::PathNotFound(folder.clone())),
    None => resolve_save_path(settings.game),
  }
}

pub fn resolve_backup_path(settings: &Settings) -> Result<PathBuf> {
  let dir = &settings.backup_folder;
  if !dir.is_dir() {
    fs::create_dir_all(dir).map_err(|_| SaverError::PathNotFound(dir.clone()))?;
    tracing::info!(folder = %redact_path_for_log(dir), "created backup folder");
  }
  Ok(dir.clone())
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  #[test]
  fn slot_names() {
    assert!(is_slot_name("slot0000"));
    assert!(is_slot_name("slot12"));
    assert!(!is_slot_name("slot"));
    assert!(!is_slot_name("slotA1"));
    assert!(!is_slot_name("options"));
  }

  #[test]
  fn first_valid_candidate_wins() {
    let tmp = TempDir::new().unwrap();
    let empty = tmp.path().join("empty");
    let first = tmp.path().join("first");
    let second = tmp.path().join("second");
    fs::create_dir_all(&empty).unwrap();
    fs::create_dir_all(first.join("slot0000")).unwrap();
    fs::create_dir_all(second.join("slot0001")).unwrap();

    let missing = tmp.path().join("missing");
    let found = resolve_from_candidates(&[missing, empty, first.clone(), second]).unwrap();
    assert_eq!(found.root(), first.as_path());
  }

  #[test]
  fn folder_without_slots_is_not_found() {
    let tmp = TempDir::new().unwrap();
    fs::create_dir_all(tmp.path().join("screenshots")).unwrap();
    let err = resolve_from_candidates(&[tmp.path().to_path_buf()]).unwrap_err();
    assert!(matches!(err, SaverError::PathNotFound(_)));
  }

  #[test]
  fn configured_folder_is_used_without_probing() {
    let tmp = TempDir::new().unwrap();
    let mut s = Settings::with_base(tmp.path());
    s.save_folder = Some(tmp.path().to_path_buf());
    assert_eq!(locate_save_path(&s).unwrap().root(), tmp.path());

    s.save_folder = Some(tmp.path().join("gone"));
    assert!(matches!(
      locate_save_path(&s),
      Err(SaverError::PathNotFound(_))
    ));
  }

  #[test]
  fn backup_folder_is_created_on_demand() {
    let tmp = TempDir::new().unwrap();
    let s = Settings::with_base(tmp.path());
    let dir = resolve_backup_path(&s).unwrap();
    assert!(dir.is_dir());
  }

  #[test]
  fn hidden_directories_are_not_slots() {
    let tmp = TempDir::new().unwrap();
    fs::create_dir_all(tmp.path().join("slot0000")).unwrap();
    fs::create_dir_all(tmp.path().join(".slot0000.restore")).unwrap();
    fs::write(tmp.path().join("options.txt"), "x").unwrap();
    let slots = SavePath::new(tmp.path()).slots().unwrap();
    assert_eq!(slots, vec![tmp.path().join("slot0000")]);
  }
}
