use crate::error::{is_lock_violation, Result, SaverError};
use crate::types::redact_path_for_log;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use walkdir::WalkDir;

/// Copies one file. The engine goes through this so tests can inject failures.
pub trait FileCopier: Send + Sync {
  fn copy_file(&self, from: &Path, to: &Path) -> io::Result<u64>;
}

pub struct FsCopier;

impl FileCopier for FsCopier {
  fn copy_file(&self, from: &Path, to: &Path) -> io::Result<u64> {
    fs::copy(from, to)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  /// Extra attempts after the first one fails with a lock violation.
  pub retries: u32,
  pub delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      retries: 3,
      delay: Duration::from_millis(250),
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyStats {
  pub files: u64,
  pub bytes: u64,
}

/// Runs `op` until it succeeds, fails with something other than a lock
/// violation, or runs out of retries.
pub fn with_retry<T>(
  retry: RetryPolicy,
  path: &Path,
  mut op: impl FnMut() -> io::Result<T>,
) -> Result<T> {
  let mut attempt: u32 = 0;
  loop {
    attempt += 1;
    match op() {
      Ok(v) => return Ok(v),
      Err(e) if is_lock_violation(&e) => {
        if attempt > retry.retries {
          return Err(SaverError::LockedFile {
            path: path.to_path_buf(),
            attempts: attempt,
          });
        }
        tracing::debug!(
          file = %redact_path_for_log(path),
          attempt,
          error = %e,
          "file busy; retrying"
        );
        thread::sleep(retry.delay);
      }
      Err(e) => return Err(SaverError::copy_failed(path, e)),
    }
  }
}

/// Copies every file below `src` into `dst`, creating `dst` and its subfolders.
pub fn copy_tree(
  copier: &dyn FileCopier,
  src: &Path,
  dst: &Path,
  retry: RetryPolicy,
) -> Result<CopyStats> {
  fs::create_dir_all(dst).map_err(|e| SaverError::copy_failed(dst, e))?;

  let mut stats = CopyStats::default();
  for entry in WalkDir::new(src).min_depth(1).follow_links(false) {
    let entry = entry.map_err(|e| {
      let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| src.to_path_buf());
      SaverError::copy_failed(path, io::Error::from(e))
    })?;
    let rel = entry.path().strip_prefix(src).unwrap_or(entry.path());
    let target = dst.join(rel);

    if entry.file_type().is_dir() {
      fs::create_dir_all(&target).map_err(|e| SaverError::copy_failed(&target, e))?;
      continue;
    }
    if !entry.file_type().is_file() {
      continue;
    }

    let bytes = with_retry(retry, entry.path(), || copier.copy_file(entry.path(), &target))?;
    stats.files += 1;
    stats.bytes += bytes;
  }
  Ok(stats)
}

/// Relative paths of every file below `root`, sorted. A missing root has no files.
pub fn relative_files(root: &Path) -> Result<Vec<PathBuf>> {
  if !root.exists() {
    return Ok(Vec::new());
  }
  let mut out = Vec::new();
  for entry in WalkDir::new(root).min_depth(1).follow_links(false) {
    let entry = entry.map_err(|e| SaverError::Unreadable {
      path: root.to_path_buf(),
      source: io::Error::from(e),
    })?;
    if entry.file_type().is_file() {
      if let Ok(rel) = entry.path().strip_prefix(root) {
        out.push(rel.to_path_buf());
      }
    }
  }
  out.sort();
  Ok(out)
}

/// Best-effort removal of a scratch directory.
pub fn remove_scratch(path: &Path) {
  if !path.exists() {
    return;
  }
  if let Err(e) = fs::remove_dir_all(path) {
    tracing::warn!(dir = %redact_path_for_log(path), error = %e, "could not remove scratch directory");
  }
}
