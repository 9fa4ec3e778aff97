use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SaverError>;

#[derive(Error, Debug)]
pub enum SaverError {
  #[error("path not found: {0}")]
  PathNotFound(PathBuf),

  #[error("cannot read {path}: {source}")]
  Unreadable {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("no save slot found under {0}")]
  NoSaveSlot(PathBuf),

  #[error("backup entry not found: {0}")]
  EntryNotFound(String),

  #[error("file still locked after {attempts} attempts: {path}")]
  LockedFile { path: PathBuf, attempts: u32 },

  #[error("out of disk space while writing {path}")]
  StorageFull { path: PathBuf },

  #[error("copy failed at {path}: {source}")]
  CopyFailed {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("another backup or restore is in progress")]
  Busy,

  #[error("invalid settings: {0}")]
  ConfigInvalid(String),
}

impl SaverError {
  pub fn copy_failed(path: impl Into<PathBuf>, source: io::Error) -> Self {
    let path = path.into();
    if is_storage_full(&source) {
      return Self::StorageFull { path };
    }
    Self::CopyFailed { path, source }
  }

  /// Disk exhaustion is surfaced as a persistent warning instead of a transient notice.
  pub fn is_resource_exhaustion(&self) -> bool {
    matches!(self, Self::StorageFull { .. })
  }

  /// Whether the operation can reasonably succeed on a later attempt without user action.
  pub fn is_transient(&self) -> bool {
    matches!(
      self,
      Self::LockedFile { .. } | Self::CopyFailed { .. } | Self::Unreadable { .. } | Self::Busy
    )
  }
}

pub(crate) fn is_storage_full(e: &io::Error) -> bool {
  if e.kind() == io::ErrorKind::StorageFull {
    return true;
  }
  // ENOSPC on unix, ERROR_DISK_FULL / ERROR_HANDLE_DISK_FULL on windows.
  match e.raw_os_error() {
    #[cfg(unix)]
    Some(28) => true,
    #[cfg(windows)]
    Some(39) | Some(112) => true,
    _ => false,
  }
}

/// Sharing and lock violations the game can cause while it is writing its save.
pub(crate) fn is_lock_violation(e: &io::Error) -> bool {
  match e.raw_os_error() {
    #[cfg(windows)]
    Some(32) | Some(33) => return true,
    _ => {}
  }
  matches!(
    e.kind(),
    io::ErrorKind::PermissionDenied | io::ErrorKind::WouldBlock | io::ErrorKind::ResourceBusy
  )
}
