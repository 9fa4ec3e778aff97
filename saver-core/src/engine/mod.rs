pub mod catalog;
pub mod copy;
pub mod guard;
pub mod stamp;

use crate::config::Settings;
use crate::detector::current_slot;
use crate::error::{Result, SaverError};
use crate::notify::Notifier;
use crate::resolver::{self, SavePath};
use crate::retention::{self, RetentionPolicy};
use crate::types::{now_unix_ms, redact_path_for_log, BackupEntry, Notice, NoticeLevel};
use copy::{copy_tree, relative_files, remove_scratch, with_retry, FileCopier, FsCopier, RetryPolicy};
use guard::{Acquire, BackupRequest, OpGuard, OpPermit};
use stamp::StampIssuer;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
  pub retry: RetryPolicy,
  pub retention: RetentionPolicy,
}

impl EngineOptions {
  pub fn from_settings(settings: &Settings) -> Self {
    Self {
      retry: RetryPolicy {
        retries: settings.copy_retries,
        delay: settings.retry_delay(),
      },
      retention: RetentionPolicy::from_settings(settings),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupOutcome {
  Created {
    entry: BackupEntry,
    pruned: Vec<BackupEntry>,
  },
  /// Another operation was running; the backup will run right after it.
  Queued,
}

/// What a restore would do to the live slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestorePreview {
  pub entry_id: String,
  pub slot: String,
  pub target: PathBuf,
  pub overwritten: Vec<PathBuf>,
  pub created: Vec<PathBuf>,
  pub removed: Vec<PathBuf>,
}

impl RestorePreview {
  pub fn is_destructive(&self) -> bool {
    !self.overwritten.is_empty() || !self.removed.is_empty()
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreReport {
  pub entry_id: String,
  pub slot: String,
  pub files: u64,
  pub bytes: u64,
}

/// Backup, restore and prune for one save folder, shared by the timer and manual triggers.
pub struct Engine {
  save: SavePath,
  backup_root: PathBuf,
  options: EngineOptions,
  copier: Box<dyn FileCopier>,
  guard: OpGuard,
  stamps: StampIssuer,
  notifier: Notifier,
  restores: AtomicU64,
}

impl Engine {
  pub fn new(
    save: SavePath,
    backup_root: PathBuf,
    options: EngineOptions,
    notifier: Notifier,
  ) -> Result<Self> {
    if !backup_root.is_dir() {
      return Err(SaverError::PathNotFound(backup_root));
    }
    catalog::sweep_stale_temp(&backup_root);

    let newest = catalog::list_entries(&backup_root)?
      .first()
      .map(|e| e.created_at_unix_ms)
      .unwrap_or(0);

    Ok(Self {
      save,
      backup_root,
      options,
      copier: Box::new(FsCopier),
      guard: OpGuard::default(),
      stamps: StampIssuer::starting_after(newest),
      notifier,
      restores: AtomicU64::new(0),
    })
  }

  pub fn from_settings(settings: &Settings, notifier: Notifier) -> Result<Self> {
    let save = resolver::locate_save_path(settings)?;
    let backup_root = resolver::resolve_backup_path(settings)?;
    Self::new(save, backup_root, EngineOptions::from_settings(settings), notifier)
  }

  pub fn with_copier(mut self, copier: impl FileCopier + 'static) -> Self {
    self.copier = Box::new(copier);
    self
  }

  pub fn save_path(&self) -> &SavePath {
    &self.save
  }

  pub fn backup_root(&self) -> &Path {
    &self.backup_root
  }

  pub fn options(&self) -> &EngineOptions {
    &self.options
  }

  pub fn is_busy(&self) -> bool {
    self.guard.is_busy()
  }

  /// Number of restores that completed since the engine was opened.
  pub fn restores_completed(&self) -> u64 {
    self.restores.load(Ordering::SeqCst)
  }

  pub fn list_backups(&self) -> Result<Vec<BackupEntry>> {
    catalog::list_entries(&self.backup_root)
  }

  /// Snapshots the current save slot. Queued if another operation is running.
  pub fn backup(&self) -> Result<BackupOutcome> {
    let mut permit = match self.guard.request_backup() {
      BackupRequest::Run(permit) => permit,
      BackupRequest::Queued => {
        tracing::info!("backup requested while busy; queued");
        self.notifier.send(Notice::BackupQueued);
        return Ok(BackupOutcome::Queued);
      }
      BackupRequest::Closed => return Err(SaverError::Busy),
    };

    let result = self.backup_and_notify();
    self.drain_pending(&mut permit);
    result.map(|(entry, pruned)| BackupOutcome::Created { entry, pruned })
  }

  pub fn preview_restore(&self, entry_id: &str) -> Result<RestorePreview> {
    let entry = catalog::find_entry(&self.backup_root, entry_id)?;
    let target = self.save.slot_dir(&entry.slot);

    let from_backup: BTreeSet<PathBuf> = relative_files(&entry.path.join(&entry.slot))?
      .into_iter()
      .collect();
    let live: BTreeSet<PathBuf> = relative_files(&target)?.into_iter().collect();

    Ok(RestorePreview {
      entry_id: entry.id,
      slot: entry.slot,
      target,
      overwritten: from_backup.intersection(&live).cloned().collect(),
      created: from_backup.difference(&live).cloned().collect(),
      removed: live.difference(&from_backup).cloned().collect(),
    })
  }

  /// Replaces the live slot with the entry's copy. Refused while another operation runs.
  pub fn restore(&self, entry_id: &str) -> Result<RestoreReport> {
    let mut permit = self.acquire_exclusive("restore")?;

    tracing::info!(entry = %entry_id, "restore started");
    let result = self.run_restore(entry_id);
    match &result {
      Ok(report) => {
        self.restores.fetch_add(1, Ordering::SeqCst);
        tracing::info!(
          entry = %report.entry_id,
          slot = %report.slot,
          files = report.files,
          bytes = report.bytes,
          "restore finished"
        );
        self.notifier.send(Notice::Restored {
          entry_id: report.entry_id.clone(),
          slot: report.slot.clone(),
          files: report.files,
        });
      }
      Err(e) => {
        tracing::error!(entry = %entry_id, error = %e, "restore failed");
        self.notifier.send(Notice::RestoreFailed {
          entry_id: entry_id.to_string(),
          level: failure_level(e),
          message: e.to_string(),
        });
      }
    }

    self.drain_pending(&mut permit);
    result
  }

  /// Applies the retention limit now instead of after the next backup.
  pub fn prune(&self, max_backups: usize) -> Result<Vec<BackupEntry>> {
    let mut permit = self.acquire_exclusive("prune")?;
    let policy = RetentionPolicy {
      max_backups,
      max_age: self.options.retention.max_age,
    };
    let result = retention::prune(&self.backup_root, &policy, now_unix_ms());
    if let Ok(removed) = &result {
      if !removed.is_empty() {
        self.notifier.send(Notice::Pruned {
          removed: removed.iter().map(|e| e.id.clone()).collect(),
        });
      }
    }
    self.drain_pending(&mut permit);
    result
  }

  /// Stops accepting work and waits for a running copy to finish.
  pub fn shutdown(&self) {
    if self.guard.is_busy() {
      tracing::info!("waiting for running operation before shutdown");
    }
    self.guard.close_and_wait();
  }

  fn acquire_exclusive(&self, what: &str) -> Result<OpPermit<'_>> {
    match self.guard.try_acquire() {
      Acquire::Granted(permit) => Ok(permit),
      Acquire::Busy => {
        tracing::warn!(operation = what, "refused: another operation is running");
        self.notifier.send(Notice::Rejected {
          message: format!("{what} refused: a backup or restore is already running"),
        });
        Err(SaverError::Busy)
      }
      Acquire::Closed => Err(SaverError::Busy),
    }
  }

  fn drain_pending(&self, permit: &mut OpPermit<'_>) {
    while permit.take_pending() {
      tracing::info!("running queued backup");
      let _ = self.backup_and_notify();
    }
  }

  fn backup_and_notify(&self) -> Result<(BackupEntry, Vec<BackupEntry>)> {
    let result = self.run_backup();
    match &result {
      Ok((entry, pruned)) => {
        self.notifier.send(Notice::BackupCreated {
          entry: entry.clone(),
          pruned: pruned.iter().map(|e| e.id.clone()).collect(),
        });
      }
      Err(e) => {
        tracing::error!(error = %e, "backup failed");
        self.notifier.send(Notice::BackupFailed {
          level: failure_level(e),
          message: e.to_string(),
        });
      }
    }
    result
  }

  fn run_backup(&self) -> Result<(BackupEntry, Vec<BackupEntry>)> {
    let (slot, slot_dir) = current_slot(&self.save)?;

    let (created_at_unix_ms, id) = loop {
      let (ms, id) = self.stamps.next(now_unix_ms());
      if !self.backup_root.join(&id).exists() {
        break (ms, id);
      }
    };
    tracing::info!(slot = %slot, entry = %id, "backup started");

    let scratch = self
      .backup_root
      .join(format!("{}{id}", catalog::TEMP_PREFIX));
    let stats = match copy_tree(
      self.copier.as_ref(),
      &slot_dir,
      &scratch.join(&slot),
      self.options.retry,
    ) {
      Ok(stats) => stats,
      Err(e) => {
        remove_scratch(&scratch);
        return Err(e);
      }
    };

    let final_dir = self.backup_root.join(&id);
    if let Err(e) = fs::rename(&scratch, &final_dir) {
      remove_scratch(&scratch);
      return Err(SaverError::copy_failed(&final_dir, e));
    }

    let entry = BackupEntry {
      id,
      slot,
      created_at_unix_ms,
      size_bytes: stats.bytes,
      path: final_dir,
    };
    tracing::info!(
      entry = %entry.id,
      slot = %entry.slot,
      files = stats.files,
      bytes = stats.bytes,
      "backup finished"
    );

    let pruned = match retention::prune(&self.backup_root, &self.options.retention, now_unix_ms()) {
      Ok(pruned) => pruned,
      Err(e) => {
        tracing::warn!(error = %e, "retention pass failed; backup kept");
        Vec::new()
      }
    };
    Ok((entry, pruned))
  }

  fn run_restore(&self, entry_id: &str) -> Result<RestoreReport> {
    let entry = catalog::find_entry(&self.backup_root, entry_id)?;
    let root = self.save.root();
    if !root.is_dir() {
      return Err(SaverError::PathNotFound(root.to_path_buf()));
    }

    let source = entry.path.join(&entry.slot);
    let live = self.save.slot_dir(&entry.slot);
    let staging = root.join(format!(".{}.restore", entry.slot));
    let aside = root.join(format!(".{}.previous", entry.slot));
    remove_scratch(&staging);
    remove_scratch(&aside);

    let stats = match copy_tree(self.copier.as_ref(), &source, &staging, self.options.retry) {
      Ok(stats) => stats,
      Err(e) => {
        remove_scratch(&staging);
        return Err(e);
      }
    };

    let had_live = live.exists();
    if had_live {
      if let Err(e) = with_retry(self.options.retry, &live, || fs::rename(&live, &aside)) {
        remove_scratch(&staging);
        return Err(e);
      }
    }
    if let Err(e) = with_retry(self.options.retry, &live, || fs::rename(&staging, &live)) {
      if had_live {
        if let Err(back) = fs::rename(&aside, &live) {
          tracing::error!(
            slot = %entry.slot,
            kept_at = %redact_path_for_log(&aside),
            error = %back,
            "could not put the live slot back"
          );
        }
      }
      remove_scratch(&staging);
      return Err(e);
    }
    remove_scratch(&aside);

    Ok(RestoreReport {
      entry_id: entry.id,
      slot: entry.slot,
      files: stats.files,
      bytes: stats.bytes,
    })
  }
}

fn failure_level(e: &SaverError) -> NoticeLevel {
  if e.is_resource_exhaustion() {
    NoticeLevel::Persistent
  } else {
    NoticeLevel::Warning
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::detector::tests::write_at;
  use copy::tests::FailAfter;
  use std::io;
  use std::sync::atomic::AtomicU32;
  use std::sync::mpsc;
  use std::time::Duration;
  use tempfile::TempDir;

  struct Fixture {
    _tmp: TempDir,
    saves: PathBuf,
    backups: PathBuf,
  }

  fn fixture() -> Fixture {
    let tmp = TempDir::new().unwrap();
    let saves = tmp.path().join("SavedGames");
    let backups = tmp.path().join("Saves");
    fs::create_dir_all(&backups).unwrap();
    write_at(&saves.join("slot0001/gameinfo.json"), "{\"depth\":100}", 1_000);
    write_at(&saves.join("slot0001/cells/batch-1.bin"), "cells", 1_000);
    Fixture {
      _tmp: tmp,
      saves,
      backups,
    }
  }

  fn options(max_backups: usize) -> EngineOptions {
    EngineOptions {
      retry: RetryPolicy {
        retries: 1,
        delay: Duration::from_millis(1),
      },
      retention: RetentionPolicy::keep_last(max_backups),
    }
  }

  fn engine(f: &Fixture, max_backups: usize) -> Engine {
    Engine::new(
      SavePath::new(&f.saves),
      f.backups.clone(),
      options(max_backups),
      Notifier::disabled(),
    )
    .unwrap()
  }

  fn created(outcome: BackupOutcome) -> BackupEntry {
    match outcome {
      BackupOutcome::Created { entry, .. } => entry,
      BackupOutcome::Queued => panic!("expected a new entry"),
    }
  }

  fn scratch_dirs(root: &Path) -> usize {
    fs::read_dir(root)
      .unwrap()
      .flatten()
      .filter(|d| d.file_name().to_string_lossy().starts_with(catalog::TEMP_PREFIX))
      .count()
  }

  #[test]
  fn backup_copies_slot_byte_for_byte() {
    let f = fixture();
    let eng = engine(&f, 10);

    let entry = created(eng.backup().unwrap());
    assert_eq!(entry.slot, "slot0001");
    let copied = entry.path.join("slot0001");
    assert_eq!(
      fs::read(copied.join("gameinfo.json")).unwrap(),
      fs::read(f.saves.join("slot0001/gameinfo.json")).unwrap()
    );
    assert_eq!(
      fs::read(copied.join("cells/batch-1.bin")).unwrap(),
      b"cells".to_vec()
    );
    assert_eq!(eng.list_backups().unwrap(), vec![entry]);
  }

  #[test]
  fn backup_ids_are_unique_and_ordered() {
    let f = fixture();
    let eng = engine(&f, 10);
    let a = created(eng.backup().unwrap());
    let b = created(eng.backup().unwrap());
    let c = created(eng.backup().unwrap());
    assert!(a.id < b.id && b.id < c.id);
    assert!(a.created_at_unix_ms < b.created_at_unix_ms);

    let listed: Vec<_> = eng.list_backups().unwrap().into_iter().map(|e| e.id).collect();
    assert_eq!(listed, vec![c.id, b.id, a.id]);
  }

  #[test]
  fn fourth_backup_prunes_the_earliest() {
    let f = fixture();
    let eng = engine(&f, 3);
    let first = created(eng.backup().unwrap());
    created(eng.backup().unwrap());
    created(eng.backup().unwrap());

    let BackupOutcome::Created { entry: fourth, pruned } = eng.backup().unwrap() else {
      panic!("expected a new entry");
    };
    assert_eq!(pruned, vec![first.clone()]);

    let listed = eng.list_backups().unwrap();
    assert_eq!(listed.len(), 3);
    assert_eq!(listed[0], fourth);
    assert!(listed.iter().all(|e| e.id != first.id));
  }

  #[test]
  fn interrupted_copy_leaves_nothing_behind() {
    let f = fixture();
    for i in 0..3 {
      write_at(&f.saves.join(format!("slot0001/extra-{i}.bin")), "x", 1_000);
    }
    let eng = engine(&f, 10).with_copier(FailAfter {
      fail_after: 2,
      copied: AtomicU32::new(0),
    });

    let err = eng.backup().unwrap_err();
    assert!(matches!(err, SaverError::CopyFailed { .. }));
    assert!(eng.list_backups().unwrap().is_empty());
    assert_eq!(scratch_dirs(&f.backups), 0);
    assert_eq!(fs::read_dir(&f.backups).unwrap().count(), 0);
  }

  struct DiskFull;

  impl FileCopier for DiskFull {
    fn copy_file(&self, _from: &Path, _to: &Path) -> io::Result<u64> {
      Err(io::Error::from(io::ErrorKind::StorageFull))
    }
  }

  #[test]
  fn full_disk_raises_a_persistent_notice() {
    let f = fixture();
    let (notifier, rx) = Notifier::channel();
    let eng = Engine::new(SavePath::new(&f.saves), f.backups.clone(), options(10), notifier)
      .unwrap()
      .with_copier(DiskFull);

    assert!(matches!(eng.backup(), Err(SaverError::StorageFull { .. })));
    assert!(matches!(
      rx.try_recv().unwrap(),
      Notice::BackupFailed {
        level: NoticeLevel::Persistent,
        ..
      }
    ));
    assert_eq!(scratch_dirs(&f.backups), 0);
    assert!(eng.list_backups().unwrap().is_empty());
  }

  #[test]
  fn stale_scratch_from_a_crash_is_cleaned_on_start() {
    let f = fixture();
    fs::create_dir_all(f.backups.join(".inprogress-2024-06-29_22-07-11.123/slot0001")).unwrap();
    let eng = engine(&f, 10);
    assert_eq!(scratch_dirs(eng.backup_root()), 0);
  }

  #[test]
  fn restore_is_idempotent_and_replaces_the_slot() {
    let f = fixture();
    let eng = engine(&f, 10);
    let entry = created(eng.backup().unwrap());

    write_at(&f.saves.join("slot0001/gameinfo.json"), "{\"depth\":900}", 2_000);
    write_at(&f.saves.join("slot0001/new-after-backup.bin"), "late", 2_000);

    assert_eq!(eng.restores_completed(), 0);
    let report = eng.restore(&entry.id).unwrap();
    assert_eq!(report.files, 2);
    assert_eq!(eng.restores_completed(), 1);
    let once = relative_files(&f.saves.join("slot0001")).unwrap();
    let once_info = fs::read(f.saves.join("slot0001/gameinfo.json")).unwrap();

    eng.restore(&entry.id).unwrap();
    assert_eq!(relative_files(&f.saves.join("slot0001")).unwrap(), once);
    assert_eq!(fs::read(f.saves.join("slot0001/gameinfo.json")).unwrap(), once_info);
    assert_eq!(once_info, b"{\"depth\":100}".to_vec());
    assert!(!f.saves.join("slot0001/new-after-backup.bin").exists());

    let hidden = fs::read_dir(&f.saves)
      .unwrap()
      .flatten()
      .filter(|d| d.file_name().to_string_lossy().starts_with('.'))
      .count();
    assert_eq!(hidden, 0);
  }

  #[test]
  fn restore_recreates_a_deleted_slot() {
    let f = fixture();
    let eng = engine(&f, 10);
    let entry = created(eng.backup().unwrap());
    fs::remove_dir_all(f.saves.join("slot0001")).unwrap();

    eng.restore(&entry.id).unwrap();
    assert!(f.saves.join("slot0001/cells/batch-1.bin").exists());
  }

  #[test]
  fn restore_of_unknown_entry_fails() {
    let f = fixture();
    let eng = engine(&f, 10);
    assert!(matches!(
      eng.restore("2024-06-29_22-07-11.123"),
      Err(SaverError::EntryNotFound(_))
    ));
  }

  #[test]
  fn failed_restore_leaves_live_slot_untouched() {
    let f = fixture();
    let eng = engine(&f, 10);
    let entry = created(eng.backup().unwrap());
    write_at(&f.saves.join("slot0001/gameinfo.json"), "live", 2_000);

    let eng = eng.with_copier(FailAfter {
      fail_after: 1,
      copied: AtomicU32::new(0),
    });
    assert!(eng.restore(&entry.id).is_err());
    assert_eq!(fs::read(f.saves.join("slot0001/gameinfo.json")).unwrap(), b"live".to_vec());
    assert!(!f.saves.join(".slot0001.restore").exists());
  }

  #[test]
  fn preview_lists_what_restore_would_change() {
    let f = fixture();
    let eng = engine(&f, 10);
    let entry = created(eng.backup().unwrap());
    write_at(&f.saves.join("slot0001/new-after-backup.bin"), "late", 2_000);
    fs::remove_file(f.saves.join("slot0001/cells/batch-1.bin")).unwrap();

    let preview = eng.preview_restore(&entry.id).unwrap();
    assert_eq!(preview.slot, "slot0001");
    assert_eq!(preview.overwritten, vec![PathBuf::from("gameinfo.json")]);
    assert_eq!(preview.created, vec![Path::new("cells").join("batch-1.bin")]);
    assert_eq!(preview.removed, vec![PathBuf::from("new-after-backup.bin")]);
    assert!(preview.is_destructive());

    assert!(f.saves.join("slot0001/new-after-backup.bin").exists());
  }

  #[test]
  fn manual_prune_trims_to_budget() {
    let f = fixture();
    let eng = engine(&f, 10);
    for _ in 0..4 {
      eng.backup().unwrap();
    }
    let newest: Vec<_> = eng.list_backups().unwrap().into_iter().take(2).collect();
    let removed = eng.prune(2).unwrap();
    assert_eq!(removed.len(), 2);
    assert_eq!(eng.list_backups().unwrap(), newest);
  }

  #[test]
  fn busy_engine_queues_backups_and_refuses_restores() {
    let f = fixture();
    let (notifier, rx) = Notifier::channel();
    let eng = Engine::new(
      SavePath::new(&f.saves),
      f.backups.clone(),
      options(10),
      notifier,
    )
    .unwrap();

    let Acquire::Granted(mut permit) = eng.guard.try_acquire() else {
      panic!("expected permit");
    };
    assert_eq!(eng.backup().unwrap(), BackupOutcome::Queued);
    assert!(matches!(eng.restore("x"), Err(SaverError::Busy)));
    assert!(matches!(eng.prune(1), Err(SaverError::Busy)));

    eng.drain_pending(&mut permit);
    drop(permit);
    assert_eq!(eng.list_backups().unwrap().len(), 1);

    let notices: Vec<Notice> = rx.try_iter().collect();
    assert!(matches!(notices[0], Notice::BackupQueued));
    assert!(notices.iter().any(|n| matches!(n, Notice::Rejected { .. })));
    assert!(matches!(notices.last(), Some(Notice::BackupCreated { .. })));
  }

  #[test]
  fn shutdown_refuses_new_work() {
    let f = fixture();
    let eng = engine(&f, 10);
    eng.shutdown();
    assert!(matches!(eng.backup(), Err(SaverError::Busy)));
  }

  #[test]
  fn empty_save_folder_reports_no_slot() {
    let f = fixture();
    fs::remove_dir_all(f.saves.join("slot0001")).unwrap();
    let (notifier, rx) = Notifier::channel();
    let eng = Engine::new(SavePath::new(&f.saves), f.backups.clone(), options(10), notifier).unwrap();
    assert!(matches!(eng.backup(), Err(SaverError::NoSaveSlot(_))));
    assert!(matches!(
      rx.try_recv().unwrap(),
      Notice::BackupFailed {
        level: NoticeLevel::Warning,
        ..
      }
    ));
  }

  #[test]
  fn notices_reach_the_channel() {
    let f = fixture();
    let (notifier, rx): (Notifier, mpsc::Receiver<Notice>) = Notifier::channel();
    let eng = Engine::new(SavePath::new(&f.saves), f.backups.clone(), options(10), notifier).unwrap();
    let entry = created(eng.backup().unwrap());
    match rx.try_recv().unwrap() {
      Notice::BackupCreated { entry: got, pruned } => {
        assert_eq!(got, entry);
        assert!(pruned.is_empty());
      }
      other => panic!("unexpected notice {other:?}"),
    }
  }
}
