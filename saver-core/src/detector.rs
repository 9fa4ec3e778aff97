use crate::error::{Result, SaverError};
use crate::resolver::SavePath;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

/// Cheap summary of a folder tree: newest file mtime, total size and file count.
///
/// Aggregated per file, so a write anywhere below the folder changes it even
/// when the directory's own timestamp does not move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
  pub latest_modified: Option<SystemTime>,
  pub total_bytes: u64,
  pub file_count: u64,
}

impl Fingerprint {
  pub fn of(root: &Path) -> Result<Self> {
    if !root.is_dir() {
      return Err(SaverError::PathNotFound(root.to_path_buf()));
    }

    let mut fp = Fingerprint {
      latest_modified: None,
      total_bytes: 0,
      file_count: 0,
    };

    let walker = WalkDir::new(root)
      .min_depth(1)
      .follow_links(false)
      .into_iter()
      .filter_entry(|e| !is_hidden(e.file_name().to_str()));

    for entry in walker {
      let entry = entry.map_err(|e| unreadable(root, e))?;
      if !entry.file_type().is_file() {
        continue;
      }
      let md = entry.metadata().map_err(|e| unreadable(entry.path(), e))?;
      fp.file_count += 1;
      fp.total_bytes = fp.total_bytes.saturating_add(md.len());
      if let Ok(modified) = md.modified() {
        fp.latest_modified = fp.latest_modified.max(Some(modified));
      }
    }

    Ok(fp)
  }
}

fn is_hidden(name: Option<&str>) -> bool {
  name.map(|n| n.starts_with('.')).unwrap_or(false)
}

fn unreadable(path: &Path, e: walkdir::Error) -> SaverError {
  let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| path.to_path_buf());
  SaverError::Unreadable {
    path,
    source: io::Error::from(e),
  }
}

/// The slot the game wrote to most recently, i.e. the one being played.
pub fn current_slot(save: &SavePath) -> Result<(String, PathBuf)> {
  let slots = save.slots().map_err(|source| SaverError::Unreadable {
    path: save.root().to_path_buf(),
    source,
  })?;

  let mut best: Option<(Option<SystemTime>, PathBuf)> = None;
  for slot in slots {
    let fp = Fingerprint::of(&slot)?;
    let newer = match &best {
      None => true,
      Some((t, _)) => fp.latest_modified > *t,
    };
    if newer {
      best = Some((fp.latest_modified, slot));
    }
  }

  let (_, path) = best.ok_or_else(|| SaverError::NoSaveSlot(save.root().to_path_buf()))?;
  let name = path
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_default();
  Ok((name, path))
}

#[derive(Debug)]
pub enum TickOutcome {
  /// First tick after start with `skip_first_tick`: baseline recorded, nothing else.
  Baseline(Fingerprint),
  Unchanged,
  Changed {
    previous: Option<Fingerprint>,
    current: Fingerprint,
  },
  /// The folder could not be read this time (e.g. mid-write); try again next tick.
  Unreadable(SaverError),
}

impl TickOutcome {
  pub fn should_backup(&self) -> bool {
    matches!(self, TickOutcome::Changed { .. })
  }
}

pub struct ChangeDetector {
  save_path: SavePath,
  baseline: Option<Fingerprint>,
  skip_first_tick: bool,
  first_tick_pending: bool,
}

impl ChangeDetector {
  /// Reads the folder once so the first comparison has something to compare to.
  pub fn new(save_path: SavePath, skip_first_tick: bool) -> Self {
    let baseline = match Fingerprint::of(save_path.root()) {
      Ok(fp) => Some(fp),
      Err(e) => {
        tracing::warn!(error = %e, "save folder unreadable at startup; no baseline yet");
        None
      }
    };
    Self {
      save_path,
      baseline,
      skip_first_tick,
      first_tick_pending: true,
    }
  }

  pub fn save_path(&self) -> &SavePath {
    &self.save_path
  }

  pub fn baseline(&self) -> Option<Fingerprint> {
    self.baseline
  }

  pub fn tick(&mut self) -> TickOutcome {
    let current = match Fingerprint::of(self.save_path.root()) {
      Ok(fp) => fp,
      Err(e) => return TickOutcome::Unreadable(e),
    };

    let first = std::mem::replace(&mut self.first_tick_pending, false);
    let previous = self.baseline;

    if first && self.skip_first_tick {
      self.baseline = Some(current);
      return TickOutcome::Baseline(current);
    }
    if previous == Some(current) {
      return TickOutcome::Unchanged;
    }
    TickOutcome::Changed { previous, current }
  }

  /// Accepts a fingerprint reported by `Changed` as the new baseline.
  ///
  /// Until this is called the same change is reported again on every tick.
  pub fn commit(&mut self, fp: Fingerprint) {
    self.baseline = Some(fp);
  }
}
