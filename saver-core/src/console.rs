use crate::config::Settings;
use crate::engine::{BackupOutcome, Engine, RestorePreview};
use crate::types::BackupEntry;
use std::io::{self, BufRead, Write};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

/// Tray-menu actions, typed on stdin while the watcher runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
  BackupNow,
  List,
  Preview(String),
  Restore { entry_id: String, confirmed: bool },
  Prune(Option<usize>),
  Status,
  Help,
  Quit,
}

pub enum ConsoleAction {
  Continue,
  Quit,
}

pub fn parse_command(line: &str) -> Result<Command, String> {
  let mut words = line.split_whitespace();
  let Some(verb) = words.next() else {
    return Err("empty command".to_string());
  };
  let arg = words.next();
  let confirm = words.next();

  match (verb, arg) {
    ("backup", None) | ("b", None) => Ok(Command::BackupNow),
    ("list", None) | ("ls", None) => Ok(Command::List),
    ("preview", Some(id)) => Ok(Command::Preview(id.to_string())),
    ("restore", Some(id)) => Ok(Command::Restore {
      entry_id: id.to_string(),
      confirmed: matches!(confirm, Some("yes")),
    }),
    ("prune", None) => Ok(Command::Prune(None)),
    ("prune", Some(n)) => n
      .parse::<usize>()
      .ok()
      .filter(|n| *n > 0)
      .map(|n| Command::Prune(Some(n)))
      .ok_or_else(|| format!("`prune` expects a positive count, got `{n}`")),
    ("status", None) => Ok(Command::Status),
    ("help", _) | ("?", _) => Ok(Command::Help),
    ("quit", None) | ("exit", None) => Ok(Command::Quit),
    ("preview", None) | ("restore", None) => Err(format!("`{verb}` needs a backup id (see `list`)")),
    _ => Err(format!("unknown command `{}`; try `help`", line.trim())),
  }
}

pub fn execute(
  engine: &Engine,
  settings: &Settings,
  cmd: Command,
  out: &mut impl Write,
) -> io::Result<ConsoleAction> {
  match cmd {
    Command::BackupNow => match engine.backup() {
      Ok(BackupOutcome::Created { entry, pruned }) => {
        writeln!(out, "Backed up {} as {}.", entry.slot, entry.id)?;
        if !pruned.is_empty() {
          writeln!(out, "Removed {} old backup(s).", pruned.len())?;
        }
      }
      Ok(BackupOutcome::Queued) => {
        writeln!(out, "Busy; the backup will run as soon as the current operation ends.")?
      }
      Err(e) => writeln!(out, "Backup failed: {e}")?,
    },
    Command::List => match engine.list_backups() {
      Ok(entries) if entries.is_empty() => writeln!(out, "No backups yet.")?,
      Ok(entries) => {
        for e in &entries {
          writeln!(out, "{}", format_entry(e))?;
        }
      }
      Err(e) => writeln!(out, "Cannot list backups: {e}")?,
    },
    Command::Preview(id) => match engine.preview_restore(&id) {
      Ok(p) => write_preview(out, &p)?,
      Err(e) => writeln!(out, "Cannot preview {id}: {e}")?,
    },
    Command::Restore {
      entry_id,
      confirmed,
    } => {
      if !confirmed {
        match engine.preview_restore(&entry_id) {
          Ok(p) if p.is_destructive() => {
            write_preview(out, &p)?;
            writeln!(out, "Type `restore {entry_id} yes` to overwrite the live save.")?;
            return Ok(ConsoleAction::Continue);
          }
          Ok(_) => {}
          Err(e) => {
            writeln!(out, "Cannot restore {entry_id}: {e}")?;
            return Ok(ConsoleAction::Continue);
          }
        }
      }
      match engine.restore(&entry_id) {
        Ok(r) => writeln!(out, "Restored {} from {} ({} files).", r.slot, r.entry_id, r.files)?,
        Err(e) => writeln!(out, "Restore failed: {e}")?,
      }
    }
    Command::Prune(n) => {
      let keep = n.unwrap_or(engine.options().retention.max_backups);
      match engine.prune(keep) {
        Ok(removed) => writeln!(out, "Removed {} backup(s); keeping at most {keep}.", removed.len())?,
        Err(e) => writeln!(out, "Prune failed: {e}")?,
      }
    }
    Command::Status => write_status(out, engine, settings)?,
    Command::Help => write_help(out)?,
    Command::Quit => return Ok(ConsoleAction::Quit),
  }
  Ok(ConsoleAction::Continue)
}

pub fn format_entry(e: &BackupEntry) -> String {
  format!("{}  {:<10} {:>10} bytes", e.id, e.slot, e.size_bytes)
}

pub fn write_preview(out: &mut impl Write, p: &RestorePreview) -> io::Result<()> {
  writeln!(out, "Restoring {} would replace {}:", p.entry_id, p.target.display())?;
  for (label, files) in [
    ("overwrite", &p.overwritten),
    ("create", &p.created),
    ("remove", &p.removed),
  ] {
    for f in files {
      writeln!(out, "  {label:<9} {}", f.display())?;
    }
  }
  if !p.is_destructive() {
    writeln!(out, "  (nothing in the live slot would be lost)")?;
  }
  Ok(())
}

fn write_status(out: &mut impl Write, engine: &Engine, settings: &Settings) -> io::Result<()> {
  let count = engine.list_backups().map(|e| e.len()).unwrap_or(0);
  writeln!(out, "Save Saver {} watching {}", env!("CARGO_PKG_VERSION"), settings.game.display_name())?;
  writeln!(out, "  save folder:   {}", engine.save_path().root().display())?;
  writeln!(out, "  backup folder: {}", engine.backup_root().display())?;
  writeln!(out, "  backups kept:  {count} of {}", settings.max_backups)?;
  writeln!(out, "  poll interval: {}s", settings.poll_interval_seconds)?;
  writeln!(
    out,
    "  state:         {}",
    if engine.is_busy() { "copying" } else { "idle" }
  )?;
  Ok(())
}

fn write_help(out: &mut impl Write) -> io::Result<()> {
  writeln!(out, "Commands:")?;
  writeln!(out, "  backup                back up the current slot now")?;
  writeln!(out, "  list                  list backups, newest first")?;
  writeln!(out, "  preview <id>          show what restoring <id> would change")?;
  writeln!(out, "  restore <id> [yes]    restore <id> into the live save folder")?;
  writeln!(out, "  prune [n]             keep only the newest n backups")?;
  writeln!(out, "  status                show folders and watcher state")?;
  writeln!(out, "  quit                  stop watching and exit")
}

/// Reads commands from stdin on its own thread. `quit` stops the watcher; EOF only stops reading.
pub fn spawn_reader(
  engine: Arc<Engine>,
  settings: Settings,
  stop_tx: mpsc::Sender<()>,
) -> thread::JoinHandle<()> {
  thread::spawn(move || {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    for line in stdin.lock().lines() {
      let Ok(line) = line else {
        break;
      };
      if line.trim().is_empty() {
        continue;
      }
      let cmd = match parse_command(&line) {
        Ok(c) => c,
        Err(msg) => {
          println!("{msg}");
          continue;
        }
      };
      match execute(&engine, &settings, cmd, &mut stdout) {
        Ok(ConsoleAction::Continue) => {}
        Ok(ConsoleAction::Quit) => {
          let _ = stop_tx.send(());
          break;
        }
        Err(e) => {
          tracing::warn!(error = %e, "console output failed");
          break;
        }
      }
    }
    tracing::debug!("console reader finished");
  })
}
