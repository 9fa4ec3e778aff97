use anyhow::Context;
use saver_core::config::{self, Settings};
use saver_core::engine::{BackupOutcome, Engine};
use saver_core::notify::Notifier;
use saver_core::{console, paths, resolver};
use std::io::{self, Write};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CtlCommand {
  List { json: bool },
  Backup,
  Preview(String),
  Restore { entry_id: String, yes: bool },
  Prune(Option<usize>),
  Resolve,
  ShowSettings,
  Set { key: String, value: String },
}

impl CtlCommand {
  pub fn from_args(args: &[String]) -> anyhow::Result<Self> {
    let has = |flag: &str| args.iter().any(|a| a == flag);
    let value_after = |flag: &str, n: usize| {
      args
        .iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + n))
        .filter(|v| !v.starts_with("--"))
        .cloned()
    };

    if has("--list") {
      return Ok(Self::List { json: has("--json") });
    }
    if has("--backup") {
      return Ok(Self::Backup);
    }
    if has("--preview") {
      let id = value_after("--preview", 1)
        .ok_or_else(|| anyhow::anyhow!("expected: --preview <backup-id>"))?;
      return Ok(Self::Preview(id));
    }
    if has("--restore") {
      let id = value_after("--restore", 1)
        .ok_or_else(|| anyhow::anyhow!("expected: --restore <backup-id> [--yes]"))?;
      return Ok(Self::Restore {
        entry_id: id,
        yes: has("--yes"),
      });
    }
    if has("--prune") {
      let keep = match value_after("--prune", 1) {
        Some(n) => Some(
          n.parse::<usize>()
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| anyhow::anyhow!("`--prune` expects a positive count"))?,
        ),
        None => None,
      };
      return Ok(Self::Prune(keep));
    }
    if has("--resolve") {
      return Ok(Self::Resolve);
    }
    if has("--settings") {
      return Ok(Self::ShowSettings);
    }
    if has("--set") {
      let key = value_after("--set", 1);
      let value = args
        .iter()
        .position(|a| a == "--set")
        .and_then(|i| args.get(i + 2))
        .cloned();
      let (Some(key), Some(value)) = (key, value) else {
        anyhow::bail!("expected: --set <key> <value>");
      };
      return Ok(Self::Set { key, value });
    }
    Err(anyhow::anyhow!(
      "expected one of --list, --backup, --preview, --restore, --prune, --resolve, --settings, --set"
    ))
  }
}

pub fn run(cmd: CtlCommand) -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_ansi(false)
    .with_target(false)
    .with_writer(io::stderr)
    .init();

  let base = paths::base_dir()?;
  let config_path = paths::config_path(&base);
  let mut out = io::stdout().lock();
  run_with(&config_path, cmd, &mut out)
}

/// Executes one command against the settings at `config_path`, writing results to `out`.
pub fn run_with(config_path: &Path, cmd: CtlCommand, out: &mut impl Write) -> anyhow::Result<()> {
  let mut settings = match cmd {
    CtlCommand::ShowSettings | CtlCommand::Resolve => config::load_or_default_readonly(config_path)?,
    _ => config::load_or_create_default(config_path)?,
  };

  match cmd {
    CtlCommand::ShowSettings => write_settings(out, config_path, &settings)?,
    CtlCommand::Set { key, value } => {
      settings.set_value(&key, &value)?;
      config::save(config_path, &settings)?;
      writeln!(out, "{key} updated. A running watcher picks it up on restart.")?;
    }
    CtlCommand::Resolve => match resolver::resolve_save_path(settings.game) {
      Ok(found) => writeln!(out, "{}", found.root().display())?,
      Err(e) => {
        writeln!(out, "No save folder found for {}: {e}", settings.game.display_name())?;
        writeln!(out, "Set it with: saver-ctl --set save_folder <path>")?;
      }
    },
    other => {
      let engine = open(&settings)?;
      run_engine_command(&engine, other, out)?;
    }
  }
  Ok(())
}

fn open(settings: &Settings) -> anyhow::Result<Engine> {
  Engine::from_settings(settings, Notifier::disabled()).context("open save and backup folders")
}

fn run_engine_command(engine: &Engine, cmd: CtlCommand, out: &mut impl Write) -> anyhow::Result<()> {
  match cmd {
    CtlCommand::List { json } => {
      let entries = engine.list_backups()?;
      if json {
        writeln!(out, "{}", serde_json::to_string_pretty(&entries)?)?;
      } else if entries.is_empty() {
        writeln!(out, "No backups yet.")?;
      } else {
        for e in &entries {
          writeln!(out, "{}", console::format_entry(e))?;
        }
      }
    }
    CtlCommand::Backup => match engine.backup()? {
      BackupOutcome::Created { entry, pruned } => {
        writeln!(out, "Backed up {} as {}.", entry.slot, entry.id)?;
        for p in pruned {
          writeln!(out, "Pruned {}.", p.id)?;
        }
      }
      BackupOutcome::Queued => writeln!(out, "Queued behind a running operation.")?,
    },
    CtlCommand::Preview(id) => {
      let preview = engine.preview_restore(&id)?;
      console::write_preview(out, &preview)?;
    }
    CtlCommand::Restore { entry_id, yes } => {
      let preview = engine.preview_restore(&entry_id)?;
      if preview.is_destructive() && !yes {
        console::write_preview(out, &preview)?;
        writeln!(out, "Nothing restored. Re-run with --yes to overwrite the live save.")?;
        return Ok(());
      }
      let report = engine.restore(&entry_id)?;
      writeln!(
        out,
        "Restored {} from {} ({} files).",
        report.slot, report.entry_id, report.files
      )?;
    }
    CtlCommand::Prune(keep) => {
      let keep = keep.unwrap_or(engine.options().retention.max_backups);
      let removed = engine.prune(keep)?;
      writeln!(out, "Removed {} backup(s).", removed.len())?;
    }
    CtlCommand::Resolve | CtlCommand::ShowSettings | CtlCommand::Set { .. } => {}
  }
  Ok(())
}

fn write_settings(out: &mut impl Write, config_path: &Path, s: &Settings) -> io::Result<()> {
  writeln!(out, "settings file:         {}", config_path.display())?;
  let save = s
    .save_folder
    .as_ref()
    .map(|p| p.display().to_string())
    .unwrap_or_else(|| "(auto-detect)".to_string());
  writeln!(out, "save_folder:           {save}")?;
  writeln!(out, "backup_folder:         {}", s.backup_folder.display())?;
  writeln!(out, "game:                  {}", s.game.display_name())?;
  writeln!(out, "poll_interval_seconds: {}", s.poll_interval_seconds)?;
  writeln!(out, "max_backups:           {}", s.max_backups)?;
  writeln!(out, "max_backup_age_days:   {}", s.max_backup_age_days)?;
  writeln!(out, "skip_first_tick:       {}", s.skip_first_tick)?;
  writeln!(out, "copy_retries:          {}", s.copy_retries)?;
  writeln!(out, "retry_delay_ms:        {}", s.retry_delay_ms)?;
  writeln!(out, "logging.level:         {}", s.logging.level)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;
  use tempfile::TempDir;

  fn args(list: &[&str]) -> Vec<String> {
    std::iter::once("saver-ctl")
      .chain(list.iter().copied())
      .map(String::from)
      .collect()
  }

  #[test]
  fn parses_flags() {
    assert_eq!(
      CtlCommand::from_args(&args(&["--list", "--json"])).unwrap(),
      CtlCommand::List { json: true }
    );
    assert_eq!(
      CtlCommand::from_args(&args(&["--restore", "2024-06-29_22-07-11.123", "--yes"])).unwrap(),
      CtlCommand::Restore {
        entry_id: "2024-06-29_22-07-11.123".to_string(),
        yes: true
      }
    );
    assert_eq!(
      CtlCommand::from_args(&args(&["--prune"])).unwrap(),
      CtlCommand::Prune(None)
    );
    assert_eq!(
      CtlCommand::from_args(&args(&["--set", "max_backups", "5"])).unwrap(),
      CtlCommand::Set {
        key: "max_backups".to_string(),
        value: "5".to_string()
      }
    );
    assert!(CtlCommand::from_args(&args(&["--restore", "--yes"])).is_err());
    assert!(CtlCommand::from_args(&args(&["--prune", "zero"])).is_err());
    assert!(CtlCommand::from_args(&args(&[])).is_err());
  }

  #[test]
  fn backup_then_list_as_json() {
    let dir = TempDir::new().unwrap();
    let tmp = dir.path();
    let saves = tmp.join("SavedGames");
    fs::create_dir_all(saves.join("slot0000")).unwrap();
    fs::write(saves.join("slot0000/gameinfo.json"), "{}").unwrap();
    let config_path = tmp.join("settings.toml");

    let mut out = Vec::new();
    let set = CtlCommand::Set {
      key: "save_folder".to_string(),
      value: saves.display().to_string(),
    };
    run_with(&config_path, set, &mut out).unwrap();
    run_with(&config_path, CtlCommand::Backup, &mut out).unwrap();

    let mut json = Vec::new();
    run_with(&config_path, CtlCommand::List { json: true }, &mut json).unwrap();
    let listed: serde_json::Value = serde_json::from_slice(&json).unwrap();
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["slot"], "slot0000");
  }
}
