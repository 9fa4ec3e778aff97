pub mod agent;
pub mod config;
pub mod console;
pub mod detector;
pub mod engine;
pub mod error;
pub mod logging;
pub mod notify;
pub mod paths;
pub mod resolver;
pub mod retention;
pub mod types;

use anyhow::Context;
use config::Settings;
use engine::Engine;
use error::SaverError;
use notify::Notifier;
use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use types::{redact_path_for_log, Notice};

pub fn run(args: &[String]) -> anyhow::Result<()> {
  let interactive = args.iter().any(|a| a == "--console");

  let base = paths::base_dir()?;
  let config_path = paths::config_path(&base);
  let settings = config::load_or_create_default(&config_path)?;

  let target = if interactive {
    logging::LogTarget::FileAndStderr
  } else {
    logging::LogTarget::FileOnly
  };
  logging::init(&paths::logs_dir(&base), &settings.logging, target)?;

  tracing::info!(
    version = env!("CARGO_PKG_VERSION"),
    game = ?settings.game,
    interactive,
    "starting save saver"
  );

  let (stop_tx, stop_rx) = mpsc::channel::<()>();
  let ctrlc_tx = stop_tx.clone();
  ctrlc::set_handler(move || {
    let _ = ctrlc_tx.send(());
  })?;

  let (notifier, notices) = Notifier::channel();
  let Some((engine, settings)) = open_engine(&config_path, settings, &notifier, &stop_rx)? else {
    tracing::info!("stopped before a save folder was found");
    return Ok(());
  };
  let engine = Arc::new(engine);

  spawn_notice_printer(notices, interactive);
  if interactive {
    println!("Watching {}. Type `help` for commands.", engine.save_path().root().display());
    console::spawn_reader(Arc::clone(&engine), settings.clone(), stop_tx.clone());
  }

  agent::Agent::new(engine, settings.skip_first_tick).run(stop_rx, settings.poll_interval())?;
  tracing::info!("save saver stopped");
  Ok(())
}

/// Opens the engine, waiting for the save folder to appear (or for the user to
/// point `save_folder` at it) instead of giving up.
fn open_engine(
  config_path: &Path,
  mut settings: Settings,
  notifier: &Notifier,
  stop_rx: &mpsc::Receiver<()>,
) -> anyhow::Result<Option<(Engine, Settings)>> {
  let mut warned = false;
  loop {
    remember_detected_save_folder(config_path, &mut settings);

    match Engine::from_settings(&settings, notifier.clone()) {
      Ok(engine) => {
        tracing::info!(
          save = %redact_path_for_log(engine.save_path().root()),
          backups = %redact_path_for_log(engine.backup_root()),
          "folders resolved"
        );
        return Ok(Some((engine, settings)));
      }
      Err(e @ SaverError::PathNotFound(_)) => {
        if !warned {
          tracing::warn!(
            error = %e,
            settings = %config_path.display(),
            "save folder not found; set `save_folder` in the settings file; retrying"
          );
          notifier.send(Notice::Rejected {
            message: format!("save folder not found; edit {}", config_path.display()),
          });
          warned = true;
        }
      }
      Err(e) => return Err(e).context("open backup engine"),
    }

    match stop_rx.recv_timeout(settings.poll_interval()) {
      Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => return Ok(None),
      Err(mpsc::RecvTimeoutError::Timeout) => {}
    }
    settings = config::load_or_create_default(config_path)?;
  }
}

/// First start without a configured folder: probe once and persist the result.
fn remember_detected_save_folder(config_path: &Path, settings: &mut Settings) {
  if settings.save_folder.is_some() {
    return;
  }
  let Ok(found) = resolver::resolve_save_path(settings.game) else {
    return;
  };
  settings.save_folder = Some(found.root().to_path_buf());
  if let Err(e) = config::save(config_path, settings) {
    tracing::warn!(error = %e, "could not persist detected save folder");
  }
}

fn spawn_notice_printer(notices: mpsc::Receiver<Notice>, interactive: bool) {
  thread::spawn(move || {
    for notice in notices {
      if interactive {
        println!("[{:?}] {}", notice.level(), notice.summary());
      }
    }
  });
}
