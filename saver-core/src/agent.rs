use crate::detector::{ChangeDetector, TickOutcome};
use crate::engine::{BackupOutcome, Engine};
use crate::types::redact_path_for_log;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

/// The background loop: poll the save folder, back up when it changed.
pub struct Agent {
  engine: Arc<Engine>,
  detector: ChangeDetector,
  restores_seen: u64,
}

impl Agent {
  pub fn new(engine: Arc<Engine>, skip_first_tick: bool) -> Self {
    let detector = ChangeDetector::new(engine.save_path().clone(), skip_first_tick);
    let restores_seen = engine.restores_completed();
    Self {
      engine,
      detector,
      restores_seen,
    }
  }

  pub fn run(mut self, stop_rx: mpsc::Receiver<()>, interval: Duration) -> anyhow::Result<()> {
    tracing::info!(
      interval_seconds = interval.as_secs(),
      backups = %redact_path_for_log(self.engine.backup_root()),
      "watch loop started"
    );

    loop {
      match stop_rx.recv_timeout(interval) {
        Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
        Err(mpsc::RecvTimeoutError::Timeout) => {}
      }
      self.tick();
    }

    self.engine.shutdown();
    tracing::info!("watch loop exiting");
    Ok(())
  }

  /// One poll. Never fails: problems are logged and the next tick tries again.
  ///
  /// A change is only accepted as the new baseline once it is safely backed
  /// up, so a backup that failed on a transient error is retried next tick.
  pub fn tick(&mut self) -> TickOutcome {
    let restores = self.engine.restores_completed();
    let outcome = self.detector.tick();
    match &outcome {
      TickOutcome::Baseline(fp) => {
        tracing::info!(files = fp.file_count, bytes = fp.total_bytes, "tick: baseline recorded")
      }
      TickOutcome::Unchanged => tracing::info!("tick: unchanged"),
      TickOutcome::Unreadable(e) => {
        tracing::warn!(error = %e, "tick: save folder unreadable; retrying next interval")
      }
      TickOutcome::Changed { current, .. } if restores != self.restores_seen => {
        tracing::info!(
          files = current.file_count,
          bytes = current.total_bytes,
          "tick: change written by a restore; baseline updated"
        );
        self.detector.commit(*current);
      }
      TickOutcome::Changed { current, .. } => {
        tracing::info!(
          files = current.file_count,
          bytes = current.total_bytes,
          "tick: change detected"
        );
        match self.engine.backup() {
          Ok(BackupOutcome::Created { entry, pruned }) => {
            tracing::debug!(entry = %entry.id, pruned = pruned.len(), "tick: backup stored");
            self.detector.commit(*current);
          }
          Ok(BackupOutcome::Queued) => {
            tracing::debug!("tick: backup queued");
            self.detector.commit(*current);
          }
          Err(e) if e.is_transient() => {
            tracing::info!(error = %e, "tick: backup failed; retrying next interval")
          }
          Err(e) => {
            tracing::debug!(error = %e, "tick: backup failed");
            self.detector.commit(*current);
          }
        }
      }
    }
    if !matches!(outcome, TickOutcome::Unreadable(_)) {
      self.restores_seen = restores;
    }
    outcome
  }
}
