use crate::types::{Notice, NoticeLevel};
use std::sync::mpsc;

/// Sending half of the channel the front end listens on for operation results.
#[derive(Debug, Clone, Default)]
pub struct Notifier {
  tx: Option<mpsc::Sender<Notice>>,
}

impl Notifier {
  pub fn channel() -> (Self, mpsc::Receiver<Notice>) {
    let (tx, rx) = mpsc::channel();
    (Self { tx: Some(tx) }, rx)
  }

  /// Notices are only logged.
  pub fn disabled() -> Self {
    Self { tx: None }
  }

  pub fn send(&self, notice: Notice) {
    match notice.level() {
      NoticeLevel::Info => tracing::debug!(notice = %notice.summary(), "notify"),
      NoticeLevel::Warning => tracing::warn!(notice = %notice.summary(), "notify"),
      NoticeLevel::Persistent => {
        tracing::error!(notice = %notice.summary(), "notify (needs attention)")
      }
    }
    if let Some(tx) = &self.tx {
      // A front end that went away must not take the engine with it.
      let _ = tx.send(notice);
    }
  }
}
