use std::sync::{Condvar, Mutex, MutexGuard};

/// The single "operation in progress" flag shared by backup, restore and prune.
///
/// Nobody blocks waiting for the flag. A backup requested while busy is
/// remembered and run once by the current holder before it lets go; anything
/// else is turned away.
#[derive(Debug, Default)]
pub struct OpGuard {
  state: Mutex<GuardState>,
  idle: Condvar,
}

#[derive(Debug, Default)]
struct GuardState {
  busy: bool,
  pending_backup: bool,
  closed: bool,
}

pub enum Acquire<'a> {
  Granted(OpPermit<'a>),
  Busy,
  Closed,
}

pub enum BackupRequest<'a> {
  Run(OpPermit<'a>),
  Queued,
  Closed,
}

impl OpGuard {
  fn lock(&self) -> MutexGuard<'_, GuardState> {
    self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  pub fn try_acquire(&self) -> Acquire<'_> {
    let mut st = self.lock();
    if st.closed {
      return Acquire::Closed;
    }
    if st.busy {
      return Acquire::Busy;
    }
    st.busy = true;
    Acquire::Granted(OpPermit {
      guard: self,
      released: false,
    })
  }

  pub fn request_backup(&self) -> BackupRequest<'_> {
    let mut st = self.lock();
    if st.closed {
      return BackupRequest::Closed;
    }
    if st.busy {
      st.pending_backup = true;
      return BackupRequest::Queued;
    }
    st.busy = true;
    BackupRequest::Run(OpPermit {
      guard: self,
      released: false,
    })
  }

  pub fn is_busy(&self) -> bool {
    self.lock().busy
  }

  /// Refuses new work, then waits for the running operation (if any) to finish.
  pub fn close_and_wait(&self) {
    let mut st = self.lock();
    st.closed = true;
    st.pending_backup = false;
    while st.busy {
      st = self.idle.wait(st).unwrap_or_else(|e| e.into_inner());
    }
  }
}

pub struct OpPermit<'a> {
  guard: &'a OpGuard,
  released: bool,
}

impl OpPermit<'_> {
  /// Claims a queued backup, or releases the flag when there is none.
  ///
  /// Checking and releasing happen under one lock, so a request can never
  /// slip in between and be lost.
  pub fn take_pending(&mut self) -> bool {
    if self.released {
      return false;
    }
    let mut st = self.guard.lock();
    if st.pending_backup && !st.closed {
      st.pending_backup = false;
      return true;
    }
    st.busy = false;
    self.released = true;
    self.guard.idle.notify_all();
    false
  }
}

impl Drop for OpPermit<'_> {
  fn drop(&mut self) {
    if self.released {
      return;
    }
    let mut st = self.guard.lock();
    st.busy = false;
    self.guard.idle.notify_all();
  }
}
