use chrono::{DateTime, NaiveDateTime};
use std::sync::Mutex;

const SECONDS_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// `2024-06-29_22-07-11.123`, UTC. Fixed width, so name order is time order.
pub fn format_stamp(unix_ms: u64) -> String {
  let dt = DateTime::from_timestamp_millis(unix_ms as i64).unwrap_or_default();
  format!("{}.{:03}", dt.format(SECONDS_FORMAT), unix_ms % 1000)
}

pub fn parse_stamp(name: &str) -> Option<u64> {
  let (seconds, millis) = name.split_once('.')?;
  if millis.len() != 3 || !millis.bytes().all(|b| b.is_ascii_digit()) {
    return None;
  }
  let dt = NaiveDateTime::parse_from_str(seconds, SECONDS_FORMAT).ok()?;
  let secs = u64::try_from(dt.and_utc().timestamp()).ok()?;
  let ms = secs.checked_mul(1000)?.checked_add(millis.parse::<u64>().ok()?)?;

  // Reject near-misses chrono tolerates, like unpadded fields.
  (format_stamp(ms) == name).then_some(ms)
}

/// Hands out strictly increasing stamps even if the wall clock stalls or steps back.
#[derive(Debug, Default)]
pub struct StampIssuer {
  last_ms: Mutex<u64>,
}

impl StampIssuer {
  pub fn starting_after(last_ms: u64) -> Self {
    Self {
      last_ms: Mutex::new(last_ms),
    }
  }

  pub fn next(&self, now_ms: u64) -> (u64, String) {
    let mut last = self.last_ms.lock().unwrap_or_else(|e| e.into_inner());
    let ms = now_ms.max(last.saturating_add(1));
    *last = ms;
    (ms, format_stamp(ms))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn stamp_format_is_stable() {
    // 2024-06-29T22:07:11.123Z
    assert_eq!(format_stamp(1_719_698_831_123), "2024-06-29_22-07-11.123");
    assert_eq!(parse_stamp("2024-06-29_22-07-11.123"), Some(1_719_698_831_123));
  }

  #[test]
  fn foreign_names_are_rejected() {
    assert_eq!(parse_stamp("slot0000_20240629220711"), None);
    assert_eq!(parse_stamp(".inprogress-2024-06-29_22-07-11.123"), None);
    assert_eq!(parse_stamp("2024-6-29_22-07-11.123"), None);
    assert_eq!(parse_stamp("2024-06-29_22-07-11.12"), None);
    assert_eq!(parse_stamp("notes.txt"), None);
  }

  #[test]
  fn issuer_never_repeats_within_a_millisecond() {
    let issuer = StampIssuer::default();
    let (a, sa) = issuer.next(5_000);
    let (b, sb) = issuer.next(5_000);
    let (c, _) = issuer.next(4_000);
    assert!(a < b && b < c);
    assert!(sa < sb);
  }

  #[test]
  fn issuer_continues_after_existing_entries() {
    let issuer = StampIssuer::starting_after(10_000);
    assert_eq!(issuer.next(9_000).0, 10_001);
    assert_eq!(issuer.next(20_000).0, 20_000);
  }
}
