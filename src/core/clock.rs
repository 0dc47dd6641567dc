use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

static ANCHOR: OnceLock<Instant> = OnceLock::new();

/// Monotonic milliseconds since the first call in this process. All detector timing math uses
/// this clock, so a wallclock step never convicts a healthy peer.
pub fn now_ms() -> u64 {
  ANCHOR.get_or_init(Instant::now).elapsed().as_millis() as u64
}

/// UTC wallclock milliseconds since the Unix epoch. Used only for the timestamp inside consensus
/// preference messages, where values from different processes must be comparable.
pub fn wall_ms() -> u64 {
  SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .map(|d| d.as_millis() as u64)
    .unwrap_or(0)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn monotonic_clock_never_goes_backwards() {
    let a = now_ms();
    let b = now_ms();
    assert!(b >= a);
  }
}
