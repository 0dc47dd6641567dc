use std::collections::VecDeque;
use std::time::Duration;

/// A bounded window of measured roundtrips, newest first. The acceptable roundtrip for a peer is
/// the arithmetic mean of the retained samples; the seed sample keeps the window non-empty so
/// the mean is always defined.
#[derive(Clone, Debug)]
pub struct RoundtripWindow {
  samples: VecDeque<u64>,
  capacity: usize,
}
impl RoundtripWindow {
  pub fn new(capacity: usize, initial: Duration) -> RoundtripWindow {
    let mut samples = VecDeque::with_capacity(capacity);
    samples.push_front(initial.as_millis() as u64);
    RoundtripWindow {
      samples: samples,
      capacity: capacity.max(1),
    }
  }

  pub fn push(&mut self, sample_ms: u64) {
    while self.samples.len() >= self.capacity {
      self.samples.pop_back();
    }
    self.samples.push_front(sample_ms);
  }

  pub fn mean(&self) -> f64 {
    self.samples.iter().sum::<u64>() as f64 / self.samples.len() as f64
  }

  pub fn len(&self) -> usize {
    self.samples.len()
  }

  pub fn is_empty(&self) -> bool {
    self.samples.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn mean_is_defined_from_the_start() {
    let w = RoundtripWindow::new(50, Duration::from_millis(2000));
    assert_eq!(w.mean(), 2000.0);
    assert!(w.mean() > 0.0);
  }

  #[test]
  fn mean_follows_the_newest_samples() {
    let mut w = RoundtripWindow::new(3, Duration::from_millis(100));
    w.push(200);
    assert_eq!(w.mean(), 150.0);
    w.push(300);
    w.push(400);
    // seed sample has been evicted
    assert_eq!(w.mean(), 300.0);
    assert_eq!(w.len(), 3);
  }

  #[test]
  fn capacity_bounds_the_window() {
    let mut w = RoundtripWindow::new(2, Duration::from_millis(10));
    for s in [20, 30, 40, 50] {
      w.push(s);
    }
    assert_eq!(w.len(), 2);
    assert_eq!(w.mean(), 45.0);
  }
}
