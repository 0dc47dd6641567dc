use crate::core::{now_ms, DetectorMsg, Envelope, Neighbor, Payload, WindowConfig};
use crate::detector::{FailureDetector, RoundtripWindow, Wiring, LOG_LEVEL};
use crate::{info, trace};
use async_trait::async_trait;
use itertools::Itertools;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use tokio::time::sleep;

pub(crate) struct WindowRecord {
  pub last_received: u64,
  pub window: RoundtripWindow,
}

pub(crate) struct WindowState {
  pub records: HashMap<Neighbor, WindowRecord>,
  // last heartbeat time at the moment of conviction, kept for the recovery sample
  pub suspected: HashMap<Neighbor, u64>,
}
impl WindowState {
  pub fn new() -> WindowState {
    WindowState {
      records: HashMap::new(),
      suspected: HashMap::new(),
    }
  }

  pub fn add_neighbor(&mut self, neighbor: Neighbor, now: u64, config: &WindowConfig) {
    self.records.entry(neighbor).or_insert(WindowRecord {
      last_received: now,
      window: RoundtripWindow::new(config.window, config.initial_roundtrip),
    });
  }

  pub fn targets(&self) -> Vec<Neighbor> {
    self
      .records
      .keys()
      .filter(|n| !self.suspected.contains_key(*n))
      .cloned()
      .collect()
  }

  /// One detection pass against each peer's windowed mean roundtrip.
  pub fn detect_step(&mut self, now: u64, interval_ms: u64) -> Vec<Neighbor> {
    let mut convicted = Vec::new();
    for (n, r) in self.records.iter() {
      if self.suspected.contains_key(n) {
        continue;
      }
      if now.saturating_sub(r.last_received) as f64 > r.window.mean() + interval_ms as f64 {
        self.suspected.insert(n.clone(), r.last_received);
        convicted.push(n.clone());
      }
    }
    convicted
  }

  /// Feeds one heartbeat into the window. The sample for a recovering peer is measured from the
  /// heartbeat time recorded at conviction, so the whole silence lands in the window.
  pub fn handle_heartbeat(&mut self, from: &Neighbor, now: u64, config: &WindowConfig) {
    match self.records.get_mut(from) {
      Some(r) => {
        let since = match self.suspected.remove(from) {
          Some(at_conviction) => at_conviction,
          None => r.last_received,
        };
        r.window.push(now.saturating_sub(since));
        r.last_received = now;
      }
      None => {
        self.add_neighbor(from.clone(), now, config);
      }
    }
  }

  pub fn add_suspects(&mut self, suspects: Vec<Neighbor>, local: &Neighbor, now: u64) -> Vec<Neighbor> {
    let mut fresh = Vec::new();
    for n in suspects {
      if n == *local || self.suspected.contains_key(&n) {
        continue;
      }
      self.suspected.insert(n.clone(), now);
      fresh.push(n);
    }
    fresh
  }

  pub fn suspected_list(&self) -> Vec<Neighbor> {
    self.suspected.keys().cloned().sorted().collect()
  }

  pub fn mean_of(&self, neighbor: &Neighbor) -> Option<f64> {
    self.records.get(neighbor).map(|r| r.window.mean())
  }
}

/// Heartbeat detector whose acceptable roundtrip is the mean of the last measured roundtrips.
/// A noisy link teaches the detector patience sample by sample instead of through a one-shot
/// adjustment.
pub struct HeartbeatSlidingWindow {
  config: WindowConfig,
  state: Mutex<WindowState>,
  wiring: OnceLock<Wiring>,
}
impl HeartbeatSlidingWindow {
  pub fn new(config: WindowConfig) -> HeartbeatSlidingWindow {
    HeartbeatSlidingWindow {
      config: config,
      state: Mutex::new(WindowState::new()),
      wiring: OnceLock::new(),
    }
  }

  fn wiring(&self) -> &Wiring {
    self.wiring.get().expect("detector used before initialize")
  }
}
#[async_trait]
impl FailureDetector for HeartbeatSlidingWindow {
  async fn initialize(&self, wiring: Wiring, neighbors: Vec<Neighbor>) {
    let now = now_ms();
    let mut state = self.state.lock().unwrap();
    for n in neighbors {
      if n != *wiring.local() {
        state.add_neighbor(n, now, &self.config);
      }
    }
    drop(state);
    let _ = self.wiring.set(wiring);
  }

  fn detect_failures(self: Arc<Self>) {
    let me = self.clone();
    tokio::spawn(async move {
      loop {
        sleep(me.config.heartbeat_interval).await;
        let targets = me.state.lock().unwrap().targets();
        for n in targets {
          me.wiring().send(&n, DetectorMsg::Heartbeat).await;
        }
      }
    });
    tokio::spawn(async move {
      let interval = self.config.heartbeat_interval.as_millis() as u64;
      loop {
        sleep(self.config.detect_interval).await;
        let convicted = self.state.lock().unwrap().detect_step(now_ms(), interval);
        for n in convicted {
          info!(LOG_LEVEL, self.wiring().log(), format!("suspecting {}", n));
          self.wiring().report_failure(&n);
        }
      }
    });
  }

  async fn receive_message(&self, env: &Envelope) -> bool {
    match &env.payload {
      Payload::Detector(DetectorMsg::Heartbeat) => {
        trace!(
          LOG_LEVEL,
          self.wiring().log(),
          format!("heartbeat from {}", env.from)
        );
        self
          .state
          .lock()
          .unwrap()
          .handle_heartbeat(&env.from, now_ms(), &self.config);
        true
      }
      _ => false,
    }
  }

  async fn add_neighbor(&self, neighbor: Neighbor) {
    if let Some(w) = self.wiring.get() {
      if neighbor == *w.local() {
        return;
      }
    }
    self
      .state
      .lock()
      .unwrap()
      .add_neighbor(neighbor, now_ms(), &self.config);
  }

  async fn add_suspects(&self, suspects: Vec<Neighbor>) {
    let local = self.wiring().local().clone();
    let fresh = self
      .state
      .lock()
      .unwrap()
      .add_suspects(suspects, &local, now_ms());
    for n in fresh {
      self.wiring().report_failure(&n);
    }
  }

  async fn suspected_list(&self) -> Vec<Neighbor> {
    self.state.lock().unwrap().suspected_list()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;

  fn peer(port: u16) -> Neighbor {
    format!("127.0.0.1:{}", port).parse().unwrap()
  }

  fn config() -> WindowConfig {
    WindowConfig {
      heartbeat_interval: Duration::from_millis(2000),
      detect_interval: Duration::from_millis(4000),
      window: 50,
      initial_roundtrip: Duration::from_millis(2000),
    }
  }

  #[test]
  fn threshold_tracks_the_windowed_mean() {
    let p = peer(4501);
    let cfg = config();
    let mut state = WindowState::new();
    state.add_neighbor(p.clone(), 0, &cfg);
    // seed mean 2000: silence of 4000 is exactly at threshold, still healthy
    assert!(state.detect_step(4_000, 2_000).is_empty());
    state.handle_heartbeat(&p, 1_000, &cfg);
    // window now [1000, 2000], mean 1500: threshold is 3500 past last heartbeat
    assert_eq!(state.mean_of(&p), Some(1_500.0));
    assert!(state.detect_step(4_500, 2_000).is_empty());
    assert_eq!(state.detect_step(4_501, 2_000), vec![p]);
  }

  #[test]
  fn recovery_sample_covers_the_whole_silence() {
    let p = peer(4502);
    let cfg = config();
    let mut state = WindowState::new();
    state.add_neighbor(p.clone(), 1_000, &cfg);
    assert_eq!(state.detect_step(6_000, 2_000), vec![p.clone()]);
    // convicted with last_received 1000; heartbeat at 9000 pushes a 8000 ms sample
    state.handle_heartbeat(&p, 9_000, &cfg);
    assert!(state.suspected_list().is_empty());
    assert_eq!(state.mean_of(&p), Some(5_000.0));
  }

  #[test]
  fn mean_never_hits_zero() {
    let p = peer(4503);
    let cfg = config();
    let mut state = WindowState::new();
    state.add_neighbor(p.clone(), 0, &cfg);
    for t in [10u64, 20, 30, 40] {
      state.handle_heartbeat(&p, t, &cfg);
    }
    let mean = state.mean_of(&p).unwrap();
    assert!(mean > 0.0);
  }

  #[test]
  fn unknown_sender_gets_a_seeded_record() {
    let p = peer(4504);
    let cfg = config();
    let mut state = WindowState::new();
    state.handle_heartbeat(&p, 7_000, &cfg);
    assert_eq!(state.mean_of(&p), Some(2_000.0));
    assert!(state.detect_step(10_000, 2_000).is_empty());
  }
}
