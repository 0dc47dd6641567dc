use crate::core::{now_ms, DetectorMsg, Envelope, Neighbor, Payload, SuspectLevelConfig};
use crate::detector::heartbeat_window::WindowState;
use crate::detector::{FailureDetector, Wiring, LOG_LEVEL};
use crate::{debug, info, trace};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use tokio::time::sleep;

/// Sliding-window heartbeat detector that convicts slowly. Each detection pass counts how many
/// acceptable-roundtrip windows a peer's silence spans; the count replaces the peer's suspect
/// level, and only a level at or above the maximum promotes the peer to hard-suspected. Each
/// inbound heartbeat walks the level back down by one. Of the detectors here, this one maps most
/// directly onto an eventually-strong failure detector.
pub struct HeartbeatSuspectLevel {
  config: SuspectLevelConfig,
  state: Mutex<WindowState>,
  levels: RwLock<HashMap<Neighbor, u32>>,
  wiring: OnceLock<Wiring>,
}
impl HeartbeatSuspectLevel {
  pub fn new(config: SuspectLevelConfig) -> HeartbeatSuspectLevel {
    HeartbeatSuspectLevel {
      config: config,
      state: Mutex::new(WindowState::new()),
      levels: RwLock::new(HashMap::new()),
      wiring: OnceLock::new(),
    }
  }

  fn wiring(&self) -> &Wiring {
    self.wiring.get().expect("detector used before initialize")
  }

  /// Current suspect level for a peer. Zero for unknown peers.
  pub fn suspect_level(&self, neighbor: &Neighbor) -> u32 {
    self
      .levels
      .read()
      .unwrap()
      .get(neighbor)
      .copied()
      .unwrap_or(0)
  }

  /// One detection pass. `n = ⌊silence / mean⌋` replaces the peer's level; `n ≥ maximum`
  /// promotes to hard-suspected. Returns the promotions.
  fn detect_step(state: &mut WindowState, levels: &RwLock<HashMap<Neighbor, u32>>, now: u64, maximum: u32) -> Vec<Neighbor> {
    let mut convicted = Vec::new();
    for (n, r) in state.records.iter() {
      if state.suspected.contains_key(n) {
        continue;
      }
      let gap = now.saturating_sub(r.last_received);
      let missed = (gap as f64 / r.window.mean()).floor() as u32;
      if missed > 0 {
        levels.write().unwrap().insert(n.clone(), missed);
        if missed >= maximum {
          state.suspected.insert(n.clone(), r.last_received);
          convicted.push(n.clone());
        }
      }
    }
    convicted
  }

  /// Applied exactly once per inbound heartbeat, after the sample is recorded.
  fn reduce_suspicion(levels: &RwLock<HashMap<Neighbor, u32>>, from: &Neighbor) -> u32 {
    let mut levels = levels.write().unwrap();
    let level = levels.entry(from.clone()).or_insert(0);
    *level = level.saturating_sub(1);
    *level
  }
}
#[async_trait]
impl FailureDetector for HeartbeatSuspectLevel {
  async fn initialize(&self, wiring: Wiring, neighbors: Vec<Neighbor>) {
    let now = now_ms();
    let mut state = self.state.lock().unwrap();
    for n in neighbors {
      if n != *wiring.local() {
        state.add_neighbor(n, now, &self.config.window);
      }
    }
    drop(state);
    let _ = self.wiring.set(wiring);
  }

  fn detect_failures(self: Arc<Self>) {
    let me = self.clone();
    tokio::spawn(async move {
      loop {
        sleep(me.config.window.heartbeat_interval).await;
        let targets = me.state.lock().unwrap().targets();
        for n in targets {
          me.wiring().send(&n, DetectorMsg::Heartbeat).await;
        }
      }
    });
    tokio::spawn(async move {
      let maximum = self.config.suspect_level_maximum;
      loop {
        sleep(self.config.window.detect_interval).await;
        let convicted = {
          let mut state = self.state.lock().unwrap();
          Self::detect_step(&mut state, &self.levels, now_ms(), maximum)
        };
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
        self
          .state
          .lock()
          .unwrap()
          .handle_heartbeat(&env.from, now_ms(), &self.config.window);
        let level = Self::reduce_suspicion(&self.levels, &env.from);
        if level > 0 {
          debug!(
            LOG_LEVEL,
            self.wiring().log(),
            format!("{} down to suspect level {}", env.from, level)
          );
        } else {
          trace!(
            LOG_LEVEL,
            self.wiring().log(),
            format!("heartbeat from {}", env.from)
          );
        }
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
      .add_neighbor(neighbor, now_ms(), &self.config.window);
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
