use crate::core::{now_ms, DetectorMsg, Envelope, HeartbeatConfig, Neighbor, Payload};
use crate::detector::{FailureDetector, Wiring, LOG_LEVEL};
use crate::{info, trace};
use async_trait::async_trait;
use itertools::Itertools;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::time::sleep;

struct HeartbeatState {
  // last received heartbeat per peer
  records: HashMap<Neighbor, u64>,
  suspected: HashSet<Neighbor>,
}
impl HeartbeatState {
  fn new() -> HeartbeatState {
    HeartbeatState {
      records: HashMap::new(),
      suspected: HashSet::new(),
    }
  }

  fn add_neighbor(&mut self, neighbor: Neighbor, now: u64) {
    self.records.entry(neighbor).or_insert(now);
  }

  fn targets(&self) -> Vec<Neighbor> {
    self
      .records
      .keys()
      .filter(|n| !self.suspected.contains(*n))
      .cloned()
      .collect()
  }

  /// One detection pass. A peer is convicted when its silence strictly exceeds the deadline;
  /// silence of exactly the deadline is still healthy. A suspected peer back inside the
  /// deadline recovers here.
  fn detect_step(&mut self, now: u64, deadline_ms: u64) -> Vec<Neighbor> {
    let mut convicted = Vec::new();
    for (n, last) in self.records.iter() {
      if now.saturating_sub(*last) > deadline_ms {
        if self.suspected.insert(n.clone()) {
          convicted.push(n.clone());
        }
      } else {
        self.suspected.remove(n);
      }
    }
    convicted
  }

  fn handle_heartbeat(&mut self, from: &Neighbor, now: u64) {
    self.records.insert(from.clone(), now);
    self.suspected.remove(from);
  }

  fn add_suspects(&mut self, suspects: Vec<Neighbor>, local: &Neighbor) -> Vec<Neighbor> {
    let mut fresh = Vec::new();
    for n in suspects {
      if n == *local {
        continue;
      }
      if self.suspected.insert(n.clone()) {
        fresh.push(n);
      }
    }
    fresh
  }

  fn suspected_list(&self) -> Vec<Neighbor> {
    self.suspected.iter().cloned().sorted().collect()
  }
}

/// Passive heartbeat detector with a fixed acceptable roundtrip. Broadcasts its own heartbeat on
/// a fixed cadence and convicts any peer silent for longer than `roundtrip +
/// heartbeat_interval`.
pub struct SimpleHeartbeat {
  config: HeartbeatConfig,
  state: Mutex<HeartbeatState>,
  wiring: OnceLock<Wiring>,
}
impl SimpleHeartbeat {
  pub fn new(config: HeartbeatConfig) -> SimpleHeartbeat {
    SimpleHeartbeat {
      config: config,
      state: Mutex::new(HeartbeatState::new()),
      wiring: OnceLock::new(),
    }
  }

  fn wiring(&self) -> &Wiring {
    self.wiring.get().expect("detector used before initialize")
  }

  fn deadline_ms(&self) -> u64 {
    (self.config.roundtrip + self.config.heartbeat_interval).as_millis() as u64
  }
}
#[async_trait]
impl FailureDetector for SimpleHeartbeat {
  async fn initialize(&self, wiring: Wiring, neighbors: Vec<Neighbor>) {
    let now = now_ms();
    let mut state = self.state.lock().unwrap();
    for n in neighbors {
      if n != *wiring.local() {
        state.add_neighbor(n, now);
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
      let deadline = self.deadline_ms();
      loop {
        sleep(self.config.detect_interval).await;
        let convicted = self.state.lock().unwrap().detect_step(now_ms(), deadline);
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
        self.state.lock().unwrap().handle_heartbeat(&env.from, now_ms());
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
    self.state.lock().unwrap().add_neighbor(neighbor, now_ms());
  }

  async fn add_suspects(&self, suspects: Vec<Neighbor>) {
    let local = self.wiring().local().clone();
    let fresh = self.state.lock().unwrap().add_suspects(suspects, &local);
    for n in fresh {
      self.wiring().report_failure(&n);
    }
  }

  async fn suspected_list(&self) -> Vec<Neighbor> {
    self.state.lock().unwrap().suspected_list()
  }
}
