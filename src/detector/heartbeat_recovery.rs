use crate::core::{now_ms, DetectorMsg, Envelope, HeartbeatConfig, Neighbor, Payload};
use crate::detector::{FailureDetector, Wiring, LOG_LEVEL};
use crate::{debug, info, trace};
use async_trait::async_trait;
use itertools::Itertools;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use tokio::time::sleep;

struct RecoveryRecord {
  last_received: u64,
  roundtrip_ms: u64,
}

struct RecoveryState {
  records: HashMap<Neighbor, RecoveryRecord>,
  // conviction time per suspect
  suspected: HashMap<Neighbor, u64>,
}
impl RecoveryState {
  fn new() -> RecoveryState {
    RecoveryState {
      records: HashMap::new(),
      suspected: HashMap::new(),
    }
  }

  fn add_neighbor(&mut self, neighbor: Neighbor, now: u64, roundtrip_ms: u64) {
    self.records.entry(neighbor).or_insert(RecoveryRecord {
      last_received: now,
      roundtrip_ms: roundtrip_ms,
    });
  }

  fn targets(&self) -> Vec<Neighbor> {
    self
      .records
      .keys()
      .filter(|n| !self.suspected.contains_key(*n))
      .cloned()
      .collect()
  }

  /// One detection pass against each peer's own adjusted roundtrip. There is no periodic unmark
  /// here: only a fresh heartbeat clears a suspect.
  fn detect_step(&mut self, now: u64, interval_ms: u64) -> Vec<Neighbor> {
    let mut convicted = Vec::new();
    for (n, r) in self.records.iter() {
      if self.suspected.contains_key(n) {
        continue;
      }
      if now.saturating_sub(r.last_received) > r.roundtrip_ms + interval_ms {
        self.suspected.insert(n.clone(), now);
        convicted.push(n.clone());
      }
    }
    convicted
  }

  /// Returns the peer's enlarged roundtrip when this heartbeat ends a suspicion.
  fn handle_heartbeat(&mut self, from: &Neighbor, now: u64, seed_roundtrip_ms: u64) -> Option<u64> {
    let recovering = self.suspected.remove(from).is_some();
    match self.records.get_mut(from) {
      Some(r) => {
        if recovering {
          // the whole silent gap becomes the new acceptable roundtrip
          r.roundtrip_ms = now.saturating_sub(r.last_received);
          r.last_received = now;
          Some(r.roundtrip_ms)
        } else {
          r.last_received = now;
          None
        }
      }
      None => {
        self.add_neighbor(from.clone(), now, seed_roundtrip_ms);
        None
      }
    }
  }

  fn add_suspects(&mut self, suspects: Vec<Neighbor>, local: &Neighbor, now: u64) -> Vec<Neighbor> {
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

  fn suspected_list(&self) -> Vec<Neighbor> {
    self.suspected.keys().cloned().sorted().collect()
  }
}

/// Heartbeat detector that adapts to slow peers instead of flapping on them. Every recovery
/// installs the observed silent gap as the peer's new acceptable roundtrip, so a peer that was
/// wrongly convicted once needs a much longer silence to be convicted again.
pub struct HeartbeatRecovery {
  config: HeartbeatConfig,
  state: Mutex<RecoveryState>,
  wiring: OnceLock<Wiring>,
}
impl HeartbeatRecovery {
  pub fn new(config: HeartbeatConfig) -> HeartbeatRecovery {
    HeartbeatRecovery {
      config: config,
      state: Mutex::new(RecoveryState::new()),
      wiring: OnceLock::new(),
    }
  }

  fn wiring(&self) -> &Wiring {
    self.wiring.get().expect("detector used before initialize")
  }
}
#[async_trait]
impl FailureDetector for HeartbeatRecovery {
  async fn initialize(&self, wiring: Wiring, neighbors: Vec<Neighbor>) {
    let now = now_ms();
    let roundtrip = self.config.roundtrip.as_millis() as u64;
    let mut state = self.state.lock().unwrap();
    for n in neighbors {
      if n != *wiring.local() {
        state.add_neighbor(n, now, roundtrip);
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
        let seed = self.config.roundtrip.as_millis() as u64;
        let adjusted = self
          .state
          .lock()
          .unwrap()
          .handle_heartbeat(&env.from, now_ms(), seed);
        match adjusted {
          Some(rt) => debug!(
            LOG_LEVEL,
            self.wiring().log(),
            format!("{} recovered, roundtrip now {} ms", env.from, rt)
          ),
          None => trace!(
            LOG_LEVEL,
            self.wiring().log(),
            format!("heartbeat from {}", env.from)
          ),
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
    let roundtrip = self.config.roundtrip.as_millis() as u64;
    self
      .state
      .lock()
      .unwrap()
      .add_neighbor(neighbor, now_ms(), roundtrip);
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

  fn peer(port: u16) -> Neighbor {
    format!("127.0.0.1:{}", port).parse().unwrap()
  }

  const INTERVAL: u64 = 2000;
  const ROUNDTRIP: u64 = 500;

  #[test]
  fn recovery_widens_the_roundtrip() {
    let p = peer(4401);
    let mut state = RecoveryState::new();
    state.add_neighbor(p.clone(), 1_000, ROUNDTRIP);
    assert_eq!(state.detect_step(4_000, INTERVAL), vec![p.clone()]);
    // silent from 1000 to 9000: the new roundtrip is the full gap
    assert_eq!(state.handle_heartbeat(&p, 9_000, ROUNDTRIP), Some(8_000));
    assert!(state.suspected_list().is_empty());
    // the old threshold no longer convicts
    assert!(state.detect_step(14_000, INTERVAL).is_empty());
    assert_eq!(state.detect_step(19_001, INTERVAL), vec![p]);
  }

  #[test]
  fn no_periodic_unmark() {
    let p = peer(4402);
    let mut state = RecoveryState::new();
    state.add_neighbor(p.clone(), 0, ROUNDTRIP);
    assert_eq!(state.detect_step(3_000, INTERVAL).len(), 1);
    // later passes see the peer healthy-by-gap only after a heartbeat, never on their own
    assert!(state.detect_step(3_100, INTERVAL).is_empty());
    assert_eq!(state.suspected_list(), vec![p.clone()]);
    assert!(state.handle_heartbeat(&p, 3_200, ROUNDTRIP).is_some());
    assert!(state.suspected_list().is_empty());
  }

  #[test]
  fn steady_heartbeats_keep_the_roundtrip() {
    let p = peer(4403);
    let mut state = RecoveryState::new();
    state.add_neighbor(p.clone(), 0, ROUNDTRIP);
    assert_eq!(state.handle_heartbeat(&p, 2_000, ROUNDTRIP), None);
    assert_eq!(state.handle_heartbeat(&p, 4_000, ROUNDTRIP), None);
    assert!(state.detect_step(6_400, INTERVAL).is_empty());
  }
}
