use crate::core::{now_ms, DetectorMsg, Envelope, Neighbor, Payload, PingAckConfig};
use crate::detector::{FailureDetector, Wiring, LOG_LEVEL};
use crate::{debug, info, trace};
use async_trait::async_trait;
use itertools::Itertools;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use tokio::time::sleep;

struct PingRecord {
  last_sent_ping: u64,
  last_received_ack: u64,
  suspected: bool,
}
impl PingRecord {
  fn new() -> PingRecord {
    PingRecord {
      last_sent_ping: 0,
      last_received_ack: 0,
      suspected: false,
    }
  }
}

struct PingAckState {
  records: HashMap<Neighbor, PingRecord>,
}
impl PingAckState {
  fn new() -> PingAckState {
    PingAckState {
      records: HashMap::new(),
    }
  }

  fn add_neighbor(&mut self, neighbor: Neighbor) {
    self.records.entry(neighbor).or_insert_with(PingRecord::new);
  }

  /// Picks this tick's probe targets and stamps their last-sent time.
  fn probe_targets(&mut self, now: u64) -> Vec<Neighbor> {
    let mut targets = Vec::new();
    for (n, r) in self.records.iter_mut() {
      if !r.suspected {
        r.last_sent_ping = now;
        targets.push(n.clone());
      }
    }
    targets
  }

  /// One detection pass. Returns the peers that just transitioned healthy-to-suspected. A peer
  /// that has never acked is left alone: no ack since the first ping is not yet evidence of a
  /// crash, only of a conversation that has not started.
  fn detect_step(&mut self, tolerate_ms: u64) -> Vec<Neighbor> {
    let mut convicted = Vec::new();
    for (n, r) in self.records.iter_mut() {
      if r.last_received_ack == 0 {
        continue;
      }
      let gap = r.last_sent_ping.abs_diff(r.last_received_ack);
      if gap > tolerate_ms {
        if !r.suspected {
          r.suspected = true;
          convicted.push(n.clone());
        }
      } else if r.suspected {
        r.suspected = false;
      }
    }
    convicted
  }

  fn handle_ping(&mut self, from: &Neighbor) {
    if let Some(r) = self.records.get_mut(from) {
      r.suspected = false;
    }
  }

  fn handle_ack(&mut self, from: &Neighbor, now: u64) {
    if let Some(r) = self.records.get_mut(from) {
      r.last_received_ack = now;
      r.suspected = false;
    }
  }

  fn add_suspects(&mut self, suspects: Vec<Neighbor>, local: &Neighbor) -> Vec<Neighbor> {
    let mut fresh = Vec::new();
    for n in suspects {
      if n == *local {
        continue;
      }
      let r = self.records.entry(n.clone()).or_insert_with(PingRecord::new);
      if !r.suspected {
        r.suspected = true;
        fresh.push(n);
      }
    }
    fresh
  }

  fn suspected(&self) -> Vec<Neighbor> {
    self
      .records
      .iter()
      .filter(|(_, r)| r.suspected)
      .map(|(n, _)| n.clone())
      .sorted()
      .collect()
  }
}

/// Active-probe detector. Pings every non-suspected neighbor on a fixed cadence and convicts a
/// peer once the distance between its last ack and our last ping exceeds the tolerance window.
/// Fixed thresholds make this intentionally primitive: any delay beyond the window convicts.
pub struct PingAck {
  config: PingAckConfig,
  state: Mutex<PingAckState>,
  wiring: OnceLock<Wiring>,
}
impl PingAck {
  pub fn new(config: PingAckConfig) -> PingAck {
    PingAck {
      config: config,
      state: Mutex::new(PingAckState::new()),
      wiring: OnceLock::new(),
    }
  }

  fn wiring(&self) -> &Wiring {
    self.wiring.get().expect("detector used before initialize")
  }
}
#[async_trait]
impl FailureDetector for PingAck {
  async fn initialize(&self, wiring: Wiring, neighbors: Vec<Neighbor>) {
    let mut state = self.state.lock().unwrap();
    for n in neighbors {
      if n != *wiring.local() {
        state.add_neighbor(n);
      }
    }
    drop(state);
    let _ = self.wiring.set(wiring);
  }

  fn detect_failures(self: Arc<Self>) {
    let me = self.clone();
    tokio::spawn(async move {
      loop {
        sleep(me.config.ping_interval).await;
        let targets = me.state.lock().unwrap().probe_targets(now_ms());
        for n in targets {
          let ping = DetectorMsg::Ping {
            message_id: rand::random(),
          };
          trace!(LOG_LEVEL, me.wiring().log(), format!("ping -> {}", n));
          me.wiring().send(&n, ping).await;
        }
      }
    });
    tokio::spawn(async move {
      let tolerate = self.config.tolerate_failure_for.as_millis() as u64;
      loop {
        sleep(self.config.detect_interval).await;
        let convicted = self.state.lock().unwrap().detect_step(tolerate);
        for n in convicted {
          info!(LOG_LEVEL, self.wiring().log(), format!("suspecting {}", n));
          self.wiring().report_failure(&n);
        }
      }
    });
  }

  async fn receive_message(&self, env: &Envelope) -> bool {
    let msg = match &env.payload {
      Payload::Detector(m) => m,
      _ => return false,
    };
    match msg {
      DetectorMsg::Ping { message_id } => {
        self.state.lock().unwrap().handle_ping(&env.from);
        let ack = DetectorMsg::Ack {
          message_id: rand::random(),
          in_response: *message_id,
        };
        debug!(
          LOG_LEVEL,
          self.wiring().log(),
          format!("ping {} from {}", message_id, env.from)
        );
        self.wiring().send(&env.from, ack).await;
        true
      }
      DetectorMsg::Ack { in_response, .. } => {
        trace!(
          LOG_LEVEL,
          self.wiring().log(),
          format!("ack for {} from {}", in_response, env.from)
        );
        self.state.lock().unwrap().handle_ack(&env.from, now_ms());
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
    self.state.lock().unwrap().add_neighbor(neighbor);
  }

  async fn add_suspects(&self, suspects: Vec<Neighbor>) {
    let local = self.wiring().local().clone();
    let fresh = self.state.lock().unwrap().add_suspects(suspects, &local);
    for n in fresh {
      self.wiring().report_failure(&n);
    }
  }

  async fn suspected_list(&self) -> Vec<Neighbor> {
    self.state.lock().unwrap().suspected()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn peer(port: u16) -> Neighbor {
    format!("127.0.0.1:{}", port).parse().unwrap()
  }

  fn state_with(peers: &[Neighbor]) -> PingAckState {
    let mut state = PingAckState::new();
    for p in peers {
      state.add_neighbor(p.clone());
    }
    state
  }

  #[test]
  fn convicts_only_past_the_tolerance_window() {
    let p = peer(4211);
    let mut state = state_with(&[p.clone()]);
    state.probe_targets(20_000);
    state.handle_ack(&p, 10_000);
    // |10000 - 20000| == tolerance: within
    assert!(state.detect_step(10_000).is_empty());
    assert!(state.suspected().is_empty());
    state.probe_targets(20_001);
    assert_eq!(state.detect_step(10_000), vec![p.clone()]);
    assert_eq!(state.suspected(), vec![p.clone()]);
    // a second pass is not a new transition
    assert!(state.detect_step(10_000).is_empty());
  }

  #[test]
  fn no_ack_yet_means_not_yet_suspected() {
    let p = peer(4212);
    let mut state = state_with(&[p.clone()]);
    state.probe_targets(50_000);
    assert!(state.detect_step(10_000).is_empty());
    assert!(state.suspected().is_empty());
  }

  #[test]
  fn fresh_ack_unmarks_a_suspect() {
    let p = peer(4213);
    let mut state = state_with(&[p.clone()]);
    state.probe_targets(30_000);
    state.handle_ack(&p, 5_000);
    assert_eq!(state.detect_step(10_000), vec![p.clone()]);
    state.handle_ack(&p, 30_100);
    assert!(state.suspected().is_empty());
  }

  #[test]
  fn suspected_peers_are_not_probed() {
    let p = peer(4214);
    let q = peer(4215);
    let mut state = state_with(&[p.clone(), q.clone()]);
    state.probe_targets(30_000);
    state.handle_ack(&p, 1_000);
    state.handle_ack(&q, 29_000);
    state.detect_step(10_000);
    assert_eq!(state.probe_targets(31_000), vec![q]);
  }

  #[test]
  fn add_suspects_excludes_self_and_is_idempotent() {
    let local = peer(4216);
    let p = peer(4217);
    let mut state = state_with(&[p.clone()]);
    let fresh = state.add_suspects(vec![local.clone(), p.clone()], &local);
    assert_eq!(fresh, vec![p.clone()]);
    let again = state.add_suspects(vec![local.clone(), p.clone()], &local);
    assert!(again.is_empty());
    assert_eq!(state.suspected(), vec![p]);
  }
}
