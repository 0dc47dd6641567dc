use crate::consensus::LOG_LEVEL;
use crate::core::{wall_ms, ConsensusMsg, Envelope, LogRef, Neighbor, Payload, Transport};
use crate::{debug, info};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use ConsensusMsg::*;

#[derive(Clone, Debug)]
struct PreferenceRec {
  preference: String,
  timestamp: u64,
}

struct EngineState {
  value: String,
  decision: String,
  round: u64,
  received_preference: HashMap<u64, Vec<PreferenceRec>>,
  positive_acks: HashMap<u64, usize>,
  negative_acks: HashMap<u64, usize>,
  // rounds whose quorum crossing already broadcast, so duplicates cannot re-broadcast
  coordinator_sent: HashSet<u64>,
  decide_sent: HashSet<u64>,
}
impl EngineState {
  fn new(initial_value: String) -> EngineState {
    EngineState {
      decision: initial_value.clone(),
      value: initial_value,
      round: 0,
      received_preference: HashMap::new(),
      positive_acks: HashMap::new(),
      negative_acks: HashMap::new(),
      coordinator_sent: HashSet::new(),
      decide_sent: HashSet::new(),
    }
  }

  /// Ends the current consensus instance. The next `start_consensus` begins again at round 1;
  /// instances are independent. The decision survives.
  fn clear(&mut self) {
    self.round = 0;
    self.received_preference.clear();
    self.positive_acks.clear();
    self.negative_acks.clear();
    self.coordinator_sent.clear();
    self.decide_sent.clear();
  }
}

/// The winning preference of a quorum: newest timestamp, earliest arrival on ties.
fn latest(prefs: &[PreferenceRec]) -> Option<String> {
  let mut best: Option<&PreferenceRec> = None;
  for p in prefs.iter() {
    if best.map_or(true, |b| p.timestamp > b.timestamp) {
      best = Some(p);
    }
  }
  best.map(|p| p.preference.clone())
}

enum Step {
  Start,
  Msg(ConsensusMsg),
}

#[derive(Default)]
struct Effects {
  sends: Vec<(Neighbor, ConsensusMsg)>,
  local: Vec<Step>,
}

/// Chandra–Toueg rotating-coordinator consensus engine.
///
/// The coordinator of round `r` is the `r mod N`-th member of the ascending-sorted membership
/// (self included), so every node with the same membership snapshot agrees on who drives the
/// round. Round 0 is the idle state; the first real round is 1. Handlers follow one discipline:
/// lock the state, mutate, collect outbound messages, unlock, then ship, so a slow transport
/// never holds the engine.
pub struct ChandraToueg {
  local: Neighbor,
  members: Arc<RwLock<BTreeSet<Neighbor>>>,
  transport: Arc<dyn Transport>,
  log: LogRef,
  state: Mutex<EngineState>,
}
impl ChandraToueg {
  pub fn new(
    local: Neighbor,
    members: Arc<RwLock<BTreeSet<Neighbor>>>,
    transport: Arc<dyn Transport>,
    log: LogRef,
    initial_value: String,
  ) -> ChandraToueg {
    ChandraToueg {
      local: local,
      members: members,
      transport: transport,
      log: log,
      state: Mutex::new(EngineState::new(initial_value)),
    }
  }

  /// The node's current proposal value, overwritten by a decided consensus run.
  pub fn value(&self) -> String {
    self.state.lock().unwrap().value.clone()
  }

  pub fn set_value(&self, value: String) {
    self.state.lock().unwrap().value = value;
  }

  /// The last decided value.
  pub fn decision(&self) -> String {
    self.state.lock().unwrap().decision.clone()
  }

  pub fn round(&self) -> u64 {
    self.state.lock().unwrap().round
  }

  fn membership(&self) -> Vec<Neighbor> {
    let members = self.members.read().unwrap();
    let mut all: Vec<Neighbor> = members.iter().cloned().collect();
    all.push(self.local.clone());
    all.sort();
    all
  }

  /// Deterministic coordinator selection over the sorted membership snapshot.
  pub fn coordinator(&self, round: u64) -> Neighbor {
    let all = self.membership();
    all[(round % all.len() as u64) as usize].clone()
  }

  /// Strict majority of the membership, self included.
  pub fn quorum(&self) -> usize {
    self.membership().len() / 2 + 1
  }

  fn fanout(&self, fx: &mut Effects, msg: &ConsensusMsg) {
    for n in self.members.read().unwrap().iter() {
      fx.sends.push((n.clone(), msg.clone()));
    }
  }

  fn step(&self, st: &mut EngineState, step: Step) -> Effects {
    let mut fx = Effects::default();
    match step {
      Step::Start => {
        st.round += 1;
        let c = self.coordinator(st.round);
        debug!(
          LOG_LEVEL,
          self.log,
          format!("round {}: proposing {:?} to {}", st.round, st.value, c)
        );
        let msg = Preference {
          round: st.round,
          preference: st.value.clone(),
          timestamp: wall_ms(),
        };
        if c == self.local {
          fx.local.push(Step::Msg(msg));
        } else {
          fx.sends.push((c, msg));
        }
      }
      Step::Msg(Preference {
        round,
        preference,
        timestamp,
      }) => {
        let prefs = st.received_preference.entry(round).or_default();
        prefs.push(PreferenceRec {
          preference: preference,
          timestamp: timestamp,
        });
        if prefs.len() >= self.quorum() && st.coordinator_sent.insert(round) {
          let winner = latest(prefs).unwrap();
          debug!(
            LOG_LEVEL,
            self.log,
            format!("round {}: quorum of preferences, pushing {:?}", round, winner)
          );
          let out = CoordinatorPreference {
            round: round,
            preference: winner,
          };
          self.fanout(&mut fx, &out);
          fx.local.push(Step::Msg(out));
        }
      }
      Step::Msg(CoordinatorPreference { round, preference }) => {
        st.decision = preference;
        let ack = PositiveAck { round: round };
        let c = self.coordinator(round);
        if c == self.local {
          fx.local.push(Step::Msg(ack));
        } else {
          fx.sends.push((c, ack));
        }
      }
      Step::Msg(PositiveAck { round }) => {
        let acks = st.positive_acks.entry(round).or_insert(0);
        *acks += 1;
        if *acks >= self.quorum() && st.decide_sent.insert(round) {
          // the decided value is the newest preference of the quorum this round was built on
          if let Some(winner) = st.received_preference.get(&round).and_then(|p| latest(p)) {
            let out = Decide { preference: winner };
            self.fanout(&mut fx, &out);
            fx.local.push(Step::Msg(out));
          }
        }
      }
      Step::Msg(NegativeAck { round }) => {
        let acks = st.negative_acks.entry(round).or_insert(0);
        *acks += 1;
        if *acks >= self.quorum() {
          info!(
            LOG_LEVEL,
            self.log,
            format!("round {}: negative-ack quorum, abandoning the run", round)
          );
          st.clear();
        }
      }
      Step::Msg(Decide { preference }) => {
        info!(LOG_LEVEL, self.log, format!("decided {:?}", preference));
        st.value = preference;
        st.clear();
      }
      Step::Msg(RequestConsensus { .. }) => {
        fx.local.push(Step::Start);
      }
    }
    fx
  }

  async fn drive(&self, first: Step) {
    let mut queue = VecDeque::new();
    queue.push_back(first);
    while let Some(step) = queue.pop_front() {
      let fx = {
        let mut st = self.state.lock().unwrap();
        self.step(&mut st, step)
      };
      for (to, msg) in fx.sends {
        let env = Envelope::consensus(self.local.clone(), msg);
        self.transport.send(&env, &to).await;
      }
      for step in fx.local {
        queue.push_back(step);
      }
    }
  }

  /// Advances to the next round and proposes the current value to its coordinator.
  pub async fn start_consensus(&self) {
    self.drive(Step::Start).await;
  }

  /// Offers an inbound message. Returns true iff it was a consensus message.
  pub async fn receive_message(&self, env: &Envelope) -> bool {
    match &env.payload {
      Payload::Consensus(msg) => {
        self.drive(Step::Msg(msg.clone())).await;
        true
      }
      _ => false,
    }
  }

  /// Detector upcall. A convicted peer only matters when it coordinates the current round: the
  /// engine then tells the (presumed dead, so best-effort) coordinator it has been given up on
  /// and proposes again in the next round.
  pub async fn on_failure_detected(&self, suspect: &Neighbor) {
    let round = self.state.lock().unwrap().round;
    if self.coordinator(round) != *suspect {
      return;
    }
    info!(
      LOG_LEVEL,
      self.log,
      format!("round {}: coordinator {} failed, moving on", round, suspect)
    );
    let nack = Envelope::consensus(self.local.clone(), NegativeAck { round: round });
    self.transport.send(&nack, suspect).await;
    self.start_consensus().await;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use async_trait::async_trait;
  use tokio::sync::mpsc::UnboundedSender;

  struct NullTransport;
  #[async_trait]
  impl Transport for NullTransport {
    async fn send(&self, _: &Envelope, _: &Neighbor) {}
    fn start(self: Arc<Self>, _: UnboundedSender<Vec<u8>>) {}
  }

  fn peer(port: u16) -> Neighbor {
    format!("127.0.0.1:{}", port).parse().unwrap()
  }

  fn engine(local: u16, others: &[u16], value: &str) -> ChandraToueg {
    let members: BTreeSet<Neighbor> = others.iter().map(|p| peer(*p)).collect();
    ChandraToueg::new(
      peer(local),
      Arc::new(RwLock::new(members)),
      Arc::new(NullTransport),
      LogRef::sink(),
      value.to_string(),
    )
  }

  #[test]
  fn coordinator_is_the_same_on_every_node() {
    let a = engine(1234, &[1235, 1236], "a");
    let b = engine(1235, &[1234, 1236], "b");
    let c = engine(1236, &[1234, 1235], "c");
    for round in 0..7 {
      assert_eq!(a.coordinator(round), b.coordinator(round));
      assert_eq!(b.coordinator(round), c.coordinator(round));
    }
    // round 1 belongs to the second-ranked endpoint
    assert_eq!(a.coordinator(1), peer(1235));
    assert_eq!(a.coordinator(3), peer(1234));
  }

  #[test]
  fn quorum_is_a_strict_majority() {
    assert_eq!(engine(1, &[2, 3], "x").quorum(), 2);
    assert_eq!(engine(1, &[2, 3, 4], "x").quorum(), 3);
    assert_eq!(engine(1, &[2, 3, 4, 5], "x").quorum(), 3);
    let e = engine(1, &[2, 3, 4, 5], "x");
    assert!(e.quorum() * 2 > e.membership().len());
  }

  #[test]
  fn preference_quorum_broadcasts_the_newest_preference() {
    let e = engine(1236, &[1234, 1235], "mine");
    let mut st = EngineState::new("mine".to_string());
    let fx = e.step(
      &mut st,
      Step::Msg(Preference {
        round: 2,
        preference: "old".to_string(),
        timestamp: 100,
      }),
    );
    assert!(fx.sends.is_empty() && fx.local.is_empty());
    let fx = e.step(
      &mut st,
      Step::Msg(Preference {
        round: 2,
        preference: "new".to_string(),
        timestamp: 200,
      }),
    );
    let expect = CoordinatorPreference {
      round: 2,
      preference: "new".to_string(),
    };
    assert_eq!(
      fx.sends,
      vec![(peer(1234), expect.clone()), (peer(1235), expect)]
    );
    assert_eq!(fx.local.len(), 1);
  }

  #[test]
  fn duplicate_quorum_crossings_do_not_rebroadcast() {
    let e = engine(1236, &[1234, 1235], "mine");
    let mut st = EngineState::new("mine".to_string());
    for ts in [100, 200, 300] {
      e.step(
        &mut st,
        Step::Msg(Preference {
          round: 1,
          preference: format!("p{}", ts),
          timestamp: ts,
        }),
      );
    }
    let fx = e.step(
      &mut st,
      Step::Msg(Preference {
        round: 1,
        preference: "late".to_string(),
        timestamp: 400,
      }),
    );
    assert!(fx.sends.is_empty());
  }

  #[test]
  fn timestamp_ties_keep_the_earliest_arrival() {
    let prefs = vec![
      PreferenceRec {
        preference: "first".to_string(),
        timestamp: 500,
      },
      PreferenceRec {
        preference: "second".to_string(),
        timestamp: 500,
      },
    ];
    assert_eq!(latest(&prefs), Some("first".to_string()));
    assert_eq!(latest(&[]), None);
  }

  #[test]
  fn positive_ack_quorum_decides_the_round_winner() {
    let e = engine(1236, &[1234, 1235], "mine");
    let mut st = EngineState::new("mine".to_string());
    for (p, ts) in [("a", 10), ("b", 30)] {
      e.step(
        &mut st,
        Step::Msg(Preference {
          round: 1,
          preference: p.to_string(),
          timestamp: ts,
        }),
      );
    }
    e.step(&mut st, Step::Msg(PositiveAck { round: 1 }));
    let fx = e.step(&mut st, Step::Msg(PositiveAck { round: 1 }));
    let decide = Decide {
      preference: "b".to_string(),
    };
    assert_eq!(
      fx.sends,
      vec![(peer(1234), decide.clone()), (peer(1235), decide)]
    );
    // and a third ack changes nothing
    let fx = e.step(&mut st, Step::Msg(PositiveAck { round: 1 }));
    assert!(fx.sends.is_empty());
  }

  #[test]
  fn decide_installs_the_value_and_resets_the_run() {
    let e = engine(1234, &[1235, 1236], "mine");
    let mut st = EngineState::new("mine".to_string());
    st.round = 4;
    st.positive_acks.insert(4, 2);
    e.step(
      &mut st,
      Step::Msg(Decide {
        preference: "agreed".to_string(),
      }),
    );
    assert_eq!(st.value, "agreed");
    assert_eq!(st.round, 0);
    assert!(st.positive_acks.is_empty());
  }

  #[test]
  fn negative_ack_quorum_clears_state_but_not_the_decision() {
    let e = engine(1234, &[1235, 1236], "mine");
    let mut st = EngineState::new("mine".to_string());
    st.round = 2;
    st.decision = "kept".to_string();
    e.step(&mut st, Step::Msg(NegativeAck { round: 2 }));
    assert_eq!(st.round, 2);
    e.step(&mut st, Step::Msg(NegativeAck { round: 2 }));
    assert_eq!(st.round, 0);
    assert_eq!(st.decision, "kept");
    assert_eq!(st.value, "mine");
  }

  #[test]
  fn starting_a_run_sends_the_proposal_to_the_coordinator() {
    let e = engine(1234, &[1235, 1236], "mine");
    let mut st = EngineState::new("mine".to_string());
    let fx = e.step(&mut st, Step::Start);
    assert_eq!(st.round, 1);
    assert_eq!(fx.sends.len(), 1);
    assert_eq!(fx.sends[0].0, peer(1235));
    match &fx.sends[0].1 {
      Preference {
        round, preference, ..
      } => {
        assert_eq!(*round, 1);
        assert_eq!(preference, "mine");
      }
      other => panic!("wrong message: {:?}", other),
    }
  }

  #[test]
  fn a_coordinator_proposing_handles_its_own_preference_locally() {
    let e = engine(1235, &[1234, 1236], "mine");
    let mut st = EngineState::new("mine".to_string());
    let fx = e.step(&mut st, Step::Start);
    assert!(fx.sends.is_empty());
    assert_eq!(fx.local.len(), 1);
  }
}
