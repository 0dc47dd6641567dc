use crate::core::{DetectorMsg, Envelope, GossipConfig, Neighbor, Payload};
use crate::detector::{FailureDetector, Wiring, LOG_LEVEL};
use crate::{debug, trace};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, OnceLock};
use tokio::time::sleep;

/// Decorator that spreads suspicion beyond direct communication partners. Wraps any inner
/// detector, periodically broadcasts the inner suspect list to every known neighbor, and merges
/// remote suspect lists into the inner detector on receipt. Merging is a set union, so repeated
/// or crossed gossip is harmless.
pub struct GossipDetector {
  config: GossipConfig,
  inner: Arc<dyn FailureDetector>,
  neighbors: Mutex<BTreeSet<Neighbor>>,
  wiring: OnceLock<Wiring>,
}
impl GossipDetector {
  pub fn new(inner: Arc<dyn FailureDetector>, config: GossipConfig) -> GossipDetector {
    GossipDetector {
      config: config,
      inner: inner,
      neighbors: Mutex::new(BTreeSet::new()),
      wiring: OnceLock::new(),
    }
  }

  fn wiring(&self) -> &Wiring {
    self.wiring.get().expect("detector used before initialize")
  }
}
#[async_trait]
impl FailureDetector for GossipDetector {
  async fn initialize(&self, wiring: Wiring, neighbors: Vec<Neighbor>) {
    {
      let mut known = self.neighbors.lock().unwrap();
      for n in neighbors.iter() {
        if *n != *wiring.local() {
          known.insert(n.clone());
        }
      }
    }
    self.inner.initialize(wiring.clone(), neighbors).await;
    let _ = self.wiring.set(wiring);
  }

  fn detect_failures(self: Arc<Self>) {
    self.inner.clone().detect_failures();
    tokio::spawn(async move {
      loop {
        sleep(self.config.gossip_interval).await;
        let suspects = self.inner.suspected_list().await;
        if suspects.is_empty() {
          continue;
        }
        let fanout: Vec<Neighbor> =
          self.neighbors.lock().unwrap().iter().cloned().collect();
        debug!(
          LOG_LEVEL,
          self.wiring().log(),
          format!("gossipping {} suspects to {} neighbors", suspects.len(), fanout.len())
        );
        for n in fanout {
          let msg = DetectorMsg::SuspectList {
            suspects: suspects.clone(),
          };
          self.wiring().send(&n, msg).await;
        }
      }
    });
  }

  async fn receive_message(&self, env: &Envelope) -> bool {
    if self.inner.receive_message(env).await {
      return true;
    }
    match &env.payload {
      Payload::Detector(DetectorMsg::SuspectList { suspects }) => {
        trace!(
          LOG_LEVEL,
          self.wiring().log(),
          format!("{} suspects gossipped by {}", suspects.len(), env.from)
        );
        self.inner.add_suspects(suspects.clone()).await;
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
    self.neighbors.lock().unwrap().insert(neighbor.clone());
    self.inner.add_neighbor(neighbor).await;
  }

  async fn add_suspects(&self, suspects: Vec<Neighbor>) {
    self.inner.add_suspects(suspects).await;
  }

  async fn suspected_list(&self) -> Vec<Neighbor> {
    self.inner.suspected_list().await
  }
}
