use crate::core::{Envelope, Neighbor};
use crate::testkit::FailureConfigMap;
use async_trait::async_trait;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::sleep;

/// A way to ship one encoded [`Envelope`] to a peer and to surface inbound frames.
///
/// Sends are fire-and-forget: every failure on the way out (encode, resolve, bind, connect,
/// write) is logged and swallowed, so detectors and consensus reason only about the absence of
/// return traffic. `start` spawns the receive loop; each inbound frame's payload bytes land on
/// the channel and a bad frame never terminates the loop.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
  async fn send(&self, env: &Envelope, to: &Neighbor);
  fn start(self: Arc<Self>, frames: UnboundedSender<Vec<u8>>);
}

/// Draws against the node's failure plan for `to`. Returns false if the message should be
/// dropped; otherwise any drawn jitter has already been slept.
pub(crate) async fn failure_draw(fail_map: &RwLock<FailureConfigMap>, to: &Neighbor) -> bool {
  let wait = fail_map.read().unwrap().draw(to);
  match wait {
    Some(jitter) => {
      if !jitter.is_zero() {
        sleep(jitter).await;
      }
      true
    }
    None => false,
  }
}
