//! The failure detectors. Every algorithm implements [`FailureDetector`], a small capability
//! trait the node drives: wire it up, let it spawn its periodic workflows, offer it inbound
//! messages, and read back the suspect set. Detectors never fail a caller over transport
//! trouble; silence is the only evidence they act on.
//!
//! Conviction fires a single upcall per healthy-to-suspected transition, delivered to the node over
//! the wiring's failure channel. Recovery never fires an upcall.

use crate::core::{DetectorMsg, Envelope, LogLevel, LogRef, Neighbor, Transport};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

mod gossip;
mod heartbeat;
mod heartbeat_recovery;
mod heartbeat_suspect_level;
mod heartbeat_window;
mod ping_ack;
mod roundtrips;

// Heartbeat and ack handling trace per event; filtering is left to the runtime level here.
pub(crate) const LOG_LEVEL: LogLevel = LogLevel::Trace;

#[rustfmt::skip]
pub use {
  gossip::GossipDetector,
  heartbeat::SimpleHeartbeat,
  heartbeat_recovery::HeartbeatRecovery,
  heartbeat_suspect_level::HeartbeatSuspectLevel,
  heartbeat_window::HeartbeatSlidingWindow,
  ping_ack::PingAck,
  roundtrips::RoundtripWindow,
};

/// Everything a detector borrows from its node: the shared transport, the node's own endpoint,
/// the logger, and the channel conviction upcalls travel on.
#[derive(Clone)]
pub struct Wiring {
  transport: Arc<dyn Transport>,
  local: Neighbor,
  log: LogRef,
  failures: UnboundedSender<Neighbor>,
}
impl Wiring {
  pub fn new(
    transport: Arc<dyn Transport>,
    local: Neighbor,
    log: LogRef,
    failures: UnboundedSender<Neighbor>,
  ) -> Wiring {
    Wiring {
      transport: transport,
      local: local,
      log: log,
      failures: failures,
    }
  }

  pub fn local(&self) -> &Neighbor {
    &self.local
  }

  pub fn log(&self) -> &LogRef {
    &self.log
  }

  pub async fn send(&self, to: &Neighbor, msg: DetectorMsg) {
    let env = Envelope::detector(self.local.clone(), msg);
    self.transport.send(&env, to).await;
  }

  /// The healthy-to-suspected upcall.
  pub fn report_failure(&self, suspect: &Neighbor) {
    let _ = self.failures.send(suspect.clone());
  }
}

/// The common capability set of all failure detectors.
#[async_trait]
pub trait FailureDetector: Send + Sync + 'static {
  /// Wires in the transport and the initial neighbor set; prepares per-peer health records.
  /// Must be called exactly once, before anything else.
  async fn initialize(&self, wiring: Wiring, neighbors: Vec<Neighbor>);

  /// Spawns the periodic background workflows. Returns once they are launched.
  fn detect_failures(self: Arc<Self>);

  /// Offers an inbound message. Returns true iff the detector consumed it. The router has
  /// already learned the sender, so `env.from` always has a health record by the time a
  /// detector sees the message.
  async fn receive_message(&self, env: &Envelope) -> bool;

  /// Introduces a new peer and initializes its health record. Idempotent; the local endpoint is
  /// never added.
  async fn add_neighbor(&self, neighbor: Neighbor);

  /// Bulk-injects suspects, as the gossip decorator does on receipt of a remote suspect list.
  /// The local endpoint is always excluded and already-present suspects are ignored.
  async fn add_suspects(&self, suspects: Vec<Neighbor>);

  /// Snapshot of the current suspect set.
  async fn suspected_list(&self) -> Vec<Neighbor>;
}
