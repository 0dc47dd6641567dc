use crate::consensus::ChandraToueg;
use crate::core::{
  decode, ConsensusKind, DetectorKind, Envelope, LogLevel, LogRef, Logger, Neighbor, NodeConfig,
  Payload, Protocol, TcpTransport, Transport, UdpTransport, UserHandler, LOG_LEVEL,
};
use crate::detector::{
  FailureDetector, GossipDetector, HeartbeatRecovery, HeartbeatSlidingWindow,
  HeartbeatSuspectLevel, PingAck, SimpleHeartbeat, Wiring,
};
use crate::testkit::FailureConfigMap;
use crate::{debug, info, trace, warn};
use std::collections::BTreeSet;
use std::io;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc::unbounded_channel;
use tokio::time::sleep;

struct NodeImpl {
  endpoint: Neighbor,
  neighbors: Arc<RwLock<BTreeSet<Neighbor>>>,
  transport: Arc<dyn Transport>,
  detector: Arc<dyn FailureDetector>,
  consensus: Arc<ChandraToueg>,
  log: LogRef,
  fail_map: Arc<RwLock<FailureConfigMap>>,
  user_handler: Option<UserHandler>,
}
impl NodeImpl {
  /// Inbound dispatch: decode, learn the sender, then offer the message to the failure
  /// detector, to consensus, and finally to the user handler. Messages everyone declines are
  /// dropped; a frame that will not decode is dropped without stopping anything.
  async fn route(&self, frame: Vec<u8>) {
    let env = match decode(frame.as_slice()) {
      Ok(env) => env,
      Err(e) => {
        warn!(LOG_LEVEL, self.log, format!("dropping undecodable frame: {}", e.0));
        return;
      }
    };
    self.learn(&env.from).await;
    if self.detector.receive_message(&env).await {
      return;
    }
    if self.consensus.receive_message(&env).await {
      return;
    }
    match env.payload {
      Payload::User(value) => match &self.user_handler {
        Some(handler) => handler(env.from, value),
        None => trace!(
          LOG_LEVEL,
          self.log,
          format!("no user handler for message from {}", env.from)
        ),
      },
      other => trace!(
        LOG_LEVEL,
        self.log,
        format!("unhandled message from {}: {:?}", env.from, other)
      ),
    }
  }

  /// Opportunistic membership growth: any message from an unknown sender introduces it to the
  /// neighbor set and to the detector, never to the node itself.
  async fn learn(&self, sender: &Neighbor) {
    if *sender == self.endpoint {
      return;
    }
    let fresh = self.neighbors.write().unwrap().insert(sender.clone());
    if fresh {
      debug!(LOG_LEVEL, self.log, format!("learned neighbor {}", sender));
      self.detector.add_neighbor(sender.clone()).await;
    }
  }
}

/// One peer-to-peer process: a transport, a failure detector, a consensus engine and the router
/// between them. Cheap to clone; all clones share the same node.
#[derive(Clone)]
pub struct Node {
  inner: Arc<NodeImpl>,
}
impl Node {
  /// Brings a node up: binds the transport, wires detector and consensus together, and spawns
  /// the receive loop, the router, the failure-upcall forwarder and the detector's periodic
  /// workflows. Returns once everything is launched.
  pub async fn spawn(
    endpoint: Neighbor,
    neighbors: Vec<Neighbor>,
    initial_value: String,
    config: NodeConfig,
  ) -> io::Result<Node> {
    let level = if config.verbose {
      LogLevel::Trace
    } else {
      LogLevel::Info
    };
    let log = Logger::spawn(endpoint.clone(), level);
    let fail_map = Arc::new(RwLock::new(config.fail_map));
    let transport: Arc<dyn Transport> = match config.protocol {
      Protocol::Udp => {
        Arc::new(UdpTransport::bind(endpoint.port, fail_map.clone(), log.clone()).await?)
      }
      Protocol::Tcp => {
        Arc::new(TcpTransport::bind(endpoint.port, fail_map.clone(), log.clone()).await?)
      }
    };

    let members: BTreeSet<Neighbor> = neighbors
      .into_iter()
      .filter(|n| *n != endpoint)
      .collect();
    let members = Arc::new(RwLock::new(members));
    let consensus = match config.consensus {
      ConsensusKind::ChandraToueg => Arc::new(ChandraToueg::new(
        endpoint.clone(),
        members.clone(),
        transport.clone(),
        log.clone(),
        initial_value,
      )),
    };

    let algorithm: Arc<dyn FailureDetector> = match config.detector {
      DetectorKind::PingAck => Arc::new(PingAck::new(config.ping_ack)),
      DetectorKind::SimpleHeartbeat => Arc::new(SimpleHeartbeat::new(config.heartbeat)),
      DetectorKind::HeartbeatRecovery => Arc::new(HeartbeatRecovery::new(config.heartbeat)),
      DetectorKind::HeartbeatSlidingWindow => {
        Arc::new(HeartbeatSlidingWindow::new(config.window))
      }
      DetectorKind::HeartbeatSuspectLevel => {
        Arc::new(HeartbeatSuspectLevel::new(config.suspect_level))
      }
    };
    let detector: Arc<dyn FailureDetector> = if config.gossipping {
      Arc::new(GossipDetector::new(algorithm, config.gossip))
    } else {
      algorithm
    };

    let (failure_tx, mut failure_rx) = unbounded_channel::<Neighbor>();
    let wiring = Wiring::new(transport.clone(), endpoint.clone(), log.clone(), failure_tx);
    let initial: Vec<Neighbor> = members.read().unwrap().iter().cloned().collect();
    detector.initialize(wiring, initial).await;

    let node = Node {
      inner: Arc::new(NodeImpl {
        endpoint: endpoint,
        neighbors: members,
        transport: transport,
        detector: detector,
        consensus: consensus,
        log: log,
        fail_map: fail_map,
        user_handler: config.user_handler,
      }),
    };

    let (frame_tx, mut frame_rx) = unbounded_channel::<Vec<u8>>();
    node.inner.transport.clone().start(frame_tx);
    let router = node.inner.clone();
    tokio::spawn(async move {
      while let Some(frame) = frame_rx.recv().await {
        router.route(frame).await;
      }
    });

    let upcalls = node.inner.clone();
    tokio::spawn(async move {
      while let Some(suspect) = failure_rx.recv().await {
        upcalls.consensus.on_failure_detected(&suspect).await;
      }
    });

    node.inner.detector.clone().detect_failures();

    if let Some(delay) = config.consensus_warmup {
      let warm = node.inner.clone();
      tokio::spawn(async move {
        sleep(delay).await;
        warm.consensus.start_consensus().await;
      });
    }

    info!(
      LOG_LEVEL,
      node.inner.log,
      format!(
        "up with {} initial neighbors",
        node.inner.neighbors.read().unwrap().len()
      )
    );
    Ok(node)
  }

  pub fn endpoint(&self) -> &Neighbor {
    &self.inner.endpoint
  }

  /// The node's current proposal value.
  pub fn value(&self) -> String {
    self.inner.consensus.value()
  }

  pub fn set_value(&self, value: String) {
    self.inner.consensus.set_value(value);
  }

  /// The last decided value.
  pub fn decision(&self) -> String {
    self.inner.consensus.decision()
  }

  pub fn round(&self) -> u64 {
    self.inner.consensus.round()
  }

  pub fn neighbors(&self) -> Vec<Neighbor> {
    self.inner.neighbors.read().unwrap().iter().cloned().collect()
  }

  pub async fn suspected(&self) -> Vec<Neighbor> {
    self.inner.detector.suspected_list().await
  }

  pub async fn start_consensus(&self) {
    self.inner.consensus.start_consensus().await;
  }

  /// Ships an application message to a peer.
  pub async fn send_user(&self, value: serde_json::Value, to: &Neighbor) {
    let env = Envelope::user(self.inner.endpoint.clone(), value);
    self.inner.transport.send(&env, to).await;
  }

  pub fn set_log_level(&self, level: LogLevel) {
    self.inner.log.set_level(level);
  }

  /// Handle to this node's outbound failure plan. Tests freeze and resume nodes through it.
  pub fn fail_map(&self) -> Arc<RwLock<FailureConfigMap>> {
    self.inner.fail_map.clone()
  }
}
