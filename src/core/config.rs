use crate::testkit::FailureConfigMap;
use serde_json::Value;
use std::time::Duration;

/// How a node's single port speaks to the world.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Protocol {
  Tcp,
  Udp,
}

/// Which failure-detector algorithm the node runs.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DetectorKind {
  PingAck,
  SimpleHeartbeat,
  HeartbeatRecovery,
  HeartbeatSlidingWindow,
  HeartbeatSuspectLevel,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConsensusKind {
  ChandraToueg,
}

/// Callback for application messages the router could not hand to the detector or to consensus.
pub type UserHandler = Box<dyn Fn(crate::core::Neighbor, Value) + Send + Sync>;

/// Knobs for the active ping/ack prober. The defaults are the normative constants; tests shrink
/// them proportionally.
#[derive(Clone, Copy, Debug)]
pub struct PingAckConfig {
  pub ping_interval: Duration,
  pub detect_interval: Duration,
  pub tolerate_failure_for: Duration,
}
impl Default for PingAckConfig {
  fn default() -> Self {
    PingAckConfig {
      ping_interval: Duration::from_millis(4000),
      detect_interval: Duration::from_millis(6000),
      tolerate_failure_for: Duration::from_millis(10000),
    }
  }
}

/// Knobs shared by the fixed and recovery-adjusted heartbeat detectors. A peer is convicted when
/// its silence exceeds `roundtrip + heartbeat_interval`.
#[derive(Clone, Copy, Debug)]
pub struct HeartbeatConfig {
  pub heartbeat_interval: Duration,
  pub detect_interval: Duration,
  pub roundtrip: Duration,
}
impl Default for HeartbeatConfig {
  fn default() -> Self {
    HeartbeatConfig {
      heartbeat_interval: Duration::from_millis(2000),
      detect_interval: Duration::from_millis(4000),
      roundtrip: Duration::from_millis(500),
    }
  }
}

/// Knobs for the sliding-window heartbeat detector. The acceptable roundtrip is the mean of the
/// newest `window` samples; `initial_roundtrip` seeds the sample list so the mean is never
/// undefined.
#[derive(Clone, Copy, Debug)]
pub struct WindowConfig {
  pub heartbeat_interval: Duration,
  pub detect_interval: Duration,
  pub window: usize,
  pub initial_roundtrip: Duration,
}
impl Default for WindowConfig {
  fn default() -> Self {
    WindowConfig {
      heartbeat_interval: Duration::from_millis(2000),
      detect_interval: Duration::from_millis(4000),
      window: 50,
      initial_roundtrip: Duration::from_millis(2000),
    }
  }
}

#[derive(Clone, Copy, Debug)]
pub struct SuspectLevelConfig {
  pub window: WindowConfig,
  pub suspect_level_maximum: u32,
}
impl Default for SuspectLevelConfig {
  fn default() -> Self {
    SuspectLevelConfig {
      window: WindowConfig::default(),
      suspect_level_maximum: 3,
    }
  }
}

#[derive(Clone, Copy, Debug)]
pub struct GossipConfig {
  pub gossip_interval: Duration,
}
impl Default for GossipConfig {
  fn default() -> Self {
    GossipConfig {
      gossip_interval: Duration::from_millis(10000),
    }
  }
}

/// Everything a [`Node`](crate::core::Node) needs beyond its endpoint, neighbors and initial
/// value. Configuration is programmatic; there is no config file.
pub struct NodeConfig {
  pub protocol: Protocol,
  pub detector: DetectorKind,
  pub consensus: ConsensusKind,
  pub gossipping: bool,
  pub verbose: bool,
  /// When set, the node schedules one `start_consensus` this long after startup.
  pub consensus_warmup: Option<Duration>,
  pub fail_map: FailureConfigMap,
  pub ping_ack: PingAckConfig,
  pub heartbeat: HeartbeatConfig,
  pub window: WindowConfig,
  pub suspect_level: SuspectLevelConfig,
  pub gossip: GossipConfig,
  pub user_handler: Option<UserHandler>,
}
impl Default for NodeConfig {
  fn default() -> Self {
    NodeConfig {
      protocol: Protocol::Udp,
      detector: DetectorKind::SimpleHeartbeat,
      consensus: ConsensusKind::ChandraToueg,
      gossipping: false,
      verbose: false,
      consensus_warmup: None,
      fail_map: FailureConfigMap::default(),
      ping_ack: PingAckConfig::default(),
      heartbeat: HeartbeatConfig::default(),
      window: WindowConfig::default(),
      suspect_level: SuspectLevelConfig::default(),
      gossip: GossipConfig::default(),
      user_handler: None,
    }
  }
}
