//! The basics: peer endpoints, wire messages, the codec, the two transports, the leveled logger
//! and the [`Node`] that ties them to a failure detector and a consensus engine. Everything in
//! [`detector`](crate::detector) and [`consensus`](crate::consensus) is built on top of this
//! module with no internal access.

mod clock;
mod codec;
mod config;
mod logging;
mod messages;
mod node;
mod remoting;
mod tcp;
mod transport;
mod udp;

// The transports and the router trace every frame; that firehose stays off even in verbose
// runs. Startup lines and send-path warnings survive.
pub(crate) const LOG_LEVEL: logging::LogLevel = logging::LogLevel::Info;

#[rustfmt::skip]
pub use {
  clock::now_ms,
  clock::wall_ms,
  codec::decode,
  codec::encode,
  codec::DecodeError,
  config::ConsensusKind,
  config::DetectorKind,
  config::GossipConfig,
  config::HeartbeatConfig,
  config::NodeConfig,
  config::PingAckConfig,
  config::Protocol,
  config::SuspectLevelConfig,
  config::UserHandler,
  config::WindowConfig,
  logging::LogLevel,
  logging::LogRef,
  logging::Logger,
  logging::LoggerMsg,
  messages::ConsensusMsg,
  messages::DetectorMsg,
  messages::Envelope,
  messages::Payload,
  node::Node,
  remoting::Host,
  remoting::Neighbor,
  tcp::TcpTransport,
  transport::Transport,
  udp::UdpTransport,
};
