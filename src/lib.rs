//! [`Vigil`](crate) is a peer-to-peer node framework for experimenting with unreliable failure
//! detectors and a failure-detector-driven consensus protocol. Each process hosts one [`Node`]
//! with a mutable proposal value, a set of peer endpoints, a pluggable failure detector, an
//! optional gossip wrapper that disseminates suspect sets, and a consensus engine that drives the
//! node's value to a network-wide agreed decision despite crash failures of a minority of
//! participants.
//!
//! # What's Inside
//! ### Failure Detectors
//! Five algorithms share one capability trait: an active ping/ack prober with a fixed tolerance
//! window, a passive heartbeat listener with a fixed acceptable roundtrip, a heartbeat listener
//! that enlarges a peer's roundtrip after every recovery, a heartbeat listener whose threshold is
//! the mean of a sliding window of measured roundtrips, and a soft-counter variant that convicts
//! only after several consecutive missed windows. A gossip decorator wraps any of them and
//! periodically trades suspect sets with the neighbor graph, so conviction of a peer can travel
//! further than direct communication does.
//!
//! ### Consensus
//! The [`consensus`](crate::consensus) module implements Chandra–Toueg rotating-coordinator
//! consensus. The engine consumes failure notifications from the local detector: when the
//! coordinator of the current round is convicted, the round advances and the proposal is made
//! again. With a majority of live participants and an eventually accurate detector, every
//! reachable node converges on the same value.
//!
//! ### Transports
//! Messages travel either as single UDP datagrams or as length-prefixed frames over short-lived
//! TCP connections. Transport failures are logged and swallowed; detectors reason only about the
//! absence of return traffic.
//!
//! Nothing here is production software. There is no authentication, no persistence, and no
//! Byzantine tolerance. The point is to watch detectors and consensus interact under injected
//! partial failure, which the [`testkit`](crate::testkit) makes cheap to arrange.
//!
//! [`Node`]: crate::core::Node

pub mod consensus;
pub mod core;
pub mod detector;
pub mod testkit;
