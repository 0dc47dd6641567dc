use crate::core::Neighbor;
use serde::{Deserialize, Serialize};

/// Everything that crosses the wire: the sending node's receive endpoint plus one protocol
/// payload. Carrying the sender in every message is what lets a node learn neighbors
/// opportunistically, since the datagram source port says nothing about where the peer listens.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Envelope {
  pub from: Neighbor,
  pub payload: Payload,
}
impl Envelope {
  pub fn detector(from: Neighbor, msg: DetectorMsg) -> Envelope {
    Envelope {
      from: from,
      payload: Payload::Detector(msg),
    }
  }

  pub fn consensus(from: Neighbor, msg: ConsensusMsg) -> Envelope {
    Envelope {
      from: from,
      payload: Payload::Consensus(msg),
    }
  }

  pub fn user(from: Neighbor, value: serde_json::Value) -> Envelope {
    Envelope {
      from: from,
      payload: Payload::User(value),
    }
  }
}

/// One discriminated union per protocol. The serde variant tags are the wire type tags; the
/// receiver dispatches on them without ever handling a type-erased value.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum Payload {
  Detector(DetectorMsg),
  Consensus(ConsensusMsg),
  User(serde_json::Value),
}

/// Wire messages owned by the failure detectors.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum DetectorMsg {
  Ping { message_id: u64 },
  Ack { message_id: u64, in_response: u64 },
  Heartbeat,
  SuspectList { suspects: Vec<Neighbor> },
}

/// Wire messages owned by the consensus engine. `Decide` carries the plain agreed value, never
/// the preference record it was drawn from.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub enum ConsensusMsg {
  Preference {
    round: u64,
    preference: String,
    timestamp: u64,
  },
  CoordinatorPreference {
    round: u64,
    preference: String,
  },
  PositiveAck {
    round: u64,
  },
  NegativeAck {
    round: u64,
  },
  Decide {
    preference: String,
  },
  RequestConsensus {
    round: u64,
  },
}
