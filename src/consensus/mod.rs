//! Rotating-coordinator consensus in the style of Chandra and Toueg. One engine per node, one
//! concurrent consensus run per engine: propose, let the round's coordinator pick the newest
//! preference out of a quorum, acknowledge, decide. When the local failure detector convicts the
//! current coordinator the engine advances the round and proposes again, so termination rides on
//! the detector being eventually accurate about somebody.

use crate::core::LogLevel;

mod chandra_toueg;

// Proposal-by-proposal debug chatter is compiled out; decisions, abandoned runs and
// coordinator failures remain.
pub(crate) const LOG_LEVEL: LogLevel = LogLevel::Info;

pub use chandra_toueg::ChandraToueg;
