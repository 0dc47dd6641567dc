use crate::core::Neighbor;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How outbound messages covered by one plan misbehave: an independent drop draw per message,
/// then a uniform jitter draw for the survivors.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize)]
pub struct FailureConfig {
  drop_prob: f64,
  jitter: Option<(Duration, Duration)>,
}
impl FailureConfig {
  /// Builds a validated plan.
  ///
  /// # Panics
  ///
  /// Panics if `drop_prob` is not a probability or the jitter range is inverted.
  pub fn new(drop_prob: f64, jitter: Option<(Duration, Duration)>) -> FailureConfig {
    assert!(
      (0.0..=1.0).contains(&drop_prob),
      "drop_prob must be within [0, 1]"
    );
    if let Some((min, max)) = jitter {
      assert!(min <= max, "jitter range is inverted");
    }
    FailureConfig {
      drop_prob: drop_prob,
      jitter: jitter,
    }
  }

  /// Drops everything. A node whose plan is `lost()` looks crashed to its peers.
  pub fn lost() -> FailureConfig {
    FailureConfig {
      drop_prob: 1.0,
      jitter: None,
    }
  }

  /// One draw against this plan: `None` drops the message, `Some(wait)` ships it after the
  /// drawn jitter. The healthy default always returns `Some(Duration::ZERO)`.
  pub fn draw(&self) -> Option<Duration> {
    if rand::random::<f64>() < self.drop_prob {
      return None;
    }
    match self.jitter {
      Some((min, max)) => Some(rand::thread_rng().gen_range(min..=max)),
      None => Some(Duration::ZERO),
    }
  }
}

/// The outbound failure plans of one node. Destinations without a plan of their own follow the
/// shared plan; a frozen map drops every message regardless, which is how tests crash a node
/// without losing the plans it should wake back up with.
#[derive(Clone, Default, Deserialize, Serialize)]
pub struct FailureConfigMap {
  frozen: bool,
  everyone: FailureConfig,
  destinations: im::HashMap<Neighbor, FailureConfig>,
}
impl FailureConfigMap {
  /// One draw for a message bound for `dest`, under whichever plan covers it.
  pub fn draw(&self, dest: &Neighbor) -> Option<Duration> {
    if self.frozen {
      return None;
    }
    self.destinations.get(dest).unwrap_or(&self.everyone).draw()
  }

  /// Installs the plan every uncovered destination follows.
  pub fn set_everyone(&mut self, plan: FailureConfig) {
    self.everyone = plan;
  }

  /// Installs a plan for one destination, replacing any previous one.
  pub fn set(&mut self, dest: Neighbor, plan: FailureConfig) {
    self.destinations.insert(dest, plan);
  }

  /// Simulates a crash: nothing leaves this node until [`thaw`](Self::thaw).
  pub fn freeze(&mut self) {
    self.frozen = true;
  }

  pub fn thaw(&mut self) {
    self.frozen = false;
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn peer(port: u16) -> Neighbor {
    format!("127.0.0.1:{}", port).parse().unwrap()
  }

  #[test]
  fn healthy_plans_ship_without_jitter() {
    let map = FailureConfigMap::default();
    assert_eq!(map.draw(&peer(9001)), Some(Duration::ZERO));
  }

  #[test]
  fn destination_plans_override_the_shared_plan() {
    let dead = peer(9011);
    let mut map = FailureConfigMap::default();
    map.set(dead.clone(), FailureConfig::lost());
    assert_eq!(map.draw(&dead), None);
    assert_eq!(map.draw(&peer(9012)), Some(Duration::ZERO));
  }

  #[test]
  fn freezing_silences_every_destination_and_thawing_restores_the_plans() {
    let friend = peer(9021);
    let mut map = FailureConfigMap::default();
    map.set(friend.clone(), FailureConfig::default());
    map.freeze();
    assert_eq!(map.draw(&friend), None);
    assert_eq!(map.draw(&peer(9022)), None);
    map.thaw();
    assert_eq!(map.draw(&friend), Some(Duration::ZERO));
  }

  #[test]
  fn jitter_draws_stay_inside_the_range() {
    let min = Duration::from_millis(10);
    let max = Duration::from_millis(20);
    let plan = FailureConfig::new(0.0, Some((min, max)));
    for _ in 0..50 {
      let wait = plan.draw().unwrap();
      assert!(wait >= min && wait <= max);
    }
  }

  #[test]
  #[should_panic(expected = "drop_prob")]
  fn drop_probability_must_be_a_probability() {
    FailureConfig::new(1.5, None);
  }

  #[test]
  #[should_panic(expected = "jitter range")]
  fn inverted_jitter_ranges_are_rejected() {
    FailureConfig::new(
      0.0,
      Some((Duration::from_millis(20), Duration::from_millis(10))),
    );
  }
}
