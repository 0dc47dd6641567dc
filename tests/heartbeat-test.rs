use std::time::Duration;
use tokio::time::{sleep, Instant};
use vigil::core::{
  DetectorKind, HeartbeatConfig, Neighbor, Node, NodeConfig, Protocol,
};

fn endpoint(port: u16) -> Neighbor {
  format!("127.0.0.1:{}", port).parse().unwrap()
}

// Default intervals shrunk 10x so the scenario fits CI: deadline is 50 + 200 = 250 ms of silence.
fn config() -> NodeConfig {
  NodeConfig {
    protocol: Protocol::Udp,
    detector: DetectorKind::SimpleHeartbeat,
    heartbeat: HeartbeatConfig {
      heartbeat_interval: Duration::from_millis(200),
      detect_interval: Duration::from_millis(400),
      roundtrip: Duration::from_millis(50),
    },
    ..NodeConfig::default()
  }
}

async fn spawn(port: u16, others: &[u16]) -> Node {
  let neighbors = others.iter().map(|p| endpoint(*p)).collect();
  Node::spawn(endpoint(port), neighbors, String::new(), config())
    .await
    .unwrap()
}

async fn suspects_become(node: &Node, expect: Vec<Neighbor>, timeout: Duration) -> bool {
  let deadline = Instant::now() + timeout;
  loop {
    if node.suspected().await == expect {
      return true;
    }
    if Instant::now() >= deadline {
      return false;
    }
    sleep(Duration::from_millis(50)).await;
  }
}

fn freeze(node: &Node) {
  node.fail_map().write().unwrap().freeze();
}

fn resume(node: &Node) {
  node.fail_map().write().unwrap().thaw();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn paused_peer_is_convicted_then_recovered() {
  let n1 = spawn(6201, &[6202, 6203]).await;
  let n2 = spawn(6202, &[6201, 6203]).await;
  let n3 = spawn(6203, &[6201, 6202]).await;

  // steady state: nobody suspects anybody
  sleep(Duration::from_millis(600)).await;
  assert!(n1.suspected().await.is_empty());
  assert!(n2.suspected().await.is_empty());

  freeze(&n3);
  let lost = vec![endpoint(6203)];
  assert!(suspects_become(&n1, lost.clone(), Duration::from_secs(2)).await);
  assert!(suspects_become(&n2, lost, Duration::from_secs(2)).await);
  // the frozen node still hears the others and suspects nobody
  assert!(n3.suspected().await.is_empty());

  resume(&n3);
  assert!(suspects_become(&n1, vec![], Duration::from_secs(2)).await);
  assert!(suspects_become(&n2, vec![], Duration::from_secs(2)).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn a_node_never_suspects_or_neighbors_itself() {
  let n1 = spawn(6211, &[6211, 6212]).await;
  let _n2 = spawn(6212, &[6211]).await;
  sleep(Duration::from_millis(800)).await;
  assert_eq!(n1.neighbors(), vec![endpoint(6212)]);
  assert!(!n1.suspected().await.contains(n1.endpoint()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unknown_senders_are_learned_on_first_contact() {
  let n1 = spawn(6221, &[6222]).await;
  let n2 = spawn(6222, &[6221, 6223]).await;
  // n3 knows both, but only n2 knows n3
  let n3 = spawn(6223, &[6221, 6222]).await;
  sleep(Duration::from_millis(800)).await;
  assert_eq!(n1.neighbors(), vec![endpoint(6222), endpoint(6223)]);
  assert_eq!(n2.neighbors(), vec![endpoint(6221), endpoint(6223)]);
  assert_eq!(n3.neighbors(), vec![endpoint(6221), endpoint(6222)]);
}
