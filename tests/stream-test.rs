use std::time::Duration;
use tokio::sync::mpsc::unbounded_channel;
use tokio::time::{sleep, timeout, Instant};
use vigil::core::{
  DetectorKind, HeartbeatConfig, Neighbor, Node, NodeConfig, Protocol,
};

fn endpoint(port: u16) -> Neighbor {
  format!("127.0.0.1:{}", port).parse().unwrap()
}

fn config() -> NodeConfig {
  NodeConfig {
    protocol: Protocol::Tcp,
    detector: DetectorKind::SimpleHeartbeat,
    heartbeat: HeartbeatConfig {
      heartbeat_interval: Duration::from_millis(200),
      detect_interval: Duration::from_millis(400),
      roundtrip: Duration::from_millis(50),
    },
    ..NodeConfig::default()
  }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn heartbeats_work_over_framed_streams() {
  let n1 = Node::spawn(endpoint(6701), vec![endpoint(6702)], String::new(), config())
    .await
    .unwrap();
  let n2 = Node::spawn(endpoint(6702), vec![endpoint(6701)], String::new(), config())
    .await
    .unwrap();

  sleep(Duration::from_millis(600)).await;
  assert!(n1.suspected().await.is_empty());
  assert!(n2.suspected().await.is_empty());

  n2.fail_map().write().unwrap().freeze();
  let deadline = Instant::now() + Duration::from_secs(2);
  loop {
    if n1.suspected().await == vec![endpoint(6702)] {
      break;
    }
    assert!(Instant::now() < deadline, "conviction never happened over tcp");
    sleep(Duration::from_millis(50)).await;
  }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn user_messages_reach_the_user_handler() {
  let (tx, mut rx) = unbounded_channel::<(Neighbor, serde_json::Value)>();
  let mut receiver_config = config();
  receiver_config.user_handler = Some(Box::new(move |from, value| {
    let _ = tx.send((from, value));
  }));

  let receiver = Node::spawn(endpoint(6711), vec![endpoint(6712)], String::new(), receiver_config)
    .await
    .unwrap();
  let sender = Node::spawn(endpoint(6712), vec![endpoint(6711)], String::new(), config())
    .await
    .unwrap();
  sleep(Duration::from_millis(200)).await;

  sender
    .send_user(serde_json::json!({"op": "set", "n": 3}), receiver.endpoint())
    .await;

  let (from, value) = timeout(Duration::from_secs(2), rx.recv())
    .await
    .expect("no user message arrived")
    .unwrap();
  assert_eq!(from, endpoint(6712));
  assert_eq!(value, serde_json::json!({"op": "set", "n": 3}));
}
