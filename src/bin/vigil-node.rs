use std::env::args;
use std::time::Duration;
use tokio::time::sleep;
use vigil::core::{DetectorKind, Neighbor, Node, NodeConfig, Protocol};

fn usage() {
  println!("usage: vigil-node <self-host:port> [neighbor1:port,neighbor2:port,...] [initialValue]");
}

#[tokio::main]
async fn main() {
  let args = args().skip(1).collect::<Vec<_>>();
  if args.is_empty() || args.len() > 3 {
    usage();
    return;
  }
  let endpoint = match args[0].parse::<Neighbor>() {
    Ok(n) => n,
    Err(e) => {
      println!("{}", e);
      usage();
      return;
    }
  };
  let mut neighbors = Vec::new();
  if let Some(list) = args.get(1) {
    for part in list.split(',').filter(|p| !p.is_empty()) {
      match part.parse::<Neighbor>() {
        Ok(n) => neighbors.push(n),
        Err(e) => {
          println!("{}", e);
          usage();
          return;
        }
      }
    }
  }
  let initial_value = args.get(2).cloned().unwrap_or_default();

  let config = NodeConfig {
    protocol: Protocol::Udp,
    detector: DetectorKind::HeartbeatSlidingWindow,
    gossipping: true,
    verbose: true,
    consensus_warmup: Some(Duration::from_secs(5)),
    ..NodeConfig::default()
  };
  match Node::spawn(endpoint, neighbors, initial_value, config).await {
    Ok(_node) => loop {
      sleep(Duration::from_secs(0xffffffff)).await;
    },
    Err(e) => {
      println!("could not start node: {}", e);
    }
  }
}
