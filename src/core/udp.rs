use crate::core::transport::{failure_draw, Transport};
use crate::core::{encode, Envelope, LogRef, Neighbor, LOG_LEVEL};
use crate::testkit::FailureConfigMap;
use crate::{trace, warn};
use async_trait::async_trait;
use std::io;
use std::net::Ipv4Addr;
use std::sync::{Arc, RwLock};
use tokio::net::UdpSocket;
use tokio::sync::mpsc::UnboundedSender;

const MAX_UDP_PAYLOAD: usize = 65507;

/// Datagram transport: one message per packet, lossy, unordered. Messages larger than a single
/// datagram are undefined and will simply fail to send.
pub struct UdpTransport {
  socket: UdpSocket,
  fail_map: Arc<RwLock<FailureConfigMap>>,
  log: LogRef,
}
impl UdpTransport {
  pub async fn bind(
    port: u16,
    fail_map: Arc<RwLock<FailureConfigMap>>,
    log: LogRef,
  ) -> io::Result<UdpTransport> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port)).await?;
    Ok(UdpTransport {
      socket: socket,
      fail_map: fail_map,
      log: log,
    })
  }
}
#[async_trait]
impl Transport for UdpTransport {
  async fn send(&self, env: &Envelope, to: &Neighbor) {
    let bytes = match encode(env) {
      Some(b) => b,
      None => {
        warn!(LOG_LEVEL, self.log, format!("could not encode message for {}", to));
        return;
      }
    };
    if !failure_draw(&self.fail_map, to).await {
      return;
    }
    let addr = match to.as_addr().await {
      Ok(a) => a,
      Err(e) => {
        warn!(LOG_LEVEL, self.log, format!("cannot resolve {}: {}", to, e));
        return;
      }
    };
    let out = match UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await {
      Ok(s) => s,
      Err(e) => {
        warn!(LOG_LEVEL, self.log, format!("cannot open send socket: {}", e));
        return;
      }
    };
    if let Err(e) = out.send_to(bytes.as_slice(), addr).await {
      warn!(LOG_LEVEL, self.log, format!("send to {} failed: {}", to, e));
    }
  }

  fn start(self: Arc<Self>, frames: UnboundedSender<Vec<u8>>) {
    tokio::spawn(async move {
      let mut buf = vec![0u8; MAX_UDP_PAYLOAD];
      loop {
        match self.socket.recv_from(buf.as_mut_slice()).await {
          Ok((len, peer)) => {
            trace!(LOG_LEVEL, self.log, format!("{} bytes from {}", len, peer));
            if frames.send(buf[..len].to_vec()).is_err() {
              return;
            }
          }
          Err(e) => {
            warn!(LOG_LEVEL, self.log, format!("receive failed: {}", e));
          }
        }
      }
    });
  }
}
