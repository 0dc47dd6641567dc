use crate::core::transport::{failure_draw, Transport};
use crate::core::{encode, Envelope, LogRef, Neighbor, LOG_LEVEL};
use crate::testkit::FailureConfigMap;
use crate::warn;
use async_trait::async_trait;
use std::io;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, RwLock};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::UnboundedSender;

// Inbound length prefixes beyond this are treated as garbage and drop the connection.
const MAX_FRAME: usize = 1 << 22;

/// Stream transport: each message is one short-lived connection carrying a 4-byte little-endian
/// length prefix and exactly that many payload bytes.
pub struct TcpTransport {
  listener: Mutex<Option<TcpListener>>,
  fail_map: Arc<RwLock<FailureConfigMap>>,
  log: LogRef,
}
impl TcpTransport {
  pub async fn bind(
    port: u16,
    fail_map: Arc<RwLock<FailureConfigMap>>,
    log: LogRef,
  ) -> io::Result<TcpTransport> {
    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await?;
    Ok(TcpTransport {
      listener: Mutex::new(Some(listener)),
      fail_map: fail_map,
      log: log,
    })
  }

  async fn write_frame(stream: &mut TcpStream, bytes: &[u8]) -> io::Result<()> {
    stream.write_all(&(bytes.len() as u32).to_le_bytes()).await?;
    stream.write_all(bytes).await?;
    stream.shutdown().await
  }

  /// Reads frames off one inbound connection until EOF or a bad frame.
  async fn drain_connection(
    mut stream: TcpStream,
    frames: UnboundedSender<Vec<u8>>,
    log: LogRef,
  ) {
    loop {
      let mut size = [0u8; 4];
      if stream.read_exact(&mut size).await.is_err() {
        return;
      }
      let len = u32::from_le_bytes(size) as usize;
      if len > MAX_FRAME {
        warn!(LOG_LEVEL, log, format!("dropping connection with {} byte frame", len));
        return;
      }
      let mut payload = vec![0u8; len];
      match stream.read_exact(payload.as_mut_slice()).await {
        Ok(_) => {
          if frames.send(payload).is_err() {
            return;
          }
        }
        Err(e) => {
          warn!(LOG_LEVEL, log, format!("truncated frame: {}", e));
          return;
        }
      }
    }
  }
}
#[async_trait]
impl Transport for TcpTransport {
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
    // TODO: keep a connection per peer instead of dialing once per message
    match TcpStream::connect(addr).await {
      Ok(mut stream) => {
        if let Err(e) = Self::write_frame(&mut stream, bytes.as_slice()).await {
          warn!(LOG_LEVEL, self.log, format!("send to {} failed: {}", to, e));
        }
      }
      Err(e) => {
        warn!(LOG_LEVEL, self.log, format!("connect to {} failed: {}", to, e));
      }
    }
  }

  fn start(self: Arc<Self>, frames: UnboundedSender<Vec<u8>>) {
    let listener = self
      .listener
      .lock()
      .unwrap()
      .take()
      .expect("tcp receive loop started twice");
    tokio::spawn(async move {
      loop {
        match listener.accept().await {
          Ok((stream, _)) => {
            tokio::spawn(Self::drain_connection(
              stream,
              frames.clone(),
              self.log.clone(),
            ));
          }
          Err(e) => {
            warn!(LOG_LEVEL, self.log, format!("accept failed: {}", e));
          }
        }
      }
    });
  }
}
