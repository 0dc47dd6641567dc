use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use tokio::net::lookup_host;

/// The DNS name or IP address of the machine hosting a peer.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize)]
pub enum Host {
  DNS(String),
  IP(IpAddr),
}
impl From<String> for Host {
  fn from(s: String) -> Self {
    match IpAddr::from_str(s.as_str()) {
      Ok(ip) => Host::IP(ip),
      Err(_) => Host::DNS(s),
    }
  }
}
impl fmt::Display for Host {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Host::DNS(s) => write!(f, "{}", s),
      Host::IP(ip) => write!(f, "{}", ip),
    }
  }
}

/// A known peer endpoint. Neighbors are totally ordered by `(host, port)`, which is what makes
/// the rotating-coordinator selection in [`consensus`](crate::consensus) deterministic across
/// nodes that share a membership snapshot.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Ord, PartialOrd, Serialize)]
pub struct Neighbor {
  pub host: Host,
  pub port: u16,
}
impl Neighbor {
  pub fn new(host: Host, port: u16) -> Neighbor {
    Neighbor {
      host: host,
      port: port,
    }
  }

  /// Resolves this endpoint to a raw [`SocketAddr`]. A DNS host performs a lookup and takes the
  /// first IPv4 candidate.
  pub async fn as_addr(&self) -> io::Result<SocketAddr> {
    match &self.host {
      Host::IP(ip) => Ok(SocketAddr::new(*ip, self.port)),
      Host::DNS(s) => {
        let mut addrs = lookup_host((s.as_str(), self.port)).await?;
        addrs.find(|a| a.is_ipv4()).ok_or_else(|| {
          io::Error::new(io::ErrorKind::NotFound, format!("no IPv4 address for {}", s))
        })
      }
    }
  }
}
impl fmt::Display for Neighbor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.host, self.port)
  }
}
impl FromStr for Neighbor {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (host, port) = s
      .rsplit_once(':')
      .ok_or_else(|| format!("expected <host>:<port>, got {:?}", s))?;
    if host.is_empty() {
      return Err(format!("empty host in {:?}", s));
    }
    let port = port
      .parse::<u16>()
      .map_err(|_| format!("bad port in {:?}", s))?;
    Ok(Neighbor::new(Host::from(host.to_string()), port))
  }
}
