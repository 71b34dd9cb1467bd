//! Connection metadata and log records delivered to policy observers

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use time::OffsetDateTime;

/// An `ip:port` pair describing one endpoint of an intercepted connection.
///
/// Victim, proxy, and downstream addresses all share this shape. The fields
/// are strings so downstreams resolved by hostname keep their name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Addr {
  /// IP address, or a hostname for name-resolved downstreams
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub ip: String,
  /// TCP port
  #[serde(default, skip_serializing_if = "String::is_empty")]
  pub port: String,
}

impl Addr {
  /// Create an address from anything string-like.
  pub fn new(ip: impl Into<String>, port: impl Into<String>) -> Self {
    Self {
      ip: ip.into(),
      port: port.into(),
    }
  }
}

impl fmt::Display for Addr {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.ip, self.port)
  }
}

impl From<SocketAddr> for Addr {
  fn from(addr: SocketAddr) -> Self {
    Self {
      ip: addr.ip().to_string(),
      port: addr.port().to_string(),
    }
  }
}

/// Severity of a [`LogRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
  /// Lifecycle messages from the server and handlers
  Info,
  /// Failures worth an operator's attention
  Error,
  /// Per-connection state transitions
  Debug,
  /// Records carrying intercepted data
  Data,
}

impl fmt::Display for LogLevel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      LogLevel::Info => "info",
      LogLevel::Error => "error",
      LogLevel::Debug => "debug",
      LogLevel::Data => "data",
    };
    f.write_str(s)
  }
}

/// Snapshot of a single intercepted connection.
///
/// Built once the victim address is known and handed to observers by value;
/// observers never see later mutations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnInfo {
  /// Instant the victim connection was accepted
  #[serde(with = "time::serde::rfc3339")]
  pub time: OffsetDateTime,
  /// Address of the victim
  pub victim: Addr,
  /// Address the proxy accepted the victim on
  pub proxy: Addr,
  /// Downstream address.
  ///
  /// Unlike victim and proxy this may be absent, so initial traffic can be
  /// captured for connections that never get a downstream.
  pub downstream: Option<Addr>,
}

impl ConnInfo {
  /// A snapshot with only the proxy side populated, used for server-level
  /// records emitted outside any connection.
  pub(crate) fn server(proxy: Addr) -> Self {
    Self {
      time: OffsetDateTime::now_utc(),
      victim: Addr::default(),
      proxy,
      downstream: None,
    }
  }
}

/// A log event emitted while dissecting a connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
  /// Severity
  pub level: LogLevel,
  /// Human-readable message
  pub msg: String,
  /// Connection snapshot at the moment of emission
  #[serde(flatten)]
  pub conn_info: ConnInfo,
}
