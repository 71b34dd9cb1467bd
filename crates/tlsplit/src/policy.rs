//! Policy contracts queried by the engine
//!
//! A [`Policy`] decides, per connection, where traffic goes and which TLS
//! configurations wrap each leg. The three async operations are mandatory;
//! event delivery and fingerprint customization are optional capabilities
//! discovered through the probing accessors, so embedders implement only
//! what they need.

use crate::error::Result;
use crate::record::{Addr, ConnInfo, LogRecord};
use bytes::Bytes;
use std::sync::Arc;
use tokio_rustls::rustls::{ClientConfig, ServerConfig};

/// Decides how each intercepted connection is handled.
///
/// Shared by every handler task; implementations must tolerate concurrent
/// calls. Callbacks are free to suspend or block, and the engine awaits
/// them before moving the connection forward.
#[async_trait::async_trait]
pub trait Policy: Send + Sync {
  /// Resolve the downstream target for a victim connection.
  ///
  /// Returning `Ok(None)` means there is no downstream, but the connection
  /// continues into the capture path so a [`DataReceiver`] still sees the
  /// victim's opening bytes. Returning an error aborts the connection.
  async fn resolve_downstream(&self, proxy: &Addr, victim: &Addr) -> Result<Option<Addr>>;

  /// TLS configuration for the victim leg, fetched once the first bytes
  /// fingerprint as a ClientHello.
  ///
  /// `downstream` is `None` when no downstream was resolved, so a
  /// certificate can be chosen before (or without) a downstream.
  async fn proxy_tls_config(
    &self,
    victim: &Addr,
    proxy: &Addr,
    downstream: Option<&Addr>,
  ) -> Result<Arc<ServerConfig>>;

  /// TLS configuration for the downstream leg.
  ///
  /// Called only when the victim leg was upgraded to TLS and a downstream
  /// was dialed. Skipping certificate verification and exporting NSS key
  /// log material are both expressed through the returned config.
  async fn downstream_tls_config(
    &self,
    victim: &Addr,
    proxy: &Addr,
    downstream: &Addr,
  ) -> Result<Arc<ClientConfig>>;

  /// Override of the default ClientHello fingerprinter.
  fn handshaker(&self) -> Option<&dyn Handshaker> {
    None
  }

  /// Sink for log records.
  fn log_receiver(&self) -> Option<&dyn LogReceiver> {
    None
  }

  /// Sink for connection start/end notifications.
  fn conn_receiver(&self) -> Option<&dyn ConnInfoReceiver> {
    None
  }

  /// Sink for cleartext data crossing the proxy.
  fn data_receiver(&self) -> Option<&dyn DataReceiver> {
    None
  }
}

/// Custom TLS fingerprinting over the first bytes a victim sends.
pub trait Handshaker: Send + Sync {
  /// Check the peeked prefix for a TLS handshake.
  fn is_handshake(&self, prefix: &[u8]) -> bool;

  /// Number of bytes to peek for fingerprinting.
  ///
  /// The connection suspends until this many bytes arrive (or the
  /// fingerprint deadline fires), so a large value stalls that connection.
  fn handshake_len(&self) -> usize;
}

/// Receives log records from the engine.
pub trait LogReceiver: Send + Sync {
  /// Called at various points of execution as connections are handled.
  fn recv_log(&self, record: LogRecord);
}

/// Receives connection lifecycle notifications.
///
/// Every `recv_conn_start` is eventually paired with exactly one
/// `recv_conn_end` carrying the same address tuple.
pub trait ConnInfoReceiver: Send + Sync {
  /// A connection reached the relay stage.
  fn recv_conn_start(&self, info: ConnInfo);

  /// A connection was torn down.
  fn recv_conn_end(&self, info: ConnInfo);
}

/// Receives cleartext data passing through the proxy.
///
/// Delivery happens on a detached per-connection task and never
/// backpressures the relay; events may arrive after the connection's end
/// notification.
pub trait DataReceiver: Send + Sync {
  /// Data sent by the victim toward the downstream.
  fn recv_victim_data(&self, info: ConnInfo, data: Bytes);

  /// Data returned from the downstream (also used for the one-shot capture
  /// of victim bytes when no downstream exists).
  fn recv_downstream_data(&self, info: ConnInfo, data: Bytes);
}
