//! Accept loop and connection accounting

use crate::conn::{self, ConnTunables};
use crate::error::{Error, Result};
use crate::events::EventSink;
use crate::policy::Policy;
use crate::record::{Addr, ConnInfo, LogLevel};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Default deadline for the fingerprint peek on the victim socket.
pub const DEFAULT_FINGERPRINT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default deadline for the dead-downstream capture read.
pub const DEFAULT_CAPTURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default cap on bytes collected by the dead-downstream capture.
pub const DEFAULT_CAPTURE_LIMIT: usize = 4096;

/// TLS-aware intercepting TCP proxy server.
///
/// Owns the listener, spawns one handler task per accepted victim, and
/// maintains the count of connections in flight. Downstream resolution,
/// TLS material, and event delivery are all the [`Policy`]'s business.
///
/// Use [`ProxyServer::new`] for defaults or [`ProxyServer::builder`] to
/// adjust the capture deadlines.
pub struct ProxyServer {
  policy: Arc<dyn Policy>,
  listener: TcpListener,
  active: Arc<AtomicUsize>,
  tunables: ConnTunables,
}

impl ProxyServer {
  /// Create a server over an already-bound listener with default tunables.
  pub fn new(policy: impl Policy + 'static, listener: TcpListener) -> Self {
    Self::with_policy(Arc::new(policy), listener)
  }

  /// Like [`ProxyServer::new`] for policies already behind an `Arc`.
  pub fn with_policy(policy: Arc<dyn Policy>, listener: TcpListener) -> Self {
    Self {
      policy,
      listener,
      active: Arc::new(AtomicUsize::new(0)),
      tunables: ConnTunables::default(),
    }
  }

  /// Start building a server.
  pub fn builder() -> ProxyServerBuilder {
    ProxyServerBuilder::default()
  }

  /// Number of connections currently in flight.
  ///
  /// Incremented once per accepted connection whose victim address could be
  /// determined, decremented when its handler finishes. Callers needing a
  /// drain after cancellation can poll this for zero.
  pub fn active_count(&self) -> usize {
    self.active.load(Ordering::SeqCst)
  }

  /// Local address of the owned listener.
  pub fn local_addr(&self) -> io::Result<SocketAddr> {
    self.listener.local_addr()
  }

  /// Accept and handle connections until `cancel` fires.
  ///
  /// Handler tasks are not tracked: cancellation stops the accept loop, and
  /// in-flight connections run until their sockets close. Returns `Ok` on
  /// clean cancellation; only an unrecoverable accept failure is an error.
  pub async fn serve(&self, cancel: CancellationToken) -> Result<()> {
    let sink = EventSink::new(self.policy.clone());
    let proxy: Addr = match self.listener.local_addr() {
      Ok(addr) => addr.into(),
      Err(e) => {
        sink.log(
          LogLevel::Error,
          format!("failed to parse ip and port from listener: {e}"),
          ConnInfo::server(Addr::default()),
        );
        Addr::default()
      }
    };

    sink.log(
      LogLevel::Info,
      "starting proxy server",
      ConnInfo::server(proxy.clone()),
    );

    let result = loop {
      tokio::select! {
        _ = cancel.cancelled() => break Ok(()),
        accepted = self.listener.accept() => match accepted {
          Ok((socket, _)) => {
            tokio::spawn(conn::handle(
              socket,
              proxy.clone(),
              self.policy.clone(),
              self.tunables.clone(),
              self.active.clone(),
            ));
          }
          Err(_) if cancel.is_cancelled() => break Ok(()),
          Err(e) => {
            sink.log(
              LogLevel::Error,
              format!("error while accepting new connection: {e}"),
              ConnInfo::server(proxy.clone()),
            );
            break Err(Error::Accept(e.to_string()));
          }
        },
      }
    };

    sink.log(
      LogLevel::Info,
      "proxy server stopped",
      ConnInfo::server(proxy),
    );
    result
  }
}

/// Builder for [`ProxyServer`].
#[derive(Default)]
pub struct ProxyServerBuilder {
  policy: Option<Arc<dyn Policy>>,
  listener: Option<TcpListener>,
  fingerprint_timeout: Option<Duration>,
  capture_timeout: Option<Duration>,
  capture_limit: Option<usize>,
}

impl ProxyServerBuilder {
  /// Set the policy driving the server.
  pub fn policy(mut self, policy: Arc<dyn Policy>) -> Self {
    self.policy = Some(policy);
    self
  }

  /// Set the bound listener the server accepts on.
  pub fn listener(mut self, listener: TcpListener) -> Self {
    self.listener = Some(listener);
    self
  }

  /// Deadline for the fingerprint peek (default 5 s).
  pub fn fingerprint_timeout(mut self, timeout: Duration) -> Self {
    self.fingerprint_timeout = Some(timeout);
    self
  }

  /// Deadline for the dead-downstream capture read (default 5 s).
  pub fn capture_timeout(mut self, timeout: Duration) -> Self {
    self.capture_timeout = Some(timeout);
    self
  }

  /// Cap on bytes collected by the dead-downstream capture (default 4 KiB).
  pub fn capture_limit(mut self, limit: usize) -> Self {
    self.capture_limit = Some(limit);
    self
  }

  /// Build the server.
  pub fn build(self) -> Result<ProxyServer> {
    let policy = self
      .policy
      .ok_or_else(|| Error::policy("no policy provided to server builder"))?;
    let listener = self
      .listener
      .ok_or_else(|| Error::Accept("no listener provided to server builder".to_string()))?;
    Ok(ProxyServer {
      policy,
      listener,
      active: Arc::new(AtomicUsize::new(0)),
      tunables: ConnTunables {
        fingerprint_timeout: self
          .fingerprint_timeout
          .unwrap_or(DEFAULT_FINGERPRINT_TIMEOUT),
        capture_timeout: self.capture_timeout.unwrap_or(DEFAULT_CAPTURE_TIMEOUT),
        capture_limit: self.capture_limit.unwrap_or(DEFAULT_CAPTURE_LIMIT),
      },
    })
  }
}

impl Default for ConnTunables {
  fn default() -> Self {
    Self {
      fingerprint_timeout: DEFAULT_FINGERPRINT_TIMEOUT,
      capture_timeout: DEFAULT_CAPTURE_TIMEOUT,
      capture_limit: DEFAULT_CAPTURE_LIMIT,
    }
  }
}

/// Decrements the live-connection counter when a handler exits, whichever
/// path it takes out.
pub(crate) struct ActiveGuard {
  active: Arc<AtomicUsize>,
}

impl ActiveGuard {
  pub(crate) fn new(active: Arc<AtomicUsize>) -> Self {
    active.fetch_add(1, Ordering::SeqCst);
    Self { active }
  }
}

impl Drop for ActiveGuard {
  fn drop(&mut self) {
    self.active.fetch_sub(1, Ordering::SeqCst);
  }
}
